//! Inbound observation events from the vision pipeline.
//!
//! One event carries a single inference cycle's worth of traffic state. Every
//! field defaults so partial payloads from older pipeline versions still
//! parse; alert payloads arrive either as bare strings or structured objects
//! and are resolved into one canonical shape here, before anything is logged.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Per-type vehicle counts for one lane or one whole intersection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleCounts {
    pub car: u32,
    pub truck: u32,
    pub bus: u32,
    pub motorcycle: u32,
}

impl VehicleCounts {
    pub fn total(&self) -> u64 {
        u64::from(self.car) + u64::from(self.truck) + u64::from(self.bus)
            + u64::from(self.motorcycle)
    }

    pub fn merge(&mut self, other: &VehicleCounts) {
        self.car += other.car;
        self.truck += other.truck;
        self.bus += other.bus;
        self.motorcycle += other.motorcycle;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneObservation {
    pub lane_id: String,
    pub direction: String,
    pub vehicle_count: u32,
    pub vehicle_types: VehicleCounts,
    pub queue_length_meters: f64,
    pub congestion: Option<String>,
}

/// An alert as emitted by the model: sometimes a bare string, sometimes a
/// typed object. Resolved once here rather than duck-typed downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    Plain(String),
    Structured {
        #[serde(rename = "type")]
        kind: String,
        message: String,
    },
}

impl Alert {
    pub fn kind(&self) -> &str {
        match self {
            Alert::Plain(_) => "general",
            Alert::Structured { kind, .. } => kind,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Alert::Plain(message) => message,
            Alert::Structured { message, .. } => message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyVehicle {
    #[serde(rename = "type")]
    pub kind: String,
    pub lane_id: String,
    pub direction: String,
}

/// One analysis cycle's output for a single intersection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationEvent {
    pub lanes: Vec<LaneObservation>,
    pub pedestrians: u32,
    pub avg_wait_seconds: f64,
    pub alerts: Vec<Alert>,
    pub optimization_suggestions: Vec<String>,
    pub emergency_vehicles: Vec<EmergencyVehicle>,
}

impl ObservationEvent {
    /// Combined per-type counts across all lanes. A lane reporting only a
    /// bare `vehicle_count` with no type breakdown is attributed to cars.
    pub fn total_counts(&self) -> VehicleCounts {
        let mut combined = VehicleCounts::default();
        for lane in &self.lanes {
            if lane.vehicle_types.total() > 0 {
                combined.merge(&lane.vehicle_types);
            } else {
                combined.car += lane.vehicle_count;
            }
        }
        combined
    }

    /// Mean queue length over lanes with a valid (finite, non-negative)
    /// reading. `None` when no lane reported one.
    pub fn avg_queue_length(&self) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0u32;
        for lane in &self.lanes {
            let q = lane.queue_length_meters;
            if q.is_finite() && q >= 0.0 {
                sum += q;
                count += 1;
            }
        }
        if count == 0 {
            None
        } else {
            Some(sum / f64::from(count))
        }
    }
}

/// Decodes a JSON-encoded [`ObservationEvent`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid JSON for an event.
pub fn parse_observation(bytes: &[u8]) -> Result<ObservationEvent> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_object_defaults() {
        let event = parse_observation(b"{}").unwrap();
        assert!(event.lanes.is_empty());
        assert_eq!(event.pedestrians, 0);
        assert_eq!(event.avg_wait_seconds, 0.0);
        assert!(event.alerts.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let result = parse_observation(b"not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_mixed_alert_shapes() {
        let raw = br#"{
            "alerts": [
                "Queue building on northbound approach",
                {"type": "congestion", "message": "Lane 2 saturated"}
            ]
        }"#;
        let event = parse_observation(raw).unwrap();

        assert_eq!(event.alerts.len(), 2);
        assert_eq!(event.alerts[0].kind(), "general");
        assert_eq!(
            event.alerts[0].message(),
            "Queue building on northbound approach"
        );
        assert_eq!(event.alerts[1].kind(), "congestion");
        assert_eq!(event.alerts[1].message(), "Lane 2 saturated");
    }

    #[test]
    fn test_total_counts_prefers_type_breakdown() {
        let raw = br#"{
            "lanes": [
                {"lane_id": "l1", "vehicle_count": 9,
                 "vehicle_types": {"car": 5, "truck": 1}},
                {"lane_id": "l2", "vehicle_count": 7}
            ]
        }"#;
        let event = parse_observation(raw).unwrap();
        let counts = event.total_counts();

        // Lane 1 uses its breakdown, lane 2 falls back to bare count as cars.
        assert_eq!(counts.car, 12);
        assert_eq!(counts.truck, 1);
        assert_eq!(counts.total(), 13);
    }

    #[test]
    fn test_avg_queue_length_skips_invalid_lanes() {
        let event = ObservationEvent {
            lanes: vec![
                LaneObservation {
                    queue_length_meters: 10.0,
                    ..Default::default()
                },
                LaneObservation {
                    queue_length_meters: 20.0,
                    ..Default::default()
                },
                LaneObservation {
                    queue_length_meters: -4.0,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        assert_eq!(event.avg_queue_length(), Some(15.0));
    }

    #[test]
    fn test_avg_queue_length_empty() {
        assert_eq!(ObservationEvent::default().avg_queue_length(), None);
    }

    #[test]
    fn test_parse_full_event() {
        let raw = br#"{
            "lanes": [{
                "lane_id": "north_1",
                "direction": "north",
                "vehicle_count": 6,
                "vehicle_types": {"car": 4, "truck": 1, "bus": 1, "motorcycle": 0},
                "queue_length_meters": 32.5,
                "congestion": "medium"
            }],
            "pedestrians": 3,
            "avg_wait_seconds": 24.0,
            "alerts": [],
            "optimization_suggestions": ["Extend green phase on north approach"],
            "emergency_vehicles": [{"type": "ambulance", "lane_id": "north_1", "direction": "north"}]
        }"#;
        let event = parse_observation(raw).unwrap();

        assert_eq!(event.lanes.len(), 1);
        assert_eq!(event.lanes[0].vehicle_types.total(), 6);
        assert_eq!(event.pedestrians, 3);
        assert_eq!(event.optimization_suggestions.len(), 1);
        assert_eq!(event.emergency_vehicles[0].kind, "ambulance");
    }
}
