//! Boundary between raw vision-pipeline events and the analytics core.
//!
//! One call dispatches a whole observation batch: vehicle totals and wait
//! times into the aggregation engine, queue lengths into the queue
//! accumulators, and alerts, suggestions, and emergency detections into the
//! event logs. Events are attributed to the session's current location.

use tracing::debug;

use crate::analytics::AnalyticsStore;
use crate::observation::ObservationEvent;

/// What one batch contributed, for audit logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub vehicles: u64,
    pub incidents: usize,
    /// Recommendations actually logged; repeats inside the dedup window are
    /// dropped silently.
    pub recommendations: usize,
    pub emergency_events: usize,
}

pub fn ingest_observation(
    analytics: &mut AnalyticsStore,
    event: &ObservationEvent,
) -> IngestOutcome {
    let location = analytics.current_location();
    let location = location.as_deref();

    let counts = event.total_counts();
    analytics.record_observation(&counts, event.avg_wait_seconds, location);

    if let Some(queue) = event.avg_queue_length() {
        analytics.record_queue_length(queue, location);
    }

    for alert in &event.alerts {
        analytics.record_incident(alert.kind(), alert.message(), location);
    }

    let mut recommendations = 0;
    for text in &event.optimization_suggestions {
        if analytics.record_recommendation(text, location) {
            recommendations += 1;
        }
    }

    for vehicle in &event.emergency_vehicles {
        analytics.record_emergency_event(&vehicle.kind, &vehicle.lane_id, &vehicle.direction, location);
    }

    let outcome = IngestOutcome {
        vehicles: counts.total(),
        incidents: event.alerts.len(),
        recommendations,
        emergency_events: event.emergency_vehicles.len(),
    };
    debug!(
        vehicles = outcome.vehicles,
        incidents = outcome.incidents,
        recommendations = outcome.recommendations,
        emergencies = outcome.emergency_events,
        "Observation batch dispatched"
    );
    outcome
}
