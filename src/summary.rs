//! Read-side projections over the analytics document.
//!
//! Every function here is pure: it recomputes its view from the document it
//! is handed. Documents are small, so there is no caching layer.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::document::{
    AnalyticsDocument, HourBucket, IncidentRecord, RecommendationRecord, date_key,
};

pub const PEAK_HOURS_LIMIT: usize = 5;
pub const BUSIEST_LOCATIONS_LIMIT: usize = 4;

/// Vehicle-count thresholds for classifying a location's congestion tier.
const HIGH_TRAFFIC_VEHICLES: u64 = 3000;
const MEDIUM_TRAFFIC_VEHICLES: u64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CongestionLevel::Low => "Low",
            CongestionLevel::Medium => "Medium",
            CongestionLevel::High => "High",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub vehicles_today: u64,
    pub incidents_today: u64,
    /// 0 when nothing was observed today, otherwise clamped to [70, 99].
    pub flow_efficiency: u32,
    pub avg_queue_length_m: f64,
    pub time_saved_minutes: f64,
    pub co2_saved_kg: f64,
    pub congestion: CongestionLevel,
}

/// Today's headline numbers, globally or filtered to one location.
///
/// Location filtering scales the global daily total and the savings by the
/// location's share of all-time vehicles; an approximation, not an exact
/// attribution.
pub fn analytics_summary(
    doc: &AnalyticsDocument,
    location_id: Option<&str>,
    now: DateTime<Utc>,
) -> AnalyticsSummary {
    let today = now.date_naive();
    let day = doc.daily_totals.get(&date_key(today));
    let global_vehicles_today = day.map(|d| d.vehicles).unwrap_or(0);

    let share = location_id.map(|location| location_share(doc, location));
    let vehicles_today = match share {
        Some(share) => (global_vehicles_today as f64 * share).round() as u64,
        None => global_vehicles_today,
    };

    let incidents_today = match location_id {
        Some(location) => doc
            .incidents
            .iter()
            .filter(|incident| {
                incident.location_id.as_deref() == Some(location)
                    && incident.timestamp.date_naive() == today
            })
            .count() as u64,
        None => day.map(|d| d.incidents).unwrap_or(0),
    };

    let flow_efficiency = if vehicles_today > 0 {
        (94 - 2 * incidents_today as i64).clamp(70, 99) as u32
    } else {
        0
    };

    let avg_queue_length_m = match location_id {
        Some(location) => doc
            .queue_stats
            .by_location
            .get(location)
            .map(|stats| stats.average())
            .unwrap_or(0.0),
        None => doc.queue_stats.overall.average(),
    };

    let scale = share.unwrap_or(1.0);
    AnalyticsSummary {
        vehicles_today,
        incidents_today,
        flow_efficiency,
        avg_queue_length_m,
        time_saved_minutes: doc.savings_stats.time_saved_minutes * scale,
        co2_saved_kg: doc.savings_stats.co2_saved_kg * scale,
        congestion: congestion_for_efficiency(flow_efficiency),
    }
}

/// This location's share of all vehicles ever observed, in [0, 1].
fn location_share(doc: &AnalyticsDocument, location_id: &str) -> f64 {
    if doc.totals.vehicles == 0 {
        return 0.0;
    }
    let location_vehicles = doc
        .location_stats
        .get(location_id)
        .map(|stats| stats.vehicles)
        .unwrap_or(0);
    location_vehicles as f64 / doc.totals.vehicles as f64
}

fn congestion_for_efficiency(efficiency: u32) -> CongestionLevel {
    if efficiency < 60 {
        CongestionLevel::High
    } else if efficiency < 85 {
        CongestionLevel::Medium
    } else {
        CongestionLevel::Low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeakHour {
    pub hour: u8,
    pub avg_vehicles: f64,
}

/// The top hours by average vehicles per sample, busiest first. Empty when no
/// data exists; no synthetic placeholders.
pub fn peak_hours(doc: &AnalyticsDocument, location_id: Option<&str>) -> Vec<PeakHour> {
    let mut hours: Vec<PeakHour> = hourly_data(doc, location_id)
        .iter()
        .filter(|(_, bucket)| bucket.sample_count > 0)
        .map(|(hour, bucket)| PeakHour {
            hour: *hour,
            avg_vehicles: bucket.vehicle_sum as f64 / bucket.sample_count as f64,
        })
        .collect();
    hours.sort_by(|a, b| b.avg_vehicles.total_cmp(&a.avg_vehicles));
    hours.truncate(PEAK_HOURS_LIMIT);
    hours
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusyLocation {
    pub location_id: String,
    pub vehicles: u64,
    pub congestion: CongestionLevel,
}

/// The top locations by total vehicles, busiest first.
pub fn busiest_locations(doc: &AnalyticsDocument) -> Vec<BusyLocation> {
    let mut locations: Vec<BusyLocation> = doc
        .location_stats
        .iter()
        .map(|(location_id, stats)| BusyLocation {
            location_id: location_id.clone(),
            vehicles: stats.vehicles,
            congestion: congestion_for_volume(stats.vehicles),
        })
        .collect();
    locations.sort_by(|a, b| b.vehicles.cmp(&a.vehicles));
    locations.truncate(BUSIEST_LOCATIONS_LIMIT);
    locations
}

fn congestion_for_volume(vehicles: u64) -> CongestionLevel {
    if vehicles > HIGH_TRAFFIC_VEHICLES {
        CongestionLevel::High
    } else if vehicles > MEDIUM_TRAFFIC_VEHICLES {
        CongestionLevel::Medium
    } else {
        CongestionLevel::Low
    }
}

/// The raw hour buckets for charting; callers derive per-hour averages. A
/// location with no data of its own falls back to the global buckets.
pub fn hourly_data<'a>(
    doc: &'a AnalyticsDocument,
    location_id: Option<&str>,
) -> &'a BTreeMap<u8, HourBucket> {
    if let Some(location) = location_id {
        if let Some(buckets) = doc.location_hourly_buckets.get(location) {
            if !buckets.is_empty() {
                return buckets;
            }
        }
    }
    &doc.hourly_buckets
}

/// The newest `limit` incidents.
pub fn recent_incidents(doc: &AnalyticsDocument, limit: usize) -> &[IncidentRecord] {
    &doc.incidents[..limit.min(doc.incidents.len())]
}

/// The newest `limit` recommendations.
pub fn recent_recommendations(doc: &AnalyticsDocument, limit: usize) -> &[RecommendationRecord] {
    &doc.recommendations[..limit.min(doc.recommendations.len())]
}

/// Full JSON dump of the document. Feeding the output back through
/// [`crate::store::PersistentStore::load`] reproduces an equivalent document.
pub fn export_json(doc: &AnalyticsDocument) -> Result<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate;
    use crate::journal;
    use crate::observation::VehicleCounts;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, hour, 0, 0).unwrap()
    }

    fn counts(car: u32) -> VehicleCounts {
        VehicleCounts {
            car,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_document_summary_is_zeroed() {
        let summary = analytics_summary(&AnalyticsDocument::default(), None, at(9));

        assert_eq!(summary.vehicles_today, 0);
        assert_eq!(summary.incidents_today, 0);
        assert_eq!(summary.flow_efficiency, 0);
        assert_eq!(summary.avg_queue_length_m, 0.0);
        assert_eq!(summary.time_saved_minutes, 0.0);
        assert_eq!(summary.co2_saved_kg, 0.0);
    }

    #[test]
    fn test_flow_efficiency_clamped() {
        let mut doc = AnalyticsDocument::default();
        aggregate::record_observation(&mut doc, &counts(10), 0.0, None, at(9));
        assert_eq!(analytics_summary(&doc, None, at(9)).flow_efficiency, 94);

        for _ in 0..5 {
            journal::record_incident(&mut doc, "congestion", "jam", None, at(9));
        }
        let summary = analytics_summary(&doc, None, at(9));
        assert_eq!(summary.flow_efficiency, 84);
        assert_eq!(summary.congestion, CongestionLevel::Medium);

        for _ in 0..20 {
            journal::record_incident(&mut doc, "congestion", "jam", None, at(9));
        }
        assert_eq!(analytics_summary(&doc, None, at(9)).flow_efficiency, 70);
    }

    #[test]
    fn test_congestion_label_high_when_idle() {
        // No vehicles observed: efficiency 0, which maps to High.
        let summary = analytics_summary(&AnalyticsDocument::default(), None, at(9));
        assert_eq!(summary.congestion, CongestionLevel::High);
    }

    #[test]
    fn test_location_filter_scales_by_vehicle_share() {
        let mut doc = AnalyticsDocument::default();
        doc.totals.vehicles = 100;
        doc.location_stats.entry("i95".to_string()).or_default().vehicles = 25;
        doc.daily_totals.entry("2024-01-10".to_string()).or_default().vehicles = 40;
        doc.savings_stats.time_saved_minutes = 80.0;
        doc.savings_stats.co2_saved_kg = 8.0;

        let summary = analytics_summary(&doc, Some("i95"), at(9));

        assert_eq!(summary.vehicles_today, 10);
        assert_eq!(summary.time_saved_minutes, 20.0);
        assert_eq!(summary.co2_saved_kg, 2.0);

        let unknown = analytics_summary(&doc, Some("nowhere"), at(9));
        assert_eq!(unknown.vehicles_today, 0);
        assert_eq!(unknown.time_saved_minutes, 0.0);
    }

    #[test]
    fn test_location_filter_counts_incidents_from_log() {
        let mut doc = AnalyticsDocument::default();
        doc.totals.vehicles = 10;
        doc.location_stats.entry("i95".to_string()).or_default().vehicles = 10;
        doc.daily_totals.entry("2024-01-10".to_string()).or_default().vehicles = 10;
        journal::record_incident(&mut doc, "accident", "crash", Some("i95"), at(9));
        journal::record_incident(&mut doc, "accident", "crash", Some("elsewhere"), at(9));
        journal::record_incident(
            &mut doc,
            "accident",
            "old crash",
            Some("i95"),
            Utc.with_ymd_and_hms(2024, 1, 9, 9, 0, 0).unwrap(),
        );

        let summary = analytics_summary(&doc, Some("i95"), at(10));
        assert_eq!(summary.incidents_today, 1);
    }

    #[test]
    fn test_peak_hours_top_five_descending() {
        let mut doc = AnalyticsDocument::default();
        for (hour, vehicles) in [(6, 10), (7, 40), (8, 90), (9, 70), (10, 20), (11, 55)] {
            aggregate::record_observation(&mut doc, &counts(vehicles), 0.0, None, at(hour));
        }

        let peaks = peak_hours(&doc, None);
        assert_eq!(peaks.len(), PEAK_HOURS_LIMIT);
        assert_eq!(peaks[0].hour, 8);
        assert_eq!(peaks[0].avg_vehicles, 90.0);
        assert!(
            peaks
                .windows(2)
                .all(|pair| pair[0].avg_vehicles >= pair[1].avg_vehicles)
        );
        // The quietest hour fell off the ranking.
        assert!(peaks.iter().all(|p| p.hour != 6));
    }

    #[test]
    fn test_peak_hours_empty_without_data() {
        assert!(peak_hours(&AnalyticsDocument::default(), None).is_empty());
    }

    #[test]
    fn test_busiest_locations_ranked_and_tiered() {
        let mut doc = AnalyticsDocument::default();
        for (location, vehicles) in [
            ("a", 4000u64),
            ("b", 2000),
            ("c", 1000),
            ("d", 500),
            ("e", 100),
        ] {
            doc.location_stats.entry(location.to_string()).or_default().vehicles = vehicles;
        }

        let busiest = busiest_locations(&doc);
        assert_eq!(busiest.len(), BUSIEST_LOCATIONS_LIMIT);
        assert_eq!(busiest[0].location_id, "a");
        assert_eq!(busiest[0].congestion, CongestionLevel::High);
        assert_eq!(busiest[1].congestion, CongestionLevel::Medium);
        assert_eq!(busiest[2].congestion, CongestionLevel::Low);
        assert!(busiest.iter().all(|b| b.location_id != "e"));
    }

    #[test]
    fn test_hourly_data_falls_back_to_global() {
        let mut doc = AnalyticsDocument::default();
        aggregate::record_observation(&mut doc, &counts(5), 0.0, Some("i95"), at(8));

        // Known location returns its own buckets.
        assert_eq!(hourly_data(&doc, Some("i95"))[&8].vehicle_sum, 5);
        // Unknown location falls back to the global buckets.
        assert_eq!(hourly_data(&doc, Some("unknown"))[&8].vehicle_sum, 5);
        assert_eq!(hourly_data(&doc, None).len(), 1);
    }

    #[test]
    fn test_recent_logs_respect_limit() {
        let mut doc = AnalyticsDocument::default();
        for i in 0..10 {
            journal::record_incident(&mut doc, "congestion", &format!("jam-{i}"), None, at(9));
        }

        let recent = recent_incidents(&doc, 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].description, "jam-9");

        assert!(recent_recommendations(&doc, 5).is_empty());
    }

    #[test]
    fn test_export_round_trips_through_serde() {
        let mut doc = AnalyticsDocument::default();
        aggregate::record_observation(&mut doc, &counts(7), 15.0, Some("i95"), at(8));
        journal::record_incident(&mut doc, "accident", "crash", Some("i95"), at(8));

        let exported = export_json(&doc).unwrap();
        let restored: AnalyticsDocument = serde_json::from_str(&exported).unwrap();
        assert_eq!(restored, doc);
    }
}
