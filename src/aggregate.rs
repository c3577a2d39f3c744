//! Incremental aggregation over the stream of traffic observations.
//!
//! Each function folds one observation into the running aggregates of an
//! [`AnalyticsDocument`] and reports whether it changed anything, so the
//! caller knows whether a persist is due. Invalid input degrades to a no-op,
//! never an error.

use chrono::{DateTime, Days, NaiveDate, Timelike, Utc};
use tracing::debug;

use crate::document::{AnalyticsDocument, date_key};
use crate::observation::VehicleCounts;

/// Folds one observation into the hourly, daily, per-location, and total
/// aggregates. Gated by the `save_historical_data` setting.
///
/// The per-location wait average is a cumulative mean using the
/// pre-increment denominator: the new sample is weighted against the prior
/// sample count, then the count advances.
pub fn record_observation(
    doc: &mut AnalyticsDocument,
    counts: &VehicleCounts,
    wait_seconds: f64,
    location_id: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    if !doc.save_historical_data() {
        debug!("Historical aggregation disabled, dropping observation");
        return false;
    }

    let vehicle_count = counts.total();
    let hour = now.hour() as u8;

    let bucket = doc.hourly_buckets.entry(hour).or_default();
    bucket.vehicle_sum += vehicle_count;
    bucket.sample_count += 1;

    if let Some(location) = location_id {
        let bucket = doc
            .location_hourly_buckets
            .entry(location.to_string())
            .or_default()
            .entry(hour)
            .or_default();
        bucket.vehicle_sum += vehicle_count;
        bucket.sample_count += 1;
    }

    doc.daily_totals
        .entry(date_key(now.date_naive()))
        .or_default()
        .vehicles += vehicle_count;

    if let Some(location) = location_id {
        let stats = doc.location_stats.entry(location.to_string()).or_default();
        stats.vehicles += vehicle_count;
        if wait_seconds > 0.0 && wait_seconds.is_finite() {
            let prior = stats.sample_count as f64;
            stats.avg_wait_seconds =
                ((stats.avg_wait_seconds * prior + wait_seconds) / (prior + 1.0)).round();
            stats.sample_count += 1;
        }
    }

    doc.totals.vehicles += vehicle_count;
    true
}

/// Folds one queue-length reading (meters) into the global, hour-keyed, and
/// location-keyed queue accumulators. Negative or non-finite readings are
/// rejected.
pub fn record_queue_length(
    doc: &mut AnalyticsDocument,
    meters: f64,
    location_id: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    if !meters.is_finite() || meters < 0.0 {
        debug!(meters, "Ignoring invalid queue length");
        return false;
    }

    doc.queue_stats.overall.add(meters);
    doc.queue_stats
        .by_hour
        .entry(now.hour() as u8)
        .or_default()
        .add(meters);
    if let Some(location) = location_id {
        doc.queue_stats
            .by_location
            .entry(location.to_string())
            .or_default()
            .add(meters);
    }
    true
}

/// Accumulates estimated savings from one applied optimization. Non-finite
/// inputs default to 0; the applied counter advances either way.
pub fn record_savings(doc: &mut AnalyticsDocument, time_saved_minutes: f64, co2_saved_kg: f64) {
    let time_saved = if time_saved_minutes.is_finite() {
        time_saved_minutes
    } else {
        0.0
    };
    let co2_saved = if co2_saved_kg.is_finite() {
        co2_saved_kg
    } else {
        0.0
    };

    doc.savings_stats.time_saved_minutes += time_saved;
    doc.savings_stats.co2_saved_kg += co2_saved;
    doc.savings_stats.optimizations_applied += 1;
}

/// Drops daily totals and incidents older than `retention_days` before
/// `today`. ISO date keys sort lexicographically by calendar order, so the
/// daily map splits on the cutoff key directly.
pub fn cleanup_old_data(doc: &mut AnalyticsDocument, retention_days: u32, today: NaiveDate) {
    let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(retention_days))) else {
        return;
    };
    let cutoff_key = date_key(cutoff);

    let before = doc.daily_totals.len();
    doc.daily_totals = doc.daily_totals.split_off(cutoff_key.as_str());
    let dropped_days = before - doc.daily_totals.len();

    let before = doc.incidents.len();
    doc.incidents
        .retain(|incident| incident.timestamp.date_naive() >= cutoff);
    let dropped_incidents = before - doc.incidents.len();

    debug!(cutoff = %cutoff_key, dropped_days, dropped_incidents, "Retention pruning done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{SETTING_SAVE_HISTORICAL, SettingValue};
    use crate::journal;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, hour, 30, 0).unwrap()
    }

    fn counts(car: u32, truck: u32) -> VehicleCounts {
        VehicleCounts {
            car,
            truck,
            ..Default::default()
        }
    }

    #[test]
    fn test_three_observations_same_hour() {
        let mut doc = AnalyticsDocument::default();
        for _ in 0..3 {
            record_observation(&mut doc, &counts(5, 1), 20.0, Some("i95"), at(8));
        }

        let stats = &doc.location_stats["i95"];
        assert_eq!(stats.vehicles, 18);
        assert_eq!(stats.avg_wait_seconds, 20.0);
        assert_eq!(stats.sample_count, 3);

        let bucket = &doc.hourly_buckets[&8];
        assert_eq!(bucket.vehicle_sum, 18);
        assert_eq!(bucket.sample_count, 3);

        let mirror = &doc.location_hourly_buckets["i95"][&8];
        assert_eq!(mirror.vehicle_sum, 18);
        assert_eq!(mirror.sample_count, 3);

        assert_eq!(doc.daily_totals["2024-01-10"].vehicles, 18);
        assert_eq!(doc.totals.vehicles, 18);
    }

    #[test]
    fn test_running_wait_average_uses_prior_count() {
        let mut doc = AnalyticsDocument::default();
        let expected = [10.0, 15.0, 20.0];
        for (i, wait) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            record_observation(&mut doc, &counts(1, 0), wait, Some("i95"), at(8));
            assert_eq!(doc.location_stats["i95"].avg_wait_seconds, expected[i]);
        }
        assert_eq!(doc.location_stats["i95"].sample_count, 3);
    }

    #[test]
    fn test_zero_wait_does_not_advance_wait_count() {
        let mut doc = AnalyticsDocument::default();
        record_observation(&mut doc, &counts(3, 0), 0.0, Some("i95"), at(8));

        let stats = &doc.location_stats["i95"];
        assert_eq!(stats.vehicles, 3);
        assert_eq!(stats.avg_wait_seconds, 0.0);
        assert_eq!(stats.sample_count, 0);
    }

    #[test]
    fn test_observation_without_location_skips_location_trees() {
        let mut doc = AnalyticsDocument::default();
        record_observation(&mut doc, &counts(4, 0), 12.0, None, at(8));

        assert!(doc.location_stats.is_empty());
        assert!(doc.location_hourly_buckets.is_empty());
        assert_eq!(doc.totals.vehicles, 4);
    }

    #[test]
    fn test_disabled_historical_setting_is_noop() {
        let mut doc = AnalyticsDocument::default();
        doc.set_setting(SETTING_SAVE_HISTORICAL, SettingValue::Bool(false));

        let changed = record_observation(&mut doc, &counts(5, 0), 10.0, Some("i95"), at(8));

        assert!(!changed);
        assert_eq!(doc.totals.vehicles, 0);
        assert!(doc.hourly_buckets.is_empty());
    }

    #[test]
    fn test_queue_length_updates_all_three_accumulators() {
        let mut doc = AnalyticsDocument::default();
        assert!(record_queue_length(&mut doc, 12.5, Some("i95"), at(8)));
        assert!(record_queue_length(&mut doc, 7.5, Some("i95"), at(8)));

        assert_eq!(doc.queue_stats.overall.average(), 10.0);
        assert_eq!(doc.queue_stats.by_hour[&8].count, 2);
        assert_eq!(doc.queue_stats.by_location["i95"].average(), 10.0);
    }

    #[test]
    fn test_negative_queue_length_rejected() {
        let mut doc = AnalyticsDocument::default();
        assert!(!record_queue_length(&mut doc, -5.0, Some("locA"), at(8)));
        assert_eq!(doc.queue_stats, Default::default());
    }

    #[test]
    fn test_savings_accumulate() {
        let mut doc = AnalyticsDocument::default();
        record_savings(&mut doc, 3.0, 0.4);
        record_savings(&mut doc, 2.0, 0.1);
        record_savings(&mut doc, f64::NAN, f64::INFINITY);

        assert_eq!(doc.savings_stats.time_saved_minutes, 5.0);
        assert_eq!(doc.savings_stats.co2_saved_kg, 0.5);
        assert_eq!(doc.savings_stats.optimizations_applied, 3);
    }

    #[test]
    fn test_cleanup_prunes_daily_totals_and_incidents() {
        let mut doc = AnalyticsDocument::default();
        for day in 1..=10u32 {
            let key = format!("2024-01-{day:02}");
            doc.daily_totals.entry(key).or_default().vehicles = u64::from(day);
            let timestamp = Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap();
            journal::record_incident(&mut doc, "congestion", "jam", None, timestamp);
        }

        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        cleanup_old_data(&mut doc, 5, today);

        let kept: Vec<&String> = doc.daily_totals.keys().collect();
        assert_eq!(
            kept,
            vec![
                "2024-01-05",
                "2024-01-06",
                "2024-01-07",
                "2024-01-08",
                "2024-01-09",
                "2024-01-10"
            ]
        );
        assert_eq!(doc.incidents.len(), 6);
        assert!(
            doc.incidents
                .iter()
                .all(|i| i.timestamp.date_naive() >= NaiveDate::from_ymd_opt(2024, 1, 5).unwrap())
        );
    }
}
