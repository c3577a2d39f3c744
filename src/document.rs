//! The persisted analytics document and its subtrees.
//!
//! One document exists per identity. Every field defaults so that older or
//! partially written documents deserialize cleanly, missing subtrees included.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Setting key gating historical aggregation.
pub const SETTING_SAVE_HISTORICAL: &str = "save_historical_data";
/// Setting key holding the retention window in days.
pub const SETTING_RETENTION_DAYS: &str = "data_retention_days";
/// Retention window used when the setting is absent or invalid.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// A primitive dashboard setting value. Last write wins; the core only
/// interprets the keys it owns and stores the rest verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Totals {
    #[serde(deserialize_with = "lenient_count")]
    pub vehicles: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub sessions: u64,
}

/// Accepts numbers, null, or a missing field; anything non-finite or negative
/// collapses to 0 instead of poisoning the whole document.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(match raw {
        Some(v) if v.is_finite() && v > 0.0 => v as u64,
        _ => 0,
    })
}

/// Sum and sample count for one hour of day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourBucket {
    pub vehicle_sum: u64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayTotals {
    pub vehicles: u64,
    pub incidents: u64,
    pub sessions: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationStats {
    pub vehicles: u64,
    /// Cumulative running mean, rounded to whole seconds on every update.
    pub avg_wait_seconds: f64,
    /// Number of wait-time samples folded into the mean.
    pub sample_count: u64,
}

/// Running sum and count, for average derivation on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SumCount {
    pub sum: f64,
    pub count: u64,
}

impl SumCount {
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub overall: SumCount,
    pub by_hour: BTreeMap<u8, SumCount>,
    pub by_location: BTreeMap<String, SumCount>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavingsStats {
    pub time_saved_minutes: f64,
    pub co2_saved_kg: f64,
    pub optimizations_applied: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: u64,
    pub kind: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub id: u64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRecord {
    pub id: u64,
    pub kind: String,
    pub lane: String,
    pub direction: String,
    pub timestamp: DateTime<Utc>,
    pub location_id: Option<String>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub response_time_seconds: Option<i64>,
}

/// Ephemeral session pointer. Only affects where new events are attributed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionInfo {
    pub current_location_id: Option<String>,
    pub last_active: Option<DateTime<Utc>>,
}

/// Root persisted object, one per identity. Mutated in place and persisted in
/// full after every mutation; never partitioned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsDocument {
    pub settings: BTreeMap<String, SettingValue>,
    pub totals: Totals,
    /// Hour of day (0-23, wall clock, not date-qualified) to bucket.
    pub hourly_buckets: BTreeMap<u8, HourBucket>,
    pub location_hourly_buckets: BTreeMap<String, BTreeMap<u8, HourBucket>>,
    /// ISO `YYYY-MM-DD` keys; the ordered map keeps them in calendar order.
    pub daily_totals: BTreeMap<String, DayTotals>,
    pub location_stats: BTreeMap<String, LocationStats>,
    pub queue_stats: QueueStats,
    pub savings_stats: SavingsStats,
    /// Newest first, bounded to 100.
    pub incidents: Vec<IncidentRecord>,
    /// Newest first, bounded to 50, deduplicated over a 5-minute window.
    pub recommendations: Vec<RecommendationRecord>,
    /// Newest first, bounded to 50; cleared in place.
    pub emergency_events: Vec<EmergencyRecord>,
    pub session: SessionInfo,
    /// Bumped on every save, together with [`Self::last_writer`], so readers
    /// can detect writes made by another process.
    pub revision: u64,
    pub last_writer: u32,
}

impl AnalyticsDocument {
    /// Repairs known-fragile fields after deserialization: out-of-range hour
    /// keys are dropped and non-finite running values collapse to zero.
    pub fn sanitize(&mut self) {
        self.hourly_buckets.retain(|hour, _| *hour <= 23);
        for buckets in self.location_hourly_buckets.values_mut() {
            buckets.retain(|hour, _| *hour <= 23);
        }
        self.queue_stats.by_hour.retain(|hour, _| *hour <= 23);

        if !self.queue_stats.overall.sum.is_finite() {
            self.queue_stats.overall = SumCount::default();
        }
        for stats in self.location_stats.values_mut() {
            if !stats.avg_wait_seconds.is_finite() {
                stats.avg_wait_seconds = 0.0;
            }
        }
        if !self.savings_stats.time_saved_minutes.is_finite() {
            self.savings_stats.time_saved_minutes = 0.0;
        }
        if !self.savings_stats.co2_saved_kg.is_finite() {
            self.savings_stats.co2_saved_kg = 0.0;
        }
    }

    pub fn save_historical_data(&self) -> bool {
        match self.settings.get(SETTING_SAVE_HISTORICAL) {
            Some(SettingValue::Bool(enabled)) => *enabled,
            _ => true,
        }
    }

    pub fn retention_days(&self) -> u32 {
        match self.settings.get(SETTING_RETENTION_DAYS) {
            Some(SettingValue::Number(days)) if *days >= 1.0 => *days as u32,
            _ => DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn set_setting(&mut self, key: &str, value: SettingValue) {
        self.settings.insert(key.to_string(), value);
    }
}

/// ISO `YYYY-MM-DD` key for a calendar date, as used by `daily_totals`.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
