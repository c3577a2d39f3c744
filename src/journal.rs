//! Bounded, deduplicating event logs: incidents, recommendations, and
//! emergency events.
//!
//! All three logs are kept newest first; trimming always drops from the tail.
//! Ids are wall-clock milliseconds, bumped past the newest entry on collision
//! so they stay unique and monotonic within a log.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::document::{
    AnalyticsDocument, EmergencyRecord, IncidentRecord, RecommendationRecord, date_key,
};

pub const MAX_INCIDENTS: usize = 100;
pub const MAX_RECOMMENDATIONS: usize = 50;
pub const MAX_EMERGENCY_EVENTS: usize = 50;

/// An identical recommendation inside this window is a repeat of the same
/// standing suggestion, not a new event.
pub const RECOMMENDATION_DEDUP_SECS: i64 = 5 * 60;

fn next_id(newest: Option<u64>, now: DateTime<Utc>) -> u64 {
    let candidate = now.timestamp_millis().max(0) as u64;
    match newest {
        Some(latest) if candidate <= latest => latest + 1,
        _ => candidate,
    }
}

/// Prepends an incident, trims the log to [`MAX_INCIDENTS`], and bumps the
/// matching day's incident counter. Returns the new record's id.
pub fn record_incident(
    doc: &mut AnalyticsDocument,
    kind: &str,
    description: &str,
    location_id: Option<&str>,
    now: DateTime<Utc>,
) -> u64 {
    let id = next_id(doc.incidents.first().map(|i| i.id), now);
    doc.incidents.insert(
        0,
        IncidentRecord {
            id,
            kind: kind.to_string(),
            description: description.to_string(),
            timestamp: now,
            location_id: location_id.map(str::to_string),
        },
    );
    doc.incidents.truncate(MAX_INCIDENTS);

    doc.daily_totals
        .entry(date_key(now.date_naive()))
        .or_default()
        .incidents += 1;

    id
}

/// Prepends a recommendation unless an identical text was logged within the
/// dedup window. Returns whether an entry was inserted.
pub fn record_recommendation(
    doc: &mut AnalyticsDocument,
    text: &str,
    location_id: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    let repeat = doc.recommendations.iter().any(|existing| {
        existing.text == text
            && (now - existing.timestamp).num_seconds() < RECOMMENDATION_DEDUP_SECS
    });
    if repeat {
        debug!(text, "Skipping repeated recommendation inside dedup window");
        return false;
    }

    let id = next_id(doc.recommendations.first().map(|r| r.id), now);
    doc.recommendations.insert(
        0,
        RecommendationRecord {
            id,
            text: text.to_string(),
            timestamp: now,
            location_id: location_id.map(str::to_string),
        },
    );
    doc.recommendations.truncate(MAX_RECOMMENDATIONS);
    true
}

/// Prepends an uncleared emergency event and returns its id so a later call
/// can record clearance.
pub fn record_emergency_event(
    doc: &mut AnalyticsDocument,
    kind: &str,
    lane: &str,
    direction: &str,
    location_id: Option<&str>,
    now: DateTime<Utc>,
) -> u64 {
    let id = next_id(doc.emergency_events.first().map(|e| e.id), now);
    doc.emergency_events.insert(
        0,
        EmergencyRecord {
            id,
            kind: kind.to_string(),
            lane: lane.to_string(),
            direction: direction.to_string(),
            timestamp: now,
            location_id: location_id.map(str::to_string),
            cleared_at: None,
            response_time_seconds: None,
        },
    );
    doc.emergency_events.truncate(MAX_EMERGENCY_EVENTS);
    id
}

/// Records clearance of an emergency event and derives its response time.
/// Idempotent: unknown ids and already-cleared events are no-ops.
pub fn clear_emergency_event(doc: &mut AnalyticsDocument, event_id: u64, now: DateTime<Utc>) -> bool {
    let Some(event) = doc
        .emergency_events
        .iter_mut()
        .find(|event| event.id == event_id)
    else {
        return false;
    };
    if event.cleared_at.is_some() {
        return false;
    }

    event.cleared_at = Some(now);
    let elapsed_ms = (now - event.timestamp).num_milliseconds();
    event.response_time_seconds = Some((elapsed_ms as f64 / 1000.0).round() as i64);
    true
}
