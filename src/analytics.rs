//! The application root: one explicitly constructed [`AnalyticsStore`] owns
//! the in-memory document and wires the aggregation engine, the event logs,
//! and persistence together.
//!
//! Every public mutation leaves the whole document consistent and persists it
//! in full before returning. Persistence failures are logged inside the store
//! and never surface here; the in-memory document stays authoritative.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::aggregate;
use crate::clock::Clock;
use crate::document::{AnalyticsDocument, HourBucket, IncidentRecord, RecommendationRecord,
    SettingValue, date_key};
use crate::journal;
use crate::observation::VehicleCounts;
use crate::store::PersistentStore;
use crate::summary::{self, AnalyticsSummary, BusyLocation, PeakHour};

pub struct AnalyticsStore {
    store: PersistentStore,
    clock: Arc<dyn Clock>,
    document: AnalyticsDocument,
}

impl AnalyticsStore {
    /// Loads the document for the currently active identity.
    pub fn open(store: PersistentStore, clock: Arc<dyn Clock>) -> Self {
        let document = store.load();
        debug!(revision = document.revision, "Analytics store opened");
        Self {
            store,
            clock,
            document,
        }
    }

    pub fn document(&self) -> &AnalyticsDocument {
        &self.document
    }

    fn persist(&mut self) {
        self.document.revision += 1;
        self.document.last_writer = std::process::id();
        self.store.save(&self.document);
    }

    /// Counts a new dashboard session and points it at a location.
    pub fn start_session(&mut self, location_id: Option<&str>) {
        let now = self.clock.now();
        self.document.totals.sessions += 1;
        self.document
            .daily_totals
            .entry(date_key(now.date_naive()))
            .or_default()
            .sessions += 1;
        self.document.session.current_location_id = location_id.map(str::to_string);
        self.document.session.last_active = Some(now);
        self.persist();
    }

    pub fn set_current_location(&mut self, location_id: Option<&str>) {
        self.document.session.current_location_id = location_id.map(str::to_string);
        self.document.session.last_active = Some(self.clock.now());
        self.persist();
    }

    pub fn current_location(&self) -> Option<String> {
        self.document.session.current_location_id.clone()
    }

    pub fn record_observation(
        &mut self,
        counts: &VehicleCounts,
        wait_seconds: f64,
        location_id: Option<&str>,
    ) {
        let now = self.clock.now();
        if aggregate::record_observation(&mut self.document, counts, wait_seconds, location_id, now)
        {
            self.persist();
        }
    }

    pub fn record_queue_length(&mut self, meters: f64, location_id: Option<&str>) {
        let now = self.clock.now();
        if aggregate::record_queue_length(&mut self.document, meters, location_id, now) {
            self.persist();
        }
    }

    pub fn record_savings(&mut self, time_saved_minutes: f64, co2_saved_kg: f64) {
        aggregate::record_savings(&mut self.document, time_saved_minutes, co2_saved_kg);
        self.persist();
    }

    pub fn record_incident(
        &mut self,
        kind: &str,
        description: &str,
        location_id: Option<&str>,
    ) -> u64 {
        let now = self.clock.now();
        let id = journal::record_incident(&mut self.document, kind, description, location_id, now);
        self.persist();
        id
    }

    /// Returns whether the recommendation was logged (false inside the dedup
    /// window).
    pub fn record_recommendation(&mut self, text: &str, location_id: Option<&str>) -> bool {
        let now = self.clock.now();
        if journal::record_recommendation(&mut self.document, text, location_id, now) {
            self.persist();
            true
        } else {
            false
        }
    }

    pub fn record_emergency_event(
        &mut self,
        kind: &str,
        lane: &str,
        direction: &str,
        location_id: Option<&str>,
    ) -> u64 {
        let now = self.clock.now();
        let id = journal::record_emergency_event(
            &mut self.document,
            kind,
            lane,
            direction,
            location_id,
            now,
        );
        self.persist();
        id
    }

    pub fn clear_emergency_event(&mut self, event_id: u64) -> bool {
        let now = self.clock.now();
        if journal::clear_emergency_event(&mut self.document, event_id, now) {
            self.persist();
            true
        } else {
            false
        }
    }

    /// Prunes aggregates older than the retention window ending today.
    pub fn cleanup_old_data(&mut self, retention_days: u32) {
        let today = self.clock.now().date_naive();
        aggregate::cleanup_old_data(&mut self.document, retention_days, today);
        self.persist();
    }

    /// Resets analytics data to defaults, keeping settings and the session
    /// pointer.
    pub fn clear_analytics(&mut self) {
        let settings = std::mem::take(&mut self.document.settings);
        let session = std::mem::take(&mut self.document.session);
        let revision = self.document.revision;
        self.document = AnalyticsDocument {
            settings,
            session,
            revision,
            ..Default::default()
        };
        info!("Analytics data cleared");
        self.persist();
    }

    pub fn set_setting(&mut self, key: &str, value: SettingValue) {
        self.document.set_setting(key, value);
        self.persist();
    }

    /// Adopts the persisted document when another process has written since
    /// our last save. Last writer wins; there is no merge.
    pub fn refresh_if_stale(&mut self) -> bool {
        let persisted = self.store.load();
        if persisted.revision == self.document.revision
            && persisted.last_writer == self.document.last_writer
        {
            return false;
        }
        debug!(
            ours = self.document.revision,
            theirs = persisted.revision,
            "Adopting document written by another process"
        );
        self.document = persisted;
        true
    }

    /// Final persist for the `open -> use -> flush` lifecycle.
    pub fn flush(&mut self) {
        self.persist();
    }

    // Read-side views, all recomputed from the current document.

    pub fn summary(&self, location_id: Option<&str>) -> AnalyticsSummary {
        summary::analytics_summary(&self.document, location_id, self.clock.now())
    }

    pub fn peak_hours(&self, location_id: Option<&str>) -> Vec<PeakHour> {
        summary::peak_hours(&self.document, location_id)
    }

    pub fn busiest_locations(&self) -> Vec<BusyLocation> {
        summary::busiest_locations(&self.document)
    }

    pub fn hourly_data(&self, location_id: Option<&str>) -> &BTreeMap<u8, HourBucket> {
        summary::hourly_data(&self.document, location_id)
    }

    pub fn recent_incidents(&self, limit: usize) -> &[IncidentRecord] {
        summary::recent_incidents(&self.document, limit)
    }

    pub fn recent_recommendations(&self, limit: usize) -> &[RecommendationRecord] {
        summary::recent_recommendations(&self.document, limit)
    }

    pub fn export_json(&self) -> Result<String> {
        summary::export_json(&self.document)
    }
}
