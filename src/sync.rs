//! Detection of writes made by other processes sharing the same store.
//!
//! There is no locking: the last writer to persistence wins, and readers
//! converge by polling the persisted revision stamp and reloading. Documents
//! are small, so each poll simply reloads and compares.

use tracing::debug;

use crate::document::AnalyticsDocument;
use crate::store::PersistentStore;

/// Polls a [`PersistentStore`] and surfaces the document whenever its
/// `(revision, last_writer)` stamp changes. The first poll always yields the
/// current document so callers can render an initial view.
#[derive(Debug, Default)]
pub struct StoreWatcher {
    last_stamp: Option<(u64, u32)>,
}

impl StoreWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the freshly loaded document when it changed since the last
    /// poll, `None` otherwise.
    pub fn poll(&mut self, store: &PersistentStore) -> Option<AnalyticsDocument> {
        let doc = store.load();
        let stamp = (doc.revision, doc.last_writer);
        if self.last_stamp == Some(stamp) {
            return None;
        }
        self.last_stamp = Some(stamp);
        debug!(
            revision = doc.revision,
            writer = doc.last_writer,
            "Detected document update"
        );
        Some(doc)
    }
}
