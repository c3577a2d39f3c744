//! Per-identity persistence of the analytics document.
//!
//! Storage is advisory, not critical-path: save failures are logged and
//! swallowed, and a missing or corrupt document loads as defaults. The
//! in-memory document stays authoritative for the rest of the process.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::document::AnalyticsDocument;

/// Base name for analytics documents; identity-scoped documents append the
/// identity to it, e.g. `traffic_analytics_ops@example.com.json`.
pub const BASE_KEY: &str = "traffic_analytics";

const SESSION_RECORD: &str = "session.json";

/// Small separate record naming the active identity. Read fresh on every
/// load/save so an identity change lands immediately, never cached.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PersistentStore {
    data_dir: PathBuf,
}

impl PersistentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// The identity currently named by the session record, if any.
    pub fn current_identity(&self) -> Option<String> {
        let raw = fs::read(self.data_dir.join(SESSION_RECORD)).ok()?;
        let record: SessionRecord = serde_json::from_slice(&raw).ok()?;
        record.email.filter(|email| !email.is_empty())
    }

    /// Writes the session record naming the active identity; `None` clears it.
    pub fn set_identity(&self, email: Option<&str>) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data dir {}", self.data_dir.display()))?;
        let record = SessionRecord {
            email: email.map(str::to_string),
        };
        let path = self.data_dir.join(SESSION_RECORD);
        fs::write(&path, serde_json::to_vec_pretty(&record)?)
            .with_context(|| format!("writing session record {}", path.display()))?;
        Ok(())
    }

    /// Path of the document for the identity active right now.
    pub fn document_path(&self) -> PathBuf {
        match self.current_identity() {
            Some(email) => self
                .data_dir
                .join(format!("{BASE_KEY}_{}.json", sanitize_identity(&email))),
            None => self.data_dir.join(format!("{BASE_KEY}.json")),
        }
    }

    /// Loads the document for the active identity. Absent or corrupt storage
    /// yields a sanitized default document, never an error.
    pub fn load(&self) -> AnalyticsDocument {
        let path = self.document_path();
        let mut doc = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<AnalyticsDocument>(&bytes) {
                Ok(doc) => doc,
                Err(error) => {
                    warn!(path = %path.display(), %error,
                        "Persisted document is corrupt, starting from defaults");
                    AnalyticsDocument::default()
                }
            },
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No persisted document, starting from defaults");
                AnalyticsDocument::default()
            }
            Err(error) => {
                warn!(path = %path.display(), %error,
                    "Failed to read persisted document, starting from defaults");
                AnalyticsDocument::default()
            }
        };
        doc.sanitize();
        doc
    }

    /// Persists the full document. Failures are logged, never returned.
    pub fn save(&self, doc: &AnalyticsDocument) {
        if let Err(error) = self.try_save(doc) {
            warn!(%error, "Failed to persist analytics document");
        }
    }

    fn try_save(&self, doc: &AnalyticsDocument) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data dir {}", self.data_dir.display()))?;
        let path = self.document_path();
        let body = serde_json::to_vec_pretty(doc)?;

        // Write through a temp file so a concurrent reader never sees a
        // partial document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into place {}", path.display()))?;

        debug!(path = %path.display(), revision = doc.revision, "Document persisted");
        Ok(())
    }
}

/// Flattens an identity into a filename-safe form.
fn sanitize_identity(email: &str) -> String {
    email
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
