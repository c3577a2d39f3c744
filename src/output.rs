//! Output formatting and persistence for analytics data.
//!
//! Supports the CSV ingest audit log, the user-facing CSV chart export, and
//! the full JSON dump, each optionally gzip-compressed where it makes sense.

use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::document::AnalyticsDocument;
use crate::summary;

/// One ingested batch, summarized for the audit log.
#[derive(Debug, Serialize)]
pub struct IngestRecord {
    pub timestamp: DateTime<Utc>,
    pub location_id: Option<String>,
    pub vehicles: u64,
    pub avg_wait_seconds: f64,
    pub avg_queue_length_m: Option<f64>,
    pub incidents: usize,
    pub recommendations: usize,
    pub emergency_vehicles: usize,
}

/// Appends an [`IngestRecord`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &str, record: &IngestRecord) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// One row of the exported chart series.
#[derive(Debug, Serialize)]
struct ChartRow {
    #[serde(rename = "Period")]
    period: &'static str,
    #[serde(rename = "Label")]
    label: String,
    #[serde(rename = "Congestion Value")]
    congestion_value: f64,
    #[serde(rename = "Samples")]
    samples: u64,
}

/// Writes the hourly and daily chart series as CSV. Hourly rows carry the
/// per-hour vehicle average and sample count; daily rows carry the day's
/// vehicle total and session count.
pub fn write_csv_export(
    path: &Path,
    doc: &AnalyticsDocument,
    location_id: Option<&str>,
    gzip: bool,
) -> Result<()> {
    let mut writer = WriterBuilder::new().from_writer(open_export(path, gzip)?);

    for (hour, bucket) in summary::hourly_data(doc, location_id) {
        if bucket.sample_count == 0 {
            continue;
        }
        writer.serialize(ChartRow {
            period: "hourly",
            label: format!("{hour:02}:00"),
            congestion_value: bucket.vehicle_sum as f64 / bucket.sample_count as f64,
            samples: bucket.sample_count,
        })?;
    }

    for (date, day) in &doc.daily_totals {
        writer.serialize(ChartRow {
            period: "daily",
            label: date.clone(),
            congestion_value: day.vehicles as f64,
            samples: day.sessions,
        })?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes the full document as a JSON dump. The output round-trips through
/// [`crate::store::PersistentStore::load`].
pub fn write_json_export(path: &Path, doc: &AnalyticsDocument, gzip: bool) -> Result<()> {
    let mut out = open_export(path, gzip)?;
    out.write_all(summary::export_json(doc)?.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn open_export(path: &Path, gzip: bool) -> Result<Box<dyn Write>> {
    let file = File::create(path)?;
    Ok(if gzip {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    })
}
