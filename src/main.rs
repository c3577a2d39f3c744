//! CLI entry point for the realtime traffic analytics core.
//!
//! Provides subcommands for ingesting vision-pipeline observation batches,
//! sampling a source on an interval, inspecting summaries, exporting data,
//! and maintaining the persisted per-identity analytics documents.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use traffic_rt_analytics::{
    analytics::AnalyticsStore,
    clock::SystemClock,
    document::SettingValue,
    fetch::{BasicClient, auth::ApiKey, fetch_bytes},
    ingest::{IngestOutcome, ingest_observation},
    observation::{ObservationEvent, parse_observation},
    output::{IngestRecord, append_record, write_csv_export, write_json_export},
    store::PersistentStore,
    summary,
    sync::StoreWatcher,
};

#[derive(Parser)]
#[command(name = "traffic_rt_analytics")]
#[command(about = "Rolling analytics over realtime traffic vision output", long_about = None)]
struct Cli {
    /// Directory holding the persisted analytics documents
    #[arg(short, long, default_value = "data", global = true)]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a single observation batch from a file or URL
    Ingest {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Location the batch is attributed to (defaults to the stored
        /// session location)
        #[arg(short, long)]
        location: Option<String>,

        /// CSV audit log to append a per-batch summary row to
        #[arg(long)]
        audit_csv: Option<String>,

        /// API key sent as a bearer token when fetching over HTTP
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Sample a source on a fixed interval, ingesting each batch
    Consume {
        /// Path to file or URL to fetch each round
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Location the batches are attributed to
        #[arg(short, long)]
        location: Option<String>,

        /// Sample rate: query the source every X seconds
        #[arg(short = 'r', long, default_value_t = 60)]
        sample_rate: u64,

        /// Number of samples to collect (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 1)]
        num_samples: usize,

        /// CSV audit log to append per-batch summary rows to
        #[arg(long)]
        audit_csv: Option<String>,

        /// API key sent as a bearer token when fetching over HTTP
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Print the analytics summary and rankings
    Summary {
        /// Restrict the summary to one location
        #[arg(short, long)]
        location: Option<String>,
    },
    /// Export analytics as CSV chart series or a full JSON dump
    Export {
        #[arg(value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,

        /// File to write the export to
        #[arg(short, long, default_value = "analytics_export.csv")]
        output: String,

        /// Restrict the hourly series to one location
        #[arg(short, long)]
        location: Option<String>,

        /// Gzip compress the exported file
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Prune aggregates older than the retention window
    Cleanup {
        /// Days of history to keep (defaults to the stored setting)
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Reset analytics data, keeping settings and the session pointer
    Clear,
    /// Set the active identity used to namespace documents
    Identity {
        /// Email of the active identity; omit to clear it
        email: Option<String>,
    },
    /// Store a dashboard setting (bool, number, or text)
    Config { key: String, value: String },
    /// Record estimated savings from an applied optimization
    RecordSavings {
        #[arg(long, default_value_t = 0.0)]
        time_minutes: f64,

        #[arg(long, default_value_t = 0.0)]
        co2_kg: f64,
    },
    /// Watch for writes from other processes and re-print the summary
    Watch {
        /// Seconds between polls of the persisted document
        #[arg(short, long, default_value_t = 5)]
        poll_secs: u64,

        /// Restrict the summary to one location
        #[arg(short, long)]
        location: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/traffic_rt_analytics.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("traffic_rt_analytics.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let store = PersistentStore::new(&cli.data_dir);

    match cli.command {
        Commands::Ingest {
            source,
            location,
            audit_csv,
            api_key,
        } => {
            let bytes = fetcher(&source, api_key.as_deref()).await?;
            let event = parse_observation(&bytes)?;

            let mut analytics = AnalyticsStore::open(store, Arc::new(SystemClock));
            if location.is_some() {
                analytics.set_current_location(location.as_deref());
            }
            let outcome = ingest_observation(&mut analytics, &event);
            info!(
                vehicles = outcome.vehicles,
                incidents = outcome.incidents,
                recommendations = outcome.recommendations,
                emergencies = outcome.emergency_events,
                "Observation batch ingested"
            );

            if let Some(path) = audit_csv {
                append_record(
                    &path,
                    &audit_row(&analytics, &event, &outcome),
                )?;
            }
        }
        Commands::Consume {
            source,
            location,
            sample_rate,
            num_samples,
            audit_csv,
            api_key,
        } => {
            consume(
                store,
                &source,
                location.as_deref(),
                sample_rate,
                num_samples,
                audit_csv.as_deref(),
                api_key.as_deref(),
            )
            .await?;
        }
        Commands::Summary { location } => {
            let analytics = AnalyticsStore::open(store, Arc::new(SystemClock));
            let location = location.as_deref();

            let summary = analytics.summary(location);
            info!("{}", serde_json::to_string_pretty(&summary)?);

            for peak in analytics.peak_hours(location) {
                info!(
                    hour = peak.hour,
                    avg_vehicles = %format!("{:.1}", peak.avg_vehicles),
                    "Peak hour"
                );
            }
            for busy in analytics.busiest_locations() {
                info!(
                    location = %busy.location_id,
                    vehicles = busy.vehicles,
                    congestion = %busy.congestion,
                    "Busy location"
                );
            }
            for incident in analytics.recent_incidents(5) {
                info!(
                    kind = %incident.kind,
                    description = %incident.description,
                    timestamp = %incident.timestamp,
                    "Recent incident"
                );
            }
            for recommendation in analytics.recent_recommendations(5) {
                info!(text = %recommendation.text, "Recent recommendation");
            }
        }
        Commands::Export {
            format,
            output,
            location,
            gzip,
        } => {
            let analytics = AnalyticsStore::open(store, Arc::new(SystemClock));
            match format {
                ExportFormat::Csv => write_csv_export(
                    Path::new(&output),
                    analytics.document(),
                    location.as_deref(),
                    gzip,
                )?,
                ExportFormat::Json => {
                    write_json_export(Path::new(&output), analytics.document(), gzip)?
                }
            }
            info!(%output, gzip, "Export complete");
        }
        Commands::Cleanup { retention_days } => {
            let mut analytics = AnalyticsStore::open(store, Arc::new(SystemClock));
            let days = retention_days.unwrap_or_else(|| analytics.document().retention_days());
            analytics.cleanup_old_data(days);
            info!(retention_days = days, "Retention pruning complete");
        }
        Commands::Clear => {
            let mut analytics = AnalyticsStore::open(store, Arc::new(SystemClock));
            analytics.clear_analytics();
        }
        Commands::Identity { email } => {
            store.set_identity(email.as_deref())?;
            match email {
                Some(email) => info!(%email, "Active identity set"),
                None => info!("Active identity cleared"),
            }
        }
        Commands::Config { key, value } => {
            let mut analytics = AnalyticsStore::open(store, Arc::new(SystemClock));
            let value = parse_setting(&value);
            info!(%key, ?value, "Setting stored");
            analytics.set_setting(&key, value);
        }
        Commands::RecordSavings {
            time_minutes,
            co2_kg,
        } => {
            let mut analytics = AnalyticsStore::open(store, Arc::new(SystemClock));
            analytics.record_savings(time_minutes, co2_kg);
            info!(time_minutes, co2_kg, "Savings recorded");
        }
        Commands::Watch {
            poll_secs,
            location,
        } => {
            let mut watcher = StoreWatcher::new();
            info!(poll_secs, "Watching for document updates");
            loop {
                if let Some(doc) = watcher.poll(&store) {
                    let view = summary::analytics_summary(&doc, location.as_deref(), Utc::now());
                    info!("{}", serde_json::to_string_pretty(&view)?);
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(poll_secs)).await;
            }
        }
    }

    Ok(())
}

/// Loads observation bytes from a local file path or fetches them over HTTP.
#[tracing::instrument(skip(api_key), fields(source = %source))]
async fn fetcher(source: &str, api_key: Option<&str>) -> Result<Vec<u8>> {
    let bytes = if source.starts_with("http") {
        let client = BasicClient::new();
        match api_key {
            Some(key) => fetch_bytes(&ApiKey::bearer(client, key.to_string()), source)
                .await?
                .to_vec(),
            None => fetch_bytes(&client, source).await?.to_vec(),
        }
    } else {
        std::fs::read(source)?
    };
    Ok(bytes)
}

/// Samples a source at a fixed interval, ingesting each batch and running
/// retention pruning once per local date rollover.
#[tracing::instrument(
    skip(store, audit_csv, api_key),
    fields(source, sample_rate, num_samples)
)]
async fn consume(
    store: PersistentStore,
    source: &str,
    location: Option<&str>,
    sample_rate: u64,
    num_samples: usize,
    audit_csv: Option<&str>,
    api_key: Option<&str>,
) -> Result<()> {
    let mut analytics = AnalyticsStore::open(store, Arc::new(SystemClock));
    analytics.start_session(location);

    if num_samples == 0 {
        info!(sample_rate, "Sampling infinitely. Press Ctrl+C to stop.");
    } else {
        info!(num_samples, sample_rate, "Starting sample collection");
    }

    let mut sample_count = 0;
    let mut last_cleanup_date: Option<chrono::NaiveDate> = None;

    loop {
        // Check if we've reached the sample limit (0 = infinite)
        if num_samples > 0 && sample_count >= num_samples {
            break;
        }

        sample_count += 1;

        // Run retention pruning once per date rollover
        let today = Utc::now().date_naive();
        if last_cleanup_date.is_none() || last_cleanup_date.unwrap() < today {
            let days = analytics.document().retention_days();
            analytics.cleanup_old_data(days);
            info!(retention_days = days, "Retention pruning done");
            last_cleanup_date = Some(today);
        }

        info!(
            sample = sample_count,
            total = if num_samples == 0 {
                None
            } else {
                Some(num_samples)
            },
            "Starting sample round"
        );

        // Pick up writes made by other processes between rounds.
        if analytics.refresh_if_stale() {
            info!("Adopted document updated by another process");
        }

        match fetcher(source, api_key).await {
            Ok(bytes) => match parse_observation(&bytes) {
                Ok(event) => {
                    let outcome = ingest_observation(&mut analytics, &event);
                    info!(
                        vehicles = outcome.vehicles,
                        incidents = outcome.incidents,
                        recommendations = outcome.recommendations,
                        emergencies = outcome.emergency_events,
                        "Batch ingested"
                    );
                    if let Some(path) = audit_csv {
                        if let Err(e) = append_record(path, &audit_row(&analytics, &event, &outcome))
                        {
                            error!(error = %e, "Failed to append audit record");
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Observation parse failed");
                }
            },
            Err(e) => {
                warn!(error = %e, "Observation fetch failed");
            }
        }

        // If not the last sample, wait before next iteration
        if num_samples == 0 || sample_count < num_samples {
            info!(sample_rate, "Waiting before next sample");
            tokio::time::sleep(tokio::time::Duration::from_secs(sample_rate)).await;
        }
    }

    analytics.flush();
    info!(sample_count, "Finished sampling");
    Ok(())
}

fn audit_row(
    analytics: &AnalyticsStore,
    event: &ObservationEvent,
    outcome: &IngestOutcome,
) -> IngestRecord {
    IngestRecord {
        timestamp: Utc::now(),
        location_id: analytics.current_location(),
        vehicles: outcome.vehicles,
        avg_wait_seconds: event.avg_wait_seconds,
        avg_queue_length_m: event.avg_queue_length(),
        incidents: outcome.incidents,
        recommendations: outcome.recommendations,
        emergency_vehicles: outcome.emergency_events,
    }
}

/// Interprets a raw CLI value as the closest primitive setting type.
fn parse_setting(raw: &str) -> SettingValue {
    if let Ok(flag) = raw.parse::<bool>() {
        return SettingValue::Bool(flag);
    }
    if let Ok(number) = raw.parse::<f64>() {
        return SettingValue::Number(number);
    }
    SettingValue::Text(raw.to_string())
}
