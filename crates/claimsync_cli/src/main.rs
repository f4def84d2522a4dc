//! `claimsync` command line.
//!
//! Queues clinical bundles and claims into the local ledger and runs sync
//! cycles against payer endpoints on demand.

mod http_transport;

use anyhow::{anyhow, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use claimsync_core::{
    init_logging, BundleRequest, CycleRequest, DeferralPolicy, IntakeService, RecordStore,
    SqliteRecordStore, SyncConfig, SyncDispatcher,
};
use http_transport::HttpDeliveryTransport;
use log::info;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "claimsync")]
#[command(about = "Offline-first clinical claim queue")]
#[command(version)]
struct Cli {
    /// Queue database path (overrides CLAIMSYNC_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a clinical bundle and queue it
    Generate {
        /// Diagnosis codes as SYSTEM:CODE, e.g. NAMASTE:Prameha
        #[arg(required = true)]
        codes: Vec<String>,
        /// Patient id
        #[arg(long)]
        patient: Option<String>,
        /// Patient display name
        #[arg(long)]
        name: Option<String>,
        /// Free-text diagnosis
        #[arg(long)]
        diagnosis: Option<String>,
        /// Destination URL (defaults to the configured payer)
        #[arg(long)]
        destination: Option<String>,
    },
    /// Queue a claim for an existing bundle JSON file
    Submit {
        /// Path to the bundle JSON
        bundle: PathBuf,
        /// Payer API URL (defaults to the configured payer)
        #[arg(long)]
        api_url: Option<String>,
    },
    /// Run one sync cycle and print its report
    Sync {
        /// Only sync records for this destination
        #[arg(long)]
        destination: Option<String>,
        /// Maximum records attempted this cycle
        #[arg(long)]
        max_batch: Option<u32>,
        /// Per-delivery timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// halt_batch or halt_destination
        #[arg(long)]
        policy: Option<String>,
    },
    /// List pending records
    Pending {
        /// Only list records for this destination
        #[arg(long)]
        destination: Option<String>,
    },
    /// Show one record and its delivery attempts
    Show {
        /// Record id
        id: i64,
    },
    /// List pending records whose last attempt was rejected
    Flagged,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir).map_err(|err| anyhow!(err))?;
    }

    let Some(command) = cli.command else {
        println!("Use 'claimsync --help' for commands");
        return Ok(());
    };

    let store = Arc::new(
        SqliteRecordStore::open(&config.db_path)
            .with_context(|| format!("failed to open queue at {}", config.db_path.display()))?,
    );

    match command {
        Commands::Generate {
            codes,
            patient,
            name,
            diagnosis,
            destination,
        } => {
            let mut request = BundleRequest::new(codes);
            if let Some(patient) = patient {
                request.patient_id = patient;
            }
            request.name = name;
            request.diagnosis = diagnosis;

            let intake = IntakeService::new(store, config.default_destination.clone());
            let submission =
                intake.submit_bundle(&request, Local::now().date_naive(), destination.as_deref())?;
            print_json(&json!({
                "record_id": submission.record_id,
                "destination": submission.destination,
                "delivery_key": submission.delivery_key,
                "bundle": submission.document,
            }))?;
        }
        Commands::Submit { bundle, api_url } => {
            let raw = std::fs::read_to_string(&bundle)
                .with_context(|| format!("failed to read {}", bundle.display()))?;
            let bundle: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", bundle.display()))?;

            let intake = IntakeService::new(store, config.default_destination.clone());
            let submission = intake.submit_claim(&bundle, api_url.as_deref())?;
            print_json(&json!({
                "status": "queued",
                "record_id": submission.record_id,
                "destination": submission.destination,
                "delivery_key": submission.delivery_key,
            }))?;
        }
        Commands::Sync {
            destination,
            max_batch,
            timeout_ms,
            policy,
        } => {
            let mut options = config.sync_options();
            if let Some(max_batch) = max_batch {
                options.max_batch = max_batch;
            }
            if let Some(timeout_ms) = timeout_ms {
                options.delivery_timeout = Duration::from_millis(timeout_ms);
            }
            if let Some(policy) = policy {
                options.deferral_policy = DeferralPolicy::parse(&policy)
                    .ok_or_else(|| anyhow!("unknown deferral policy `{policy}`"))?;
            }

            let transport = Arc::new(HttpDeliveryTransport::new()?);
            let dispatcher = SyncDispatcher::new(store, transport, options);
            let request = CycleRequest {
                destination,
                cancel: None,
            };
            let report = dispatcher.run_cycle(&request)?;
            info!(
                "event=cli_sync module=cli status=ok synced_count={} remaining_count={}",
                report.synced_count, report.remaining_count
            );
            print_json(&report)?;
        }
        Commands::Pending { destination } => {
            let records = match destination.as_deref() {
                Some(destination) => store.list_pending_for(destination, None)?,
                None => store.list_pending(None)?,
            };
            if records.is_empty() {
                println!("No pending records.");
            }
            for record in records {
                println!(
                    "ID: {}, Destination: {}, Created: {}",
                    record.id, record.destination, record.created_at
                );
            }
        }
        Commands::Show { id } => {
            let record = store
                .get_record(id)?
                .ok_or_else(|| anyhow!("record {id} not found"))?;
            let attempts = store.list_attempts(id)?;
            print_json(&json!({ "record": record, "attempts": attempts }))?;
        }
        Commands::Flagged => {
            let records = store.list_flagged()?;
            if records.is_empty() {
                println!("No flagged records.");
            }
            for record in records {
                let last = store.list_attempts(record.id)?.pop();
                println!(
                    "ID: {}, Destination: {}, Reason: {}",
                    record.id,
                    record.destination,
                    last.and_then(|attempt| attempt.detail)
                        .unwrap_or_else(|| "unknown".to_string())
                );
            }
        }
    }

    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
