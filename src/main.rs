//! # Outreach: Cadence Step Execution Engine
//!
//! Runs due cadence steps (LinkedIn actions, email) for enrolled leads and
//! advances each lead through its cadence.
//!
//! Usage:
//!   outreach serve                          # Start the HTTP gateway
//!   outreach process-queue --limit 20       # Run one batch and print the result
//!   outreach start-automation <cadence>     # Schedule every step for every lead
//!   outreach cancel-lead <cadence> <lead>   # Stop a lead (replied/removed)

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use outreach_core::{AuthContext, LeadStatus, OutreachConfig};
use outreach_gateway::AppState;
use outreach_scheduler::{CadenceDb, ProcessQueueRequest};

#[derive(Parser)]
#[command(
    name = "outreach",
    version,
    about = "📬 Outreach: scheduled cadence step execution"
)]
struct Cli {
    /// Config file (default: ~/.outreach/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path, overrides [database].path
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to bind, overrides [gateway].port
        #[arg(short, long)]
        port: Option<u16>,
        /// Host to bind, overrides [gateway].host
        #[arg(long)]
        host: Option<String>,
    },
    /// Execute one batch of due schedules
    ProcessQueue {
        #[arg(long)]
        limit: Option<usize>,
        /// List due schedules without executing them
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        min_delay_ms: Option<u64>,
        #[arg(long)]
        max_delay_ms: Option<u64>,
        /// Bearer token forwarded to the channel and content services
        #[arg(long, env = "OUTREACH_TOKEN")]
        token: Option<String>,
        #[arg(long)]
        org: Option<String>,
    },
    /// Enroll a lead at the first step of a cadence
    Enroll { cadence_id: String, lead_id: String },
    /// Schedule every step for every active lead of an automated cadence
    StartAutomation { cadence_id: String },
    /// Take a lead out of a cadence
    CancelLead {
        cadence_id: String,
        lead_id: String,
        /// replied or removed
        #[arg(long, default_value = "removed")]
        reason: String,
    },
    /// Show recent activity log entries
    Activity {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(cli: &Cli) -> Result<OutreachConfig> {
    let mut config = match &cli.config {
        Some(path) => OutreachConfig::load_from(std::path::Path::new(&expand_path(path)))?,
        None => OutreachConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    Ok(config)
}

fn open_db(config: &OutreachConfig) -> Result<Arc<CadenceDb>> {
    let db_path = expand_path(&config.database.path);
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = CadenceDb::open(
        std::path::Path::new(&db_path),
        std::time::Duration::from_millis(config.database.busy_timeout_ms),
    )?;
    tracing::debug!("💾 Cadence DB opened: {}", db_path);
    Ok(Arc::new(db))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "outreach=debug,outreach_scheduler=debug,outreach_channels=debug,outreach_gateway=debug,tower_http=debug"
    } else {
        "outreach=info,outreach_scheduler=info,outreach_channels=info,outreach_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = load_config(&cli)?;
    let db = open_db(&config)?;

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            println!("📬 Outreach v{}", env!("CARGO_PKG_VERSION"));
            outreach_gateway::start(AppState::new(config, db)).await?;
        }
        Commands::ProcessQueue {
            limit,
            dry_run,
            min_delay_ms,
            max_delay_ms,
            token,
            org,
        } => {
            let state = AppState::new(config, db);
            let req = ProcessQueueRequest {
                min_delay_ms,
                max_delay_ms,
                limit,
                dry_run,
            };
            let resp = state.runner.run(&AuthContext::new(token, org), &req).await?;
            print_json(&resp)?;
        }
        Commands::Enroll { cadence_id, lead_id } => {
            let state = AppState::new(config, db);
            print_json(&state.automation.enroll_lead(&cadence_id, &lead_id)?)?;
        }
        Commands::StartAutomation { cadence_id } => {
            let state = AppState::new(config, db);
            let summary = state
                .automation
                .start_automation(&cadence_id, chrono::Utc::now())?;
            print_json(&summary)?;
        }
        Commands::CancelLead {
            cadence_id,
            lead_id,
            reason,
        } => {
            let status = LeadStatus::parse(&reason)
                .ok_or_else(|| anyhow::anyhow!("unknown lead status: {reason}"))?;
            let state = AppState::new(config, db);
            print_json(&state.automation.cancel_lead(&cadence_id, &lead_id, status)?)?;
        }
        Commands::Activity { limit } => {
            print_json(&db.recent_activity(limit)?)?;
        }
    }

    Ok(())
}
