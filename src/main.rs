use anyhow::{anyhow, bail, Context, Result};
use chrono::{FixedOffset, NaiveTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{error, info};

use brandsync::config;
use brandsync::db::{self, SqliteStore, Store};
use brandsync::marketplace::MarketplaceClient;
use brandsync::model::{FlowKind, Mode, ScheduleEntry};
use brandsync::notify;
use brandsync::sync::{resolve_mode, Orchestrator, SyncError};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one reconciliation pass
    Run {
        #[command(subcommand)]
        flow: Flow,
    },
    /// Persist a weekly schedule entry
    Schedule {
        #[arg(long)]
        user_id: i64,
        /// mon, tue, wed, thu, fri, sat or sun
        #[arg(long)]
        day: String,
        /// HH:MM
        #[arg(long)]
        time: String,
        #[arg(long, value_enum)]
        action: ActionArg,
    },
    /// Print an example configuration
    ExampleConfig,
}

#[derive(Debug, Subcommand)]
enum Flow {
    /// Push the default brand out, then repair what did not stick
    Outbound {
        #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
        mode: ModeArg,
    },
    /// Restore recorded original brands on listed products
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Auto,
    Weekday,
    RestDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ActionArg {
    Outbound,
    Inbound,
}

fn parse_weekday(day: &str) -> Result<u8> {
    let idx = match day.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => 0,
        "tue" | "tuesday" => 1,
        "wed" | "wednesday" => 2,
        "thu" | "thursday" => 3,
        "fri" | "friday" => 4,
        "sat" | "saturday" => 5,
        "sun" | "sunday" => 6,
        other => bail!("unknown weekday: {}", other),
    };
    Ok(idx)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/brandsync.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool);

    match args.command {
        Command::ExampleConfig => Ok(()),
        Command::Schedule {
            user_id,
            day,
            time,
            action,
        } => {
            let entry = ScheduleEntry {
                user_id,
                weekday: parse_weekday(&day)?,
                time: NaiveTime::parse_from_str(&time, "%H:%M")
                    .with_context(|| format!("invalid time {:?}, expected HH:MM", time))?,
                action: match action {
                    ActionArg::Outbound => FlowKind::Outbound,
                    ActionArg::Inbound => FlowKind::Inbound,
                },
            };
            let id = store.save_schedule(&entry).await?;
            info!(id, "schedule saved");
            Ok(())
        }
        Command::Run { flow } => {
            let market = MarketplaceClient::from_config(&cfg)?;
            let notifier = notify::from_config(&cfg);
            let orchestrator =
                Orchestrator::new(&store, &market, notifier.as_ref(), cfg.sync_settings());

            let (kind, forced) = match flow {
                Flow::Outbound { mode } => (
                    FlowKind::Outbound,
                    match mode {
                        ModeArg::Auto => None,
                        ModeArg::Weekday => Some(Mode::Weekday),
                        ModeArg::RestDay => Some(Mode::RestDay),
                    },
                ),
                Flow::Inbound => (FlowKind::Inbound, None),
            };
            let offset = FixedOffset::east_opt(cfg.app.utc_offset_hours * 3600)
                .ok_or_else(|| anyhow!("invalid utc offset"))?;
            let today = Utc::now().with_timezone(&offset).date_naive();
            let mode = resolve_mode(&store, forced, today).await?;
            info!(flow = kind.as_str(), mode = mode.as_str(), %today, "starting run");

            match orchestrator.run(kind, mode).await {
                Ok(report) => {
                    info!(summary = %report.summary(), "done");
                    Ok(())
                }
                Err(err @ SyncError::Unauthorized { .. }) => {
                    error!(error = %err, "run aborted");
                    Err(err.into())
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}
