mod cli;
pub mod db;
pub mod insights;
pub mod legacy;
pub mod relay;
pub mod settings;
pub mod stats;
pub mod timer;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

use cli::{resolve_data_dir, Cli, CliCommand};
use db::Database;
use insights::{HttpInsightGenerator, InsightGenerator, InsightService};
use relay::{DisabledRelay, HttpLogRelay, LogRelay};
use settings::{SettingsChange, SettingsStore, SETTINGS_FILE_NAME};
use timer::{
    commands::{handle, render_state, Command, Reply},
    SystemClock, TimerConfig, TimerController, TimerEvent, TimerMode,
};

pub const DB_FILE_NAME: &str = "flowpomo.sqlite3";

pub struct AppState {
    pub db: Database,
    pub timer: TimerController,
    pub settings: SettingsStore,
    pub insights: InsightService,
}

impl AppState {
    /// Opens storage under `data_dir`, imports legacy data and resumes the
    /// timer. Commands are accepted once this returns.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE_NAME))?;
        let current = settings.get();

        let db = Database::new(data_dir.join(DB_FILE_NAME))?;

        let legacy_path = data_dir.join(legacy::LEGACY_FILE_NAME);
        if let Err(err) = legacy::import_legacy_sessions(&db, &legacy_path).await {
            warn!("Legacy session import failed: {err:#}");
        }

        let relay: Arc<dyn LogRelay> = match current.relay_url.as_deref() {
            Some(url) => match HttpLogRelay::new(url) {
                Ok(relay) => Arc::new(relay),
                Err(err) => {
                    warn!("Log relay disabled: {err:#}");
                    Arc::new(DisabledRelay)
                }
            },
            None => Arc::new(DisabledRelay),
        };

        let generator = current.insights_url.as_deref().map(|url| {
            Arc::new(HttpInsightGenerator::new(url, current.insights_api_key()))
                as Arc<dyn InsightGenerator>
        });
        let insights = InsightService::new(db.clone(), generator);

        let config = TimerConfig {
            snapshot_interval: current.snapshot_interval(),
            settle_delay: current.settle_delay(),
            ..TimerConfig::default()
        };
        let timer = TimerController::new(db.clone(), relay, Arc::new(SystemClock), config);
        timer.resume().await?;

        Ok(Self {
            db,
            timer,
            settings,
            insights,
        })
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    utils::logging::init(cli.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let data_dir = resolve_data_dir(cli.data_dir)?;

    let command = match cli.command.unwrap_or(CliCommand::Run) {
        CliCommand::Relay {
            port,
            log_dir,
            origin,
        } => {
            let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE_NAME))?;
            let mut relay_settings = settings.get().relay.with_env_overrides();
            if let Some(port) = port {
                relay_settings.port = port;
            }
            if let Some(log_dir) = log_dir {
                relay_settings.log_dir = log_dir;
            }
            if let Some(origin) = origin {
                relay_settings.allowed_origin = origin;
            }
            return relay::run_relay_server(relay_settings.server_config()).await;
        }
        CliCommand::Config {
            relay_url,
            no_relay,
            insights_url,
            snapshot_interval,
        } => {
            let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE_NAME))?;
            let change = SettingsChange {
                relay_url,
                disable_relay: no_relay,
                insights_url,
                snapshot_interval_secs: snapshot_interval,
            };
            let current = if change.is_empty() {
                settings.get()
            } else {
                settings.update(|settings| change.apply(settings))?
            };
            println!("{}", settings.path().display());
            println!("{}", serde_json::to_string_pretty(&current)?);
            return Ok(());
        }
        CliCommand::Run => None,
        CliCommand::History { limit } => Some(Command::History { limit }),
        CliCommand::Stats => Some(Command::Stats),
        CliCommand::Analyze => Some(Command::Analyze),
        CliCommand::Ratio { value } => Some(Command::Ratio(value)),
        CliCommand::Reset { yes } => Some(Command::Reset { confirmed: yes }),
    };

    info!("Using data directory {}", data_dir.display());
    let app = AppState::open(&data_dir).await?;

    let result = match command {
        Some(command) => match handle(&app, command).await {
            Ok(Reply::Print(text)) => {
                println!("{text}");
                Ok(())
            }
            Ok(Reply::Quit) => Ok(()),
            Err(err) => Err(err),
        },
        None => interactive(&app).await,
    };

    app.timer.shutdown().await;
    result
}

async fn interactive(app: &AppState) -> Result<()> {
    let mut events = app.timer.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", render_state(&app.timer.get_state().await));
    println!("Type 'help' for commands.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read from stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match line.parse::<Command>() {
                    Ok(command) => command,
                    Err(err) => {
                        eprintln!("{err:#}");
                        continue;
                    }
                };
                match handle(app, command).await {
                    Ok(Reply::Print(text)) => println!("{text}"),
                    Ok(Reply::Quit) => break,
                    Err(err) => eprintln!("error: {err:#}"),
                }
            }
            event = events.recv() => match event {
                Ok(TimerEvent::BreakFinished) => println!("Break finished. Ready for the next flow."),
                // One line per full minute of flow.
                Ok(TimerEvent::Tick(state))
                    if state.mode == TimerMode::Flow
                        && state.seconds > 0
                        && state.seconds % 60 == 0 =>
                {
                    println!("{}", render_state(&state));
                }
                Ok(TimerEvent::SnapshotEmitted(record)) => {
                    log::debug!("Snapshot {} relayed", record.id);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => log::debug!("Skipped {skipped} timer events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}
