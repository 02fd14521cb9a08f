use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::timer::{commands::DEFAULT_HISTORY_LIMIT, BreakRatio};

pub const DATA_DIR_ENV: &str = "FLOWPOMO_DATA_DIR";

#[derive(Debug, Parser)]
#[command(name = "flowpomo", version, about = "Flow-style focus timer with earned breaks")]
pub struct Cli {
    /// Where the database, settings and legacy files live.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Default log level; RUST_LOG refines it.
    #[arg(long, global = true, default_value = "info", value_parser = parse_level)]
    pub log_level: LevelFilter,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Interactive timer session (the default).
    Run,
    /// Serve the HTTP log relay.
    Relay {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Value of Access-Control-Allow-Origin.
        #[arg(long)]
        origin: Option<String>,
    },
    /// List recent sessions, newest first.
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Flow totals and minutes per day.
    Stats,
    /// Ask the insight service about the session history.
    Analyze,
    /// Show or set the break ratio (e.g. 1/5 or 0.2).
    Ratio {
        #[arg(value_parser = parse_ratio)]
        value: Option<BreakRatio>,
    },
    /// Show the settings file, or change some of its values.
    Config {
        /// Base URL of the log relay.
        #[arg(long)]
        relay_url: Option<String>,
        /// Stop relaying sessions and snapshots.
        #[arg(long, conflicts_with = "relay_url")]
        no_relay: bool,
        /// Insight endpoint; an empty value disables analysis.
        #[arg(long)]
        insights_url: Option<String>,
        /// Seconds between progress snapshots during a flow.
        #[arg(long)]
        snapshot_interval: Option<u64>,
    },
    /// Delete every session and all timer data.
    Reset {
        /// Skip the confirmation notice.
        #[arg(long)]
        yes: bool,
    },
}

fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    raw.parse()
        .map_err(|_| format!("unknown log level '{raw}'"))
}

fn parse_ratio(raw: &str) -> Result<BreakRatio, String> {
    raw.parse().map_err(|err: anyhow::Error| err.to_string())
}

/// `--data-dir`, then `FLOWPOMO_DATA_DIR`, then the platform data directory.
pub fn resolve_data_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("flowpomo"))
        .ok_or_else(|| anyhow!("no data directory available; pass --data-dir"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_interactive_session() {
        let cli = Cli::try_parse_from(["flowpomo"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, LevelFilter::Info);
    }

    #[test]
    fn parses_subcommands_and_global_flags() {
        let cli = Cli::try_parse_from([
            "flowpomo",
            "relay",
            "--port",
            "6000",
            "--data-dir",
            "/tmp/flow",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/flow")));
        assert_eq!(cli.log_level, LevelFilter::Debug);
        match cli.command {
            Some(CliCommand::Relay { port, .. }) => assert_eq!(port, Some(6000)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn ratio_values_are_checked() {
        let cli = Cli::try_parse_from(["flowpomo", "ratio", "1/4"]).unwrap();
        match cli.command {
            Some(CliCommand::Ratio { value }) => {
                assert_eq!(value, Some(BreakRatio::new(0.25).unwrap()))
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["flowpomo", "ratio", "3/2"]).is_err());
    }

    #[test]
    fn config_flags_conflict() {
        let cli = Cli::try_parse_from(["flowpomo", "config", "--no-relay"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(CliCommand::Config { no_relay: true, .. })
        ));
        assert!(Cli::try_parse_from([
            "flowpomo",
            "config",
            "--no-relay",
            "--relay-url",
            "http://localhost:5174/api/log"
        ])
        .is_err());
    }

    #[test]
    fn explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(PathBuf::from("/srv/flow"))).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/flow"));
    }
}
