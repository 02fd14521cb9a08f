//! Text commands for the interactive session and their handlers.

use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use chrono::Local;

use crate::{
    db::{SessionKind, SessionRecord},
    insights::Insight,
    stats,
    utils::time::{format_clock, format_duration},
    AppState,
};

use super::{
    policy::{BreakRatio, RATIO_PRESETS},
    state::{TimerMode, TimerState},
};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    StartFlow,
    EndFlow,
    StartBreak,
    SkipBreak,
    /// `None` lists the presets.
    Ratio(Option<BreakRatio>),
    Status,
    History { limit: usize },
    Stats,
    Analyze,
    Reset { confirmed: bool },
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        let mut words = input.split_whitespace();
        let Some(name) = words.next() else {
            bail!("empty command");
        };
        let arg = words.next();
        if words.next().is_some() {
            bail!("too many arguments for '{name}'");
        }

        let command = match (name.to_ascii_lowercase().as_str(), arg) {
            ("flow" | "start", None) => Command::StartFlow,
            ("end" | "stop", None) => Command::EndFlow,
            ("break", None) => Command::StartBreak,
            ("skip", None) => Command::SkipBreak,
            ("ratio", None) => Command::Ratio(None),
            ("ratio", Some(value)) => Command::Ratio(Some(value.parse()?)),
            ("status" | "s", None) => Command::Status,
            ("history", None) => Command::History {
                limit: DEFAULT_HISTORY_LIMIT,
            },
            ("history", Some(limit)) => Command::History {
                limit: limit
                    .parse()
                    .map_err(|_| anyhow!("history limit must be a number, got '{limit}'"))?,
            },
            ("stats", None) => Command::Stats,
            ("analyze", None) => Command::Analyze,
            ("reset", None) => Command::Reset { confirmed: false },
            ("reset", Some("yes")) => Command::Reset { confirmed: true },
            ("help" | "?", None) => Command::Help,
            ("quit" | "exit" | "q", None) => Command::Quit,
            (other, _) => bail!("unknown command '{other}'; type 'help'"),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Print(String),
    Quit,
}

pub async fn handle(app: &AppState, command: Command) -> Result<Reply> {
    let text = match command {
        Command::StartFlow => {
            let state = app.timer.start_flow().await?;
            format!("Flow started. {}", render_state(&state))
        }
        Command::EndFlow => {
            let record = app.timer.end_flow().await?;
            let state = app.timer.get_state().await;
            format!(
                "Flow of {} recorded. {}",
                format_duration(record.duration),
                render_state(&state)
            )
        }
        Command::StartBreak => {
            let state = app.timer.start_break().await?;
            format!("Break started. {}", render_state(&state))
        }
        Command::SkipBreak => {
            app.timer.skip_break().await?;
            "Break skipped.".to_string()
        }
        Command::Ratio(Some(ratio)) => {
            let state = app.timer.set_break_ratio(ratio).await?;
            format!("Break ratio set to {ratio}. {}", render_state(&state))
        }
        Command::Ratio(None) => {
            let state = app.timer.get_state().await;
            render_ratios(state.break_ratio)
        }
        Command::Status => render_state(&app.timer.get_state().await),
        Command::History { limit } => {
            let sessions = app.db.list_sessions().await?;
            render_history(&sessions, limit)
        }
        Command::Stats => {
            let sessions = app.db.list_sessions().await?;
            render_stats(&sessions, app.insights.latest().await.as_ref())
        }
        Command::Analyze if !app.insights.is_configured() => match app.insights.latest().await {
            Some(insight) => format!(
                "No insight service configured; last analysis:\n{}",
                render_insight(&insight)
            ),
            None => bail!("no insight service configured (set insights_url in settings)"),
        },
        Command::Analyze => {
            match app.insights.refresh().await {
                Some(insight) => render_insight(&insight),
                None => "No insight available yet.".to_string(),
            }
        }
        Command::Reset { confirmed: false } => {
            "This deletes every session and all timer data. Type 'reset yes' to confirm."
                .to_string()
        }
        Command::Reset { confirmed: true } => {
            app.timer.clear_all_data().await?;
            "All data cleared.".to_string()
        }
        Command::Help => HELP.trim_end().to_string(),
        Command::Quit => return Ok(Reply::Quit),
    };
    Ok(Reply::Print(text))
}

const HELP: &str = "\
Commands:
  flow            start a flow session
  end             end the flow session and get a break suggestion
  break           start the suggested break
  skip            skip the break (running or suggested)
  ratio [value]   show presets, or set the break ratio (1/5, 0.25, ...)
  status          show the timer
  history [n]     list the n most recent sessions
  stats           flow totals and minutes per day
  analyze         ask the insight service about your history
  reset yes       delete all sessions and timer data
  quit            leave (a running timer keeps counting)
";

pub fn render_state(state: &TimerState) -> String {
    match state.mode {
        TimerMode::Flow => format!("[FLOW] {}", format_clock(state.seconds)),
        TimerMode::Break => format!(
            "[BREAK] {} left of {}",
            format_clock(state.seconds),
            format_clock(state.initial_seconds)
        ),
        TimerMode::Idle if state.has_pending_break() => format!(
            "[IDLE] suggested break {} (ratio {})",
            format_clock(state.seconds),
            state.break_ratio
        ),
        TimerMode::Idle => format!("[IDLE] ratio {}", state.break_ratio),
    }
}

fn render_ratios(current: BreakRatio) -> String {
    let presets: Vec<String> = RATIO_PRESETS
        .iter()
        .map(|(label, num, den)| {
            if (current.value() - f64::from(*num) / f64::from(*den)).abs() < 0.01 {
                format!("[{label}]")
            } else {
                label.to_string()
            }
        })
        .collect();
    format!("Break ratio {current}. Presets: {}", presets.join(" "))
}

pub fn render_history(sessions: &[SessionRecord], limit: usize) -> String {
    if sessions.is_empty() {
        return "No sessions yet.".to_string();
    }

    let mut lines: Vec<String> = sessions
        .iter()
        .take(limit)
        .map(|session| {
            let started = session
                .started_at()
                .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let label = match session.kind {
                SessionKind::Flow => "Flow ",
                SessionKind::Break => "Break",
            };
            format!("{started}  {label}  {}", format_duration(session.duration))
        })
        .collect();
    if sessions.len() > limit {
        lines.push(format!("... {} more", sessions.len() - limit));
    }
    lines.join("\n")
}

pub fn render_stats(sessions: &[SessionRecord], insight: Option<&Insight>) -> String {
    let focus = insight.map(|insight| {
        format!(
            "Focus score {:.0}/100, best time: {}",
            insight.focus_score, insight.best_time_of_day
        )
    });
    if sessions.is_empty() {
        return focus.map_or_else(
            || "No sessions yet.".to_string(),
            |focus| format!("No sessions yet.\n{focus}"),
        );
    }

    let totals = stats::totals(sessions);
    let mut lines = vec![
        format!(
            "Flow: {} sessions, {}m total",
            totals.flow_count,
            totals.flow_minutes()
        ),
        format!("Work {}s / Rest {}s", totals.flow_seconds, totals.break_seconds),
    ];
    for day in stats::daily_flow(sessions, &Local) {
        lines.push(format!("  {}  {:>4}m", day.day, day.minutes));
    }
    lines.extend(focus);
    lines.join("\n")
}

pub fn render_insight(insight: &Insight) -> String {
    format!(
        "Focus score {:.0}/100, best time: {}\n{}\nTry: {}",
        insight.focus_score, insight.best_time_of_day, insight.summary, insight.recommendation
    )
}
