use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::db::SessionRecord;

use super::{
    clock::elapsed_secs,
    policy::{suggested_break, BreakRatio},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimerMode {
    #[default]
    Idle,
    Flow,
    Break,
}

/// Persisted form of a running phase (metadata slot `activeTimer`).
///
/// `start_time` is the instant the phase began and is never advanced;
/// `seconds` is only the last displayed value and must not be trusted when
/// resuming.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimer {
    pub mode: TimerMode,
    pub seconds: u64,
    pub start_time: i64,
    #[serde(default)]
    pub initial_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is running.
    Idle,
    /// Seconds were recomputed from the anchor.
    Counting,
    /// The break ran out on this tick and the timer is idle again.
    BreakFinished,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub mode: TimerMode,
    /// Count-up in flow, count-down in break, pending suggestion when idle.
    pub seconds: u64,
    /// Epoch milliseconds the current phase began; meaningless when idle.
    pub start_time: i64,
    /// Total break length fixed when the break started.
    pub initial_seconds: u64,
    pub last_flow_duration: u64,
    pub break_ratio: BreakRatio,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::new(BreakRatio::default())
    }
}

impl TimerState {
    pub fn new(break_ratio: BreakRatio) -> Self {
        Self {
            mode: TimerMode::Idle,
            seconds: 0,
            start_time: 0,
            initial_seconds: 0,
            last_flow_duration: 0,
            break_ratio,
        }
    }

    pub fn is_running(&self) -> bool {
        self.mode != TimerMode::Idle
    }

    pub fn has_pending_break(&self) -> bool {
        self.mode == TimerMode::Idle && self.seconds > 0
    }

    /// The anchor to persist, if a phase is running.
    pub fn anchor(&self) -> Option<ActiveTimer> {
        match self.mode {
            TimerMode::Idle => None,
            mode => Some(ActiveTimer {
                mode,
                seconds: self.seconds,
                start_time: self.start_time,
                initial_seconds: self.initial_seconds,
            }),
        }
    }

    pub fn start_flow(&mut self, now_ms: i64) -> Result<()> {
        if self.is_running() {
            bail!("timer already active");
        }

        self.mode = TimerMode::Flow;
        self.seconds = 0;
        self.start_time = now_ms;
        self.initial_seconds = 0;
        self.last_flow_duration = 0;
        Ok(())
    }

    /// Recomputes the displayed seconds from the anchor. Never accumulates.
    pub fn sync(&mut self, now_ms: i64) {
        let elapsed = elapsed_secs(self.start_time, now_ms);
        match self.mode {
            TimerMode::Idle => {}
            TimerMode::Flow => self.seconds = elapsed,
            TimerMode::Break => self.seconds = self.initial_seconds.saturating_sub(elapsed),
        }
    }

    pub fn tick(&mut self, now_ms: i64) -> TickOutcome {
        match self.mode {
            TimerMode::Idle => TickOutcome::Idle,
            TimerMode::Flow => {
                self.sync(now_ms);
                TickOutcome::Counting
            }
            TimerMode::Break => {
                self.sync(now_ms);
                if self.seconds == 0 {
                    self.return_to_idle();
                    TickOutcome::BreakFinished
                } else {
                    TickOutcome::Counting
                }
            }
        }
    }

    /// Closes the running flow session and returns its ledger record. The
    /// idle state afterwards displays the suggested break.
    pub fn end_flow(&mut self, now_ms: i64) -> Result<SessionRecord> {
        if self.mode != TimerMode::Flow {
            bail!("no flow session to end");
        }

        self.sync(now_ms);
        let duration = self.seconds;
        let record = SessionRecord::completed_flow(self.start_time, now_ms, duration);

        self.mode = TimerMode::Idle;
        self.start_time = 0;
        self.initial_seconds = 0;
        self.last_flow_duration = duration;
        self.seconds = suggested_break(duration, self.break_ratio);
        Ok(record)
    }

    pub fn start_break(&mut self, now_ms: i64) -> Result<()> {
        match self.mode {
            TimerMode::Flow | TimerMode::Break => bail!("timer already active"),
            TimerMode::Idle if self.seconds == 0 => bail!("no break is pending"),
            TimerMode::Idle => {}
        }

        self.mode = TimerMode::Break;
        self.start_time = now_ms;
        self.initial_seconds = self.seconds;
        self.last_flow_duration = 0;
        Ok(())
    }

    /// Ends a running break early, or drops a pending suggestion.
    pub fn skip_break(&mut self) -> Result<()> {
        if self.mode == TimerMode::Flow {
            bail!("a flow session is running; end it instead");
        }
        self.return_to_idle();
        Ok(())
    }

    /// Changes the ratio and, when a suggestion from a known flow is on
    /// display, recomputes it in place. Returns whether the display changed.
    pub fn set_break_ratio(&mut self, ratio: BreakRatio) -> bool {
        self.break_ratio = ratio;
        if self.has_pending_break() && self.last_flow_duration > 0 {
            let suggestion = suggested_break(self.last_flow_duration, ratio);
            let changed = suggestion != self.seconds;
            self.seconds = suggestion;
            return changed;
        }
        false
    }

    /// Back to a fresh idle state; the ratio preference survives.
    pub fn clear(&mut self) {
        *self = Self::new(self.break_ratio);
    }

    fn return_to_idle(&mut self) {
        self.mode = TimerMode::Idle;
        self.seconds = 0;
        self.start_time = 0;
        self.initial_seconds = 0;
        self.last_flow_duration = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SessionKind;

    const T: i64 = 1_700_000_000_000;

    fn secs(n: i64) -> i64 {
        n * 1000
    }

    fn ratio(value: f64) -> BreakRatio {
        BreakRatio::new(value).unwrap()
    }

    #[test]
    fn flow_counts_up_from_anchor() {
        let mut state = TimerState::default();
        state.start_flow(T).unwrap();
        assert_eq!(state.mode, TimerMode::Flow);
        assert_eq!(state.seconds, 0);

        assert_eq!(state.tick(T + secs(3)), TickOutcome::Counting);
        assert_eq!(state.seconds, 3);

        // A late tick catches up instead of adding one.
        state.tick(T + secs(90) + 400);
        assert_eq!(state.seconds, 90);
    }

    #[test]
    fn end_flow_records_and_suggests_break() {
        let mut state = TimerState::new(ratio(0.2));
        state.start_flow(T).unwrap();
        state.tick(T + secs(1499));

        let record = state.end_flow(T + secs(1500)).unwrap();
        assert_eq!(record.duration, 1500);
        assert_eq!(record.kind, SessionKind::Flow);
        assert_eq!(record.start_time, T);
        assert_eq!(record.end_time, T + secs(1500));

        assert_eq!(state.mode, TimerMode::Idle);
        assert_eq!(state.seconds, 300);
        assert_eq!(state.last_flow_duration, 1500);
        assert_eq!(state.anchor(), None);
    }

    #[test]
    fn suggestion_is_capped() {
        let mut state = TimerState::new(ratio(1.0));
        state.start_flow(T).unwrap();
        state.end_flow(T + secs(4000)).unwrap();
        assert_eq!(state.seconds, 3600);
    }

    #[test]
    fn starting_flow_clears_pending_suggestion() {
        let mut state = TimerState::default();
        state.start_flow(T).unwrap();
        state.end_flow(T + secs(600)).unwrap();
        assert!(state.has_pending_break());

        state.start_flow(T + secs(700)).unwrap();
        assert_eq!(state.seconds, 0);
        assert_eq!(state.last_flow_duration, 0);
    }

    #[test]
    fn invalid_transitions_leave_state_untouched() {
        let mut state = TimerState::default();
        assert!(state.end_flow(T).is_err());
        assert!(state.start_break(T).is_err());

        state.start_flow(T).unwrap();
        let before = state.clone();
        assert!(state.start_flow(T + 1).is_err());
        assert!(state.start_break(T + 1).is_err());
        assert!(state.skip_break().is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn break_counts_down_and_expires() {
        let mut state = TimerState::default();
        state.start_flow(T).unwrap();
        state.end_flow(T + secs(1500)).unwrap();

        let break_start = T + secs(1600);
        state.start_break(break_start).unwrap();
        assert_eq!(state.mode, TimerMode::Break);
        assert_eq!(state.initial_seconds, 300);
        assert_eq!(state.last_flow_duration, 0);

        let anchor = state.anchor().unwrap();
        assert_eq!(anchor.mode, TimerMode::Break);
        assert_eq!(anchor.start_time, break_start);
        assert_eq!(anchor.initial_seconds, 300);

        assert_eq!(state.tick(break_start + secs(100)), TickOutcome::Counting);
        assert_eq!(state.seconds, 200);

        assert_eq!(
            state.tick(break_start + secs(300)),
            TickOutcome::BreakFinished
        );
        assert_eq!(state.mode, TimerMode::Idle);
        assert_eq!(state.seconds, 0);
        assert_eq!(state.anchor(), None);
        assert_eq!(state.tick(break_start + secs(301)), TickOutcome::Idle);
    }

    #[test]
    fn skip_break_works_while_running_or_pending() {
        let mut state = TimerState::default();
        state.start_flow(T).unwrap();
        state.end_flow(T + secs(1000)).unwrap();
        state.skip_break().unwrap();
        assert_eq!(state.seconds, 0);
        assert_eq!(state.last_flow_duration, 0);

        state.start_flow(T).unwrap();
        state.end_flow(T + secs(1000)).unwrap();
        state.start_break(T + secs(1001)).unwrap();
        state.skip_break().unwrap();
        assert_eq!(state.mode, TimerMode::Idle);
        assert_eq!(state.seconds, 0);
    }

    #[test]
    fn ratio_change_replaces_pending_suggestion_only() {
        let mut state = TimerState::new(ratio(0.2));
        state.start_flow(T).unwrap();
        state.end_flow(T + secs(1200)).unwrap();
        assert_eq!(state.seconds, 240);

        assert!(state.set_break_ratio(ratio(0.25)));
        assert_eq!(state.seconds, 300);
        assert_eq!(state.mode, TimerMode::Idle);
        assert_eq!(state.last_flow_duration, 1200);

        state.start_break(T + secs(1300)).unwrap();
        assert!(!state.set_break_ratio(ratio(0.5)));
        assert_eq!(state.initial_seconds, 300);
        assert_eq!(state.break_ratio, ratio(0.5));
    }

    #[test]
    fn clear_keeps_ratio() {
        let mut state = TimerState::new(ratio(0.25));
        state.start_flow(T).unwrap();
        state.clear();
        assert_eq!(state, TimerState::new(ratio(0.25)));
    }

    #[test]
    fn anchor_serializes_with_stored_field_names() {
        let anchor = ActiveTimer {
            mode: TimerMode::Break,
            seconds: 12,
            start_time: T,
            initial_seconds: 300,
        };
        let value = serde_json::to_value(anchor).unwrap();
        assert_eq!(value["mode"], "BREAK");
        assert_eq!(value["startTime"], T);
        assert_eq!(value["initialSeconds"], 300);
    }
}
