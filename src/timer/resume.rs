//! Startup resumption: turns whatever the last process left in storage into
//! the state the timer should present now.

use serde::Serialize;

use super::{
    clock::elapsed_secs,
    policy::{suggested_break, BreakRatio},
    state::{ActiveTimer, TimerMode, TimerState},
};

/// What storage held when the process started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistedTimer {
    pub anchor: Option<ActiveTimer>,
    pub last_flow_duration: u64,
    pub break_ratio: BreakRatio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Resumption {
    /// Nothing pending.
    Fresh,
    /// The process ended between finishing a flow and starting its break.
    PendingBreak { suggested: u64 },
    /// A flow session kept running while the process was gone.
    Flow { start_time: i64, seconds: u64 },
    /// A break that still has time left.
    Break {
        start_time: i64,
        initial_seconds: u64,
        remaining: u64,
    },
    /// The break ran out while the process was gone; it counts as taken.
    BreakExpired,
}

impl Resumption {
    /// Whether the drivers have to be restarted.
    pub fn is_running(&self) -> bool {
        matches!(self, Resumption::Flow { .. } | Resumption::Break { .. })
    }
}

pub fn resolve(persisted: &PersistedTimer, now_ms: i64) -> Resumption {
    let anchor = persisted
        .anchor
        .filter(|anchor| anchor.mode != TimerMode::Idle);

    match anchor {
        Some(anchor) => {
            // The cached `seconds` is display-only; the anchor is the origin.
            let elapsed = elapsed_secs(anchor.start_time, now_ms);
            match anchor.mode {
                TimerMode::Flow => Resumption::Flow {
                    start_time: anchor.start_time,
                    seconds: elapsed,
                },
                TimerMode::Break if anchor.initial_seconds > elapsed => Resumption::Break {
                    start_time: anchor.start_time,
                    initial_seconds: anchor.initial_seconds,
                    remaining: anchor.initial_seconds - elapsed,
                },
                TimerMode::Break | TimerMode::Idle => Resumption::BreakExpired,
            }
        }
        None if persisted.last_flow_duration > 0 => Resumption::PendingBreak {
            suggested: suggested_break(persisted.last_flow_duration, persisted.break_ratio),
        },
        None => Resumption::Fresh,
    }
}

impl TimerState {
    pub fn resumed(persisted: &PersistedTimer, resumption: Resumption) -> Self {
        let mut state = TimerState::new(persisted.break_ratio);
        match resumption {
            Resumption::Fresh | Resumption::BreakExpired => {}
            Resumption::PendingBreak { suggested } => {
                state.seconds = suggested;
                state.last_flow_duration = persisted.last_flow_duration;
            }
            Resumption::Flow {
                start_time,
                seconds,
            } => {
                state.mode = TimerMode::Flow;
                state.start_time = start_time;
                state.seconds = seconds;
            }
            Resumption::Break {
                start_time,
                initial_seconds,
                remaining,
            } => {
                state.mode = TimerMode::Break;
                state.start_time = start_time;
                state.initial_seconds = initial_seconds;
                state.seconds = remaining;
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_000_000;

    fn persisted(anchor: Option<ActiveTimer>, last_flow_duration: u64) -> PersistedTimer {
        PersistedTimer {
            anchor,
            last_flow_duration,
            break_ratio: BreakRatio::new(0.2).unwrap(),
        }
    }

    fn flow_anchor(cached_seconds: u64) -> ActiveTimer {
        ActiveTimer {
            mode: TimerMode::Flow,
            seconds: cached_seconds,
            start_time: T,
            initial_seconds: 0,
        }
    }

    fn break_anchor(initial_seconds: u64) -> ActiveTimer {
        ActiveTimer {
            mode: TimerMode::Break,
            seconds: 17,
            start_time: T,
            initial_seconds,
        }
    }

    #[test]
    fn flow_resumes_from_anchor_start_ignoring_cached_seconds() {
        for cached in [0, 60, 9_999] {
            let stored = persisted(Some(flow_anchor(cached)), 0);
            let resumption = resolve(&stored, T + 125_000);
            assert_eq!(
                resumption,
                Resumption::Flow {
                    start_time: T,
                    seconds: 125
                }
            );

            let state = TimerState::resumed(&stored, resumption);
            assert_eq!(state.mode, TimerMode::Flow);
            assert_eq!(state.seconds, 125);
            assert_eq!(state.start_time, T);
        }
    }

    #[test]
    fn break_with_time_left_resumes() {
        let stored = persisted(Some(break_anchor(300)), 0);
        let resumption = resolve(&stored, T + 100_000);
        assert_eq!(
            resumption,
            Resumption::Break {
                start_time: T,
                initial_seconds: 300,
                remaining: 200
            }
        );

        let state = TimerState::resumed(&stored, resumption);
        assert_eq!(state.mode, TimerMode::Break);
        assert_eq!(state.seconds, 200);
        assert_eq!(state.anchor().unwrap().initial_seconds, 300);
    }

    #[test]
    fn expired_break_is_idle_without_suggestion() {
        // A stale last flow duration must not resurface a suggestion.
        let stored = persisted(Some(break_anchor(300)), 1500);
        let resumption = resolve(&stored, T + 301_000);
        assert_eq!(resumption, Resumption::BreakExpired);

        let state = TimerState::resumed(&stored, resumption);
        assert_eq!(state.mode, TimerMode::Idle);
        assert_eq!(state.seconds, 0);
        assert_eq!(state.last_flow_duration, 0);
    }

    #[test]
    fn break_ending_exactly_now_is_expired() {
        let stored = persisted(Some(break_anchor(300)), 0);
        assert_eq!(resolve(&stored, T + 300_000), Resumption::BreakExpired);
    }

    #[test]
    fn pending_duration_without_anchor_recomputes_suggestion() {
        let stored = persisted(None, 1500);
        let resumption = resolve(&stored, T);
        assert_eq!(resumption, Resumption::PendingBreak { suggested: 300 });

        let state = TimerState::resumed(&stored, resumption);
        assert_eq!(state.mode, TimerMode::Idle);
        assert_eq!(state.seconds, 300);
        assert_eq!(state.last_flow_duration, 1500);
    }

    #[test]
    fn pending_suggestion_is_capped() {
        let mut stored = persisted(None, 20_000);
        stored.break_ratio = BreakRatio::new(1.0).unwrap();
        assert_eq!(
            resolve(&stored, T),
            Resumption::PendingBreak { suggested: 3600 }
        );
    }

    #[test]
    fn nothing_stored_is_fresh() {
        let stored = persisted(None, 0);
        let resumption = resolve(&stored, T);
        assert_eq!(resumption, Resumption::Fresh);
        assert!(!resumption.is_running());
        assert_eq!(
            TimerState::resumed(&stored, resumption),
            TimerState::new(stored.break_ratio)
        );
    }

    #[test]
    fn idle_anchor_is_ignored() {
        let idle = ActiveTimer {
            mode: TimerMode::Idle,
            seconds: 40,
            start_time: T,
            initial_seconds: 0,
        };
        assert_eq!(resolve(&persisted(Some(idle), 0), T), Resumption::Fresh);
        assert_eq!(
            resolve(&persisted(Some(idle), 1000), T),
            Resumption::PendingBreak { suggested: 200 }
        );
    }

    #[test]
    fn anchor_in_the_future_resumes_at_zero() {
        let stored = persisted(Some(flow_anchor(0)), 0);
        assert_eq!(
            resolve(&stored, T - 5_000),
            Resumption::Flow {
                start_time: T,
                seconds: 0
            }
        );
    }
}
