//! Aggregates over the session ledger for the history views.

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone};
use serde::Serialize;

use crate::db::{SessionKind, SessionRecord};

/// How many days with flow activity the daily view keeps.
pub const DAILY_WINDOW: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyFlow {
    pub day: NaiveDate,
    /// Rounded to the nearest minute.
    pub minutes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTotals {
    pub flow_seconds: u64,
    pub break_seconds: u64,
    pub flow_count: usize,
    pub break_count: usize,
}

impl SessionTotals {
    pub fn flow_minutes(&self) -> u64 {
        rounded_minutes(self.flow_seconds)
    }
}

pub fn totals(sessions: &[SessionRecord]) -> SessionTotals {
    sessions
        .iter()
        .fold(SessionTotals::default(), |mut totals, session| {
            match session.kind {
                SessionKind::Flow => {
                    totals.flow_seconds += session.duration;
                    totals.flow_count += 1;
                }
                SessionKind::Break => {
                    totals.break_seconds += session.duration;
                    totals.break_count += 1;
                }
            }
            totals
        })
}

/// Flow minutes per calendar day in `tz`, oldest first, limited to the most
/// recent [`DAILY_WINDOW`] days that have any flow.
pub fn daily_flow<Tz: TimeZone>(sessions: &[SessionRecord], tz: &Tz) -> Vec<DailyFlow> {
    let mut by_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for session in sessions.iter().filter(|s| s.kind == SessionKind::Flow) {
        let Some(started) = session.started_at() else {
            continue;
        };
        let day = started.with_timezone(tz).date_naive();
        *by_day.entry(day).or_default() += session.duration;
    }

    let skip = by_day.len().saturating_sub(DAILY_WINDOW);
    by_day
        .into_iter()
        .skip(skip)
        .map(|(day, seconds)| DailyFlow {
            day,
            minutes: rounded_minutes(seconds),
        })
        .collect()
}

fn rounded_minutes(seconds: u64) -> u64 {
    (seconds + 30) / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    const DAY_MS: i64 = 86_400_000;
    // 2024-01-01T00:00:00Z
    const JAN_1: i64 = 1_704_067_200_000;

    fn record(kind: SessionKind, start_time: i64, duration: u64) -> SessionRecord {
        SessionRecord {
            id: format!("{kind:?}-{start_time}"),
            start_time,
            end_time: start_time + duration as i64 * 1000,
            duration,
            kind,
            date: crate::db::models::iso_date(start_time),
        }
    }

    #[test]
    fn totals_split_flow_and_break() {
        let sessions = vec![
            record(SessionKind::Flow, JAN_1, 1500),
            record(SessionKind::Flow, JAN_1 + 3_600_000, 600),
            record(SessionKind::Break, JAN_1 + 1_600_000, 300),
        ];
        let totals = totals(&sessions);
        assert_eq!(totals.flow_seconds, 2100);
        assert_eq!(totals.break_seconds, 300);
        assert_eq!(totals.flow_count, 2);
        assert_eq!(totals.break_count, 1);
        assert_eq!(totals.flow_minutes(), 35);
    }

    #[test]
    fn daily_groups_flow_only_and_rounds() {
        let sessions = vec![
            record(SessionKind::Flow, JAN_1 + 1000, 89),
            record(SessionKind::Flow, JAN_1 + 5000, 1),
            record(SessionKind::Break, JAN_1 + 9000, 6000),
            record(SessionKind::Flow, JAN_1 + DAY_MS, 1500),
        ];
        let daily = daily_flow(&sessions, &Utc);
        assert_eq!(
            daily,
            vec![
                DailyFlow {
                    day: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    minutes: 2,
                },
                DailyFlow {
                    day: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                    minutes: 25,
                },
            ]
        );
    }

    #[test]
    fn daily_uses_the_given_timezone() {
        // 23:30 UTC on Jan 1 is already Jan 2 at UTC+2.
        let sessions = vec![record(SessionKind::Flow, JAN_1 + 84_600_000, 600)];
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let daily = daily_flow(&sessions, &plus_two);
        assert_eq!(daily[0].day, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn daily_keeps_most_recent_active_days() {
        let sessions: Vec<_> = (0..10)
            .map(|day| record(SessionKind::Flow, JAN_1 + day * DAY_MS, 60))
            .collect();
        let daily = daily_flow(&sessions, &Utc);
        assert_eq!(daily.len(), DAILY_WINDOW);
        assert_eq!(daily[0].day, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        assert_eq!(daily[6].day, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }
}
