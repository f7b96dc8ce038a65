use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::usage_limits::clock::{start_of_day, Clock};
use crate::usage_limits::error::CapabilityError;
use crate::usage_limits::platform::UsageEventSource;

/// Number of histogram buckets
pub const SLOT_COUNT: usize = 8;

/// Label of each bucket: the hour at which its 3-hour window ends
pub const SLOT_LABELS: [u32; SLOT_COUNT] = [3, 6, 9, 12, 15, 18, 21, 24];

/// Foreground transition reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Enter,
    Exit,
}

/// One foreground transition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UsageEvent {
    pub app_id: String,
    pub transition: Transition,
    pub timestamp: DateTime<Local>,
}

impl UsageEvent {
    pub fn enter(app_id: &str, timestamp: DateTime<Local>) -> Self {
        Self {
            app_id: app_id.to_string(),
            transition: Transition::Enter,
            timestamp,
        }
    }

    pub fn exit(app_id: &str, timestamp: DateTime<Local>) -> Self {
        Self {
            app_id: app_id.to_string(),
            transition: Transition::Exit,
            timestamp,
        }
    }
}

/// Closed interval an app spent in the foreground
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSession {
    pub app_id: String,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
}

impl UsageSession {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whole minutes spent in the session
    pub fn minutes(&self) -> i64 {
        self.duration().num_minutes()
    }
}

/// Reporting period for statistics, always ending now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    #[default]
    Today,
    Week,
    Month,
    Year,
}

impl ReportPeriod {
    /// `[start, now)` for this period in local time
    pub fn range(&self, now: DateTime<Local>) -> (DateTime<Local>, DateTime<Local>) {
        let today = now.date_naive();
        let first_day = match self {
            ReportPeriod::Today => today,
            ReportPeriod::Week => {
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
            }
            ReportPeriod::Month => today.with_day(1).unwrap_or(today),
            ReportPeriod::Year => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
        };

        let start = local_midnight(first_day).unwrap_or_else(|| start_of_day(&now));
        (start, now)
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportPeriod::Today => "today",
            ReportPeriod::Week => "week",
            ReportPeriod::Month => "month",
            ReportPeriod::Year => "year",
        };
        f.write_str(name)
    }
}

impl FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" | "day" => Ok(ReportPeriod::Today),
            "week" | "weekly" => Ok(ReportPeriod::Week),
            "month" | "monthly" => Ok(ReportPeriod::Month),
            "year" | "yearly" => Ok(ReportPeriod::Year),
            other => Err(format!("unknown period '{}' (expected today, week, month or year)", other)),
        }
    }
}

/// Minutes of usage per 3-hour slot, indexed like `SLOT_LABELS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlotHistogram {
    pub minutes: [i64; SLOT_COUNT],
    /// Foreground time fed in so far, at full precision
    #[serde(skip)]
    elapsed: Duration,
    #[serde(skip)]
    credited: i64,
}

impl Default for TimeSlotHistogram {
    fn default() -> Self {
        Self {
            minutes: [0; SLOT_COUNT],
            elapsed: Duration::zero(),
            credited: 0,
        }
    }
}

impl TimeSlotHistogram {
    pub fn total(&self) -> i64 {
        self.minutes.iter().sum()
    }

    /// `(label, minutes)` pairs in slot order
    pub fn labelled(&self) -> impl Iterator<Item = (u32, i64)> + '_ {
        SLOT_LABELS.iter().copied().zip(self.minutes.iter().copied())
    }

    /// Attribute one session, splitting it at every slot boundary it crosses
    ///
    /// Each boundary credits its slot with the floor of all foreground time
    /// seen so far minus what was already credited. The running credit spans
    /// sessions, so `total()` is always the floor of the summed durations and
    /// short sessions are not lost to per-session rounding. Sessions should
    /// be added oldest first.
    pub fn add_session(&mut self, session: &UsageSession) {
        let mut cursor = session.start;

        while cursor < session.end {
            let slot = slot_index_for_hour(cursor.hour());
            let mut boundary = next_slot_boundary(cursor).min(session.end);
            if boundary <= cursor {
                // Unresolvable local boundary (DST fold); finish in this slot
                boundary = session.end;
            }

            self.elapsed += boundary - cursor;
            let due = self.elapsed.num_minutes();
            self.minutes[slot] += due - self.credited;
            self.credited = due;
            cursor = boundary;
        }
    }
}

/// Usage of one app over a reporting period
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppUsage {
    pub app_id: String,
    pub minutes: i64,
    pub sessions: usize,
    #[serde(skip)]
    total: Duration,
}

/// Slot containing a given local hour: 03-05 is 0, ..., 21-23 is 6, 00-02 is 7
pub fn slot_index_for_hour(hour: u32) -> usize {
    ((hour / 3 + 7) % 8) as usize
}

/// First slot boundary strictly after `instant`
fn next_slot_boundary(instant: DateTime<Local>) -> DateTime<Local> {
    let date = instant.date_naive();
    let next_hour = (instant.hour() / 3 + 1) * 3;

    let naive = if next_hour >= 24 {
        (date + Duration::days(1)).and_time(NaiveTime::MIN)
    } else {
        date.and_time(NaiveTime::from_hms_opt(next_hour, 0, 0).unwrap_or(NaiveTime::MIN))
    };

    // A boundary inside a DST gap resolves to the first valid instant after it
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .unwrap_or(instant)
}

fn local_midnight(date: NaiveDate) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&date.and_time(NaiveTime::MIN)).earliest()
}

/// Derive foreground sessions from transitions, clipped to `[start, end)`
///
/// Only one app is foreground at a time: an `enter` closes whichever session
/// is open. Transitions before `start` only establish which app was already
/// foreground when the range began. An `exit` with no open session, seen
/// before any other transition inside the range, means that app was
/// foreground from `start`. A session still open at the end of the range
/// runs until `end`.
pub fn sessions_from_events(
    events: &[UsageEvent],
    start: DateTime<Local>,
    end: DateTime<Local>,
) -> Vec<UsageSession> {
    let mut ordered: Vec<&UsageEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);

    let mut sessions = Vec::new();
    let mut open: Option<(&str, DateTime<Local>)> = None;
    let mut seen_in_range = false;

    let mut close = |app_id: &str, since: DateTime<Local>, until: DateTime<Local>| {
        if until > since {
            sessions.push(UsageSession {
                app_id: app_id.to_string(),
                start: since,
                end: until,
            });
        }
    };

    for event in ordered {
        if event.timestamp > end {
            break;
        }
        let at = event.timestamp.max(start);
        match event.transition {
            Transition::Enter => {
                if let Some((app_id, since)) = open.take() {
                    close(app_id, since, at);
                }
                open = Some((event.app_id.as_str(), at));
            }
            Transition::Exit => match open.take() {
                Some((app_id, since)) if app_id == event.app_id => close(app_id, since, at),
                Some(other) => open = Some(other),
                None if !seen_in_range && event.timestamp >= start => {
                    close(&event.app_id, start, at)
                }
                None => {}
            },
        }
        if event.timestamp >= start {
            seen_in_range = true;
        }
    }

    if let Some((app_id, since)) = open {
        close(app_id, since, end);
    }

    sessions
}

/// Per-app totals, heaviest first
pub fn summarize_sessions(sessions: &[UsageSession]) -> Vec<AppUsage> {
    let mut by_app: HashMap<&str, (Duration, usize)> = HashMap::new();
    for session in sessions {
        let entry = by_app
            .entry(session.app_id.as_str())
            .or_insert((Duration::zero(), 0));
        entry.0 += session.duration();
        entry.1 += 1;
    }

    let mut usage: Vec<AppUsage> = by_app
        .into_iter()
        .map(|(app_id, (total, sessions))| AppUsage {
            app_id: app_id.to_string(),
            minutes: total.num_minutes(),
            sessions,
            total,
        })
        .collect();

    usage.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.app_id.cmp(&b.app_id)));
    usage
}

/// Hours before a range whose transitions decide which app was already foreground
pub const DEFAULT_CARRY_OVER_HOURS: i64 = 24;

/// Turns raw foreground transitions into usage totals and histograms
pub struct UsageAggregator {
    source: Arc<dyn UsageEventSource>,
    clock: Arc<dyn Clock>,
    carry_over: Duration,
}

impl UsageAggregator {
    pub fn new(source: Arc<dyn UsageEventSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            carry_over: Duration::hours(DEFAULT_CARRY_OVER_HOURS),
        }
    }

    /// Look back `carry_over` before each range for a session still open at its start
    pub fn with_carry_over(mut self, carry_over: Duration) -> Self {
        self.carry_over = carry_over.max(Duration::zero());
        self
    }

    /// Sessions of every app overlapping `[start, end)`
    pub fn all_sessions_in_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> Result<Vec<UsageSession>, CapabilityError> {
        let events = self.source.events_in_range(start - self.carry_over, end)?;
        Ok(sessions_from_events(&events, start, end))
    }

    /// Sessions of one app overlapping `[start, end)`
    pub fn sessions_in_range(
        &self,
        app_id: &str,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> Result<Vec<UsageSession>, CapabilityError> {
        let mut sessions = self.all_sessions_in_range(start, end)?;
        sessions.retain(|s| s.app_id == app_id);
        Ok(sessions)
    }

    /// Whole minutes `app_id` has been foreground since local midnight
    pub fn total_minutes_today(&self, app_id: &str) -> Result<i64, CapabilityError> {
        let now = self.clock.now();
        let total = self
            .sessions_in_range(app_id, start_of_day(&now), now)?
            .iter()
            .fold(Duration::zero(), |acc, s| acc + s.duration());
        Ok(total.num_minutes())
    }

    /// Usage of all apps in `period`, bucketed into 3-hour slots
    pub fn time_slot_histogram(
        &self,
        period: ReportPeriod,
    ) -> Result<TimeSlotHistogram, CapabilityError> {
        let (start, end) = period.range(self.clock.now());
        let mut histogram = TimeSlotHistogram::default();
        for session in self.all_sessions_in_range(start, end)? {
            histogram.add_session(&session);
        }
        Ok(histogram)
    }

    /// Slot containing now; later slots are still in the future
    pub fn current_slot_index(&self) -> usize {
        slot_index_for_hour(self.clock.now().hour())
    }

    /// Per-app usage for `period`, heaviest first
    pub fn app_usage(&self, period: ReportPeriod) -> Result<Vec<AppUsage>, CapabilityError> {
        let (start, end) = period.range(self.clock.now());
        Ok(summarize_sessions(&self.all_sessions_in_range(start, end)?))
    }
}
