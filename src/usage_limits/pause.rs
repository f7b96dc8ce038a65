use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::usage_limits::clock::{date_key, Clock};
use crate::usage_limits::error::PauseError;
use crate::usage_limits::store::{RecordCache, RecordNamespace};

const NAMESPACE: &str = "pauses";

/// Per-app pause bookkeeping for one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PauseRecord {
    pub app_id: String,

    /// Local calendar day the counters belong to (YYYY-MM-DD)
    pub date_key: String,

    pub grants_used_today: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_until: Option<DateTime<Local>>,
}

impl PauseRecord {
    fn new(app_id: &str, date_key: String) -> Self {
        Self {
            app_id: app_id.to_string(),
            date_key,
            grants_used_today: 0,
            pause_until: None,
        }
    }

    /// Reset the counters if the record belongs to an earlier day
    fn roll_over(&mut self, today: &str) -> bool {
        if self.date_key == today {
            return false;
        }

        debug!("New day for {}: resetting pause grants", self.app_id);
        self.date_key = today.to_string();
        self.grants_used_today = 0;
        self.pause_until = None;
        true
    }

    pub fn is_paused_at(&self, now: DateTime<Local>) -> bool {
        matches!(self.pause_until, Some(until) if now < until)
    }

    pub fn remaining_at(&self, now: DateTime<Local>) -> Option<Duration> {
        self.pause_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }
}

/// Durable per-app, per-day pause counters and expiry instants
pub struct PauseLedger {
    records: RecordCache<PauseRecord>,
    clock: Arc<dyn Clock>,
    max_grants_per_day: u32,
}

impl PauseLedger {
    pub fn open(path: &Path, clock: Arc<dyn Clock>, max_grants_per_day: u32) -> Self {
        Self {
            records: RecordCache::new(RecordNamespace::on_disk(NAMESPACE, path)),
            clock,
            max_grants_per_day,
        }
    }

    pub fn in_memory(clock: Arc<dyn Clock>, max_grants_per_day: u32) -> Self {
        Self {
            records: RecordCache::new(RecordNamespace::in_memory(NAMESPACE)),
            clock,
            max_grants_per_day,
        }
    }

    pub fn max_grants_per_day(&self) -> u32 {
        self.max_grants_per_day
    }

    /// Current record for an app, after applying day rollover
    pub fn record(&self, app_id: &str) -> Option<PauseRecord> {
        let today = date_key(&self.clock.now());
        self.records.update(|records| {
            records.iter_mut().find(|r| r.app_id == app_id).map(|record| {
                record.roll_over(&today);
                record.clone()
            })
        })
    }

    /// Grants still available today
    pub fn remaining_grants(&self, app_id: &str) -> u32 {
        let used = self.record(app_id).map_or(0, |r| r.grants_used_today);
        self.max_grants_per_day.saturating_sub(used)
    }

    pub fn is_paused(&self, app_id: &str) -> bool {
        let now = self.clock.now();
        self.record(app_id).is_some_and(|r| r.is_paused_at(now))
    }

    /// Time left on the running pause, if any
    pub fn pause_remaining(&self, app_id: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.record(app_id).and_then(|r| r.remaining_at(now))
    }

    /// Pause enforcement for `app_id` for `duration_minutes`
    ///
    /// Consumes one of today's grants. Fails without side effects when none
    /// are left.
    pub fn grant_pause(&self, app_id: &str, duration_minutes: u32) -> Result<PauseRecord, PauseError> {
        let now = self.clock.now();
        let today = date_key(&now);
        let max = self.max_grants_per_day;

        self.records.update(|records| {
            let index = match records.iter().position(|r| r.app_id == app_id) {
                Some(index) => index,
                None => {
                    records.push(PauseRecord::new(app_id, today.clone()));
                    records.len() - 1
                }
            };

            let record = &mut records[index];
            record.roll_over(&today);

            if record.grants_used_today >= max {
                // Drop a record created just for this rejected request
                if record.grants_used_today == 0 {
                    records.remove(index);
                }
                return Err(PauseError::Exhausted {
                    app_id: app_id.to_string(),
                    max,
                });
            }

            record.grants_used_today += 1;
            record.pause_until = Some(now + Duration::minutes(i64::from(duration_minutes)));

            info!(
                "Paused {} for {} min ({} of {} grants used today)",
                app_id, duration_minutes, record.grants_used_today, max
            );
            Ok(record.clone())
        })
    }
}
