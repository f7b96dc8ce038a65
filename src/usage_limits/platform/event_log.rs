use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::platform::common::{append_line, ensure_directory_exists};
use crate::usage_limits::aggregator::UsageEvent;
use crate::usage_limits::error::CapabilityError;
use crate::usage_limits::platform::UsageEventSource;

/// Append-only JSON-lines log of foreground transitions
///
/// Window-manager hooks (or `app-guard event`) append to it; the engine reads
/// it back as its usage event source.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one transition
    pub fn record(&self, event: &UsageEvent) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_directory_exists(parent)?;
        }
        let line = serde_json::to_string(event)?;
        append_line(&self.path, &line)?;
        debug!(
            "Recorded {:?} for {} at {}",
            event.transition, event.app_id, event.timestamp
        );
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<UsageEvent>, CapabilityError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CapabilityError::Unavailable(format!(
                    "cannot read event log {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let mut events = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UsageEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping malformed event at {}:{}: {}",
                    self.path.display(),
                    number + 1,
                    e
                ),
            }
        }
        Ok(events)
    }
}

impl UsageEventSource for EventLog {
    fn has_usage_permission(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(_) => fs::File::open(&self.path).is_ok(),
            // Nothing recorded yet is not a permission problem
            Err(e) => e.kind() == io::ErrorKind::NotFound,
        }
    }

    fn events_in_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> Result<Vec<UsageEvent>, CapabilityError> {
        let mut events: Vec<UsageEvent> = self
            .read_all()?
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect();
        // Hooks may append slightly out of order
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage_limits::aggregator::Transition;
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 6, 10, hour, minute, 0).single().unwrap()
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));

        assert!(log.has_usage_permission());
        let events = log.events_in_range(at(0, 0), at(23, 0)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_record_and_read_back_in_range() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("nested").join("events.jsonl"));

        log.record(&UsageEvent::enter("com.video", at(9, 0))).unwrap();
        log.record(&UsageEvent::exit("com.video", at(9, 30))).unwrap();
        log.record(&UsageEvent::enter("com.video", at(11, 0))).unwrap();

        let events = log.events_in_range(at(8, 0), at(10, 0)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].transition, Transition::Enter);
        assert_eq!(events[1].timestamp, at(9, 30));
    }

    #[test]
    fn test_out_of_order_lines_are_sorted() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));

        log.record(&UsageEvent::exit("a", at(9, 30))).unwrap();
        log.record(&UsageEvent::enter("a", at(9, 0))).unwrap();

        let events = log.events_in_range(at(0, 0), at(12, 0)).unwrap();
        assert_eq!(events[0].transition, Transition::Enter);
        assert_eq!(events[1].transition, Transition::Exit);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EventLog::new(&path);

        log.record(&UsageEvent::enter("a", at(9, 0))).unwrap();
        append_line(&path, "not json").unwrap();
        log.record(&UsageEvent::exit("a", at(9, 0) + Duration::minutes(3))).unwrap();

        let events = log.events_in_range(at(0, 0), at(12, 0)).unwrap();
        assert_eq!(events.len(), 2);
    }
}
