//! Platform capabilities consumed by the engine
//!
//! Foreground detection and the blocking surface are provided by the host.
//! The engine only sees these traits; `event_log` and `desktop` are the
//! implementations the CLI ships.

pub mod desktop;
pub mod event_log;
/// In-memory doubles for replays and tests; not part of the supported API
#[doc(hidden)]
pub mod scripted;

use chrono::{DateTime, Duration, Local};
use std::collections::HashMap;

use crate::usage_limits::aggregator::{Transition, UsageEvent};
use crate::usage_limits::error::CapabilityError;

pub use desktop::DesktopSurface;
pub use event_log::EventLog;

/// Source of foreground transitions
pub trait UsageEventSource: Send + Sync {
    /// Whether the user granted access to usage data
    fn has_usage_permission(&self) -> bool;

    /// Transitions with `start <= timestamp <= end`, oldest first
    fn events_in_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> Result<Vec<UsageEvent>, CapabilityError>;

    /// App that entered the foreground within `within` of `now` and has not left it
    fn current_foreground_app(
        &self,
        now: DateTime<Local>,
        within: Duration,
    ) -> Result<Option<String>, CapabilityError> {
        let events = self.events_in_range(now - within, now)?;
        Ok(latest_foreground(&events, None))
    }
}

/// What the blocking surface should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRequest {
    pub app_id: String,
    pub display_name: String,
    pub headline: String,
    pub pause: PauseOffer,
}

/// Pause button state on the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseOffer {
    pub minutes: u32,
    pub remaining_grants: u32,
}

impl PauseOffer {
    pub fn is_enabled(&self) -> bool {
        self.remaining_grants > 0
    }
}

/// Interruptive surface bound to an app until dismissed
pub trait OverlaySurface: Send + Sync {
    /// Whether the user allowed drawing over other apps
    fn has_overlay_permission(&self) -> bool;

    fn present(&self, request: &OverlayRequest) -> Result<(), CapabilityError>;

    fn tear_down(&self, app_id: &str);
}

/// User-visible notification channel
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<(), CapabilityError>;
}

/// Latest app that entered and did not exit, ignoring `ignored`
pub fn latest_foreground(events: &[UsageEvent], ignored: Option<&str>) -> Option<String> {
    let mut entered: HashMap<&str, DateTime<Local>> = HashMap::new();

    for event in events {
        if Some(event.app_id.as_str()) == ignored {
            continue;
        }
        match event.transition {
            Transition::Enter => {
                entered.insert(event.app_id.as_str(), event.timestamp);
            }
            Transition::Exit => {
                entered.remove(event.app_id.as_str());
            }
        }
    }

    entered
        .into_iter()
        .max_by_key(|(_, at)| *at)
        .map(|(app_id, _)| app_id.to_string())
}
