use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::usage_limits::aggregator::UsageEvent;
use crate::usage_limits::error::{Capability, CapabilityError};
use crate::usage_limits::platform::{Notifier, OverlayRequest, OverlaySurface, UsageEventSource};

/// In-memory event source fed by the caller
#[derive(Debug)]
pub struct ScriptedEvents {
    events: Mutex<Vec<UsageEvent>>,
    permitted: AtomicBool,
}

impl ScriptedEvents {
    pub fn new(events: Vec<UsageEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            permitted: AtomicBool::new(true),
        }
    }

    pub fn push(&self, event: UsageEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }

    pub fn set_permission(&self, granted: bool) {
        self.permitted.store(granted, Ordering::SeqCst);
    }
}

impl UsageEventSource for ScriptedEvents {
    fn has_usage_permission(&self) -> bool {
        self.permitted.load(Ordering::SeqCst)
    }

    fn events_in_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> Result<Vec<UsageEvent>, CapabilityError> {
        if !self.has_usage_permission() {
            return Err(CapabilityError::PermissionDenied(Capability::UsageEvents));
        }

        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut in_range: Vec<UsageEvent> = events
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect();
        in_range.sort_by_key(|e| e.timestamp);
        Ok(in_range)
    }
}

/// Surface and notifier that records what it was asked to do
#[derive(Debug)]
pub struct RecordingSurface {
    presented: Mutex<Vec<OverlayRequest>>,
    torn_down: Mutex<Vec<String>>,
    notifications: Mutex<Vec<(String, String)>>,
    permitted: AtomicBool,
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self {
            presented: Mutex::new(Vec::new()),
            torn_down: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            permitted: AtomicBool::new(true),
        }
    }
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_permission(&self, granted: bool) {
        self.permitted.store(granted, Ordering::SeqCst);
    }

    /// Every request passed to `present`
    pub fn presented(&self) -> Vec<OverlayRequest> {
        self.presented.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn torn_down(&self) -> Vec<String> {
        self.torn_down.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Surfaces presented and not yet torn down
    pub fn visible_count(&self) -> usize {
        self.presented().len().saturating_sub(self.torn_down().len())
    }
}

impl OverlaySurface for RecordingSurface {
    fn has_overlay_permission(&self) -> bool {
        self.permitted.load(Ordering::SeqCst)
    }

    fn present(&self, request: &OverlayRequest) -> Result<(), CapabilityError> {
        if !self.has_overlay_permission() {
            return Err(CapabilityError::PermissionDenied(Capability::Overlay));
        }
        self.presented
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(())
    }

    fn tear_down(&self, app_id: &str) {
        self.torn_down
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(app_id.to_string());
    }
}

impl Notifier for RecordingSurface {
    fn notify(&self, title: &str, body: &str) -> Result<(), CapabilityError> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}
