use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::usage_limits::error::{Capability, CapabilityError, PauseError};
use crate::usage_limits::pause::{PauseLedger, PauseRecord};
use crate::usage_limits::platform::{OverlayRequest, OverlaySurface, PauseOffer};
use crate::usage_limits::policy::PolicyStore;

/// Which app, if any, the blocking surface is bound to
///
/// Only one app can be in the foreground, so one flag covers every app.
/// Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct ActuatorState {
    active: Arc<Mutex<Option<String>>>,
}

impl ActuatorState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active_app(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Bind the surface to `app_id` unless it is already bound
    fn claim(&self, app_id: &str) -> bool {
        let mut active = self.lock();
        if active.is_some() {
            return false;
        }
        *active = Some(app_id.to_string());
        true
    }

    fn release(&self) -> Option<String> {
        self.lock().take()
    }
}

/// Why an app is being blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    DailyLimit { minutes: u32 },
    Window { until: DateTime<Local> },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::DailyLimit { minutes } => {
                write!(f, "Daily limit of {} min reached", minutes)
            }
            BlockReason::Window { until } => {
                write!(f, "Blocked until {}", until.format("%H:%M"))
            }
        }
    }
}

/// Presents and dismisses the interruptive surface
pub struct BlockingActuator {
    state: ActuatorState,
    surface: Arc<dyn OverlaySurface>,
    ledger: Arc<PauseLedger>,
    policies: Arc<PolicyStore>,
    pause_minutes: u32,
}

impl BlockingActuator {
    pub fn new(
        state: ActuatorState,
        surface: Arc<dyn OverlaySurface>,
        ledger: Arc<PauseLedger>,
        policies: Arc<PolicyStore>,
        pause_minutes: u32,
    ) -> Self {
        Self {
            state,
            surface,
            ledger,
            policies,
            pause_minutes,
        }
    }

    pub fn state(&self) -> &ActuatorState {
        &self.state
    }

    pub fn active_app(&self) -> Option<String> {
        self.state.active_app()
    }

    /// Pause button state for `app_id`
    pub fn pause_offer(&self, app_id: &str) -> PauseOffer {
        PauseOffer {
            minutes: self.pause_minutes,
            remaining_grants: self.ledger.remaining_grants(app_id),
        }
    }

    /// Show the surface for `app_id`
    ///
    /// Returns `Ok(false)` without touching the surface when one is already
    /// showing.
    pub fn show(&self, app_id: &str, reason: BlockReason) -> Result<bool, CapabilityError> {
        if !self.surface.has_overlay_permission() {
            return Err(CapabilityError::PermissionDenied(Capability::Overlay));
        }

        if !self.state.claim(app_id) {
            debug!("Block surface already showing, not presenting for {}", app_id);
            return Ok(false);
        }

        let display_name = self
            .policies
            .get(app_id)
            .map(|p| p.display_name)
            .unwrap_or_else(|| app_id.to_string());

        let request = OverlayRequest {
            app_id: app_id.to_string(),
            display_name,
            headline: reason.to_string(),
            pause: self.pause_offer(app_id),
        };

        if let Err(e) = self.surface.present(&request) {
            self.state.release();
            return Err(e);
        }

        info!("Blocked {}: {}", app_id, reason);
        Ok(true)
    }

    /// Pause action from the surface: grant a pause, then dismiss
    pub fn request_pause(&self, app_id: &str) -> Result<PauseRecord, PauseError> {
        let record = self.ledger.grant_pause(app_id, self.pause_minutes).map_err(|e| {
            warn!("Pause refused for {}: {}", app_id, e);
            e
        })?;
        self.dismiss();
        Ok(record)
    }

    /// Close action from the surface
    pub fn close(&self) {
        self.dismiss();
    }

    /// Tear down the surface and clear the active flag; idempotent
    pub fn dismiss(&self) {
        if let Some(app_id) = self.state.release() {
            self.surface.tear_down(&app_id);
            debug!("Dismissed block surface for {}", app_id);
        }
    }
}
