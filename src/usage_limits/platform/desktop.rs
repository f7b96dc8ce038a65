use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::usage_limits::error::CapabilityError;
use crate::usage_limits::platform::{Notifier, OverlayRequest, OverlaySurface};

/// Blocking surface backed by desktop notifications
///
/// Uses notify-send on Linux and osascript on macOS. Elsewhere the request
/// is only logged.
#[derive(Debug, Default)]
pub struct DesktopSurface;

impl DesktopSurface {
    pub fn new() -> Self {
        Self
    }

    fn body_for(request: &OverlayRequest) -> String {
        let mut body = request.headline.clone();
        if request.pause.is_enabled() {
            body.push_str(&format!(
                "\nRun `app-guard pause grant {}` for {} more minute{} ({} left today).",
                request.app_id,
                request.pause.minutes,
                if request.pause.minutes == 1 { "" } else { "s" },
                request.pause.remaining_grants
            ));
        } else {
            body.push_str("\nNo pauses left today.");
        }
        body
    }
}

impl OverlaySurface for DesktopSurface {
    fn has_overlay_permission(&self) -> bool {
        cfg!(any(target_os = "linux", target_os = "macos"))
            || std::env::var_os("APP_GUARD_LOG_ONLY_SURFACE").is_some()
    }

    fn present(&self, request: &OverlayRequest) -> Result<(), CapabilityError> {
        info!("Presenting block surface for {}", request.app_id);
        let title = format!("{} is blocked", request.display_name);
        send_system_notification(&title, &Self::body_for(request), true)
    }

    fn tear_down(&self, app_id: &str) {
        // Notifications expire on their own
        debug!("Block surface for {} dismissed", app_id);
    }
}

impl Notifier for DesktopSurface {
    fn notify(&self, title: &str, body: &str) -> Result<(), CapabilityError> {
        send_system_notification(title, body, false)
    }
}

fn send_system_notification(title: &str, message: &str, critical: bool) -> Result<(), CapabilityError> {
    #[cfg(target_os = "linux")]
    {
        let urgency = if critical { "--urgency=critical" } else { "--urgency=normal" };
        try_command("notify-send", &[title, message, urgency, "--icon=dialog-warning"])
    }

    #[cfg(target_os = "macos")]
    {
        let _ = critical;
        let script = format!(
            "display notification \"{}\" with title \"{}\" sound name \"Glass\"",
            escape_applescript(message),
            escape_applescript(title)
        );
        try_command("osascript", &["-e", &script])
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = critical;
        warn!("Notification: {} - {}", title, message);
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Longest a notification helper may run before it is killed
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

fn try_command(cmd: &str, args: &[&str]) -> Result<(), CapabilityError> {
    try_command_with_timeout(cmd, args, COMMAND_TIMEOUT)
}

/// Run a command, mapping spawn failures, bad exits and timeouts to an unavailable capability
fn try_command_with_timeout(cmd: &str, args: &[&str], timeout: Duration) -> Result<(), CapabilityError> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            warn!("Failed to run {}: {}", cmd, e);
            CapabilityError::Unavailable(format!("{}: {}", cmd, e))
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Ok(()),
            Ok(Some(status)) => {
                return Err(CapabilityError::Unavailable(format!(
                    "{} exited with {}",
                    cmd, status
                )));
            }
            Ok(None) if Instant::now() >= deadline => {
                warn!("{} did not finish within {:?}, killing it", cmd, timeout);
                let _ = child.kill();
                let _ = child.wait();
                return Err(CapabilityError::Unavailable(format!(
                    "{} timed out after {:?}",
                    cmd, timeout
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(CapabilityError::Unavailable(format!("{}: {}", cmd, e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage_limits::platform::PauseOffer;

    fn request(remaining_grants: u32) -> OverlayRequest {
        OverlayRequest {
            app_id: "com.video".to_string(),
            display_name: "Video".to_string(),
            headline: "Daily limit of 30 min reached".to_string(),
            pause: PauseOffer {
                minutes: 5,
                remaining_grants,
            },
        }
    }

    #[test]
    fn test_body_offers_pause_when_available() {
        let body = DesktopSurface::body_for(&request(2));
        assert!(body.contains("app-guard pause grant com.video"));
        assert!(body.contains("2 left today"));
    }

    #[test]
    fn test_body_without_pauses() {
        let body = DesktopSurface::body_for(&request(0));
        assert!(body.contains("No pauses left today"));
        assert!(!body.contains("pause grant"));
    }

    #[test]
    fn test_try_command_with_invalid_command() {
        assert!(try_command("nonexistent_command_xyz", &[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_command_is_killed_after_timeout() {
        let started = Instant::now();
        let result = try_command_with_timeout("sleep", &["10"], Duration::from_millis(200));

        assert!(matches!(result, Err(CapabilityError::Unavailable(msg)) if msg.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_reports_exit_status() {
        let result = try_command_with_timeout("false", &[], Duration::from_secs(5));
        assert!(matches!(result, Err(CapabilityError::Unavailable(msg)) if msg.contains("exited")));
    }
}
