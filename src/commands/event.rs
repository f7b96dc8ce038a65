use anyhow::{Context as _, Result};

use app_guard::usage_limits::{Transition, UsageEvent};

use super::Context;

/// Append a foreground transition stamped with the current time
pub fn record(ctx: &Context, transition: Transition, app_id: &str) -> Result<()> {
    let event = UsageEvent {
        app_id: app_id.to_string(),
        transition,
        timestamp: ctx.clock.now(),
    };

    ctx.events.record(&event).with_context(|| {
        format!("Failed to append to event log: {}", ctx.events.path().display())
    })?;

    Ok(())
}
