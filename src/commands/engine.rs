use anyhow::{Context as _, Result};
use std::sync::Arc;
use tracing::{info, warn};

use app_guard::usage_limits::platform::{DesktopSurface, OverlaySurface, UsageEventSource};
use app_guard::usage_limits::{
    ActuatorState, BlockingActuator, EngineConfig, EnforcementEngine, EngineServices,
};

use super::Context;

/// Run the enforcement loop until Ctrl+C
pub async fn run(config: EngineConfig) -> Result<()> {
    let ctx = Context::open(&config)?;

    let limits = ctx.policies.monitored_limit_map(ctx.clock.now());
    if limits.is_empty() {
        info!("No restrictions configured, engine stays idle");
        println!("No restrictions configured. Add one with: app-guard policy add --app <ID> --limit <MINUTES>");
        return Ok(());
    }

    if !ctx.events.has_usage_permission() {
        warn!(
            "Event log {} is not readable; nothing will be enforced until it is",
            ctx.events.path().display()
        );
    }

    let surface = Arc::new(DesktopSurface::new());
    if !surface.has_overlay_permission() {
        warn!("No blocking surface on this platform; violations will only be logged");
    }

    let actuator = Arc::new(BlockingActuator::new(
        ActuatorState::new(),
        surface.clone(),
        ctx.ledger.clone(),
        ctx.policies.clone(),
        config.pause.pause_minutes,
    ));

    let engine = EnforcementEngine::new(
        &config,
        EngineServices {
            policies: ctx.policies.clone(),
            ledger: ctx.ledger.clone(),
            source: ctx.events.clone(),
            actuator: actuator.clone(),
            notifier: surface,
            clock: ctx.clock.clone(),
        },
    );

    println!("✓ Enforcing {} restriction(s)", limits.len());
    println!("  Event log: {}", ctx.events.path().display());
    println!("Press Ctrl+C to stop");

    let mut current = limits.clone();
    engine.start(limits).await;

    // Pick up policy edits made by other processes
    let mut refresh = tokio::time::interval(config.engine.tick_interval());
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                break;
            }
            _ = refresh.tick() => {
                let now = ctx.clock.now();
                for policy in ctx.policies.all() {
                    if policy.has_elapsed_block_window(now) {
                        ctx.policies.expire_block_window(&policy.app_id, now);
                    }
                }

                let latest = ctx.policies.monitored_limit_map(now);
                if latest != current {
                    engine.start(latest.clone()).await;
                    current = latest;
                }
            }
        }
    }

    engine.stop().await;
    actuator.dismiss();
    info!("Shutdown complete");
    Ok(())
}
