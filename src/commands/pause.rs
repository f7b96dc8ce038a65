use anyhow::Result;

use super::utils::format_duration;
use super::Context;

/// Show pause state for an app
pub fn status(ctx: &Context, app_id: &str) -> Result<()> {
    let remaining = ctx.ledger.remaining_grants(app_id);
    let max = ctx.ledger.max_grants_per_day();

    println!("Pause status for {}", app_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match ctx.ledger.pause_remaining(app_id) {
        Some(left) => println!("Paused:       yes ({} left)", format_duration(left)),
        None => println!("Paused:       no"),
    }
    println!("Grants left:  {} of {} today", remaining, max);
    println!("Pause length: {} min", ctx.config.pause.pause_minutes);

    Ok(())
}

/// Use one pause grant for an app
pub fn grant(ctx: &Context, app_id: &str) -> Result<()> {
    let record = ctx.ledger.grant_pause(app_id, ctx.config.pause.pause_minutes)?;

    let until = record
        .pause_until
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default();
    println!("✓ Paused {} until {}", app_id, until);
    println!(
        "  {} of {} grants left today",
        ctx.ledger.max_grants_per_day().saturating_sub(record.grants_used_today),
        ctx.ledger.max_grants_per_day()
    );

    Ok(())
}
