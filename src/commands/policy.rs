use anyhow::Result;
use chrono::Duration;

use app_guard::usage_limits::policy::PolicyMode;
use app_guard::usage_limits::RestrictionPolicy;

use super::Context;

/// Set a daily limit, keeping any block window still running
pub fn add(ctx: &Context, app_id: &str, name: Option<String>, limit: u32) -> Result<()> {
    let now = ctx.clock.now();
    let existing = ctx.policies.get(app_id);
    let name = display_name(name, existing.as_ref(), app_id);

    let mut policy = RestrictionPolicy::daily_limit(app_id, &name, limit);
    policy.block_until = existing
        .and_then(|p| p.block_until)
        .filter(|until| now < *until);
    ctx.policies.upsert(policy);

    if limit == 0 {
        println!("✓ {} ({}) has no daily limit", name, app_id);
    } else {
        println!("✓ Limited {} ({}) to {} min per day", name, app_id, limit);
    }
    Ok(())
}

/// Block an app from now for `minutes`, keeping its daily limit
pub fn block(ctx: &Context, app_id: &str, name: Option<String>, minutes: u32) -> Result<()> {
    if minutes == 0 {
        anyhow::bail!("Block window must be at least one minute");
    }

    let now = ctx.clock.now();
    let existing = ctx.policies.get(app_id);
    let name = display_name(name, existing.as_ref(), app_id);
    let until = now + Duration::minutes(i64::from(minutes));

    let mut policy = RestrictionPolicy::block_window(app_id, &name, until);
    policy.daily_limit_minutes = existing.map_or(0, |p| p.daily_limit_minutes);
    ctx.policies.upsert(policy);

    println!("✓ Blocked {} ({}) until {}", name, app_id, until.format("%Y-%m-%d %H:%M"));
    Ok(())
}

pub fn remove(ctx: &Context, app_id: &str) -> Result<()> {
    if ctx.policies.remove(app_id) {
        println!("✓ Removed restriction for {}", app_id);
    } else {
        println!("No restriction for {}", app_id);
    }
    Ok(())
}

pub fn list(ctx: &Context) -> Result<()> {
    let policies = ctx.policies.all();
    if policies.is_empty() {
        println!("No restrictions configured");
        return Ok(());
    }

    let now = ctx.clock.now();
    println!("{:<32} {:<20} {}", "APP", "NAME", "RESTRICTION");
    for policy in policies {
        let restriction = match policy.mode_at(now) {
            PolicyMode::BlockWindow { until } => {
                format!("blocked until {}", until.format("%Y-%m-%d %H:%M"))
            }
            PolicyMode::DailyLimit { minutes } => format!("{} min per day", minutes),
            PolicyMode::Inactive => "inactive".to_string(),
        };
        println!("{:<32} {:<20} {}", policy.app_id, policy.display_name, restriction);
    }
    Ok(())
}

fn display_name(given: Option<String>, existing: Option<&RestrictionPolicy>, app_id: &str) -> String {
    given
        .or_else(|| existing.map(|p| p.display_name.clone()))
        .unwrap_or_else(|| app_id.to_string())
}
