use anyhow::Result;

use app_guard::usage_limits::aggregator::SLOT_COUNT;
use app_guard::usage_limits::{ReportPeriod, UsageAggregator};

use super::utils::format_minutes;
use super::Context;

fn aggregator(ctx: &Context) -> UsageAggregator {
    UsageAggregator::new(ctx.events.clone(), ctx.clock.clone())
}

/// Minutes used today against the app's limit
pub fn today(ctx: &Context, app_id: &str) -> Result<()> {
    let used = aggregator(ctx).total_minutes_today(app_id)?;

    match ctx.policies.get(app_id) {
        Some(policy) if policy.daily_limit_minutes > 0 => {
            let limit = i64::from(policy.daily_limit_minutes);
            println!(
                "{}: {} of {} used today ({} left)",
                app_id,
                format_minutes(used),
                format_minutes(limit),
                format_minutes((limit - used).max(0))
            );
        }
        _ => println!("{}: {} used today", app_id, format_minutes(used)),
    }
    Ok(())
}

/// Histogram and per-app totals for a period
pub fn stats(ctx: &Context, period: ReportPeriod) -> Result<()> {
    let aggregator = aggregator(ctx);
    let histogram = aggregator.time_slot_histogram(period)?;
    let usage = aggregator.app_usage(period)?;
    let current = aggregator.current_slot_index();

    println!("Usage for {} (total {})", period, format_minutes(histogram.total()));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let widest = histogram.minutes.iter().copied().max().unwrap_or(0).max(1);
    for (index, (label, minutes)) in histogram.labelled().enumerate() {
        let start = label % 24;
        let range = format!("{:02}-{:02}", start, start + 2);
        // Later slots of today have not happened yet
        if period == ReportPeriod::Today && slot_is_future(index, current) {
            println!("{}  {:>8}", range, "-");
            continue;
        }
        let bar = "█".repeat((minutes * 30 / widest) as usize);
        println!("{}  {:>8}  {}", range, format_minutes(minutes), bar);
    }

    if usage.is_empty() {
        return Ok(());
    }

    println!();
    println!("{:<32} {:>8} {:>9}", "APP", "TIME", "SESSIONS");
    for app in usage {
        let flag = if ctx.policies.get(&app.app_id).is_some() { " *" } else { "" };
        println!(
            "{:<32} {:>8} {:>9}{}",
            app.app_id,
            format_minutes(app.minutes),
            app.sessions,
            flag
        );
    }
    println!("(* restricted)");
    Ok(())
}

/// Slot order runs 03-05 .. 21-23 then 00-02, so 00-02 is never in the future
fn slot_is_future(index: usize, current: usize) -> bool {
    let hour_rank = |i: usize| (i + 1) % SLOT_COUNT;
    hour_rank(index) > hour_rank(current)
}
