//! App usage limits: per-app daily budgets, block windows and a bounded
//! pause escape valve, enforced against the foreground app.

pub mod platform;
pub mod usage_limits;
