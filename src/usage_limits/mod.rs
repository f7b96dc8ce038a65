//! Usage enforcement engine
//!
//! This module provides functionality to:
//! - Store per-app restriction policies (daily budgets and block windows)
//! - Track a bounded number of pause grants per app per day
//! - Turn foreground transitions into daily totals and 3-hour histograms
//! - Block the foreground app once its policy is violated

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod enforcement;
pub mod error;
pub mod pause;
pub mod platform;
pub mod policy;
pub mod store;
pub mod tracker;

pub use aggregator::{
    AppUsage, ReportPeriod, TimeSlotHistogram, Transition, UsageAggregator, UsageEvent,
    UsageSession,
};
pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use enforcement::{ActuatorState, BlockReason, BlockingActuator};
pub use error::{Capability, CapabilityError, PauseError, StoreError};
pub use pause::{PauseLedger, PauseRecord};
pub use policy::{PolicyStore, RestrictionPolicy};
pub use tracker::{EnforcementAction, EnforcementDecision, EnforcementEngine, EngineServices};
