pub mod config;
pub mod engine;
pub mod event;
pub mod pause;
pub mod policy;
pub mod usage;
pub mod utils;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use app_guard::usage_limits::config::get_config_path;
use app_guard::usage_limits::platform::EventLog;
use app_guard::usage_limits::{Clock, EngineConfig, PauseLedger, PolicyStore, SystemClock};

/// Stores and capabilities opened from the effective configuration
pub struct Context {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub policies: Arc<PolicyStore>,
    pub ledger: Arc<PauseLedger>,
    pub events: Arc<EventLog>,
}

impl Context {
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policies = Arc::new(PolicyStore::open(&config.policies_path()?));
        let ledger = Arc::new(PauseLedger::open(
            &config.pauses_path()?,
            clock.clone(),
            config.pause.max_grants_per_day,
        ));
        let events = Arc::new(EventLog::new(config.event_log_path()?));

        Ok(Self {
            config: config.clone(),
            clock,
            policies,
            ledger,
            events,
        })
    }
}

/// `--config` if given, otherwise the per-user config file
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => get_config_path(),
    }
}
