use chrono::{DateTime, Duration, Local};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::usage_limits::aggregator::{Transition, UsageAggregator};
use crate::usage_limits::clock::Clock;
use crate::usage_limits::config::EngineConfig;
use crate::usage_limits::enforcement::{BlockReason, BlockingActuator};
use crate::usage_limits::error::CapabilityError;
use crate::usage_limits::pause::PauseLedger;
use crate::usage_limits::platform::{latest_foreground, Notifier, UsageEventSource};
use crate::usage_limits::policy::{BlockExpiry, PolicyStore};

/// What the loop decided for the foreground app on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementAction {
    None,
    Block,
    AllowPaused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementDecision {
    pub app_id: String,
    pub action: EnforcementAction,
}

/// Collaborators the loop reads from and drives
pub struct EngineServices {
    pub policies: Arc<PolicyStore>,
    pub ledger: Arc<PauseLedger>,
    pub source: Arc<dyn UsageEventSource>,
    pub actuator: Arc<BlockingActuator>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct ForegroundTracker {
    last_checked: Option<DateTime<Local>>,
    current: Option<String>,
}

struct EngineInner {
    services: EngineServices,
    aggregator: UsageAggregator,
    limits: RwLock<HashMap<String, u32>>,
    running: Mutex<bool>,
    generation: AtomicU64,
    foreground: Mutex<ForegroundTracker>,
    /// Pause expiry each app was last warned about
    pause_warnings: Mutex<HashMap<String, DateTime<Local>>>,
    tick_interval: std::time::Duration,
    lookback: Duration,
    warning_lead: Duration,
    self_app_id: Option<String>,
}

/// Periodic control loop deciding whether the foreground app gets blocked
pub struct EnforcementEngine {
    inner: Arc<EngineInner>,
}

impl EnforcementEngine {
    pub fn new(config: &EngineConfig, services: EngineServices) -> Self {
        let aggregator = UsageAggregator::new(services.source.clone(), services.clock.clone());
        let lookback = Duration::from_std(config.engine.foreground_lookback())
            .unwrap_or_else(|_| Duration::days(1));
        let warning_lead = Duration::from_std(std::time::Duration::from_secs(
            config.pause.warning_lead_secs,
        ))
        .unwrap_or_else(|_| Duration::zero());

        Self {
            inner: Arc::new(EngineInner {
                services,
                aggregator,
                limits: RwLock::new(HashMap::new()),
                running: Mutex::new(false),
                generation: AtomicU64::new(0),
                foreground: Mutex::new(ForegroundTracker::default()),
                pause_warnings: Mutex::new(HashMap::new()),
                tick_interval: config.engine.tick_interval(),
                lookback,
                warning_lead,
                self_app_id: config.engine.self_app_id.clone(),
            }),
        }
    }

    /// Start ticking with `limits`; on a running engine only the map is replaced
    pub async fn start(&self, limits: HashMap<String, u32>) {
        let now = self.inner.services.clock.now();
        let limits = self.inner.sanitize(limits, now);
        let monitored = limits.len();
        *self.inner.limits.write().await = limits;

        let mut running = self.inner.running.lock().await;
        if *running {
            info!("Enforcement loop refreshed, monitoring {} app(s)", monitored);
            return;
        }
        *running = true;
        drop(running);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Starting enforcement loop for {} app(s), ticking every {:?}",
            monitored, self.inner.tick_interval
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(inner.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if !*inner.running.lock().await
                    || inner.generation.load(Ordering::SeqCst) != generation
                {
                    info!("Enforcement loop stopped");
                    break;
                }

                inner.tick().await;
            }
        });
    }

    /// Stop ticking; no surface is shown after this returns
    pub async fn stop(&self) {
        let mut running = self.inner.running.lock().await;
        *running = false;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        info!("Stopping enforcement loop");
    }

    pub async fn is_running(&self) -> bool {
        *self.inner.running.lock().await
    }

    /// Current limit map
    pub async fn limits(&self) -> HashMap<String, u32> {
        self.inner.limits.read().await.clone()
    }

    /// Run one evaluation cycle now
    pub async fn tick(&self) -> Option<EnforcementDecision> {
        self.inner.tick().await
    }

    /// Decision for `app_id` at the current instant, without acting on it
    pub async fn evaluate(&self, app_id: &str) -> EnforcementDecision {
        let now = self.inner.services.clock.now();
        self.inner.decide(app_id, now).await.0
    }
}

impl EngineInner {
    /// Drop entries with nothing to enforce
    fn sanitize(&self, limits: HashMap<String, u32>, now: DateTime<Local>) -> HashMap<String, u32> {
        limits
            .into_iter()
            .filter(|(app_id, minutes)| {
                if app_id.is_empty() {
                    return false;
                }
                *minutes > 0
                    || self
                        .services
                        .policies
                        .get(app_id)
                        .is_some_and(|p| matches!(p.block_until, Some(until) if now < until))
            })
            .collect()
    }

    async fn tick(&self) -> Option<EnforcementDecision> {
        let now = self.services.clock.now();

        if !self.services.source.has_usage_permission() {
            debug!("Usage permission not granted, skipping tick");
            return None;
        }

        let foreground = match self.foreground_app(now).await {
            Ok(app) => app,
            Err(CapabilityError::PermissionDenied(capability)) => {
                debug!("{} permission revoked, skipping tick", capability);
                return None;
            }
            Err(e) => {
                warn!("Foreground app unavailable, skipping tick: {}", e);
                return None;
            }
        };

        let decision = match foreground {
            Some(app_id) => {
                let (decision, reason) = self.decide(&app_id, now).await;
                debug!("Tick decision for {}: {:?}", app_id, decision.action);
                match decision.action {
                    EnforcementAction::Block => {
                        if let Some(reason) = reason {
                            self.block(&app_id, reason).await;
                        }
                    }
                    EnforcementAction::AllowPaused => self.warn_if_pause_ending(&app_id, now).await,
                    EnforcementAction::None => {}
                }
                Some(decision)
            }
            None => {
                debug!("No foreground app");
                None
            }
        };

        self.reconcile_surface(decision.as_ref(), now).await;
        decision
    }

    /// Foreground app, seeded from the lookback window then tracked incrementally
    async fn foreground_app(&self, now: DateTime<Local>) -> Result<Option<String>, CapabilityError> {
        let mut tracker = self.foreground.lock().await;
        let ignored = self.self_app_id.as_deref();

        let last_checked = tracker.last_checked;
        match last_checked {
            None => {
                tracker.current = match ignored {
                    Some(_) => {
                        let events = self.services.source.events_in_range(now - self.lookback, now)?;
                        latest_foreground(&events, ignored)
                    }
                    None => self.services.source.current_foreground_app(now, self.lookback)?,
                };
            }
            Some(since) => {
                for event in self.services.source.events_in_range(since, now)? {
                    if Some(event.app_id.as_str()) == ignored {
                        continue;
                    }
                    match event.transition {
                        Transition::Enter => tracker.current = Some(event.app_id),
                        Transition::Exit if tracker.current.as_deref() == Some(event.app_id.as_str()) => {
                            tracker.current = None;
                        }
                        Transition::Exit => {}
                    }
                }
            }
        }

        tracker.last_checked = Some(now);
        Ok(tracker.current.clone())
    }

    /// Apply the per-tick transition rules to `app_id`
    async fn decide(
        &self,
        app_id: &str,
        now: DateTime<Local>,
    ) -> (EnforcementDecision, Option<BlockReason>) {
        let decision = |action| EnforcementDecision {
            app_id: app_id.to_string(),
            action,
        };
        let unrestricted = (decision(EnforcementAction::None), None);

        let monitored = self.limits.read().await.get(app_id).copied();
        let Some(mut limit) = monitored else {
            return unrestricted;
        };

        let Some(policy) = self.services.policies.get(app_id) else {
            debug!("Policy for {} was removed, no longer monitoring", app_id);
            self.limits.write().await.remove(app_id);
            return unrestricted;
        };

        if policy.has_elapsed_block_window(now) {
            match self.services.policies.expire_block_window(app_id, now) {
                BlockExpiry::Removed => {
                    self.limits.write().await.remove(app_id);
                    return unrestricted;
                }
                BlockExpiry::DowngradedToDailyLimit { minutes } => {
                    self.limits.write().await.insert(app_id.to_string(), minutes);
                    limit = minutes;
                }
                BlockExpiry::NotExpired => {}
            }
        }

        let reason = match policy.block_until {
            Some(until) if now < until => Some(BlockReason::Window { until }),
            _ if limit > 0 => match self.aggregator.total_minutes_today(app_id) {
                Ok(used) if used >= i64::from(limit) => {
                    Some(BlockReason::DailyLimit { minutes: limit })
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("Usage for {} unavailable, not enforcing: {}", app_id, e);
                    None
                }
            },
            _ => None,
        };

        let Some(reason) = reason else {
            return unrestricted;
        };

        if self.services.ledger.is_paused(app_id) {
            return (decision(EnforcementAction::AllowPaused), None);
        }

        self.pause_warnings.lock().await.remove(app_id);
        (decision(EnforcementAction::Block), Some(reason))
    }

    async fn block(&self, app_id: &str, reason: BlockReason) {
        if self.services.actuator.active_app().as_deref() == Some(app_id) {
            debug!("Block surface already showing for {}", app_id);
            return;
        }

        // Held across `show` so a concurrent stop waits for it
        let running = self.running.lock().await;
        if !*running {
            debug!("Enforcement loop stopped, not blocking {}", app_id);
            return;
        }

        // One app is foreground at a time; a surface bound elsewhere is no longer in front
        if let Some(previous) = self.services.actuator.active_app() {
            if previous != app_id {
                info!("Moving block surface from {} to {}", previous, app_id);
                self.services.actuator.dismiss();
            }
        }

        // Surfaces may shell out; keep that off the async workers
        let actuator = self.services.actuator.clone();
        let target = app_id.to_string();
        let shown = tokio::task::spawn_blocking(move || actuator.show(&target, reason)).await;

        match shown {
            Ok(Ok(_)) => {}
            Ok(Err(CapabilityError::PermissionDenied(capability))) => {
                warn!("Cannot block {}: {} permission not granted", app_id, capability);
            }
            Ok(Err(e)) => error!("Failed to show block surface for {}: {}", app_id, e),
            Err(e) => error!("Block surface task for {} failed: {}", app_id, e),
        }
    }

    async fn warn_if_pause_ending(&self, app_id: &str, now: DateTime<Local>) {
        let Some(record) = self.services.ledger.record(app_id) else {
            return;
        };
        let (Some(until), Some(remaining)) = (record.pause_until, record.remaining_at(now)) else {
            return;
        };
        if remaining > self.warning_lead {
            return;
        }

        let mut warned = self.pause_warnings.lock().await;
        if warned.get(app_id) == Some(&until) {
            return;
        }

        let name = self
            .services
            .policies
            .get(app_id)
            .map_or_else(|| app_id.to_string(), |p| p.display_name);
        let minutes = (remaining.num_seconds() + 59) / 60;
        let body = format!(
            "{} will be restricted again in {} minute{}.",
            name,
            minutes,
            if minutes == 1 { "" } else { "s" }
        );

        match self.services.notifier.notify("Pause ending", &body) {
            Ok(()) => info!("Warned that the pause for {} ends at {}", app_id, until),
            Err(e) => warn!("Failed to send pause warning for {}: {}", app_id, e),
        }
        warned.insert(app_id.to_string(), until);
    }

    /// Dismiss the surface once its app is no longer blocked
    async fn reconcile_surface(&self, decision: Option<&EnforcementDecision>, now: DateTime<Local>) {
        let Some(bound) = self.services.actuator.active_app() else {
            return;
        };

        let action = match decision {
            Some(d) if d.app_id == bound => d.action,
            _ => self.decide(&bound, now).await.0.action,
        };

        if action != EnforcementAction::Block {
            info!("{} is no longer blocked, dismissing surface", bound);
            self.services.actuator.dismiss();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage_limits::aggregator::UsageEvent;
    use crate::usage_limits::clock::ManualClock;
    use crate::usage_limits::enforcement::ActuatorState;
    use crate::usage_limits::platform::scripted::{RecordingSurface, ScriptedEvents};
    use crate::usage_limits::policy::RestrictionPolicy;

    struct Harness {
        clock: ManualClock,
        events: Arc<ScriptedEvents>,
        surface: Arc<RecordingSurface>,
        policies: Arc<PolicyStore>,
        ledger: Arc<PauseLedger>,
        actuator: Arc<BlockingActuator>,
        engine: EnforcementEngine,
    }

    fn harness() -> Harness {
        let clock = ManualClock::at(2026, 6, 10, 10, 0).unwrap();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let events = Arc::new(ScriptedEvents::new(Vec::new()));
        let surface = Arc::new(RecordingSurface::new());
        let policies = Arc::new(PolicyStore::in_memory());
        let ledger = Arc::new(PauseLedger::in_memory(shared_clock.clone(), 2));
        let actuator = Arc::new(BlockingActuator::new(
            ActuatorState::new(),
            surface.clone(),
            ledger.clone(),
            policies.clone(),
            5,
        ));

        let mut config = EngineConfig::default();
        // Keep the background loop out of the way; tests tick by hand
        config.engine.tick_interval_ms = 3_600_000;
        config.engine.foreground_lookback_secs = 3 * 3600;
        config.engine.self_app_id = Some("dev.app-guard".to_string());

        let engine = EnforcementEngine::new(
            &config,
            EngineServices {
                policies: policies.clone(),
                ledger: ledger.clone(),
                source: events.clone(),
                actuator: actuator.clone(),
                notifier: surface.clone(),
                clock: shared_clock,
            },
        );

        Harness {
            clock,
            events,
            surface,
            policies,
            ledger,
            actuator,
            engine,
        }
    }

    impl Harness {
        fn minutes_ago(&self, minutes: i64) -> DateTime<Local> {
            self.clock.now() - Duration::minutes(minutes)
        }

        async fn restrict(&self, app_id: &str, minutes: u32) {
            self.policies
                .upsert(RestrictionPolicy::daily_limit(app_id, app_id, minutes));
            self.engine.start(self.policies.monitored_limit_map(self.clock.now())).await;
        }

        async fn action(&self) -> Option<EnforcementAction> {
            self.engine.tick().await.map(|d| d.action)
        }
    }

    #[tokio::test]
    async fn test_within_limit_is_not_blocked() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(25)));
        h.restrict("x", 30).await;

        assert_eq!(h.action().await, Some(EnforcementAction::None));
        assert!(h.surface.presented().is_empty());
    }

    #[tokio::test]
    async fn test_exceeded_limit_blocks_once() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(31)));
        h.restrict("x", 30).await;

        assert_eq!(h.action().await, Some(EnforcementAction::Block));
        assert_eq!(h.action().await, Some(EnforcementAction::Block));
        assert_eq!(h.surface.presented().len(), 1);
        assert_eq!(h.actuator.active_app().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_pause_allows_app_until_it_expires() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(31)));
        h.restrict("x", 30).await;
        assert_eq!(h.action().await, Some(EnforcementAction::Block));

        assert_eq!(h.ledger.remaining_grants("x"), 2);
        h.actuator.request_pause("x").unwrap();
        assert!(h.ledger.is_paused("x"));
        assert_eq!(h.ledger.remaining_grants("x"), 1);

        h.clock.advance(Duration::minutes(2));
        assert_eq!(h.action().await, Some(EnforcementAction::AllowPaused));
        assert_eq!(h.surface.visible_count(), 0);

        h.clock.advance(Duration::minutes(3));
        assert_eq!(h.action().await, Some(EnforcementAction::Block));
        assert_eq!(h.surface.presented().len(), 2);
    }

    #[tokio::test]
    async fn test_pause_ending_warning_sent_once() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(31)));
        h.restrict("x", 30).await;
        h.ledger.grant_pause("x", 5).unwrap();

        h.action().await;
        assert!(h.surface.notifications().is_empty());

        h.clock.advance(Duration::minutes(4));
        h.action().await;
        h.clock.advance(Duration::seconds(30));
        h.action().await;

        let notes = h.surface.notifications();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].1.contains("in 1 minute"));
    }

    #[tokio::test]
    async fn test_surface_moves_to_newly_exceeded_foreground_app() {
        let h = harness();
        h.events.push(UsageEvent::enter("y", h.minutes_ago(40)));
        h.policies.upsert(RestrictionPolicy::daily_limit("x", "x", 30));
        h.events.push(UsageEvent::enter("x", h.minutes_ago(75)));
        h.events.push(UsageEvent::exit("x", h.minutes_ago(40)));
        h.restrict("y", 30).await;

        assert_eq!(h.action().await, Some(EnforcementAction::Block));
        assert_eq!(h.actuator.active_app().as_deref(), Some("y"));

        h.clock.advance(Duration::minutes(1));
        h.events.push(UsageEvent::enter("x", h.clock.now()));
        for _ in 0..3 {
            let decision = h.engine.tick().await.unwrap();
            assert_eq!(decision.app_id, "x");
            assert_eq!(decision.action, EnforcementAction::Block);
            h.clock.advance(Duration::seconds(30));
        }

        assert_eq!(h.actuator.active_app().as_deref(), Some("x"));
        let presented: Vec<String> = h.surface.presented().into_iter().map(|r| r.app_id).collect();
        assert_eq!(presented, vec!["y".to_string(), "x".to_string()]);
        assert_eq!(h.surface.torn_down(), vec!["y".to_string()]);
        assert_eq!(h.surface.visible_count(), 1);
    }

    #[tokio::test]
    async fn test_unrestricted_app_is_ignored() {
        let h = harness();
        h.events.push(UsageEvent::enter("free", h.minutes_ago(100)));
        h.restrict("x", 30).await;

        assert_eq!(h.action().await, Some(EnforcementAction::None));
        assert!(h.surface.presented().is_empty());
    }

    #[tokio::test]
    async fn test_own_app_does_not_replace_foreground() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(40)));
        h.events.push(UsageEvent::enter("dev.app-guard", h.minutes_ago(1)));
        h.restrict("x", 30).await;

        let decision = h.engine.tick().await.unwrap();
        assert_eq!(decision.app_id, "x");
        assert_eq!(decision.action, EnforcementAction::Block);
    }

    #[tokio::test]
    async fn test_foreground_tracked_between_ticks() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(10)));
        h.restrict("x", 30).await;
        assert_eq!(h.action().await, Some(EnforcementAction::None));

        h.clock.advance(Duration::minutes(1));
        h.events.push(UsageEvent::exit("x", h.clock.now()));
        assert_eq!(h.action().await, None);

        h.clock.advance(Duration::minutes(1));
        h.events.push(UsageEvent::enter("y", h.clock.now()));
        let decision = h.engine.tick().await.unwrap();
        assert_eq!(decision.app_id, "y");
    }

    #[tokio::test]
    async fn test_missing_permission_is_a_noop() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(31)));
        h.restrict("x", 30).await;
        h.events.set_permission(false);

        assert_eq!(h.action().await, None);
        assert!(h.surface.presented().is_empty());

        h.events.set_permission(true);
        assert_eq!(h.action().await, Some(EnforcementAction::Block));
    }

    #[tokio::test]
    async fn test_missing_overlay_permission_does_not_crash() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(31)));
        h.restrict("x", 30).await;
        h.surface.set_permission(false);

        assert_eq!(h.action().await, Some(EnforcementAction::Block));
        assert!(!h.actuator.state().is_active());
    }

    #[tokio::test]
    async fn test_stop_prevents_show() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(31)));
        h.restrict("x", 30).await;
        h.engine.stop().await;

        assert!(!h.engine.is_running().await);
        assert_eq!(h.action().await, Some(EnforcementAction::Block));
        assert!(h.surface.presented().is_empty());
    }

    #[tokio::test]
    async fn test_block_window_blocks_then_expires() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(1)));
        h.policies.upsert(RestrictionPolicy::block_window(
            "x",
            "X",
            h.clock.now() + Duration::minutes(30),
        ));
        h.engine.start(h.policies.monitored_limit_map(h.clock.now())).await;

        assert_eq!(h.action().await, Some(EnforcementAction::Block));
        assert_eq!(h.surface.presented()[0].headline, "Blocked until 10:30");

        h.clock.advance(Duration::minutes(30));
        assert_eq!(h.action().await, Some(EnforcementAction::None));
        assert!(h.policies.get("x").is_none());
        assert!(h.engine.limits().await.is_empty());
        assert_eq!(h.surface.visible_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_window_falls_back_to_daily_limit() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(50)));
        let mut policy = RestrictionPolicy::daily_limit("x", "X", 45);
        policy.block_until = Some(h.clock.now() + Duration::minutes(1));
        h.policies.upsert(policy);
        h.engine.start(h.policies.monitored_limit_map(h.clock.now())).await;

        h.clock.advance(Duration::minutes(2));
        assert_eq!(h.action().await, Some(EnforcementAction::Block));
        assert_eq!(h.surface.presented()[0].headline, "Daily limit of 45 min reached");
        assert_eq!(h.policies.get("x").unwrap().block_until, None);
    }

    #[tokio::test]
    async fn test_removed_policy_dismisses_surface() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(31)));
        h.restrict("x", 30).await;
        assert_eq!(h.action().await, Some(EnforcementAction::Block));

        h.policies.remove("x");
        assert_eq!(h.action().await, Some(EnforcementAction::None));
        assert_eq!(h.surface.visible_count(), 0);
    }

    #[tokio::test]
    async fn test_start_refreshes_and_sanitizes_limits() {
        let h = harness();
        let limits = HashMap::from([
            ("x".to_string(), 30),
            ("zero".to_string(), 0),
            (String::new(), 10),
        ]);
        h.engine.start(limits).await;
        assert_eq!(h.engine.limits().await, HashMap::from([("x".to_string(), 30)]));

        h.engine.start(HashMap::from([("y".to_string(), 15)])).await;
        assert!(h.engine.is_running().await);
        assert_eq!(h.engine.limits().await, HashMap::from([("y".to_string(), 15)]));
    }

    #[tokio::test]
    async fn test_zero_limit_never_exceeded() {
        let h = harness();
        h.events.push(UsageEvent::enter("x", h.minutes_ago(120)));
        h.policies.upsert(RestrictionPolicy::daily_limit("x", "X", 0));
        h.engine.start(HashMap::from([("x".to_string(), 0)])).await;

        assert_eq!(h.engine.evaluate("x").await.action, EnforcementAction::None);
    }
}
