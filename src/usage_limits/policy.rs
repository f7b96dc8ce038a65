use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::usage_limits::store::{RecordCache, RecordNamespace};

const NAMESPACE: &str = "policies";

/// A user-configured restriction for one app
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RestrictionPolicy {
    pub app_id: String,
    pub display_name: String,

    /// Daily budget in minutes; 0 means no daily budget
    #[serde(default)]
    pub daily_limit_minutes: u32,

    /// While in the future the app is blocked outright
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_until: Option<DateTime<Local>>,
}

/// Which restriction applies to a policy at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// Scheduled block window still running
    BlockWindow { until: DateTime<Local> },
    /// Daily usage budget
    DailyLimit { minutes: u32 },
    /// Nothing to enforce
    Inactive,
}

impl RestrictionPolicy {
    pub fn daily_limit(app_id: &str, display_name: &str, minutes: u32) -> Self {
        Self {
            app_id: app_id.to_string(),
            display_name: display_name.to_string(),
            daily_limit_minutes: minutes,
            block_until: None,
        }
    }

    pub fn block_window(app_id: &str, display_name: &str, until: DateTime<Local>) -> Self {
        Self {
            app_id: app_id.to_string(),
            display_name: display_name.to_string(),
            daily_limit_minutes: 0,
            block_until: Some(until),
        }
    }

    /// An active block window takes precedence over the daily budget
    pub fn mode_at(&self, now: DateTime<Local>) -> PolicyMode {
        match self.block_until {
            Some(until) if now < until => PolicyMode::BlockWindow { until },
            _ if self.daily_limit_minutes > 0 => PolicyMode::DailyLimit {
                minutes: self.daily_limit_minutes,
            },
            _ => PolicyMode::Inactive,
        }
    }

    /// Block window that has already ended
    pub fn has_elapsed_block_window(&self, now: DateTime<Local>) -> bool {
        matches!(self.block_until, Some(until) if now >= until)
    }
}

/// Outcome of clearing an elapsed block window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockExpiry {
    /// No policy, or its window is still running
    NotExpired,
    /// Window cleared, the daily budget stays in force
    DowngradedToDailyLimit { minutes: u32 },
    /// Window-only policy deleted
    Removed,
}

/// Durable mapping from app identifier to restriction policy
#[derive(Debug)]
pub struct PolicyStore {
    records: RecordCache<RestrictionPolicy>,
}

impl PolicyStore {
    /// Open the store at `path`; unreadable contents mean "no restrictions"
    pub fn open(path: &Path) -> Self {
        Self {
            records: RecordCache::new(RecordNamespace::on_disk(NAMESPACE, path)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            records: RecordCache::new(RecordNamespace::in_memory(NAMESPACE)),
        }
    }

    /// Insert or replace by app id
    pub fn upsert(&self, policy: RestrictionPolicy) {
        self.records.update(|policies| {
            match policies.iter_mut().find(|p| p.app_id == policy.app_id) {
                Some(existing) => *existing = policy,
                None => policies.push(policy),
            }
        });
    }

    /// All policies in insertion order
    pub fn all(&self) -> Vec<RestrictionPolicy> {
        self.records.read(|policies| policies.to_vec())
    }

    pub fn get(&self, app_id: &str) -> Option<RestrictionPolicy> {
        self.records
            .read(|policies| policies.iter().find(|p| p.app_id == app_id).cloned())
    }

    /// Remove a policy; returns whether one existed
    pub fn remove(&self, app_id: &str) -> bool {
        self.records.update(|policies| {
            let before = policies.len();
            policies.retain(|p| p.app_id != app_id);
            policies.len() != before
        })
    }

    pub fn is_empty(&self) -> bool {
        self.records.read(|policies| policies.is_empty())
    }

    /// Projection of every policy to its daily limit
    pub fn as_limit_map(&self) -> HashMap<String, u32> {
        self.records.read(|policies| {
            policies
                .iter()
                .map(|p| (p.app_id.clone(), p.daily_limit_minutes))
                .collect()
        })
    }

    /// Limit map of the apps that need monitoring right now
    ///
    /// Policies with neither a positive budget nor a running block window are
    /// left out. An empty map means the engine stays idle.
    pub fn monitored_limit_map(&self, now: DateTime<Local>) -> HashMap<String, u32> {
        self.records.read(|policies| {
            policies
                .iter()
                .filter(|p| p.mode_at(now) != PolicyMode::Inactive)
                .map(|p| (p.app_id.clone(), p.daily_limit_minutes))
                .collect()
        })
    }

    /// Clear an elapsed block window for `app_id`
    pub fn expire_block_window(&self, app_id: &str, now: DateTime<Local>) -> BlockExpiry {
        self.records.update(|policies| {
            let Some(index) = policies
                .iter()
                .position(|p| p.app_id == app_id && p.has_elapsed_block_window(now))
            else {
                return BlockExpiry::NotExpired;
            };

            let minutes = policies[index].daily_limit_minutes;
            if minutes > 0 {
                policies[index].block_until = None;
                info!("Block window ended for {}, daily limit of {} min remains", app_id, minutes);
                BlockExpiry::DowngradedToDailyLimit { minutes }
            } else {
                policies.remove(index);
                info!("Block window ended for {}, restriction removed", app_id);
                BlockExpiry::Removed
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage_limits::clock::{Clock, ManualClock};
    use chrono::Duration;
    use tempfile::tempdir;

    fn now() -> DateTime<Local> {
        ManualClock::at(2026, 6, 10, 12, 0).unwrap().now()
    }

    #[test]
    fn test_upsert_is_idempotent_and_replaces() {
        let store = PolicyStore::in_memory();
        store.upsert(RestrictionPolicy::daily_limit("com.video", "Video", 30));
        store.upsert(RestrictionPolicy::daily_limit("com.video", "Video", 30));
        assert_eq!(store.all().len(), 1);

        store.upsert(RestrictionPolicy::daily_limit("com.video", "Video", 45));
        assert_eq!(store.get("com.video").unwrap().daily_limit_minutes, 45);
    }

    #[test]
    fn test_all_keeps_insertion_order() {
        let store = PolicyStore::in_memory();
        store.upsert(RestrictionPolicy::daily_limit("b", "B", 10));
        store.upsert(RestrictionPolicy::daily_limit("a", "A", 20));
        store.upsert(RestrictionPolicy::daily_limit("b", "B", 15));

        let ids: Vec<_> = store.all().into_iter().map(|p| p.app_id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let store = PolicyStore::in_memory();
        assert!(!store.remove("missing"));
        store.upsert(RestrictionPolicy::daily_limit("x", "X", 30));
        assert!(store.remove("x"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_limit_map_projection() {
        let store = PolicyStore::in_memory();
        store.upsert(RestrictionPolicy::daily_limit("x", "X", 30));
        store.upsert(RestrictionPolicy::daily_limit("y", "Y", 0));

        let map = store.as_limit_map();
        assert_eq!(map.get("x"), Some(&30));
        assert_eq!(map.get("y"), Some(&0));

        let monitored = store.monitored_limit_map(now());
        assert_eq!(monitored.len(), 1);
        assert!(monitored.contains_key("x"));
    }

    #[test]
    fn test_block_window_takes_precedence() {
        let mut policy = RestrictionPolicy::daily_limit("x", "X", 30);
        policy.block_until = Some(now() + Duration::hours(1));

        assert!(matches!(policy.mode_at(now()), PolicyMode::BlockWindow { .. }));
        assert_eq!(
            policy.mode_at(now() + Duration::hours(2)),
            PolicyMode::DailyLimit { minutes: 30 }
        );
    }

    #[test]
    fn test_expire_block_window_removes_window_only_policy() {
        let store = PolicyStore::in_memory();
        store.upsert(RestrictionPolicy::block_window("x", "X", now() + Duration::minutes(30)));

        assert_eq!(store.expire_block_window("x", now()), BlockExpiry::NotExpired);
        assert_eq!(
            store.expire_block_window("x", now() + Duration::minutes(30)),
            BlockExpiry::Removed
        );
        assert!(store.get("x").is_none());
    }

    #[test]
    fn test_expire_block_window_keeps_daily_limit() {
        let store = PolicyStore::in_memory();
        let mut policy = RestrictionPolicy::daily_limit("x", "X", 45);
        policy.block_until = Some(now());
        store.upsert(policy);

        assert_eq!(
            store.expire_block_window("x", now()),
            BlockExpiry::DowngradedToDailyLimit { minutes: 45 }
        );
        let kept = store.get("x").unwrap();
        assert_eq!(kept.block_until, None);
        assert_eq!(kept.daily_limit_minutes, 45);
    }

    #[test]
    fn test_policies_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policies.json");

        let store = PolicyStore::open(&path);
        store.upsert(RestrictionPolicy::daily_limit("com.social", "Social", 60));
        store.upsert(RestrictionPolicy::block_window("com.game", "Game", now()));

        let reopened = PolicyStore::open(&path);
        assert_eq!(reopened.all(), store.all());
    }

    #[test]
    fn test_corrupt_store_fails_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policies.json");
        std::fs::write(&path, "com.social|Social|60|0").unwrap();

        let store = PolicyStore::open(&path);
        assert!(store.is_empty());
        assert!(store.as_limit_map().is_empty());
    }
}
