//! Entity blocklist with expiry.
//!
//! Keys are `(entity_type, entity_value)` for IPs, users and cards. A new
//! block for an existing key overwrites its reason and duration and bumps
//! `block_count`. Expired entries stay in the map (inactive) until
//! [`EntityBlocklist::purge_expired`] removes them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use escrowpay_types::{BlockedEntity, EntityKey};
use parking_lot::RwLock;
use tracing::{debug, info};

/// Blocked IPs, users and cards.
#[derive(Debug, Default)]
pub struct EntityBlocklist {
    blocked: RwLock<HashMap<EntityKey, BlockedEntity>>,
}

impl EntityBlocklist {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `key` for `duration` (`None` = permanent) starting now.
    pub fn block(
        &self,
        key: EntityKey,
        reason: impl Into<String>,
        duration: Option<Duration>,
    ) -> BlockedEntity {
        self.block_at(key, reason, duration, Utc::now())
    }

    /// Block `key` for `duration` (`None` = permanent) starting at `now`.
    pub fn block_at(
        &self,
        key: EntityKey,
        reason: impl Into<String>,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> BlockedEntity {
        let reason = reason.into();
        let blocked_until = duration.map(|d| now + d);
        let mut blocked = self.blocked.write();

        let entry = blocked
            .entry(key.clone())
            .and_modify(|existing| {
                existing.reason.clone_from(&reason);
                existing.blocked_until = blocked_until;
                existing.is_permanent = blocked_until.is_none();
                existing.block_count = existing.block_count.saturating_add(1);
            })
            .or_insert_with(|| BlockedEntity {
                key: key.clone(),
                reason: reason.clone(),
                blocked_until,
                is_permanent: blocked_until.is_none(),
                created_at: now,
                block_count: 1,
            });

        info!(
            entity = %key,
            reason = %reason,
            until = ?blocked_until,
            block_count = entry.block_count,
            "Entity blocked"
        );
        entry.clone()
    }

    /// Remove a block. Returns `true` if the key was present.
    pub fn unblock(&self, key: &EntityKey) -> bool {
        let removed = self.blocked.write().remove(key).is_some();
        if removed {
            info!(entity = %key, "Entity unblocked");
        }
        removed
    }

    #[must_use]
    pub fn is_blocked(&self, key: &EntityKey) -> bool {
        self.is_blocked_at(key, Utc::now())
    }

    #[must_use]
    pub fn is_blocked_at(&self, key: &EntityKey, now: DateTime<Utc>) -> bool {
        self.blocked
            .read()
            .get(key)
            .is_some_and(|b| b.is_active(now))
    }

    /// The block currently in force for `key`, if any.
    #[must_use]
    pub fn active_block(&self, key: &EntityKey, now: DateTime<Utc>) -> Option<BlockedEntity> {
        self.blocked
            .read()
            .get(key)
            .filter(|b| b.is_active(now))
            .cloned()
    }

    /// Whether any of `keys` is actively blocked.
    #[must_use]
    pub fn any_blocked(&self, keys: &[EntityKey], now: DateTime<Utc>) -> bool {
        let blocked = self.blocked.read();
        keys.iter()
            .any(|k| blocked.get(k).is_some_and(|b| b.is_active(now)))
    }

    /// Drop expired temporary blocks. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut blocked = self.blocked.write();
        let before = blocked.len();
        blocked.retain(|_, b| b.is_active(now));
        let removed = before - blocked.len();
        if removed > 0 {
            debug!(removed, "Purged expired blocks");
        }
        removed
    }

    /// All blocks currently in force.
    #[must_use]
    pub fn list_active(&self, now: DateTime<Utc>) -> Vec<BlockedEntity> {
        self.blocked
            .read()
            .values()
            .filter(|b| b.is_active(now))
            .cloned()
            .collect()
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocked.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocked.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use escrowpay_types::{CardFingerprint, EntityType, UserId};

    use super::*;

    fn ip_key(s: &str) -> EntityKey {
        EntityKey::ip(s.parse::<IpAddr>().unwrap())
    }

    #[test]
    fn temporary_block_expires() {
        let list = EntityBlocklist::new();
        let now = Utc::now();
        let key = ip_key("10.0.0.1");

        list.block_at(key.clone(), "card testing", Some(Duration::hours(24)), now);

        assert!(list.is_blocked_at(&key, now));
        assert!(list.is_blocked_at(&key, now + Duration::hours(23)));
        assert!(!list.is_blocked_at(&key, now + Duration::hours(24)));
    }

    #[test]
    fn permanent_block_never_expires() {
        let list = EntityBlocklist::new();
        let now = Utc::now();
        let key = EntityKey::card(&CardFingerprint::new("fp"));

        let block = list.block_at(key.clone(), "chargeback", None, now);
        assert!(block.is_permanent);
        assert_eq!(block.key.entity_type, EntityType::Card);
        assert!(list.is_blocked_at(&key, now + Duration::days(10_000)));
    }

    #[test]
    fn reblock_overwrites_and_counts() {
        let list = EntityBlocklist::new();
        let now = Utc::now();
        let key = EntityKey::user(UserId::new());

        list.block_at(key.clone(), "first", Some(Duration::hours(1)), now);
        let second = list.block_at(key.clone(), "second", Some(Duration::hours(48)), now);

        assert_eq!(second.reason, "second");
        assert_eq!(second.block_count, 2);
        assert_eq!(second.blocked_until, Some(now + Duration::hours(48)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn permanent_then_temporary_downgrades() {
        let list = EntityBlocklist::new();
        let now = Utc::now();
        let key = ip_key("10.0.0.2");

        list.block_at(key.clone(), "manual", None, now);
        let b = list.block_at(key.clone(), "auto", Some(Duration::hours(1)), now);
        assert!(!b.is_permanent);
        assert!(!list.is_blocked_at(&key, now + Duration::hours(2)));
    }

    #[test]
    fn unblock_removes_entry() {
        let list = EntityBlocklist::new();
        let key = ip_key("10.0.0.3");
        list.block(key.clone(), "manual", None);
        assert!(list.is_blocked(&key));
        assert!(list.unblock(&key));
        assert!(!list.is_blocked(&key));
        assert!(!list.unblock(&key));
    }

    #[test]
    fn purge_only_drops_expired() {
        let list = EntityBlocklist::new();
        let now = Utc::now();
        list.block_at(ip_key("10.0.0.4"), "short", Some(Duration::minutes(5)), now);
        list.block_at(ip_key("10.0.0.5"), "long", Some(Duration::hours(5)), now);
        list.block_at(ip_key("10.0.0.6"), "forever", None, now);

        let removed = list.purge_expired(now + Duration::hours(1));
        assert_eq!(removed, 1);
        assert_eq!(list.len(), 2);
        assert_eq!(list.list_active(now + Duration::hours(1)).len(), 2);
    }

    #[test]
    fn any_blocked_checks_every_key() {
        let list = EntityBlocklist::new();
        let now = Utc::now();
        let user = EntityKey::user(UserId::new());
        list.block_at(user.clone(), "fraud", None, now);

        assert!(list.any_blocked(&[ip_key("1.1.1.1"), user], now));
        assert!(!list.any_blocked(&[ip_key("1.1.1.1")], now));
        assert!(list.active_block(&ip_key("1.1.1.1"), now).is_none());
    }
}
