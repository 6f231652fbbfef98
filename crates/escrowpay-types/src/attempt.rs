//! Admission-gate types: the payment attempt log, entity blocks, and the
//! gate's decision.
//!
//! Attempts are append-only. The only mutation ever applied to a logged
//! attempt is the status update when the attempt resolves.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, AttemptId, CardFingerprint, UserId, constants};

/// Outcome of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    /// Logged, not yet sent to a provider (or waiting for a retry).
    Pending,
    /// Provider call in progress.
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One row of the payment attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: AttemptId,
    pub user_id: Option<UserId>,
    pub ip_address: IpAddr,
    pub card_fingerprint: Option<CardFingerprint>,
    pub amount: Amount,
    pub device_fingerprint: String,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
}

impl PaymentAttempt {
    /// A fresh `Pending` attempt stamped at `now`.
    #[must_use]
    pub fn new(
        user_id: Option<UserId>,
        ip_address: IpAddr,
        card_fingerprint: Option<CardFingerprint>,
        amount: Amount,
        device_fingerprint: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            user_id,
            ip_address,
            card_fingerprint,
            amount,
            device_fingerprint: device_fingerprint.into(),
            status: AttemptStatus::Pending,
            created_at: now,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: AttemptStatus) -> Self {
        self.status = status;
        self
    }
}

// ---------------------------------------------------------------------------
// Blocked entities
// ---------------------------------------------------------------------------

/// Kind of identity a block applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Ip,
    User,
    Card,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip => write!(f, "ip"),
            Self::User => write!(f, "user"),
            Self::Card => write!(f, "card"),
        }
    }
}

/// Blocklist key: `(entity_type, entity_value)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_value: String,
}

impl EntityKey {
    #[must_use]
    pub fn ip(ip: IpAddr) -> Self {
        Self {
            entity_type: EntityType::Ip,
            entity_value: ip.to_string(),
        }
    }

    #[must_use]
    pub fn user(user: UserId) -> Self {
        Self {
            entity_type: EntityType::User,
            entity_value: user.to_string(),
        }
    }

    #[must_use]
    pub fn card(card: &CardFingerprint) -> Self {
        Self {
            entity_type: EntityType::Card,
            entity_value: card.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_value)
    }
}

/// A block on an IP, user or card. `blocked_until == None` means permanent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedEntity {
    pub key: EntityKey,
    pub reason: String,
    pub blocked_until: Option<DateTime<Utc>>,
    pub is_permanent: bool,
    pub created_at: DateTime<Utc>,
    /// Number of times this key has been (re-)blocked.
    pub block_count: u32,
}

impl BlockedEntity {
    /// Whether the block still applies at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_permanent || self.blocked_until.is_some_and(|until| now < until)
    }
}

// ---------------------------------------------------------------------------
// Gate decision
// ---------------------------------------------------------------------------

/// Individual risk signal raised by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSignal {
    IpVelocity,
    UserVelocity,
    CardTesting,
    FailedAttempts,
    BurstVelocity,
    BlockedEntity,
}

impl RiskSignal {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IpVelocity => "ip_velocity",
            Self::UserVelocity => "user_velocity",
            Self::CardTesting => "card_testing",
            Self::FailedAttempts => "failed_attempts",
            Self::BurstVelocity => "burst_velocity",
            Self::BlockedEntity => "blocked_entity",
        }
    }
}

impl std::fmt::Display for RiskSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller should do with the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Allow,
    Review,
    Block,
}

impl GateAction {
    /// Map a risk score onto an action using the contract thresholds.
    #[must_use]
    pub fn for_score(risk_score: u32) -> Self {
        if risk_score >= constants::BLOCK_THRESHOLD {
            Self::Block
        } else if risk_score >= constants::REVIEW_THRESHOLD {
            Self::Review
        } else {
            Self::Allow
        }
    }
}

impl std::fmt::Display for GateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Review => write!(f, "review"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Result of evaluating one attempt against the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub risk_score: u32,
    pub risks: Vec<RiskSignal>,
    pub action: GateAction,
}

impl GateDecision {
    /// Build a decision from an accumulated score.
    #[must_use]
    pub fn from_score(risk_score: u32, risks: Vec<RiskSignal>) -> Self {
        let action = GateAction::for_score(risk_score);
        Self {
            allowed: risk_score < constants::BLOCK_THRESHOLD,
            risk_score,
            risks,
            action,
        }
    }

    /// Risk tags as plain strings (for errors and audit).
    #[must_use]
    pub fn risk_tags(&self) -> Vec<String> {
        self.risks.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_boundaries_are_exact() {
        assert_eq!(GateAction::for_score(0), GateAction::Allow);
        assert_eq!(GateAction::for_score(39), GateAction::Allow);
        assert_eq!(GateAction::for_score(40), GateAction::Review);
        assert_eq!(GateAction::for_score(69), GateAction::Review);
        assert_eq!(GateAction::for_score(70), GateAction::Block);
        assert_eq!(GateAction::for_score(100), GateAction::Block);
    }

    #[test]
    fn allowed_iff_below_seventy() {
        assert!(GateDecision::from_score(69, vec![]).allowed);
        assert!(!GateDecision::from_score(70, vec![]).allowed);
    }

    #[test]
    fn block_activity_window() {
        let now = Utc::now();
        let mut block = BlockedEntity {
            key: EntityKey::ip("10.0.0.1".parse().unwrap()),
            reason: "test".into(),
            blocked_until: Some(now + chrono::Duration::hours(1)),
            is_permanent: false,
            created_at: now,
            block_count: 1,
        };
        assert!(block.is_active(now));
        assert!(!block.is_active(now + chrono::Duration::hours(2)));

        block.blocked_until = None;
        block.is_permanent = true;
        assert!(block.is_active(now + chrono::Duration::days(3650)));
    }

    #[test]
    fn risk_tags_are_snake_case() {
        let decision = GateDecision::from_score(
            75,
            vec![RiskSignal::CardTesting, RiskSignal::BurstVelocity],
        );
        assert_eq!(decision.risk_tags(), vec!["card_testing", "burst_velocity"]);
        assert_eq!(
            serde_json::to_string(&RiskSignal::IpVelocity).unwrap(),
            "\"ip_velocity\""
        );
    }

    #[test]
    fn entity_key_display() {
        let key = EntityKey::ip("192.168.1.9".parse().unwrap());
        assert_eq!(key.to_string(), "ip:192.168.1.9");
    }
}
