//! Audit events emitted after every successful money-moving transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Who triggered the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Customer,
    Admin,
    /// Scheduler sweeps, automatic payouts and other unattended paths.
    System,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Admin => write!(f, "admin"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor_id: Option<UserId>,
    pub actor_type: ActorType,
    /// Verb, e.g. `escrow.released`.
    pub action: String,
    /// Kind of entity acted upon, e.g. `escrow`.
    pub entity_type: String,
    pub entity_id: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Event with no actor and no value snapshots.
    #[must_use]
    pub fn system(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id: None,
            actor_type: ActorType::System,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            old_values: None,
            new_values: None,
            created_at: now,
        }
    }

    #[must_use]
    pub fn by(mut self, actor_type: ActorType, actor_id: Option<UserId>) -> Self {
        self.actor_type = actor_type;
        self.actor_id = actor_id;
        self
    }

    #[must_use]
    pub fn with_change(
        mut self,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }
}
