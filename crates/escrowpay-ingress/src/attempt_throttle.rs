//! Attempt throttle: the fraud / velocity gate in front of every collection.
//!
//! Each attempt is scored against the attempt log and the blocklist. Risk is
//! additive; the thresholds in [`escrowpay_types::constants`] map the score
//! to allow / review / block.
//!
//! ## Concurrency
//!
//! The attempt log sits behind a single mutex. [`AttemptThrottle::admit`]
//! evaluates and appends while holding it, so a burst of simultaneous
//! attempts is counted one by one and cannot all slip in under a threshold.
//! Lock order is always log, then blocklist.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use escrowpay_types::{
    Amount, AttemptId, AttemptStatus, CardFingerprint, EntityKey, EscrowPayError, GateConfig,
    GateDecision, PaymentAttempt, Result, RiskSignal, UserId, constants,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::blocklist::EntityBlocklist;

/// Who is attempting to pay, and how much.
#[derive(Debug, Clone, Copy)]
pub struct AttemptSubject<'a> {
    pub user_id: Option<UserId>,
    pub ip: IpAddr,
    pub card: Option<&'a CardFingerprint>,
    pub amount: Amount,
}

impl<'a> AttemptSubject<'a> {
    #[must_use]
    pub fn of(attempt: &'a PaymentAttempt) -> Self {
        Self {
            user_id: attempt.user_id,
            ip: attempt.ip_address,
            card: attempt.card_fingerprint.as_ref(),
            amount: attempt.amount,
        }
    }

    fn matches(&self, attempt: &PaymentAttempt) -> bool {
        attempt.ip_address == self.ip || (self.user_id.is_some() && attempt.user_id == self.user_id)
    }
}

/// Append-only attempt log. Only `status` is ever updated in place.
#[derive(Debug, Default)]
struct AttemptLog {
    entries: VecDeque<PaymentAttempt>,
}

impl AttemptLog {
    fn since(&self, cutoff: DateTime<Utc>) -> impl Iterator<Item = &PaymentAttempt> {
        self.entries.iter().filter(move |a| a.created_at > cutoff)
    }

    fn find_mut(&mut self, id: AttemptId) -> Option<&mut PaymentAttempt> {
        // Resolutions almost always target recent attempts.
        self.entries.iter_mut().rev().find(|a| a.id == id)
    }
}

/// Fraud / velocity admission gate.
#[derive(Debug)]
pub struct AttemptThrottle {
    config: GateConfig,
    log: Mutex<AttemptLog>,
    blocklist: EntityBlocklist,
}

impl AttemptThrottle {
    /// Create a throttle with the production windows and limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GateConfig::default())
    }

    #[must_use]
    pub fn with_config(config: GateConfig) -> Self {
        Self {
            config,
            log: Mutex::new(AttemptLog::default()),
            blocklist: EntityBlocklist::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The blocklist consulted by the gate (for manual block/unblock).
    #[must_use]
    pub fn blocklist(&self) -> &EntityBlocklist {
        &self.blocklist
    }

    // -----------------------------------------------------------------
    // Gate
    // -----------------------------------------------------------------

    /// Score an attempt without logging it.
    ///
    /// The card-testing signal still blocks the IP as a side effect.
    pub fn check_attempt(
        &self,
        user_id: Option<UserId>,
        ip: IpAddr,
        card: Option<&CardFingerprint>,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let subject = AttemptSubject {
            user_id,
            ip,
            card,
            amount,
        };
        let log = self.log.lock();
        self.evaluate(&log, &subject, now)
    }

    /// Score `attempt` at its `created_at` and append it in one critical
    /// section. A refused attempt is appended with status `Failed`.
    pub fn admit(&self, mut attempt: PaymentAttempt) -> (GateDecision, AttemptId) {
        let now = attempt.created_at;
        let mut log = self.log.lock();

        let decision = self.evaluate(&log, &AttemptSubject::of(&attempt), now);
        if !decision.allowed {
            attempt.status = AttemptStatus::Failed;
            warn!(
                attempt_id = %attempt.id,
                ip = %attempt.ip_address,
                risk_score = decision.risk_score,
                risks = ?decision.risk_tags(),
                "Payment attempt refused"
            );
        }

        let id = attempt.id;
        let failed = attempt.status == AttemptStatus::Failed;
        let subject = (attempt.user_id, attempt.ip_address);
        log.entries.push_back(attempt);
        if failed {
            self.enforce_failure_limit(&log, subject.0, subject.1, now);
        }
        (decision, id)
    }

    /// Convenience wrapper: the refusal as an error.
    pub fn admit_or_refuse(&self, attempt: PaymentAttempt) -> Result<(GateDecision, AttemptId)> {
        let (decision, id) = self.admit(attempt);
        if decision.allowed {
            Ok((decision, id))
        } else {
            Err(EscrowPayError::FraudBlocked {
                risk_score: decision.risk_score,
                risks: decision.risk_tags(),
            })
        }
    }

    fn evaluate(
        &self,
        log: &AttemptLog,
        subject: &AttemptSubject<'_>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let cfg = &self.config;
        let window_start = now - cfg.attempt_window();
        let burst_start = now - cfg.burst_window();

        // Blocks already in force before this evaluation.
        let mut keys = vec![EntityKey::ip(subject.ip)];
        if let Some(user) = subject.user_id {
            keys.push(EntityKey::user(user));
        }
        if let Some(card) = subject.card {
            keys.push(EntityKey::card(card));
        }
        let already_blocked = self.blocklist.any_blocked(&keys, now);

        let mut score: u32 = 0;
        let mut risks = Vec::new();

        let ip_attempts = log
            .since(window_start)
            .filter(|a| a.ip_address == subject.ip)
            .count();
        if ip_attempts >= cfg.ip_attempt_limit {
            score += constants::IP_VELOCITY_SCORE;
            risks.push(RiskSignal::IpVelocity);
        }

        if let Some(user) = subject.user_id {
            let user_attempts = log
                .since(window_start)
                .filter(|a| a.user_id == Some(user))
                .count();
            if user_attempts >= cfg.user_attempt_limit {
                score += constants::USER_VELOCITY_SCORE;
                risks.push(RiskSignal::UserVelocity);
            }
        }

        if subject.amount < cfg.card_testing_amount_ceiling {
            let mut cards: HashSet<&CardFingerprint> = log
                .since(window_start)
                .filter(|a| subject.matches(a))
                .filter_map(|a| a.card_fingerprint.as_ref())
                .collect();
            if let Some(card) = subject.card {
                cards.insert(card);
            }
            if cards.len() >= cfg.card_testing_distinct_cards {
                score += constants::CARD_TESTING_SCORE;
                risks.push(RiskSignal::CardTesting);
                self.blocklist.block_at(
                    EntityKey::ip(subject.ip),
                    format!("card testing: {} distinct cards", cards.len()),
                    Some(cfg.auto_block_duration()),
                    now,
                );
            }
        }

        let failures = log
            .since(window_start)
            .filter(|a| a.status == AttemptStatus::Failed && subject.matches(a))
            .count();
        if failures >= cfg.failed_attempt_limit {
            score += constants::FAILED_ATTEMPTS_SCORE;
            risks.push(RiskSignal::FailedAttempts);
        }

        let burst = log
            .since(burst_start)
            .filter(|a| subject.matches(a))
            .count();
        if burst >= cfg.burst_attempt_limit {
            score += constants::BURST_VELOCITY_SCORE;
            risks.push(RiskSignal::BurstVelocity);
        }

        if already_blocked {
            score = constants::BLOCKED_ENTITY_SCORE;
            risks.push(RiskSignal::BlockedEntity);
        }

        debug!(
            ip = %subject.ip,
            user = ?subject.user_id,
            ip_attempts,
            failures,
            burst,
            risk_score = score,
            "Attempt scored"
        );
        GateDecision::from_score(score, risks)
    }

    // -----------------------------------------------------------------
    // Attempt log
    // -----------------------------------------------------------------

    /// Append an attempt unconditionally (blocked attempts included).
    pub fn log_attempt(&self, attempt: PaymentAttempt) -> AttemptId {
        let id = attempt.id;
        let now = attempt.created_at;
        let failed = attempt.status == AttemptStatus::Failed;
        let (user, ip) = (attempt.user_id, attempt.ip_address);

        let mut log = self.log.lock();
        log.entries.push_back(attempt);
        if failed {
            self.enforce_failure_limit(&log, user, ip, now);
        }
        id
    }

    /// Record the outcome of an attempt.
    pub fn resolve_attempt(&self, id: AttemptId, status: AttemptStatus) -> Result<()> {
        self.resolve_attempt_at(id, status, Utc::now())
    }

    pub fn resolve_attempt_at(
        &self,
        id: AttemptId,
        status: AttemptStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut log = self.log.lock();
        let attempt = log
            .find_mut(id)
            .ok_or_else(|| escrowpay_types::not_found("payment attempt", id))?;
        attempt.status = status;
        let (user, ip) = (attempt.user_id, attempt.ip_address);

        debug!(attempt_id = %id, %status, "Attempt resolved");
        if status == AttemptStatus::Failed {
            self.enforce_failure_limit(&log, user, ip, now);
        }
        Ok(())
    }

    /// Auto-block the IP (and user) once recent failures reach the limit.
    fn enforce_failure_limit(
        &self,
        log: &AttemptLog,
        user_id: Option<UserId>,
        ip: IpAddr,
        now: DateTime<Utc>,
    ) {
        let subject = AttemptSubject {
            user_id,
            ip,
            card: None,
            amount: Amount::ZERO,
        };
        let failures = log
            .since(now - self.config.attempt_window())
            .filter(|a| a.status == AttemptStatus::Failed && subject.matches(a))
            .count();
        if failures < self.config.failed_attempt_limit {
            return;
        }

        let duration = Some(self.config.auto_block_duration());
        let reason = format!("{failures} failed payment attempts");
        self.blocklist
            .block_at(EntityKey::ip(ip), reason.clone(), duration, now);
        if let Some(user) = user_id {
            self.blocklist
                .block_at(EntityKey::user(user), reason, duration, now);
        }
        info!(%ip, user = ?user_id, failures, "Auto-blocked after repeated failures");
    }

    // -----------------------------------------------------------------
    // Queries / maintenance
    // -----------------------------------------------------------------

    #[must_use]
    pub fn attempt(&self, id: AttemptId) -> Option<PaymentAttempt> {
        self.log.lock().entries.iter().find(|a| a.id == id).cloned()
    }

    /// Attempts from `ip` within the window ending at `now`.
    #[must_use]
    pub fn attempts_from_ip(&self, ip: IpAddr, now: DateTime<Utc>) -> usize {
        self.log
            .lock()
            .since(now - self.config.attempt_window())
            .filter(|a| a.ip_address == ip)
            .count()
    }

    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.log.lock().entries.len()
    }

    /// Drop attempts created at or before `older_than`. Returns how many.
    pub fn prune_attempts(&self, older_than: DateTime<Utc>) -> usize {
        let mut log = self.log.lock();
        let before = log.entries.len();
        log.entries.retain(|a| a.created_at > older_than);
        before - log.entries.len()
    }
}

impl Default for AttemptThrottle {
    fn default() -> Self {
        Self::new()
    }
}
