//! Circuit breaker: metric-driven pause of every mutating call.
//!
//! ## Metrics
//!
//! A circular buffer of `window_slots` buckets, each `bucket_secs` long
//! (24 × 1h by default), holds volume, operation count, and proof outcomes.
//! A bucket is reset the first time it is touched in a new period, so the
//! window never needs a background timer.
//!
//! ## Checks
//!
//! 1. **Volume anomaly**: `amount > spike_factor × (window volume / window ops)`.
//!    An empty window is never anomalous.
//! 2. **Failure rate**: once at least `failure_min_sample` proofs are in the
//!    window, more than `max_failure_rate_percent` failures trips.
//! 3. **Same-slot spam**: consecutive operations in one discrete slot,
//!    beyond `max_ops_per_slot` in that slot.
//!
//! ## Resume
//!
//! Each trip gets a fresh sequence number. Resume votes name the sequence
//! they approve, so no vote cast before or during an earlier pause can
//! count toward lifting the current one.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use triad_types::{
    CircuitBreakerConfig, Result, TriadError, ValidatorId, ValidatorSet, constants,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Bucket {
    /// Absolute period index this bucket currently holds.
    period: i64,
    volume: Decimal,
    operations: u64,
    proofs: u64,
    failed_proofs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Active,
    Paused {
        reason: String,
        tripped_at: DateTime<Utc>,
        trip_sequence: u64,
    },
}

/// Window totals as seen at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowStats {
    pub volume: Decimal,
    pub operations: u64,
    pub proofs: u64,
    pub failed_proofs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    buckets: Vec<Bucket>,
    state: BreakerState,
    trip_sequence: u64,
    resume_votes: BTreeSet<ValidatorId>,
    last_slot: Option<i64>,
    slot_operations: u32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let slots = config.window_slots.max(1);
        Self {
            config,
            buckets: vec![Bucket::default(); slots],
            state: BreakerState::Active,
            trip_sequence: 0,
            resume_votes: BTreeSet::new(),
            last_slot: None,
            slot_operations: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> &BreakerState {
        &self.state
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        matches!(self.state, BreakerState::Paused { .. })
    }

    #[must_use]
    pub fn trip_sequence(&self) -> u64 {
        self.trip_sequence
    }

    /// Reject the call if paused.
    pub fn ensure_active(&self) -> Result<()> {
        match &self.state {
            BreakerState::Active => Ok(()),
            BreakerState::Paused { reason, .. } => Err(TriadError::CircuitBreakerActive {
                reason: reason.clone(),
            }),
        }
    }

    // -----------------------------------------------------------------
    // Window bookkeeping
    // -----------------------------------------------------------------

    fn period(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.config.bucket_secs.max(1))
    }

    fn bucket_mut(&mut self, now: DateTime<Utc>) -> &mut Bucket {
        let period = self.period(now);
        let len = self.buckets.len() as i64;
        let bucket = &mut self.buckets[period.rem_euclid(len) as usize];
        if bucket.period != period {
            *bucket = Bucket {
                period,
                ..Bucket::default()
            };
        }
        bucket
    }

    /// Totals over buckets still inside the window at `now`.
    #[must_use]
    pub fn window_stats(&self, now: DateTime<Utc>) -> WindowStats {
        let current = self.period(now);
        let oldest = current - self.buckets.len() as i64;
        self.buckets
            .iter()
            .filter(|b| b.period > oldest && b.period <= current)
            .fold(WindowStats::default(), |mut acc, b| {
                acc.volume += b.volume;
                acc.operations += b.operations;
                acc.proofs += b.proofs;
                acc.failed_proofs += b.failed_proofs;
                acc
            })
    }

    fn slot(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.config.slot_secs.max(1))
    }

    // -----------------------------------------------------------------
    // Checks
    // -----------------------------------------------------------------

    /// Whether `amount` is a spike relative to the window average.
    #[must_use]
    pub fn check_volume_anomaly(&self, amount: Decimal, now: DateTime<Utc>) -> bool {
        let stats = self.window_stats(now);
        if stats.operations == 0 || stats.volume.is_zero() {
            return false;
        }
        let average = stats.volume / Decimal::from(stats.operations);
        amount > self.config.volume_spike_factor * average
    }

    /// Whether `failed / total` exceeds the configured rate, given enough samples.
    #[must_use]
    pub fn check_failure_rate(&self, total_proofs: u64, failed_proofs: u64) -> bool {
        if total_proofs < self.config.failure_min_sample || total_proofs == 0 {
            return false;
        }
        Decimal::from(failed_proofs) * Decimal::ONE_HUNDRED
            > self.config.max_failure_rate_percent * Decimal::from(total_proofs)
    }

    /// Whether one more operation at `now` would exceed the per-slot limit
    /// while sharing a slot with the previous operation.
    #[must_use]
    pub fn check_same_slot_spam(&self, now: DateTime<Utc>) -> bool {
        let slot = self.slot(now);
        self.last_slot == Some(slot) && self.slot_operations >= self.config.max_ops_per_slot
    }

    // -----------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------

    /// Gate a new operation: reject if paused, trip on volume spike or
    /// same-slot spam, otherwise record it in the window.
    pub fn admit_operation(&mut self, amount: Decimal, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active()?;
        if self.check_volume_anomaly(amount, now) {
            let reason = format!("volume anomaly: amount {amount} exceeds spike threshold");
            self.trip(&reason, now);
            return Err(TriadError::CircuitBreakerActive { reason });
        }
        if self.check_same_slot_spam(now) {
            let reason = format!(
                "same-slot spam: more than {} operations in slot {}",
                self.config.max_ops_per_slot,
                self.slot(now)
            );
            self.trip(&reason, now);
            return Err(TriadError::CircuitBreakerActive { reason });
        }

        let slot = self.slot(now);
        if self.last_slot == Some(slot) {
            self.slot_operations += 1;
        } else {
            self.last_slot = Some(slot);
            self.slot_operations = 1;
        }
        let bucket = self.bucket_mut(now);
        bucket.volume += amount;
        bucket.operations += 1;
        Ok(())
    }

    /// Record a proof outcome and trip if the failure rate is now anomalous.
    /// Returns `true` if this call tripped the breaker.
    pub fn record_proof(&mut self, accepted: bool, now: DateTime<Utc>) -> bool {
        let bucket = self.bucket_mut(now);
        bucket.proofs += 1;
        if !accepted {
            bucket.failed_proofs += 1;
        }
        if self.is_paused() {
            return false;
        }
        let stats = self.window_stats(now);
        if self.check_failure_rate(stats.proofs, stats.failed_proofs) {
            let reason = format!(
                "proof failure rate {}/{} exceeds {}%",
                stats.failed_proofs, stats.proofs, self.config.max_failure_rate_percent
            );
            self.trip(&reason, now);
            return true;
        }
        false
    }

    // -----------------------------------------------------------------
    // Pause / resume
    // -----------------------------------------------------------------

    /// Enter `Paused`. A no-op if already paused.
    pub fn trip(&mut self, reason: &str, now: DateTime<Utc>) {
        if self.is_paused() {
            return;
        }
        self.trip_sequence += 1;
        self.resume_votes.clear();
        self.state = BreakerState::Paused {
            reason: reason.to_string(),
            tripped_at: now,
            trip_sequence: self.trip_sequence,
        };
        tracing::warn!(
            trip_sequence = self.trip_sequence,
            reason,
            "Circuit breaker tripped"
        );
    }

    /// Cast a validator's vote to lift pause number `trip_sequence`.
    /// Returns `true` once distinct votes reach the resume threshold.
    pub fn vote_resume(
        &mut self,
        validator: ValidatorId,
        trip_sequence: u64,
        validators: &ValidatorSet,
    ) -> Result<bool> {
        if !self.is_paused() {
            return Err(TriadError::CircuitBreakerNotTripped);
        }
        if !validators.is_validator(&validator) {
            return Err(TriadError::Unauthorized { role: "validator" });
        }
        if trip_sequence != self.trip_sequence {
            return Err(TriadError::InvalidRequest {
                reason: format!(
                    "resume vote for pause #{trip_sequence}, current pause is #{}",
                    self.trip_sequence
                ),
            });
        }
        if !self.resume_votes.insert(validator) {
            return Err(TriadError::DuplicateResumeVote);
        }
        tracing::debug!(
            validator = %validator,
            votes = self.resume_votes.len(),
            "Resume vote recorded"
        );
        if self.resume_votes.len() < constants::RESUME_VOTES {
            return Ok(false);
        }

        self.state = BreakerState::Active;
        self.resume_votes.clear();
        // Failures that caused the pause must not immediately re-trip it.
        for bucket in &mut self.buckets {
            bucket.proofs = 0;
            bucket.failed_proofs = 0;
        }
        tracing::info!(trip_sequence = self.trip_sequence, "Circuit breaker resumed");
        Ok(true)
    }

    #[must_use]
    pub fn resume_vote_count(&self) -> usize {
        self.resume_votes.len()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
