//! Fee accounting.
//!
//! Fees are escrowed when an operation is created and resolved exactly once
//! when it reaches a terminal state:
//!
//! | terminal state                         | fee            |
//! |----------------------------------------|----------------|
//! | Executed, Failed                       | split 80 / 20  |
//! | Cancelled after a confirmation         | split 80 / 20  |
//! | Cancelled before any confirmation      | refunded       |
//! | EmergencyCancelled, Expired            | refunded       |
//!
//! The validator share accrues to the current epoch's pool and is paid out
//! in proportion to accepted proofs when the epoch closes. Refunds and
//! rewards are pull-based ledgers.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use triad_types::{AccountId, FeeConfig, OperationId, Result, TriadError, ValidatorId};

use crate::ledger::EscrowLedger;

/// Decimal places kept on per-validator rewards. Remainders carry forward.
const REWARD_DP: u32 = 8;

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub validators: Decimal,
    pub protocol: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeSchedule {
    config: FeeConfig,
}

impl FeeSchedule {
    #[must_use]
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// `base × 1.5 (speed) × 1.2 (security)`, capped at the maximum fee.
    #[must_use]
    pub fn calculate_fee(&self, base: Decimal, prioritize_speed: bool, prioritize_security: bool) -> Decimal {
        let mut fee = base;
        if prioritize_speed {
            fee *= self.config.speed_multiplier;
        }
        if prioritize_security {
            fee *= self.config.security_multiplier;
        }
        fee.min(self.config.max_fee)
    }

    /// Fee due for a request at the configured base.
    #[must_use]
    pub fn required_fee(&self, prioritize_speed: bool, prioritize_security: bool) -> Decimal {
        self.calculate_fee(self.config.base_fee, prioritize_speed, prioritize_security)
    }

    /// Validator and protocol shares. The two always sum to `total`.
    #[must_use]
    pub fn split(&self, total: Decimal) -> FeeSplit {
        let validators = total * self.config.validator_share;
        FeeSplit {
            validators,
            protocol: total - validators,
        }
    }

    /// A validator's share of the epoch pool. Zero when no proofs were
    /// submitted in the epoch.
    #[must_use]
    pub fn epoch_reward(&self, validator_proofs: u64, total_proofs: u64, epoch_pool: Decimal) -> Decimal {
        if total_proofs == 0 {
            return Decimal::ZERO;
        }
        (epoch_pool * Decimal::from(validator_proofs) / Decimal::from(total_proofs))
            .round_dp_with_strategy(REWARD_DP, RoundingStrategy::ToZero)
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Result of closing an epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochSummary {
    pub epoch: u64,
    pub total_proofs: u64,
    pub distributed: Decimal,
    pub carried_forward: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeePool {
    schedule: FeeSchedule,
    /// Fees of operations that have not reached a terminal state.
    escrowed: BTreeMap<OperationId, Decimal>,
    epoch: u64,
    epoch_pool: Decimal,
    epoch_proofs: BTreeMap<ValidatorId, u64>,
    protocol_balance: Decimal,
    total_collected: Decimal,
    fees_refunded: Decimal,
    /// Principal and fee refunds owed to initiators.
    refunds: EscrowLedger<AccountId>,
    rewards: EscrowLedger<ValidatorId>,
}

impl FeePool {
    #[must_use]
    pub fn new(schedule: FeeSchedule) -> Self {
        Self {
            schedule,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Hold `fee` for `operation` until it resolves.
    pub fn collect(&mut self, operation: OperationId, fee: Decimal) {
        self.escrowed.insert(operation, fee);
        self.total_collected += fee;
    }

    /// Release an operation's escrowed fee into the validator and protocol
    /// shares.
    pub fn distribute(&mut self, operation: &OperationId) -> Result<FeeSplit> {
        let fee = self.take_escrow(operation)?;
        let split = self.schedule.split(fee);
        self.epoch_pool += split.validators;
        self.protocol_balance += split.protocol;
        Ok(split)
    }

    /// Return an operation's escrowed fee to `initiator`.
    pub fn refund_fee(&mut self, operation: &OperationId, initiator: AccountId) -> Result<Decimal> {
        let fee = self.take_escrow(operation)?;
        self.fees_refunded += fee;
        self.refunds.credit(initiator, fee);
        Ok(fee)
    }

    /// Record a principal refund owed to `account`.
    pub fn credit_refund(&mut self, account: AccountId, amount: Decimal) {
        self.refunds.credit(account, amount);
    }

    fn take_escrow(&mut self, operation: &OperationId) -> Result<Decimal> {
        self.escrowed
            .remove(operation)
            .ok_or_else(|| TriadError::Internal(format!("no escrowed fee for {operation}")))
    }

    /// Count an accepted proof toward `validator`'s epoch share.
    pub fn record_proof(&mut self, validator: ValidatorId) {
        *self.epoch_proofs.entry(validator).or_insert(0) += 1;
    }

    /// Credit each validator's proportional share of the pool and start a new
    /// epoch. Rounding dust, or the whole pool if nobody proved anything,
    /// carries into the next epoch.
    pub fn close_epoch(&mut self) -> EpochSummary {
        let total_proofs: u64 = self.epoch_proofs.values().sum();
        let pool = self.epoch_pool;
        let mut distributed = Decimal::ZERO;
        for (validator, count) in &self.epoch_proofs {
            let reward = self.schedule.epoch_reward(*count, total_proofs, pool);
            self.rewards.credit(*validator, reward);
            distributed += reward;
        }
        let summary = EpochSummary {
            epoch: self.epoch,
            total_proofs,
            distributed,
            carried_forward: pool - distributed,
        };
        self.epoch_pool = pool - distributed;
        self.epoch_proofs.clear();
        self.epoch += 1;
        tracing::info!(
            epoch = summary.epoch,
            total_proofs,
            distributed = %summary.distributed,
            carried = %summary.carried_forward,
            "Fee epoch closed"
        );
        summary
    }

    pub fn claim_refund(&mut self, account: &AccountId) -> Result<Decimal> {
        self.refunds.withdraw(account)
    }

    pub fn claim_reward(&mut self, validator: &ValidatorId) -> Result<Decimal> {
        self.rewards.withdraw(validator)
    }

    #[must_use]
    pub fn refund_owed(&self, account: &AccountId) -> Decimal {
        self.refunds.owed(account)
    }

    #[must_use]
    pub fn reward_owed(&self, validator: &ValidatorId) -> Decimal {
        self.rewards.owed(validator)
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn epoch_pool(&self) -> Decimal {
        self.epoch_pool
    }

    #[must_use]
    pub fn epoch_proofs(&self, validator: &ValidatorId) -> u64 {
        self.epoch_proofs.get(validator).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn protocol_balance(&self) -> Decimal {
        self.protocol_balance
    }

    #[must_use]
    pub fn escrowed_total(&self) -> Decimal {
        self.escrowed.values().copied().sum()
    }

    #[must_use]
    pub fn total_collected(&self) -> Decimal {
        self.total_collected
    }

    /// Every collected fee is escrowed, pooled, held by the protocol, owed
    /// or paid as a reward, or refunded.
    pub fn verify_conservation(&self) -> Result<()> {
        self.refunds.verify()?;
        self.rewards.verify()?;
        let accounted = self.escrowed_total()
            + self.epoch_pool
            + self.protocol_balance
            + self.rewards.total_credited()
            + self.fees_refunded;
        if accounted != self.total_collected {
            return Err(TriadError::ConservationViolation {
                reason: format!(
                    "fees collected {} but accounted {accounted}",
                    self.total_collected
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> FeeSchedule {
        FeeSchedule::new(FeeConfig {
            base_fee: Decimal::new(10, 0),
            max_fee: Decimal::new(100, 0),
            ..FeeConfig::default()
        })
    }

    #[test]
    fn multipliers_compose() {
        let s = schedule();
        let base = Decimal::new(10, 0);
        assert_eq!(s.calculate_fee(base, false, false), Decimal::new(10, 0));
        assert_eq!(s.calculate_fee(base, true, false), Decimal::new(15, 0));
        assert_eq!(s.calculate_fee(base, false, true), Decimal::new(12, 0));
        assert_eq!(s.calculate_fee(base, true, true), Decimal::new(18, 0));
    }

    #[test]
    fn fee_is_capped() {
        let s = schedule();
        assert_eq!(
            s.calculate_fee(Decimal::new(90, 0), true, true),
            Decimal::new(100, 0)
        );
    }

    #[test]
    fn split_is_80_20_and_exact() {
        let s = schedule();
        let split = s.split(Decimal::new(10, 0));
        assert_eq!(split.validators, Decimal::new(8, 0));
        assert_eq!(split.protocol, Decimal::new(2, 0));

        let odd = s.split(Decimal::new(1, 8));
        assert_eq!(odd.validators + odd.protocol, Decimal::new(1, 8));
    }

    #[test]
    fn epoch_reward_handles_empty_epoch() {
        let s = schedule();
        assert_eq!(s.epoch_reward(0, 0, Decimal::new(100, 0)), Decimal::ZERO);
        assert_eq!(
            s.epoch_reward(1, 4, Decimal::new(100, 0)),
            Decimal::new(25, 0)
        );
    }

    #[test]
    fn pool_lifecycle_conserves_fees() {
        let mut pool = FeePool::new(schedule());
        let alice = AccountId::new();
        let (v1, v2) = (ValidatorId([1; 32]), ValidatorId([2; 32]));
        let (op1, op2) = (OperationId([1; 32]), OperationId([2; 32]));

        pool.collect(op1, Decimal::new(10, 0));
        pool.collect(op2, Decimal::new(5, 0));
        pool.verify_conservation().unwrap();

        pool.distribute(&op1).unwrap();
        assert_eq!(pool.epoch_pool(), Decimal::new(8, 0));
        assert_eq!(pool.protocol_balance(), Decimal::new(2, 0));

        pool.refund_fee(&op2, alice).unwrap();
        assert_eq!(pool.refund_owed(&alice), Decimal::new(5, 0));
        assert!(pool.distribute(&op2).is_err(), "fee resolves once");

        pool.record_proof(v1);
        pool.record_proof(v1);
        pool.record_proof(v2);
        let summary = pool.close_epoch();
        assert_eq!(summary.total_proofs, 3);
        assert_eq!(summary.distributed + summary.carried_forward, Decimal::new(8, 0));
        assert!(pool.reward_owed(&v1) > pool.reward_owed(&v2));
        pool.verify_conservation().unwrap();

        pool.claim_reward(&v1).unwrap();
        pool.claim_refund(&alice).unwrap();
        pool.verify_conservation().unwrap();
        assert!(matches!(pool.claim_refund(&alice), Err(TriadError::NothingToClaim)));
    }

    #[test]
    fn empty_epoch_carries_pool() {
        let mut pool = FeePool::new(schedule());
        pool.collect(OperationId([1; 32]), Decimal::new(10, 0));
        pool.distribute(&OperationId([1; 32])).unwrap();
        let summary = pool.close_epoch();
        assert_eq!(summary.distributed, Decimal::ZERO);
        assert_eq!(pool.epoch_pool(), Decimal::new(8, 0));
        assert_eq!(pool.epoch(), 1);
    }
}
