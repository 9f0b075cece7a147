//! `ConsensusEngine`: the single entry point for consensus-side mutations.
//!
//! Composes the registry, proof validator, circuit breaker, fee pool,
//! governance, and validator set. Every mutating call on operations, proofs,
//! or ledgers passes the circuit breaker first. Governance, resume voting,
//! and emergency controls stay available while paused, since they are how
//! an incident is resolved.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use triad_types::{
    AccountId, ChainDomain, EngineConfig, ErrorKind, MerkleRoot, Operation, OperationId,
    OperationRequest, Proof, ProposalId, Result, TriadError, ValidatorId, ValidatorSet,
};
use triad_verify::ProofValidator;

use crate::breaker::CircuitBreaker;
use crate::fees::{EpochSummary, FeePool, FeeSchedule};
use crate::governance::Governance;
use crate::registry::{ConsensusStatus, OperationRegistry, ProofOutcome};
use crate::target::SettlementTarget;

/// Serializable engine state, for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub config: EngineConfig,
    pub validators: ValidatorSet,
    pub registry: OperationRegistry,
    pub breaker: CircuitBreaker,
    pub fees: FeePool,
    pub governance: Governance,
}

#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    config: EngineConfig,
    validators: ValidatorSet,
    verifier: ProofValidator,
    registry: OperationRegistry,
    breaker: CircuitBreaker,
    fees: FeePool,
    governance: Governance,
}

impl ConsensusEngine {
    /// Build an engine over a genesis validator set.
    pub fn new(config: EngineConfig, validators: ValidatorSet) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            verifier: ProofValidator::new(config.consensus.max_proof_depth),
            registry: OperationRegistry::new(config.consensus.clone()),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            fees: FeePool::new(FeeSchedule::new(config.fees.clone())),
            governance: Governance::new(config.governance.clone()),
            validators,
            config,
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            config: self.config.clone(),
            validators: self.validators.clone(),
            registry: self.registry.clone(),
            breaker: self.breaker.clone(),
            fees: self.fees.clone(),
            governance: self.governance.clone(),
        }
    }

    pub fn from_snapshot(snapshot: EngineSnapshot) -> Result<Self> {
        snapshot.config.validate()?;
        Ok(Self {
            verifier: ProofValidator::new(snapshot.config.consensus.max_proof_depth),
            config: snapshot.config,
            validators: snapshot.validators,
            registry: snapshot.registry,
            breaker: snapshot.breaker,
            fees: snapshot.fees,
            governance: snapshot.governance,
        })
    }

    /// Reject the call while the circuit breaker is tripped.
    pub fn ensure_active(&self) -> Result<()> {
        self.breaker.ensure_active()
    }

    // -----------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------

    /// Validate, pass the breaker's volume and spam checks, and register.
    pub fn create_operation(
        &mut self,
        request: &OperationRequest,
        now: DateTime<Utc>,
    ) -> Result<OperationId> {
        self.breaker.ensure_active()?;
        self.registry.validate_request(request, &self.fees)?;
        self.breaker.admit_operation(request.amount, now)?;
        self.registry.create(request, &mut self.fees, now)
    }

    /// Submit `domain`'s proof. Rejected proofs feed the breaker's
    /// failure-rate metric only when they are for a known operation and
    /// signed by the validator seated for `domain`; anything else is
    /// rejected without touching the metric.
    pub fn submit_proof(
        &mut self,
        id: OperationId,
        domain: ChainDomain,
        proof: &Proof,
        target: &mut dyn SettlementTarget,
        now: DateTime<Utc>,
    ) -> Result<ProofOutcome> {
        self.breaker.ensure_active()?;
        let result = self.registry.submit_proof(
            id,
            domain,
            proof,
            &self.verifier,
            &mut self.validators,
            &mut self.fees,
            target,
            now,
        );
        match &result {
            Ok(_) => {
                self.breaker.record_proof(true, now);
            }
            Err(e) if e.kind() == ErrorKind::Validation => {
                let authenticated = self.registry.get(&id).is_some()
                    && self
                        .verifier
                        .authenticate(domain, proof, &self.validators)
                        .is_ok();
                tracing::debug!(
                    operation = %id,
                    domain = %domain,
                    authenticated,
                    error = %e,
                    "Proof rejected"
                );
                if authenticated {
                    self.breaker.record_proof(false, now);
                }
            }
            Err(_) => {}
        }
        result
    }

    pub fn cancel_operation(
        &mut self,
        id: OperationId,
        caller: AccountId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.breaker.ensure_active()?;
        self.registry.cancel(id, caller, &mut self.fees, now)
    }

    /// Controller-only cancellation. Allowed while paused.
    pub fn emergency_cancel(&mut self, id: OperationId, caller: AccountId) -> Result<()> {
        self.registry.emergency_cancel(id, caller, &mut self.fees)
    }

    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<OperationId>> {
        self.registry.sweep_expired(&mut self.fees, now)
    }

    pub fn consensus_status(&self, id: &OperationId, now: DateTime<Utc>) -> Result<ConsensusStatus> {
        self.registry.consensus_status(id, now)
    }

    pub fn require_executed(&self, id: &OperationId, now: DateTime<Utc>) -> Result<&Operation> {
        self.registry.require_executed(id, now)
    }

    #[must_use]
    pub fn operation(&self, id: &OperationId) -> Option<&Operation> {
        self.registry.get(id)
    }

    // -----------------------------------------------------------------
    // Circuit breaker
    // -----------------------------------------------------------------

    /// Controller-initiated pause.
    pub fn emergency_pause(&mut self, caller: AccountId, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if self.config.consensus.emergency_controller != Some(caller) {
            return Err(TriadError::Unauthorized {
                role: "emergency controller",
            });
        }
        self.breaker.trip(reason, now);
        Ok(())
    }

    pub fn vote_resume(&mut self, validator: ValidatorId, trip_sequence: u64) -> Result<bool> {
        self.breaker
            .vote_resume(validator, trip_sequence, &self.validators)
    }

    // -----------------------------------------------------------------
    // Fees
    // -----------------------------------------------------------------

    #[must_use]
    pub fn calculate_fee(&self, prioritize_speed: bool, prioritize_security: bool) -> Decimal {
        self.fees
            .schedule()
            .required_fee(prioritize_speed, prioritize_security)
    }

    pub fn close_epoch(&mut self) -> EpochSummary {
        self.fees.close_epoch()
    }

    pub fn claim_refund(&mut self, account: &AccountId) -> Result<Decimal> {
        self.breaker.ensure_active()?;
        let amount = self.fees.claim_refund(account)?;
        tracing::debug!(account = %account, amount = %amount, "Refund claimed");
        Ok(amount)
    }

    pub fn claim_reward(&mut self, validator: &ValidatorId) -> Result<Decimal> {
        self.breaker.ensure_active()?;
        let amount = self.fees.claim_reward(validator)?;
        tracing::debug!(validator = %validator, amount = %amount, "Reward claimed");
        Ok(amount)
    }

    // -----------------------------------------------------------------
    // Governance
    // -----------------------------------------------------------------

    pub fn propose_rotation(
        &mut self,
        proposer: ValidatorId,
        domain: ChainDomain,
        old: ValidatorId,
        new: ValidatorId,
        now: DateTime<Utc>,
    ) -> Result<ProposalId> {
        self.governance
            .propose_rotation(&self.validators, proposer, domain, old, new, now)
    }

    pub fn propose_root_update(
        &mut self,
        proposer: ValidatorId,
        domain: ChainDomain,
        new_root: MerkleRoot,
        now: DateTime<Utc>,
    ) -> Result<ProposalId> {
        self.governance
            .propose_root_update(&self.validators, proposer, domain, new_root, now)
    }

    pub fn confirm_proposal(
        &mut self,
        id: ProposalId,
        confirmer: ValidatorId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.governance
            .confirm(&mut self.validators, id, confirmer, now)
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    #[must_use]
    pub fn fees(&self) -> &FeePool {
        &self.fees
    }

    #[must_use]
    pub fn governance(&self) -> &Governance {
        &self.governance
    }
}
