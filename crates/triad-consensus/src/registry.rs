//! Operation registry and consensus tracker.
//!
//! Owns every [`Operation`] ever created. Records are never removed; terminal
//! ones stay for audit and to reject replays.
//!
//! ## Proof Flow
//!
//! ```text
//! submit_proof(id, domain, proof)
//!   → lazy expiry → terminal? → domain already confirmed?
//!   → ProofValidator::verify → set flag → threshold?
//!   → SettlementTarget::settle (once) → EXECUTED | FAILED
//! ```
//!
//! Every guard runs before the first mutation, so a rejected proof leaves
//! the record untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use triad_types::{
    AccountId, ChainDomain, ConsensusConfig, Operation, OperationId, OperationRequest,
    OperationStatus, Proof, Result, TriadError, ValidatorSet,
};
use triad_verify::ProofValidator;

use crate::fees::FeePool;
use crate::target::SettlementTarget;

/// Result of an accepted proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOutcome {
    pub confirmations: u8,
    pub required: u8,
    pub status: OperationStatus,
}

/// Snapshot answer to a consensus-status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusStatus {
    pub operation: OperationId,
    pub confirmations: u8,
    pub required: u8,
    pub confirmed_by: Vec<ChainDomain>,
    pub status: OperationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRegistry {
    config: ConsensusConfig,
    operations: BTreeMap<OperationId, Operation>,
    next_nonce: u64,
}

impl OperationRegistry {
    #[must_use]
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            operations: BTreeMap::new(),
            next_nonce: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    #[must_use]
    pub fn next_nonce(&self) -> u64 {
        self.next_nonce
    }

    /// Stateless checks on a request, including that the declared fee
    /// covers the schedule.
    pub fn validate_request(&self, request: &OperationRequest, fees: &FeePool) -> Result<()> {
        if request.amount <= Decimal::ZERO {
            return Err(TriadError::InvalidAmount {
                reason: format!("amount must be positive, got {}", request.amount),
            });
        }
        if request.initiator.is_nil() {
            return Err(TriadError::ZeroValue { field: "initiator" });
        }
        if request.target.is_nil() {
            return Err(TriadError::ZeroValue { field: "target" });
        }
        let required = fees
            .schedule()
            .required_fee(request.prioritize_speed, request.prioritize_security);
        if request.fee_paid < required {
            return Err(TriadError::InsufficientFee {
                required,
                paid: request.fee_paid,
            });
        }
        Ok(())
    }

    /// Register a new `Pending` operation and escrow its fee.
    pub fn create(
        &mut self,
        request: &OperationRequest,
        fees: &mut FeePool,
        now: DateTime<Utc>,
    ) -> Result<OperationId> {
        self.validate_request(request, fees)?;

        let nonce = self.next_nonce;
        let op = Operation::from_request(request, nonce, now, self.config.operation_ttl());
        let id = op.id;
        if self.operations.contains_key(&id) {
            return Err(TriadError::Internal(format!("operation id collision: {id}")));
        }
        self.next_nonce += 1;
        fees.collect(id, request.fee_paid);

        tracing::info!(
            operation = %id,
            class = %op.class,
            nonce,
            amount = %op.amount,
            required = op.required_confirmations(),
            "Operation created"
        );
        self.operations.insert(id, op);
        Ok(id)
    }

    /// Accept one domain's proof for an operation.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_proof(
        &mut self,
        id: OperationId,
        domain: ChainDomain,
        proof: &Proof,
        verifier: &ProofValidator,
        validators: &mut ValidatorSet,
        fees: &mut FeePool,
        target: &mut dyn SettlementTarget,
        now: DateTime<Utc>,
    ) -> Result<ProofOutcome> {
        let op = self
            .operations
            .get_mut(&id)
            .ok_or(TriadError::OperationNotFound(id))?;

        if op.is_expired_at(now) {
            expire(op, fees)?;
            return Err(TriadError::OperationExpired(id));
        }
        if op.status.is_terminal() {
            return Err(TriadError::OperationFinalized {
                operation: id,
                status: op.status,
            });
        }
        if op.is_confirmed_by(domain) {
            return Err(TriadError::DuplicateConfirmation {
                operation: id,
                domain,
            });
        }

        verifier.verify(domain, proof, op, validators)?;

        let confirmations = op.record_confirmation(domain)?;
        validators.record_proof(domain);
        fees.record_proof(proof.submitter);
        tracing::debug!(
            operation = %id,
            domain = %domain,
            confirmations,
            required = op.required_confirmations(),
            "Confirmation recorded"
        );

        if op.has_consensus() {
            execute(op, fees, target, now)?;
        }

        Ok(ProofOutcome {
            confirmations,
            required: op.required_confirmations(),
            status: op.status,
        })
    }

    /// Withdraw an operation on behalf of its initiator.
    ///
    /// Before any confirmation the fee is refunded; afterwards the fee is
    /// forfeited to the validator and protocol shares.
    pub fn cancel(
        &mut self,
        id: OperationId,
        caller: AccountId,
        fees: &mut FeePool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let op = self
            .operations
            .get_mut(&id)
            .ok_or(TriadError::OperationNotFound(id))?;
        if op.initiator != caller {
            return Err(TriadError::Unauthorized { role: "initiator" });
        }
        if op.is_expired_at(now) {
            expire(op, fees)?;
            return Err(TriadError::OperationExpired(id));
        }
        op.transition(OperationStatus::Cancelled)?;

        let penalized = op.confirmation_count() > 0;
        if penalized {
            fees.distribute(&id)?;
        } else {
            fees.refund_fee(&id, op.initiator)?;
        }
        refund_principal(op, fees);
        tracing::info!(operation = %id, penalized, "Operation cancelled");
        Ok(())
    }

    /// Incident-response cancellation by the emergency controller,
    /// regardless of confirmations. Fee and principal are refunded.
    pub fn emergency_cancel(
        &mut self,
        id: OperationId,
        caller: AccountId,
        fees: &mut FeePool,
    ) -> Result<()> {
        if self.config.emergency_controller != Some(caller) {
            return Err(TriadError::Unauthorized {
                role: "emergency controller",
            });
        }
        let op = self
            .operations
            .get_mut(&id)
            .ok_or(TriadError::OperationNotFound(id))?;
        op.transition(OperationStatus::EmergencyCancelled)?;
        fees.refund_fee(&id, op.initiator)?;
        refund_principal(op, fees);
        tracing::warn!(operation = %id, "Operation emergency-cancelled");
        Ok(())
    }

    /// Expire every pending operation past its deadline. Same effect as the
    /// lazy path, applied eagerly.
    pub fn sweep_expired(&mut self, fees: &mut FeePool, now: DateTime<Utc>) -> Result<Vec<OperationId>> {
        let mut expired = Vec::new();
        for op in self.operations.values_mut() {
            if op.is_expired_at(now) {
                expire(op, fees)?;
                expired.push(op.id);
            }
        }
        Ok(expired)
    }

    /// Status as an observer sees it at `now`, with lazy expiry applied.
    #[must_use]
    pub fn effective_status(&self, id: &OperationId, now: DateTime<Utc>) -> Option<OperationStatus> {
        self.operations.get(id).map(|op| {
            if op.is_expired_at(now) {
                OperationStatus::Expired
            } else {
                op.status
            }
        })
    }

    pub fn consensus_status(&self, id: &OperationId, now: DateTime<Utc>) -> Result<ConsensusStatus> {
        let op = self
            .operations
            .get(id)
            .ok_or(TriadError::OperationNotFound(*id))?;
        Ok(ConsensusStatus {
            operation: op.id,
            confirmations: op.confirmation_count(),
            required: op.required_confirmations(),
            confirmed_by: op.confirmed_domains(),
            status: self.effective_status(id, now).unwrap_or(op.status),
        })
    }

    /// The operation, if it has reached consensus and executed.
    pub fn require_executed(&self, id: &OperationId, now: DateTime<Utc>) -> Result<&Operation> {
        let op = self
            .operations
            .get(id)
            .ok_or(TriadError::OperationNotFound(*id))?;
        match op.status {
            OperationStatus::Executed => Ok(op),
            OperationStatus::Pending if op.is_expired_at(now) => {
                Err(TriadError::OperationExpired(*id))
            }
            OperationStatus::Pending => Err(TriadError::ConsensusNotReached {
                operation: *id,
                confirmations: op.confirmation_count(),
                required: op.required_confirmations(),
            }),
            status => Err(TriadError::OperationFinalized {
                operation: *id,
                status,
            }),
        }
    }

    #[must_use]
    pub fn get(&self, id: &OperationId) -> Option<&Operation> {
        self.operations.get(id)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Call the settlement target once and land in `Executed` or `Failed`.
/// The consensus record survives either way.
fn execute(
    op: &mut Operation,
    fees: &mut FeePool,
    target: &mut dyn SettlementTarget,
    now: DateTime<Utc>,
) -> Result<()> {
    let settled = if op.class.settles_on_execution() {
        target.settle(op)
    } else {
        Ok(())
    };
    match settled {
        Ok(()) => {
            op.transition(OperationStatus::Executed)?;
            op.executed_at = Some(now);
            tracing::info!(operation = %op.id, class = %op.class, "Operation executed");
        }
        Err(reason) => {
            op.transition(OperationStatus::Failed)?;
            op.executed_at = Some(now);
            fees.credit_refund(op.initiator, op.amount);
            tracing::warn!(operation = %op.id, reason = %reason, "Settlement failed, refund opened");
            op.failure_reason = Some(reason);
        }
    }
    fees.distribute(&op.id)?;
    Ok(())
}

fn expire(op: &mut Operation, fees: &mut FeePool) -> Result<()> {
    op.transition(OperationStatus::Expired)?;
    fees.refund_fee(&op.id, op.initiator)?;
    refund_principal(op, fees);
    tracing::info!(operation = %op.id, "Operation expired");
    Ok(())
}

/// Operations that pay out through gateway claims never moved principal.
fn refund_principal(op: &Operation, fees: &mut FeePool) {
    if op.class.settles_on_execution() {
        fees.credit_refund(op.initiator, op.amount);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use triad_types::{FeeConfig, MerkleRoot, ValidatorKeys};
    use triad_verify::{MerkleTree, operation_leaf};

    use super::*;
    use crate::fees::FeeSchedule;
    use crate::target::RecordingTarget;

    use ChainDomain::{Ethereum, Solana, Ton};

    struct Harness {
        registry: OperationRegistry,
        fees: FeePool,
        keys: ValidatorKeys,
        set: ValidatorSet,
        verifier: ProofValidator,
        target: RecordingTarget,
        controller: AccountId,
        now: DateTime<Utc>,
    }

    impl Harness {
        fn new() -> Self {
            let controller = AccountId::new();
            let config = ConsensusConfig {
                emergency_controller: Some(controller),
                ..ConsensusConfig::default()
            };
            let keys = ValidatorKeys::generate();
            let set = keys.validator_set([MerkleRoot([1; 32]); 3]);
            Self {
                registry: OperationRegistry::new(config),
                fees: FeePool::new(FeeSchedule::new(FeeConfig::default())),
                keys,
                set,
                verifier: ProofValidator::default(),
                target: RecordingTarget::new(),
                controller,
                now: Utc::now(),
            }
        }

        /// Create an operation and make its leaf the only member of every
        /// domain's trusted root.
        fn create(&mut self, req: &OperationRequest) -> OperationId {
            let id = self.registry.create(req, &mut self.fees, self.now).unwrap();
            let op = self.registry.get(&id).unwrap();
            let tree = MerkleTree::build(&[operation_leaf(&id, op.nonce), [0xAB; 32]]).unwrap();
            for d in ChainDomain::ALL {
                self.set.set_trusted_root(d, tree.root());
            }
            id
        }

        fn proof(&self, id: OperationId, domain: ChainDomain) -> Proof {
            let op = self.registry.get(&id).unwrap();
            let tree = MerkleTree::build(&[operation_leaf(&id, op.nonce), [0xAB; 32]]).unwrap();
            let mut proof = Proof {
                domain,
                operation_id: id,
                event_ref: [domain.index() as u8; 32],
                block_number: 1,
                merkle_path: tree.proof(0).unwrap(),
                submitter: self.keys.id(domain),
                signature: Vec::new(),
            };
            self.keys.sign(domain, &mut proof);
            proof
        }

        fn submit(&mut self, id: OperationId, domain: ChainDomain) -> Result<ProofOutcome> {
            let proof = self.proof(id, domain);
            self.registry.submit_proof(
                id,
                domain,
                &proof,
                &self.verifier,
                &mut self.set,
                &mut self.fees,
                &mut self.target,
                self.now,
            )
        }
    }

    fn transfer() -> OperationRequest {
        OperationRequest::dummy_transfer(Decimal::new(100, 0))
    }

    #[test]
    fn two_of_three_executes_once() {
        let mut h = Harness::new();
        let id = h.create(&transfer());

        let first = h.submit(id, Ethereum).unwrap();
        assert_eq!(first.confirmations, 1);
        assert_eq!(first.status, OperationStatus::Pending);

        let dup = h.submit(id, Ethereum).unwrap_err();
        assert!(matches!(dup, TriadError::DuplicateConfirmation { .. }));
        assert_eq!(h.registry.get(&id).unwrap().confirmation_count(), 1);

        let second = h.submit(id, Solana).unwrap();
        assert_eq!(second.confirmations, 2);
        assert_eq!(second.status, OperationStatus::Executed);
        assert_eq!(h.target.calls_for(&id), 1);

        // Third domain arrives late: rejected, no second settlement.
        assert!(matches!(
            h.submit(id, Ton),
            Err(TriadError::OperationFinalized { .. })
        ));
        assert_eq!(h.target.calls_for(&id), 1);
        h.fees.verify_conservation().unwrap();
    }

    #[test]
    fn emergency_class_needs_three() {
        let mut h = Harness::new();
        let mut req = transfer();
        req.class = triad_types::OperationClass::EmergencyWithdrawal;
        let id = h.create(&req);
        h.submit(id, Ethereum).unwrap();
        assert_eq!(h.submit(id, Ton).unwrap().status, OperationStatus::Pending);
        assert_eq!(h.submit(id, Solana).unwrap().status, OperationStatus::Executed);
    }

    #[test]
    fn invalid_proof_leaves_record_untouched() {
        let mut h = Harness::new();
        let id = h.create(&transfer());
        let mut proof = h.proof(id, Ethereum);
        proof.merkle_path = vec![[0; 32]; 40];
        let err = h
            .registry
            .submit_proof(id, Ethereum, &proof, &h.verifier, &mut h.set, &mut h.fees, &mut h.target, h.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::ProofTooDeep { .. }));
        assert_eq!(h.registry.get(&id).unwrap().confirmation_count(), 0);
        assert_eq!(h.set.proofs_submitted(Ethereum), 0);
    }

    #[test]
    fn settlement_failure_marks_failed_and_refunds() {
        let mut h = Harness::new();
        h.target = RecordingTarget::failing("vault offline");
        let req = transfer();
        let id = h.create(&req);
        h.submit(id, Ethereum).unwrap();
        let outcome = h.submit(id, Ton).unwrap();
        assert_eq!(outcome.status, OperationStatus::Failed);
        assert_eq!(outcome.confirmations, 2);

        let op = h.registry.get(&id).unwrap();
        assert_eq!(op.failure_reason.as_deref(), Some("vault offline"));
        assert_eq!(h.fees.refund_owed(&req.initiator), req.amount);
        assert_eq!(h.target.calls_for(&id), 1);
        h.fees.verify_conservation().unwrap();
    }

    #[test]
    fn expiry_is_lazy_and_refunds() {
        let mut h = Harness::new();
        let req = transfer();
        let id = h.create(&req);
        h.submit(id, Ethereum).unwrap();

        h.now += Duration::hours(25);
        assert_eq!(
            h.registry.effective_status(&id, h.now),
            Some(OperationStatus::Expired)
        );
        assert_eq!(h.registry.get(&id).unwrap().status, OperationStatus::Pending);

        assert!(matches!(h.submit(id, Solana), Err(TriadError::OperationExpired(_))));
        assert_eq!(h.registry.get(&id).unwrap().status, OperationStatus::Expired);
        assert_eq!(h.fees.refund_owed(&req.initiator), req.amount + req.fee_paid);
        assert_eq!(h.target.calls_for(&id), 0);
    }

    #[test]
    fn sweep_matches_lazy_expiry() {
        let mut h = Harness::new();
        let a = h.create(&transfer());
        h.now += Duration::seconds(1);
        let b = h.create(&transfer());
        h.now += Duration::hours(25);
        let swept = h.registry.sweep_expired(&mut h.fees, h.now).unwrap();
        assert_eq!(swept.len(), 2);
        assert!(swept.contains(&a) && swept.contains(&b));
        assert!(h.registry.sweep_expired(&mut h.fees, h.now).unwrap().is_empty());
        h.fees.verify_conservation().unwrap();
    }

    #[test]
    fn cancel_before_and_after_confirmation() {
        let mut h = Harness::new();
        let req = transfer();
        let id = h.create(&req);
        assert!(matches!(
            h.registry.cancel(id, AccountId::new(), &mut h.fees, h.now),
            Err(TriadError::Unauthorized { .. })
        ));
        h.registry.cancel(id, req.initiator, &mut h.fees, h.now).unwrap();
        assert_eq!(h.fees.refund_owed(&req.initiator), req.amount + req.fee_paid);

        let req2 = transfer();
        let id2 = h.create(&req2);
        h.submit(id2, Solana).unwrap();
        h.registry.cancel(id2, req2.initiator, &mut h.fees, h.now).unwrap();
        // Fee forfeited after a confirmation.
        assert_eq!(h.fees.refund_owed(&req2.initiator), req2.amount);
        assert!(h.fees.epoch_pool() > Decimal::ZERO);
        assert!(matches!(
            h.submit(id2, Ton),
            Err(TriadError::OperationFinalized { .. })
        ));
        h.fees.verify_conservation().unwrap();
    }

    #[test]
    fn emergency_cancel_only_by_controller() {
        let mut h = Harness::new();
        let req = transfer();
        let id = h.create(&req);
        h.submit(id, Ethereum).unwrap();
        assert!(h
            .registry
            .emergency_cancel(id, req.initiator, &mut h.fees)
            .is_err());
        h.registry
            .emergency_cancel(id, h.controller, &mut h.fees)
            .unwrap();
        assert_eq!(
            h.registry.get(&id).unwrap().status,
            OperationStatus::EmergencyCancelled
        );
        assert_eq!(h.fees.refund_owed(&req.initiator), req.amount + req.fee_paid);
    }

    #[test]
    fn request_validation() {
        let h = Harness::new();
        let mut req = transfer();
        req.amount = Decimal::ZERO;
        assert!(matches!(
            h.registry.validate_request(&req, &h.fees),
            Err(TriadError::InvalidAmount { .. })
        ));
        let mut req = transfer();
        req.fee_paid = Decimal::ZERO;
        assert!(matches!(
            h.registry.validate_request(&req, &h.fees),
            Err(TriadError::InsufficientFee { .. })
        ));
        let mut req = transfer();
        req.target = AccountId::from_bytes([0; 16]);
        assert!(h.registry.validate_request(&req, &h.fees).is_err());
    }

    #[test]
    fn nonce_is_monotonic_and_ids_distinct() {
        let mut h = Harness::new();
        let req = transfer();
        let a = h.registry.create(&req, &mut h.fees, h.now).unwrap();
        let b = h.registry.create(&req, &mut h.fees, h.now).unwrap();
        assert_ne!(a, b);
        assert_eq!(h.registry.next_nonce(), 2);
        assert_eq!(h.registry.get(&b).unwrap().nonce, 1);
    }

    #[test]
    fn status_queries() {
        let mut h = Harness::new();
        let id = h.create(&transfer());
        h.submit(id, Ton).unwrap();
        let status = h.registry.consensus_status(&id, h.now).unwrap();
        assert_eq!(status.confirmations, 1);
        assert_eq!(status.required, 2);
        assert_eq!(status.confirmed_by, vec![Ton]);
        assert!(matches!(
            h.registry.require_executed(&id, h.now),
            Err(TriadError::ConsensusNotReached { confirmations: 1, required: 2, .. })
        ));
        h.submit(id, Ethereum).unwrap();
        assert!(h.registry.require_executed(&id, h.now).is_ok());
    }
}
