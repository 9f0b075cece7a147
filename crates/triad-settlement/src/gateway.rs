//! # Batch Settlement Gateway
//!
//! Aggregates exit requests into batches committed by a single Merkle root,
//! gates payout behind a consensus-approved `BatchCommit` operation, and
//! holds every batch for a challenge period before claims become payable.
//!
//! ## Batch Flow
//!
//! ```text
//! request_exit ──▶ mark_batched (aggregator) ──▶ submit_batch (bind operation)
//!      ──▶ [challenge window] ──▶ finalize_batch | claim_exit (lazy) ──▶ withdraw_payout
//! ```
//!
//! The priority lane skips batching and the challenge window: the exit is
//! approved as its own `PriorityExit` operation and claimed directly. If
//! that operation ends without executing (failed, cancelled, or expired),
//! `release_priority_exit` returns the exit to the batched lane.
//!
//! Batch leaves are [`exit_leaf`] values in the order the aggregator lists
//! the exits; `mark_batched` rebuilds the tree and rejects a root that does
//! not match.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use triad_consensus::{ConsensusEngine, EscrowLedger};
use triad_types::{
    AccountId, Batch, BatchState, ChainDomain, EngineConfig, ErrorKind, ExitId, ExitRequest,
    ExitState, GatewayConfig, MerkleRoot, OperationClass, OperationId, OperationRequest,
    OperationStatus, Result, SwapId, TriadError,
};
use triad_verify::{MerkleTree, batch_commitment, exit_leaf, verify_membership};

use crate::claims::ClaimGuard;
use crate::conservation::ValueConservation;

// ---------------------------------------------------------------------------
// Swap book seam
// ---------------------------------------------------------------------------

/// A hash-locked swap an exit can be requested against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub id: SwapId,
    pub beneficiary: AccountId,
    pub asset: String,
    pub amount: Decimal,
    pub secret_hash: [u8; 32],
    pub active: bool,
}

/// Registry of swaps owned by the surrounding system.
pub trait SwapBook {
    fn swap(&self, id: &SwapId) -> Option<&SwapRecord>;
}

impl<T: SwapBook + ?Sized> SwapBook for Box<T> {
    fn swap(&self, id: &SwapId) -> Option<&SwapRecord> {
        (**self).swap(id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemorySwapBook {
    swaps: BTreeMap<SwapId, SwapRecord>,
}

impl InMemorySwapBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: SwapRecord) {
        self.swaps.insert(record.id, record);
    }

    /// Mark a swap inactive. Returns `false` if it is unknown.
    pub fn deactivate(&mut self, id: &SwapId) -> bool {
        match self.swaps.get_mut(id) {
            Some(record) => {
                record.active = false;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.swaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swaps.is_empty()
    }
}

impl SwapBook for InMemorySwapBook {
    fn swap(&self, id: &SwapId) -> Option<&SwapRecord> {
        self.swaps.get(id)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Parameters of a fast-lane exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityExitRequest {
    pub swap_id: SwapId,
    pub source: ChainDomain,
    pub destination: ChainDomain,
    /// Fee escrowed with the approving operation.
    pub fee_paid: Decimal,
}

/// A recipient's claim against a finalized batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitClaim {
    pub root: MerkleRoot,
    pub exit_id: ExitId,
    pub recipient: AccountId,
    pub amount: Decimal,
    pub secret_hash: [u8; 32],
    pub proof: Vec<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchGateway {
    config: GatewayConfig,
    max_proof_depth: usize,
    exits: BTreeMap<ExitId, ExitRequest>,
    batches: BTreeMap<MerkleRoot, Batch>,
    exited_swaps: BTreeSet<SwapId>,
    /// Operations already bound to a batch or a priority exit.
    bound_operations: BTreeSet<OperationId>,
    exit_counter: u64,
    requester_counters: BTreeMap<AccountId, u64>,
    claims: ClaimGuard,
    payouts: EscrowLedger<AccountId>,
    conservation: ValueConservation,
}

impl BatchGateway {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.gateway.clone(),
            max_proof_depth: config.consensus.max_proof_depth,
            exits: BTreeMap::new(),
            batches: BTreeMap::new(),
            exited_swaps: BTreeSet::new(),
            bound_operations: BTreeSet::new(),
            exit_counter: 0,
            requester_counters: BTreeMap::new(),
            claims: ClaimGuard::new(),
            payouts: EscrowLedger::new(),
            conservation: ValueConservation::new(),
        }
    }

    // -----------------------------------------------------------------
    // Exit requests
    // -----------------------------------------------------------------

    /// Request a batched exit for `caller`'s swap.
    pub fn request_exit(
        &mut self,
        engine: &ConsensusEngine,
        swaps: &dyn SwapBook,
        swap_id: SwapId,
        caller: AccountId,
        now: DateTime<Utc>,
    ) -> Result<ExitId> {
        engine.ensure_active()?;
        let swap = self.eligible_swap(swaps, &swap_id, caller)?;
        let id = self.next_exit_id(&swap_id, &caller, now);
        self.insert_exit(id, &swap, caller, ExitState::Requested, None, now);
        tracing::info!(exit = %id, swap = %swap_id, amount = %swap.amount, "Exit requested");
        Ok(id)
    }

    /// Request a fast-lane exit, approved by its own consensus operation.
    ///
    /// The operation's commitment is the exit leaf, so its approval covers
    /// exactly this recipient, amount, and hash-lock.
    pub fn request_priority_exit(
        &mut self,
        engine: &mut ConsensusEngine,
        swaps: &dyn SwapBook,
        caller: AccountId,
        request: &PriorityExitRequest,
        now: DateTime<Utc>,
    ) -> Result<(ExitId, OperationId)> {
        engine.ensure_active()?;
        let swap = self.eligible_swap(swaps, &request.swap_id, caller)?;
        let id = self.next_exit_id(&request.swap_id, &caller, now);

        let operation = OperationRequest {
            initiator: caller,
            class: OperationClass::PriorityExit,
            source: request.source,
            destination: request.destination,
            target: caller,
            amount: swap.amount,
            fee_paid: request.fee_paid,
            prioritize_speed: true,
            prioritize_security: false,
            commitment: exit_leaf(&id, &caller, swap.amount, &swap.secret_hash),
        };
        let operation_id = engine.create_operation(&operation, now)?;

        self.insert_exit(id, &swap, caller, ExitState::Priority, Some(operation_id), now);
        self.bound_operations.insert(operation_id);
        tracing::info!(
            exit = %id,
            operation = %operation_id,
            amount = %swap.amount,
            "Priority exit requested"
        );
        Ok((id, operation_id))
    }

    fn eligible_swap(
        &self,
        swaps: &dyn SwapBook,
        swap_id: &SwapId,
        caller: AccountId,
    ) -> Result<SwapRecord> {
        let swap = swaps.swap(swap_id).ok_or_else(|| TriadError::InvalidSwap {
            reason: format!("unknown swap {swap_id}"),
        })?;
        if !swap.active {
            return Err(TriadError::InvalidSwap {
                reason: format!("swap {swap_id} is not active"),
            });
        }
        if swap.beneficiary != caller {
            return Err(TriadError::Unauthorized {
                role: "swap beneficiary",
            });
        }
        if swap.secret_hash == [0u8; 32] {
            return Err(TriadError::InvalidSwap {
                reason: format!("swap {swap_id} has no hash-lock"),
            });
        }
        if swap.amount <= Decimal::ZERO {
            return Err(TriadError::InvalidAmount {
                reason: format!("swap amount must be positive, got {}", swap.amount),
            });
        }
        if self.exited_swaps.contains(swap_id) {
            return Err(TriadError::SwapAlreadyExited);
        }
        Ok(swap.clone())
    }

    fn next_exit_id(&self, swap_id: &SwapId, caller: &AccountId, now: DateTime<Utc>) -> ExitId {
        let per_caller = self.requester_counters.get(caller).copied().unwrap_or(0);
        ExitRequest::derive_id(swap_id, caller, now, self.exit_counter, per_caller)
    }

    fn insert_exit(
        &mut self,
        id: ExitId,
        swap: &SwapRecord,
        caller: AccountId,
        state: ExitState,
        operation_id: Option<OperationId>,
        now: DateTime<Utc>,
    ) {
        self.exit_counter += 1;
        *self.requester_counters.entry(caller).or_insert(0) += 1;
        self.exited_swaps.insert(swap.id);
        self.exits.insert(
            id,
            ExitRequest {
                id,
                swap_id: swap.id,
                requester: caller,
                recipient: caller,
                asset: swap.asset.clone(),
                amount: swap.amount,
                secret_hash: swap.secret_hash,
                state,
                created_at: now,
                batch_root: None,
                operation_id,
            },
        );
    }

    // -----------------------------------------------------------------
    // Aggregator operations
    // -----------------------------------------------------------------

    fn require_aggregator(&self, caller: AccountId) -> Result<()> {
        if self.config.aggregator != Some(caller) {
            return Err(TriadError::Unauthorized { role: "aggregator" });
        }
        Ok(())
    }

    /// Commit `exit_ids` under `root` and start the challenge countdown.
    /// Returns the batch total.
    pub fn mark_batched(
        &mut self,
        engine: &ConsensusEngine,
        caller: AccountId,
        exit_ids: &[ExitId],
        root: MerkleRoot,
        now: DateTime<Utc>,
    ) -> Result<Decimal> {
        engine.ensure_active()?;
        self.require_aggregator(caller)?;

        let size = exit_ids.len();
        if size < self.config.min_batch_size || size > self.config.max_batch_size {
            return Err(TriadError::BatchSizeOutOfRange {
                size,
                min: self.config.min_batch_size,
                max: self.config.max_batch_size,
            });
        }
        if root.is_zero() {
            return Err(TriadError::ZeroValue { field: "batch root" });
        }
        if self.batches.contains_key(&root) {
            return Err(TriadError::BatchRootReused(root));
        }

        let mut seen = BTreeSet::new();
        let mut leaves = Vec::with_capacity(size);
        let mut total = Decimal::ZERO;
        for id in exit_ids {
            if !seen.insert(*id) {
                return Err(TriadError::InvalidRequest {
                    reason: format!("exit {id} listed twice"),
                });
            }
            let exit = self.exits.get(id).ok_or(TriadError::ExitNotFound(*id))?;
            if exit.state != ExitState::Requested {
                return Err(TriadError::ExitStateConflict {
                    exit: *id,
                    state: exit.state.to_string(),
                });
            }
            leaves.push(exit_leaf(id, &exit.recipient, exit.amount, &exit.secret_hash));
            total += exit.amount;
        }
        let computed = MerkleTree::build(&leaves)?.root();
        if computed != root {
            return Err(TriadError::CommitmentMismatch {
                reason: format!("batch root {root} does not match exits (computed {computed})"),
            });
        }

        for id in exit_ids {
            if let Some(exit) = self.exits.get_mut(id) {
                exit.state = ExitState::Batched;
                exit.batch_root = Some(root);
            }
        }
        let finalization_time = now + self.config.challenge_period();
        self.batches.insert(
            root,
            Batch {
                root,
                exit_ids: exit_ids.to_vec(),
                total,
                submitted_at: now,
                finalization_time,
                operation_id: None,
                claimed_total: Decimal::ZERO,
                claimed_count: 0,
                state: BatchState::Pending,
                challenge_reason: None,
                challenger: None,
            },
        );
        self.conservation.record_commit(root, total);

        tracing::info!(
            root = %root,
            exits = size,
            total = %total,
            finalization_time = %finalization_time,
            "Batch marked"
        );
        Ok(total)
    }

    /// Bind a consensus-approved `BatchCommit` operation to `root`.
    ///
    /// The operation must be executed and carry `batch_commitment(root, total)`.
    pub fn submit_batch(
        &mut self,
        engine: &ConsensusEngine,
        caller: AccountId,
        root: MerkleRoot,
        exit_count: usize,
        operation_id: OperationId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        engine.ensure_active()?;
        self.require_aggregator(caller)?;

        let batch = self.batches.get(&root).ok_or(TriadError::BatchNotFound(root))?;
        if batch.state != BatchState::Pending || batch.operation_id.is_some() {
            return Err(TriadError::BatchStateConflict {
                root,
                state: match batch.operation_id {
                    Some(bound) => format!("{} (bound to {bound})", batch.state),
                    None => batch.state.to_string(),
                },
            });
        }
        if self.bound_operations.contains(&operation_id) {
            return Err(TriadError::InvalidRequest {
                reason: format!("operation {operation_id} is already bound"),
            });
        }
        if exit_count != batch.exit_count() {
            return Err(TriadError::CommitmentMismatch {
                reason: format!(
                    "exit count {exit_count} != batch size {}",
                    batch.exit_count()
                ),
            });
        }

        let operation = engine.require_executed(&operation_id, now)?;
        if operation.class != OperationClass::BatchCommit {
            return Err(TriadError::InvalidRequest {
                reason: format!("operation {operation_id} is {}, not a batch commit", operation.class),
            });
        }
        if operation.commitment != batch_commitment(&root, batch.total) {
            return Err(TriadError::CommitmentMismatch {
                reason: format!("operation {operation_id} does not commit to batch {root}"),
            });
        }

        if let Some(batch) = self.batches.get_mut(&root) {
            batch.operation_id = Some(operation_id);
        }
        self.bound_operations.insert(operation_id);
        tracing::info!(root = %root, operation = %operation_id, "Batch bound to consensus");
        Ok(())
    }

    /// Flag a batch strictly before its finalization time. Payout stays
    /// blocked until the aggregator cancels it.
    pub fn challenge_batch(
        &mut self,
        engine: &ConsensusEngine,
        challenger: AccountId,
        root: MerkleRoot,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        engine.ensure_active()?;
        if reason.trim().is_empty() {
            return Err(TriadError::InvalidRequest {
                reason: "challenge reason must not be empty".into(),
            });
        }
        let batch = self.batches.get_mut(&root).ok_or(TriadError::BatchNotFound(root))?;
        if batch.state != BatchState::Pending {
            return Err(TriadError::BatchStateConflict {
                root,
                state: batch.state.to_string(),
            });
        }
        if !batch.in_challenge_window(now) {
            return Err(TriadError::ChallengePeriodElapsed { root });
        }

        batch.state = BatchState::Challenged;
        batch.challenge_reason = Some(reason.to_string());
        batch.challenger = Some(challenger);
        let exit_ids = batch.exit_ids.clone();
        for id in &exit_ids {
            if let Some(exit) = self.exits.get_mut(id) {
                exit.state = ExitState::Challenged;
            }
        }
        tracing::warn!(root = %root, challenger = %challenger, reason, "Batch challenged");
        Ok(())
    }

    pub fn finalize_batch(
        &mut self,
        engine: &ConsensusEngine,
        caller: AccountId,
        root: MerkleRoot,
        now: DateTime<Utc>,
    ) -> Result<()> {
        engine.ensure_active()?;
        self.require_aggregator(caller)?;
        self.finalize(engine, root, now)
    }

    fn finalize(&mut self, engine: &ConsensusEngine, root: MerkleRoot, now: DateTime<Utc>) -> Result<()> {
        let batch = self.batches.get(&root).ok_or(TriadError::BatchNotFound(root))?;
        if batch.state != BatchState::Pending {
            return Err(TriadError::BatchStateConflict {
                root,
                state: batch.state.to_string(),
            });
        }
        if batch.in_challenge_window(now) {
            return Err(TriadError::ChallengePeriodActive { root });
        }
        let operation_id = batch.operation_id.ok_or_else(|| TriadError::BatchStateConflict {
            root,
            state: format!("{} (no approving operation)", batch.state),
        })?;
        engine.require_executed(&operation_id, now)?;

        let exit_ids = batch.exit_ids.clone();
        if let Some(batch) = self.batches.get_mut(&root) {
            batch.state = BatchState::Finalized;
        }
        for id in &exit_ids {
            if let Some(exit) = self.exits.get_mut(id) {
                exit.state = ExitState::Finalized;
            }
        }
        tracing::info!(root = %root, exits = exit_ids.len(), "Batch finalized");
        Ok(())
    }

    /// Retire a batch whose approval failed or that was challenged. Its
    /// exits return to `Requested`; the root is never reusable.
    pub fn cancel_batch(
        &mut self,
        engine: &ConsensusEngine,
        caller: AccountId,
        root: MerkleRoot,
        now: DateTime<Utc>,
    ) -> Result<()> {
        engine.ensure_active()?;
        self.require_aggregator(caller)?;

        let batch = self.batches.get(&root).ok_or(TriadError::BatchNotFound(root))?;
        match (batch.state, batch.operation_id) {
            (BatchState::Challenged, _) | (BatchState::Pending, None) => {}
            (BatchState::Pending, Some(operation_id)) => {
                match engine.require_executed(&operation_id, now) {
                    Ok(_) => {
                        return Err(TriadError::CancelNotAllowed {
                            reason: format!("batch {root} is approved; challenge it first"),
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::ConsensusNotReached => {
                        return Err(TriadError::CancelNotAllowed {
                            reason: format!("approving operation {operation_id} is still pending"),
                        });
                    }
                    Err(_) => {}
                }
            }
            (state, _) => {
                return Err(TriadError::BatchStateConflict {
                    root,
                    state: state.to_string(),
                });
            }
        }

        self.conservation.record_cancel(&root)?;
        let exit_ids = batch.exit_ids.clone();
        if let Some(batch) = self.batches.get_mut(&root) {
            batch.state = BatchState::Cancelled;
        }
        for id in &exit_ids {
            if let Some(exit) = self.exits.get_mut(id) {
                exit.state = ExitState::Requested;
                exit.batch_root = None;
            }
        }
        tracing::warn!(root = %root, exits = exit_ids.len(), "Batch cancelled");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------

    /// Claim an exit from a finalized batch, finalizing it first if its
    /// window has elapsed. The amount is credited to the recipient's payout
    /// balance.
    pub fn claim_exit(
        &mut self,
        engine: &ConsensusEngine,
        claim: &ExitClaim,
        now: DateTime<Utc>,
    ) -> Result<Decimal> {
        engine.ensure_active()?;
        let root = claim.root;
        let state = self
            .batches
            .get(&root)
            .map(|b| b.state)
            .ok_or(TriadError::BatchNotFound(root))?;
        if state == BatchState::Pending {
            self.finalize(engine, root, now)?;
        } else if state != BatchState::Finalized {
            return Err(TriadError::BatchStateConflict {
                root,
                state: state.to_string(),
            });
        }

        if claim.amount <= Decimal::ZERO {
            return Err(TriadError::InvalidAmount {
                reason: format!("claim amount must be positive, got {}", claim.amount),
            });
        }
        let leaf = exit_leaf(&claim.exit_id, &claim.recipient, claim.amount, &claim.secret_hash);
        verify_membership(&leaf, &claim.proof, &root, self.max_proof_depth)?;

        self.claims.check(&claim.exit_id)?;
        let exit = self
            .exits
            .get(&claim.exit_id)
            .ok_or(TriadError::ExitNotFound(claim.exit_id))?;
        if exit.batch_root != Some(root) || exit.state != ExitState::Finalized {
            return Err(TriadError::ExitStateConflict {
                exit: claim.exit_id,
                state: exit.state.to_string(),
            });
        }
        self.conservation.check_claim(&root, claim.amount)?;

        self.claims.mark_claimed(claim.exit_id)?;
        self.conservation.record_claim(root, claim.amount)?;
        if let Some(batch) = self.batches.get_mut(&root) {
            batch.claimed_total += claim.amount;
            batch.claimed_count += 1;
        }
        if let Some(exit) = self.exits.get_mut(&claim.exit_id) {
            exit.state = ExitState::Claimed;
        }
        self.payouts.credit(claim.recipient, claim.amount);

        tracing::info!(
            root = %root,
            exit = %claim.exit_id,
            recipient = %claim.recipient,
            amount = %claim.amount,
            "Exit claimed"
        );
        Ok(claim.amount)
    }

    /// Settle an approved priority exit directly.
    pub fn claim_priority_exit(
        &mut self,
        engine: &ConsensusEngine,
        exit_id: ExitId,
        now: DateTime<Utc>,
    ) -> Result<Decimal> {
        engine.ensure_active()?;
        self.claims.check(&exit_id)?;
        let exit = self.exits.get(&exit_id).ok_or(TriadError::ExitNotFound(exit_id))?;
        if exit.state != ExitState::Priority {
            return Err(TriadError::ExitStateConflict {
                exit: exit_id,
                state: exit.state.to_string(),
            });
        }
        let operation_id = exit
            .operation_id
            .ok_or_else(|| TriadError::Internal(format!("priority exit {exit_id} has no operation")))?;
        let operation = engine.require_executed(&operation_id, now)?;
        let expected = exit_leaf(&exit_id, &exit.recipient, exit.amount, &exit.secret_hash);
        if operation.class != OperationClass::PriorityExit || operation.commitment != expected {
            return Err(TriadError::CommitmentMismatch {
                reason: format!("operation {operation_id} does not approve exit {exit_id}"),
            });
        }
        let (recipient, amount) = (exit.recipient, exit.amount);

        self.claims.mark_claimed(exit_id)?;
        self.conservation.record_priority_claim(amount);
        if let Some(exit) = self.exits.get_mut(&exit_id) {
            exit.state = ExitState::Claimed;
        }
        self.payouts.credit(recipient, amount);

        tracing::info!(exit = %exit_id, recipient = %recipient, amount = %amount, "Priority exit claimed");
        Ok(amount)
    }

    /// Move a priority exit whose approving operation ended without
    /// executing back to `Requested`, where it can be batched. The swap
    /// stays bound to this exit.
    pub fn release_priority_exit(
        &mut self,
        engine: &ConsensusEngine,
        exit_id: ExitId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        engine.ensure_active()?;
        let exit = self
            .exits
            .get_mut(&exit_id)
            .ok_or(TriadError::ExitNotFound(exit_id))?;
        if exit.state != ExitState::Priority {
            return Err(TriadError::ExitStateConflict {
                exit: exit_id,
                state: exit.state.to_string(),
            });
        }
        let operation_id = exit
            .operation_id
            .ok_or_else(|| TriadError::Internal(format!("priority exit {exit_id} has no operation")))?;
        let status = engine.consensus_status(&operation_id, now)?.status;
        if !status.is_terminal() || status == OperationStatus::Executed {
            return Err(TriadError::CancelNotAllowed {
                reason: format!("approving operation {operation_id} is {status}"),
            });
        }

        exit.state = ExitState::Requested;
        exit.operation_id = None;
        tracing::info!(
            exit = %exit_id,
            operation = %operation_id,
            status = %status,
            "Priority exit released to batch lane"
        );
        Ok(())
    }

    /// Drain everything owed to `account`.
    pub fn withdraw_payout(&mut self, engine: &ConsensusEngine, account: &AccountId) -> Result<Decimal> {
        engine.ensure_active()?;
        let amount = self.payouts.withdraw(account)?;
        tracing::debug!(account = %account, amount = %amount, "Payout withdrawn");
        Ok(amount)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Batch state as of `now`, counting an unchallenged, approved batch
    /// past its window as finalized even if nobody has touched it yet.
    pub fn batch_state(
        &self,
        engine: &ConsensusEngine,
        root: &MerkleRoot,
        now: DateTime<Utc>,
    ) -> Result<BatchState> {
        let batch = self.batches.get(root).ok_or(TriadError::BatchNotFound(*root))?;
        let approved = batch
            .operation_id
            .is_some_and(|id| engine.require_executed(&id, now).is_ok());
        if batch.state == BatchState::Pending && !batch.in_challenge_window(now) && approved {
            return Ok(BatchState::Finalized);
        }
        Ok(batch.state)
    }

    pub fn verify_conservation(&self) -> Result<()> {
        self.payouts.verify()?;
        self.conservation.verify(self.payouts.total_credited())
    }

    #[must_use]
    pub fn exit(&self, id: &ExitId) -> Option<&ExitRequest> {
        self.exits.get(id)
    }

    #[must_use]
    pub fn batch(&self, root: &MerkleRoot) -> Option<&Batch> {
        self.batches.get(root)
    }

    pub fn exits(&self) -> impl Iterator<Item = &ExitRequest> {
        self.exits.values()
    }

    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.batches.values()
    }

    #[must_use]
    pub fn payout_owed(&self, account: &AccountId) -> Decimal {
        self.payouts.owed(account)
    }

    #[must_use]
    pub fn conservation(&self) -> &ValueConservation {
        &self.conservation
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use triad_consensus::RecordingTarget;
    use triad_consensus::testkit::approve;
    use triad_types::{OperationStatus, ValidatorKeys};

    use super::*;

    struct Fixture {
        engine: ConsensusEngine,
        keys: ValidatorKeys,
        target: RecordingTarget,
        swaps: InMemorySwapBook,
        gateway: BatchGateway,
        aggregator: AccountId,
        now: DateTime<Utc>,
        next_swap: u8,
    }

    impl Fixture {
        fn new() -> Self {
            let aggregator = AccountId::new();
            let mut config = EngineConfig::default();
            config.gateway.aggregator = Some(aggregator);
            config.gateway.min_batch_size = 2;
            config.gateway.max_batch_size = 4;
            let keys = ValidatorKeys::generate();
            let engine =
                ConsensusEngine::new(config.clone(), keys.validator_set([MerkleRoot([1; 32]); 3]))
                    .unwrap();
            Self {
                engine,
                keys,
                target: RecordingTarget::new(),
                swaps: InMemorySwapBook::new(),
                gateway: BatchGateway::new(&config),
                aggregator,
                now: Utc::now(),
                next_swap: 1,
            }
        }

        fn swap(&mut self, amount: i64) -> (SwapId, AccountId) {
            let id = SwapId([self.next_swap; 32]);
            self.next_swap += 1;
            let beneficiary = AccountId::new();
            self.swaps.insert(SwapRecord {
                id,
                beneficiary,
                asset: "USDC".into(),
                amount: Decimal::new(amount, 0),
                secret_hash: [0xAB; 32],
                active: true,
            });
            (id, beneficiary)
        }

        fn exit(&mut self, amount: i64) -> ExitId {
            let (swap, who) = self.swap(amount);
            self.gateway
                .request_exit(&self.engine, &self.swaps, swap, who, self.now)
                .unwrap()
        }

        fn tree(&self, ids: &[ExitId]) -> MerkleTree {
            let leaves: Vec<_> = ids
                .iter()
                .map(|id| {
                    let e = self.gateway.exit(id).unwrap();
                    exit_leaf(id, &e.recipient, e.amount, &e.secret_hash)
                })
                .collect();
            MerkleTree::build(&leaves).unwrap()
        }

        fn commit_op(&mut self, root: MerkleRoot, total: Decimal) -> OperationId {
            let mut req = OperationRequest::dummy_transfer(total);
            req.class = OperationClass::BatchCommit;
            req.commitment = batch_commitment(&root, total);
            let id = self.engine.create_operation(&req, self.now).unwrap();
            let outcome = approve(&mut self.engine, &self.keys, id, &mut self.target, self.now);
            assert_eq!(outcome.status, OperationStatus::Executed);
            id
        }

        /// Mark and bind a batch of `ids`.
        fn batch(&mut self, ids: &[ExitId]) -> (MerkleRoot, MerkleTree) {
            let tree = self.tree(ids);
            let root = tree.root();
            let total = self
                .gateway
                .mark_batched(&self.engine, self.aggregator, ids, root, self.now)
                .unwrap();
            let op = self.commit_op(root, total);
            self.gateway
                .submit_batch(&self.engine, self.aggregator, root, ids.len(), op, self.now)
                .unwrap();
            (root, tree)
        }

        fn claim_for(&self, root: MerkleRoot, tree: &MerkleTree, ids: &[ExitId], i: usize) -> ExitClaim {
            let e = self.gateway.exit(&ids[i]).unwrap();
            ExitClaim {
                root,
                exit_id: ids[i],
                recipient: e.recipient,
                amount: e.amount,
                secret_hash: e.secret_hash,
                proof: tree.proof(i).unwrap(),
            }
        }

        fn after_window(&self) -> DateTime<Utc> {
            self.now + self.gateway.config().challenge_period() + Duration::seconds(1)
        }
    }

    #[test]
    fn request_exit_checks_swap() {
        let mut fx = Fixture::new();
        let (swap, who) = fx.swap(10);

        let err = fx
            .gateway
            .request_exit(&fx.engine, &fx.swaps, swap, AccountId::new(), fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::Unauthorized { .. }));

        fx.gateway
            .request_exit(&fx.engine, &fx.swaps, swap, who, fx.now)
            .unwrap();
        let err = fx
            .gateway
            .request_exit(&fx.engine, &fx.swaps, swap, who, fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::SwapAlreadyExited));

        let (inactive, owner) = fx.swap(5);
        fx.swaps.deactivate(&inactive);
        assert!(matches!(
            fx.gateway.request_exit(&fx.engine, &fx.swaps, inactive, owner, fx.now),
            Err(TriadError::InvalidSwap { .. })
        ));
    }

    #[test]
    fn exits_from_same_caller_get_distinct_ids() {
        let mut fx = Fixture::new();
        let who = AccountId::new();
        let mut ids = BTreeSet::new();
        for n in 0..3u8 {
            let id = SwapId([100 + n; 32]);
            fx.swaps.insert(SwapRecord {
                id,
                beneficiary: who,
                asset: "USDC".into(),
                amount: Decimal::ONE,
                secret_hash: [1; 32],
                active: true,
            });
            ids.insert(fx.gateway.request_exit(&fx.engine, &fx.swaps, id, who, fx.now).unwrap());
        }
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn mark_batched_guards() {
        let mut fx = Fixture::new();
        let ids: Vec<_> = (0..3).map(|_| fx.exit(10)).collect();
        let root = fx.tree(&ids).root();

        let err = fx
            .gateway
            .mark_batched(&fx.engine, AccountId::new(), &ids, root, fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::Unauthorized { role: "aggregator" }));

        let err = fx
            .gateway
            .mark_batched(&fx.engine, fx.aggregator, &ids[..1], fx.tree(&ids[..1]).root(), fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::BatchSizeOutOfRange { size: 1, .. }));

        let err = fx
            .gateway
            .mark_batched(&fx.engine, fx.aggregator, &ids, MerkleRoot([9; 32]), fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::CommitmentMismatch { .. }));

        let total = fx
            .gateway
            .mark_batched(&fx.engine, fx.aggregator, &ids, root, fx.now)
            .unwrap();
        assert_eq!(total, Decimal::new(30, 0));
        assert_eq!(fx.gateway.exit(&ids[0]).unwrap().state, ExitState::Batched);

        let err = fx
            .gateway
            .mark_batched(&fx.engine, fx.aggregator, &ids, root, fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::BatchRootReused(r) if r == root));
    }

    #[test]
    fn submit_batch_requires_matching_approved_operation() {
        let mut fx = Fixture::new();
        let ids: Vec<_> = (0..2).map(|_| fx.exit(10)).collect();
        let root = fx.tree(&ids).root();
        fx.gateway
            .mark_batched(&fx.engine, fx.aggregator, &ids, root, fx.now)
            .unwrap();

        // Pending operation.
        let mut req = OperationRequest::dummy_transfer(Decimal::new(20, 0));
        req.class = OperationClass::BatchCommit;
        req.commitment = batch_commitment(&root, Decimal::new(20, 0));
        let pending = fx.engine.create_operation(&req, fx.now).unwrap();
        let err = fx
            .gateway
            .submit_batch(&fx.engine, fx.aggregator, root, 2, pending, fx.now)
            .unwrap_err();
        assert!(err.kind().is_retryable());

        // Executed, but committing to the wrong total.
        let wrong = fx.commit_op(root, Decimal::new(21, 0));
        let err = fx
            .gateway
            .submit_batch(&fx.engine, fx.aggregator, root, 2, wrong, fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::CommitmentMismatch { .. }));

        let good = fx.commit_op(root, Decimal::new(20, 0));
        let err = fx
            .gateway
            .submit_batch(&fx.engine, fx.aggregator, root, 3, good, fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::CommitmentMismatch { .. }));
        fx.gateway
            .submit_batch(&fx.engine, fx.aggregator, root, 2, good, fx.now)
            .unwrap();
        assert_eq!(fx.gateway.batch(&root).unwrap().operation_id, Some(good));
    }

    #[test]
    fn challenge_window_is_strict() {
        let mut fx = Fixture::new();
        let ids: Vec<_> = (0..2).map(|_| fx.exit(10)).collect();
        let (root, tree) = fx.batch(&ids);
        let deadline = fx.gateway.batch(&root).unwrap().finalization_time;

        let mut late = fx.gateway.clone();
        let err = late
            .challenge_batch(&fx.engine, AccountId::new(), root, "fraud", deadline)
            .unwrap_err();
        assert!(matches!(err, TriadError::ChallengePeriodElapsed { .. }));

        fx.gateway
            .challenge_batch(&fx.engine, AccountId::new(), root, "fraud", deadline - Duration::seconds(1))
            .unwrap();
        let claim = fx.claim_for(root, &tree, &ids, 0);
        let err = fx
            .gateway
            .claim_exit(&fx.engine, &claim, fx.after_window())
            .unwrap_err();
        assert!(matches!(err, TriadError::BatchStateConflict { .. }));
        assert_eq!(fx.gateway.exit(&ids[0]).unwrap().state, ExitState::Challenged);
    }

    #[test]
    fn claims_pay_once_after_window() {
        let mut fx = Fixture::new();
        let ids: Vec<_> = (0..3).map(|_| fx.exit(10)).collect();
        let (root, tree) = fx.batch(&ids);
        let claim = fx.claim_for(root, &tree, &ids, 1);

        let err = fx.gateway.claim_exit(&fx.engine, &claim, fx.now).unwrap_err();
        assert!(matches!(err, TriadError::ChallengePeriodActive { .. }));
        assert_eq!(
            fx.gateway.batch_state(&fx.engine, &root, fx.after_window()).unwrap(),
            BatchState::Finalized
        );

        let later = fx.after_window();
        assert_eq!(
            fx.gateway.claim_exit(&fx.engine, &claim, later).unwrap(),
            Decimal::new(10, 0)
        );
        let err = fx.gateway.claim_exit(&fx.engine, &claim, later).unwrap_err();
        assert!(matches!(err, TriadError::ExitAlreadyClaimed(_)));

        // Inflated amount does not verify against the root.
        let mut inflated = fx.claim_for(root, &tree, &ids, 2);
        inflated.amount = Decimal::new(11, 0);
        assert!(matches!(
            fx.gateway.claim_exit(&fx.engine, &inflated, later),
            Err(TriadError::InvalidProof { .. })
        ));

        assert_eq!(fx.gateway.payout_owed(&claim.recipient), Decimal::new(10, 0));
        assert_eq!(
            fx.gateway.withdraw_payout(&fx.engine, &claim.recipient).unwrap(),
            Decimal::new(10, 0)
        );
        fx.gateway.verify_conservation().unwrap();
    }

    #[test]
    fn cancel_returns_exits_and_burns_root() {
        let mut fx = Fixture::new();
        let ids: Vec<_> = (0..2).map(|_| fx.exit(10)).collect();
        let root = fx.tree(&ids).root();
        fx.gateway
            .mark_batched(&fx.engine, fx.aggregator, &ids, root, fx.now)
            .unwrap();
        fx.gateway
            .cancel_batch(&fx.engine, fx.aggregator, root, fx.now)
            .unwrap();

        assert_eq!(fx.gateway.batch(&root).unwrap().state, BatchState::Cancelled);
        assert_eq!(fx.gateway.exit(&ids[0]).unwrap().state, ExitState::Requested);
        assert!(matches!(
            fx.gateway.mark_batched(&fx.engine, fx.aggregator, &ids, root, fx.now),
            Err(TriadError::BatchRootReused(_))
        ));
    }

    #[test]
    fn approved_batch_cannot_be_cancelled_unchallenged() {
        let mut fx = Fixture::new();
        let ids: Vec<_> = (0..2).map(|_| fx.exit(10)).collect();
        let (root, _) = fx.batch(&ids);
        let err = fx
            .gateway
            .cancel_batch(&fx.engine, fx.aggregator, root, fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::CancelNotAllowed { .. }));

        fx.gateway
            .challenge_batch(&fx.engine, AccountId::new(), root, "bad leaf", fx.now)
            .unwrap();
        fx.gateway
            .cancel_batch(&fx.engine, fx.aggregator, root, fx.now)
            .unwrap();
        assert_eq!(fx.gateway.exit(&ids[1]).unwrap().state, ExitState::Requested);
    }

    #[test]
    fn priority_exit_needs_consensus() {
        let mut fx = Fixture::new();
        let (swap, who) = fx.swap(7);
        let request = PriorityExitRequest {
            swap_id: swap,
            source: ChainDomain::Ton,
            destination: ChainDomain::Ethereum,
            fee_paid: Decimal::ONE,
        };
        let (exit_id, op) = fx
            .gateway
            .request_priority_exit(&mut fx.engine, &fx.swaps, who, &request, fx.now)
            .unwrap();

        let err = fx
            .gateway
            .claim_priority_exit(&fx.engine, exit_id, fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::ConsensusNotReached { .. }));

        approve(&mut fx.engine, &fx.keys, op, &mut fx.target, fx.now);
        assert_eq!(fx.target.calls_for(&op), 0);
        assert_eq!(
            fx.gateway.claim_priority_exit(&fx.engine, exit_id, fx.now).unwrap(),
            Decimal::new(7, 0)
        );
        assert!(matches!(
            fx.gateway.claim_priority_exit(&fx.engine, exit_id, fx.now),
            Err(TriadError::ExitAlreadyClaimed(_))
        ));
        assert_eq!(fx.gateway.payout_owed(&who), Decimal::new(7, 0));
        fx.gateway.verify_conservation().unwrap();
    }

    #[test]
    fn expired_priority_exit_settles_through_batch() {
        let mut fx = Fixture::new();
        let (swap, who) = fx.swap(500);
        let request = PriorityExitRequest {
            swap_id: swap,
            source: ChainDomain::Ton,
            destination: ChainDomain::Ethereum,
            fee_paid: Decimal::ONE,
        };
        let (exit_id, op) = fx
            .gateway
            .request_priority_exit(&mut fx.engine, &fx.swaps, who, &request, fx.now)
            .unwrap();
        let other = fx.exit(5);

        // Nothing to release while the operation can still reach consensus.
        assert!(matches!(
            fx.gateway.release_priority_exit(&fx.engine, exit_id, fx.now),
            Err(TriadError::CancelNotAllowed { .. })
        ));
        assert!(matches!(
            fx.gateway.release_priority_exit(&fx.engine, other, fx.now),
            Err(TriadError::ExitStateConflict { .. })
        ));

        let expired = fx.now + Duration::hours(25);
        assert!(fx.gateway.claim_priority_exit(&fx.engine, exit_id, expired).is_err());
        fx.gateway
            .release_priority_exit(&fx.engine, exit_id, expired)
            .unwrap();
        let exit = fx.gateway.exit(&exit_id).unwrap();
        assert_eq!(exit.state, ExitState::Requested);
        assert_eq!(exit.operation_id, None);
        assert!(matches!(
            fx.gateway.request_exit(&fx.engine, &fx.swaps, swap, who, expired),
            Err(TriadError::SwapAlreadyExited)
        ));

        // Fee comes back once expiry is applied.
        assert_eq!(fx.engine.sweep_expired(expired).unwrap(), vec![op]);
        assert_eq!(fx.engine.fees().refund_owed(&who), Decimal::ONE);

        fx.now = expired;
        let ids = [exit_id, other];
        let (root, tree) = fx.batch(&ids);
        let claim = fx.claim_for(root, &tree, &ids, 0);
        assert_eq!(
            fx.gateway.claim_exit(&fx.engine, &claim, fx.after_window()).unwrap(),
            Decimal::new(500, 0)
        );
        assert_eq!(fx.gateway.payout_owed(&who), Decimal::new(500, 0));
        fx.gateway.verify_conservation().unwrap();
    }

    #[test]
    fn cancelled_priority_exit_is_released() {
        let mut fx = Fixture::new();
        let (swap, who) = fx.swap(9);
        let request = PriorityExitRequest {
            swap_id: swap,
            source: ChainDomain::Solana,
            destination: ChainDomain::Ton,
            fee_paid: Decimal::ONE,
        };
        let (exit_id, op) = fx
            .gateway
            .request_priority_exit(&mut fx.engine, &fx.swaps, who, &request, fx.now)
            .unwrap();
        fx.engine.cancel_operation(op, who, fx.now).unwrap();

        assert!(matches!(
            fx.gateway.claim_priority_exit(&fx.engine, exit_id, fx.now),
            Err(TriadError::OperationFinalized { .. })
        ));
        fx.gateway
            .release_priority_exit(&fx.engine, exit_id, fx.now)
            .unwrap();
        assert_eq!(fx.gateway.exit(&exit_id).unwrap().state, ExitState::Requested);
        assert!(matches!(
            fx.gateway.release_priority_exit(&fx.engine, exit_id, fx.now),
            Err(TriadError::ExitStateConflict { .. })
        ));
    }

    #[test]
    fn paused_engine_blocks_gateway() {
        let mut fx = Fixture::new();
        let controller = AccountId::new();
        let mut config = fx.engine.config().clone();
        config.consensus.emergency_controller = Some(controller);
        fx.engine = ConsensusEngine::new(config, fx.engine.validators().clone()).unwrap();
        fx.engine.emergency_pause(controller, "drill", fx.now).unwrap();

        let (swap, who) = fx.swap(3);
        let err = fx
            .gateway
            .request_exit(&fx.engine, &fx.swaps, swap, who, fx.now)
            .unwrap_err();
        assert!(matches!(err, TriadError::CircuitBreakerActive { .. }));
    }
}
