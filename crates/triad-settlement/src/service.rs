//! Async service wrapping the engine and gateway behind one lock.
//!
//! Every call takes the lock, runs to completion, and persists before
//! releasing it, so racing proof submissions on one (operation, domain)
//! slot are serialized and the second sees the first's confirmation.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use triad_consensus::{
    ConsensusEngine, ConsensusStatus, EpochSummary, ProofOutcome, SettlementTarget,
};
use triad_types::{
    AccountId, ChainDomain, EngineConfig, ExitId, MerkleRoot, OperationId, OperationRequest, Proof,
    ProposalId, Result, SwapId, ValidatorId, ValidatorSet,
};

use crate::gateway::{BatchGateway, ExitClaim, PriorityExitRequest, SwapBook};
use crate::store::Store;

struct Inner {
    engine: ConsensusEngine,
    gateway: BatchGateway,
    target: Box<dyn SettlementTarget + Send>,
    swaps: Box<dyn SwapBook + Send>,
    store: Option<Store>,
}

impl Inner {
    fn persist(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.persist_consensus(&self.engine)?;
            store.persist_gateway(&self.gateway)?;
            store.flush()?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct TriadService {
    inner: Arc<Mutex<Inner>>,
}

impl TriadService {
    /// In-memory service over an existing engine.
    pub fn new(
        engine: ConsensusEngine,
        target: Box<dyn SettlementTarget + Send>,
        swaps: Box<dyn SwapBook + Send>,
    ) -> Self {
        let gateway = BatchGateway::new(engine.config());
        Self::from_parts(engine, gateway, target, swaps, None)
    }

    /// Durable service at `path`, restoring state if the store has any.
    pub fn open(
        config: EngineConfig,
        genesis: ValidatorSet,
        target: Box<dyn SettlementTarget + Send>,
        swaps: Box<dyn SwapBook + Send>,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let store = Store::open(path)?;
        let engine = match store.load_consensus()? {
            Some(engine) => {
                tracing::info!(operations = engine.registry().len(), "Restored consensus state");
                engine
            }
            None => ConsensusEngine::new(config, genesis)?,
        };
        let gateway = store
            .load_gateway()?
            .unwrap_or_else(|| BatchGateway::new(engine.config()));
        let service = Self::from_parts(engine, gateway, target, swaps, Some(store));
        Ok(service)
    }

    fn from_parts(
        engine: ConsensusEngine,
        gateway: BatchGateway,
        target: Box<dyn SettlementTarget + Send>,
        swaps: Box<dyn SwapBook + Send>,
        store: Option<Store>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                engine,
                gateway,
                target,
                swaps,
                store,
            })),
        }
    }

    /// Run `f` under the lock and persist whatever it changed, including
    /// state recorded on the way to an error (breaker metrics, lazy expiry).
    async fn mutate<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Inner, DateTime<Utc>) -> Result<R> + Send,
    {
        let mut inner = self.inner.lock().await;
        let result = f(&mut *inner, Utc::now());
        inner.persist()?;
        result
    }

    /// Read-only access to the engine and gateway.
    pub async fn read<R>(&self, f: impl FnOnce(&ConsensusEngine, &BatchGateway) -> R + Send) -> R {
        let inner = self.inner.lock().await;
        f(&inner.engine, &inner.gateway)
    }

    // -----------------------------------------------------------------
    // Consensus
    // -----------------------------------------------------------------

    pub async fn create_operation(&self, request: OperationRequest) -> Result<OperationId> {
        self.mutate(move |inner, now| inner.engine.create_operation(&request, now))
            .await
    }

    pub async fn submit_proof(
        &self,
        id: OperationId,
        domain: ChainDomain,
        proof: Proof,
    ) -> Result<ProofOutcome> {
        self.mutate(move |inner, now| {
            inner
                .engine
                .submit_proof(id, domain, &proof, &mut *inner.target, now)
        })
        .await
    }

    pub async fn consensus_status(&self, id: OperationId) -> Result<ConsensusStatus> {
        let inner = self.inner.lock().await;
        inner.engine.consensus_status(&id, Utc::now())
    }

    pub async fn cancel_operation(&self, id: OperationId, caller: AccountId) -> Result<()> {
        self.mutate(move |inner, now| inner.engine.cancel_operation(id, caller, now))
            .await
    }

    pub async fn emergency_cancel(&self, id: OperationId, caller: AccountId) -> Result<()> {
        self.mutate(move |inner, _| inner.engine.emergency_cancel(id, caller))
            .await
    }

    /// Apply expiry to every overdue operation now rather than on next touch.
    pub async fn sweep_expired(&self) -> Result<Vec<OperationId>> {
        self.mutate(|inner, now| inner.engine.sweep_expired(now))
            .await
    }

    // -----------------------------------------------------------------
    // Circuit breaker
    // -----------------------------------------------------------------

    pub async fn emergency_pause(&self, caller: AccountId, reason: String) -> Result<()> {
        self.mutate(move |inner, now| inner.engine.emergency_pause(caller, &reason, now))
            .await
    }

    pub async fn vote_resume(&self, validator: ValidatorId, trip_sequence: u64) -> Result<bool> {
        self.mutate(move |inner, _| inner.engine.vote_resume(validator, trip_sequence))
            .await
    }

    // -----------------------------------------------------------------
    // Fees
    // -----------------------------------------------------------------

    pub async fn close_epoch(&self) -> Result<EpochSummary> {
        self.mutate(|inner, _| Ok(inner.engine.close_epoch()))
            .await
    }

    pub async fn claim_refund(&self, account: AccountId) -> Result<Decimal> {
        self.mutate(move |inner, _| inner.engine.claim_refund(&account))
            .await
    }

    pub async fn claim_reward(&self, validator: ValidatorId) -> Result<Decimal> {
        self.mutate(move |inner, _| inner.engine.claim_reward(&validator))
            .await
    }

    // -----------------------------------------------------------------
    // Governance
    // -----------------------------------------------------------------

    pub async fn propose_rotation(
        &self,
        proposer: ValidatorId,
        domain: ChainDomain,
        old: ValidatorId,
        new: ValidatorId,
    ) -> Result<ProposalId> {
        self.mutate(move |inner, now| {
            inner
                .engine
                .propose_rotation(proposer, domain, old, new, now)
        })
        .await
    }

    pub async fn propose_root_update(
        &self,
        proposer: ValidatorId,
        domain: ChainDomain,
        new_root: MerkleRoot,
    ) -> Result<ProposalId> {
        self.mutate(move |inner, now| {
            inner
                .engine
                .propose_root_update(proposer, domain, new_root, now)
        })
        .await
    }

    /// Returns `true` if this confirmation executed the proposal.
    pub async fn confirm_proposal(&self, id: ProposalId, confirmer: ValidatorId) -> Result<bool> {
        self.mutate(move |inner, now| inner.engine.confirm_proposal(id, confirmer, now))
            .await
    }

    // -----------------------------------------------------------------
    // Gateway
    // -----------------------------------------------------------------

    pub async fn request_exit(&self, swap_id: SwapId, caller: AccountId) -> Result<ExitId> {
        self.mutate(move |inner, now| {
            inner
                .gateway
                .request_exit(&inner.engine, &*inner.swaps, swap_id, caller, now)
        })
        .await
    }

    pub async fn request_priority_exit(
        &self,
        caller: AccountId,
        request: PriorityExitRequest,
    ) -> Result<(ExitId, OperationId)> {
        self.mutate(move |inner, now| {
            inner.gateway.request_priority_exit(
                &mut inner.engine,
                &*inner.swaps,
                caller,
                &request,
                now,
            )
        })
        .await
    }

    pub async fn mark_batched(
        &self,
        caller: AccountId,
        exit_ids: Vec<ExitId>,
        root: MerkleRoot,
    ) -> Result<Decimal> {
        self.mutate(move |inner, now| {
            inner
                .gateway
                .mark_batched(&inner.engine, caller, &exit_ids, root, now)
        })
        .await
    }

    pub async fn submit_batch(
        &self,
        caller: AccountId,
        root: MerkleRoot,
        exit_count: usize,
        operation_id: OperationId,
    ) -> Result<()> {
        self.mutate(move |inner, now| {
            inner
                .gateway
                .submit_batch(&inner.engine, caller, root, exit_count, operation_id, now)
        })
        .await
    }

    pub async fn challenge_batch(
        &self,
        challenger: AccountId,
        root: MerkleRoot,
        reason: String,
    ) -> Result<()> {
        self.mutate(move |inner, now| {
            inner
                .gateway
                .challenge_batch(&inner.engine, challenger, root, &reason, now)
        })
        .await
    }

    pub async fn finalize_batch(&self, caller: AccountId, root: MerkleRoot) -> Result<()> {
        self.mutate(move |inner, now| inner.gateway.finalize_batch(&inner.engine, caller, root, now))
            .await
    }

    pub async fn cancel_batch(&self, caller: AccountId, root: MerkleRoot) -> Result<()> {
        self.mutate(move |inner, now| inner.gateway.cancel_batch(&inner.engine, caller, root, now))
            .await
    }

    pub async fn claim_exit(&self, claim: ExitClaim) -> Result<Decimal> {
        self.mutate(move |inner, now| inner.gateway.claim_exit(&inner.engine, &claim, now))
            .await
    }

    pub async fn claim_priority_exit(&self, exit_id: ExitId) -> Result<Decimal> {
        self.mutate(move |inner, now| {
            inner
                .gateway
                .claim_priority_exit(&inner.engine, exit_id, now)
        })
        .await
    }

    pub async fn release_priority_exit(&self, exit_id: ExitId) -> Result<()> {
        self.mutate(move |inner, now| {
            inner
                .gateway
                .release_priority_exit(&inner.engine, exit_id, now)
        })
        .await
    }

    pub async fn withdraw_payout(&self, account: AccountId) -> Result<Decimal> {
        self.mutate(move |inner, _| inner.gateway.withdraw_payout(&inner.engine, &account))
            .await
    }
}
