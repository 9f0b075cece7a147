//! # Exit requests and settlement batches
//!
//! ## Exit lifecycle
//!
//! ```text
//!  REQUESTED ──mark──▶ BATCHED ──finalize──▶ FINALIZED ──claim──▶ CLAIMED
//!      ▲                  │
//!      │                  └──challenge──▶ CHALLENGED
//!      └────── batch cancelled ──────────────┘
//!
//!  PRIORITY ──claim (after consensus)──▶ CLAIMED
//! ```
//!
//! ## Batch lifecycle
//!
//! `PENDING → FINALIZED`, `PENDING → CHALLENGED`, and `PENDING | CHALLENGED →
//! CANCELLED`. Finalized and cancelled batches are terminal. A batch root is
//! never reused, even after cancellation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, ExitId, MerkleRoot, OperationId, SwapId, tagged_hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitState {
    Requested,
    /// Fast lane: settled as its own consensus operation, never batched.
    Priority,
    Batched,
    Challenged,
    Finalized,
    Claimed,
}

impl ExitState {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Requested, Self::Batched)
                | (Self::Batched, Self::Finalized | Self::Challenged | Self::Requested)
                | (Self::Challenged, Self::Requested)
                | (Self::Finalized | Self::Priority, Self::Claimed)
                | (Self::Priority, Self::Requested)
        )
    }
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "REQUESTED"),
            Self::Priority => write!(f, "PRIORITY"),
            Self::Batched => write!(f, "BATCHED"),
            Self::Challenged => write!(f, "CHALLENGED"),
            Self::Finalized => write!(f, "FINALIZED"),
            Self::Claimed => write!(f, "CLAIMED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRequest {
    pub id: ExitId,
    pub swap_id: SwapId,
    pub requester: AccountId,
    pub recipient: AccountId,
    pub asset: String,
    pub amount: Decimal,
    /// Hash-lock commitment carried over from the swap.
    pub secret_hash: [u8; 32],
    pub state: ExitState,
    pub created_at: DateTime<Utc>,
    pub batch_root: Option<MerkleRoot>,
    /// Consensus operation approving a priority exit.
    pub operation_id: Option<OperationId>,
}

impl ExitRequest {
    /// Hash of the swap, caller, time, and both monotonic counters.
    #[must_use]
    pub fn derive_id(
        swap_id: &SwapId,
        requester: &AccountId,
        created_at: DateTime<Utc>,
        global_counter: u64,
        requester_counter: u64,
    ) -> ExitId {
        ExitId(tagged_hash(
            b"triad:exit_id:v1:",
            &[
                swap_id.as_bytes(),
                requester.0.as_bytes(),
                &created_at.timestamp_millis().to_le_bytes(),
                &global_counter.to_le_bytes(),
                &requester_counter.to_le_bytes(),
            ],
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchState {
    Pending,
    Finalized,
    Challenged,
    Cancelled,
}

impl BatchState {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Finalized | Self::Challenged | Self::Cancelled)
                | (Self::Challenged, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Finalized => write!(f, "FINALIZED"),
            Self::Challenged => write!(f, "CHALLENGED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub root: MerkleRoot,
    pub exit_ids: Vec<ExitId>,
    pub total: Decimal,
    pub submitted_at: DateTime<Utc>,
    pub finalization_time: DateTime<Utc>,
    /// Consensus operation that approved the batch, once bound.
    pub operation_id: Option<OperationId>,
    pub claimed_total: Decimal,
    pub claimed_count: usize,
    pub state: BatchState,
    pub challenge_reason: Option<String>,
    pub challenger: Option<AccountId>,
}

impl Batch {
    #[must_use]
    pub fn exit_count(&self) -> usize {
        self.exit_ids.len()
    }

    /// Challenge window still open: strictly before the finalization time.
    #[must_use]
    pub fn in_challenge_window(&self, now: DateTime<Utc>) -> bool {
        now < self.finalization_time
    }

    #[must_use]
    pub fn remaining(&self) -> Decimal {
        self.total - self.claimed_total
    }
}
