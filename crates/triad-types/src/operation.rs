//! # Operation: the unit of 2-of-3 approval
//!
//! ## State Machine
//!
//! ```text
//!                 threshold reached      ┌──────────┐
//!            ┌──────────────────────────▶│ EXECUTED │
//!            │                           └──────────┘
//!            │   settlement target errs  ┌────────┐
//!   ┌────────┴┐ ────────────────────────▶│ FAILED │
//!   │ PENDING │                          └────────┘
//!   └────┬────┘  initiator / controller  ┌───────────┐ ┌─────────────────────┐
//!        ├──────────────────────────────▶│ CANCELLED │ │ EMERGENCY_CANCELLED │
//!        │                               └───────────┘ └─────────────────────┘
//!        │   expiry elapsed              ┌─────────┐
//!        └──────────────────────────────▶│ EXPIRED │
//!                                        └─────────┘
//! ```
//!
//! Transitions are monotonic into exactly one terminal state. Per-domain
//! confirmation flags are set at most once and never cleared.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountId, ChainDomain, OperationId, Result, TriadError, amount_bytes, constants,
    tagged_hash,
};

/// What an operation does once approved. Determines its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationClass {
    /// Standard value transfer to a settlement target.
    Transfer,
    /// Emergency withdrawal from a vault (3-of-3).
    EmergencyWithdrawal,
    /// Migration of funds or configuration (3-of-3).
    Migration,
    /// Approval of a committed exit batch.
    BatchCommit,
    /// Approval of a single fast-lane exit.
    PriorityExit,
}

impl OperationClass {
    /// Confirmations needed before execution.
    #[must_use]
    pub fn threshold(self) -> u8 {
        match self {
            Self::EmergencyWithdrawal | Self::Migration => constants::EMERGENCY_THRESHOLD,
            Self::Transfer | Self::BatchCommit | Self::PriorityExit => {
                constants::STANDARD_THRESHOLD
            }
        }
    }

    /// Whether execution pays out through the settlement target.
    ///
    /// Batch and priority-exit approvals pay out later through gateway claims.
    #[must_use]
    pub fn settles_on_execution(self) -> bool {
        !matches!(self, Self::BatchCommit | Self::PriorityExit)
    }

    fn tag(self) -> u8 {
        match self {
            Self::Transfer => 0,
            Self::EmergencyWithdrawal => 1,
            Self::Migration => 2,
            Self::BatchCommit => 3,
            Self::PriorityExit => 4,
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transfer => write!(f, "TRANSFER"),
            Self::EmergencyWithdrawal => write!(f, "EMERGENCY_WITHDRAWAL"),
            Self::Migration => write!(f, "MIGRATION"),
            Self::BatchCommit => write!(f, "BATCH_COMMIT"),
            Self::PriorityExit => write!(f, "PRIORITY_EXIT"),
        }
    }
}

/// The lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Collecting confirmations.
    Pending,
    /// Threshold reached and settlement completed (or deferred to claims).
    Executed,
    /// Threshold reached but the settlement target rejected the payout.
    Failed,
    /// Withdrawn by the initiator.
    Cancelled,
    /// Withdrawn by the emergency controller.
    EmergencyCancelled,
    /// Expiry elapsed before the threshold was reached.
    Expired,
}

impl OperationStatus {
    /// Only `Pending` may move, and only into a terminal state.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(self, Self::Pending) && target != Self::Pending
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Executed => write!(f, "EXECUTED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::EmergencyCancelled => write!(f, "EMERGENCY_CANCELLED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Caller-supplied parameters for a new operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub initiator: AccountId,
    pub class: OperationClass,
    pub source: ChainDomain,
    pub destination: ChainDomain,
    /// Settlement target reference (vault or recipient).
    pub target: AccountId,
    pub amount: Decimal,
    /// Fee the initiator escrows with the request.
    pub fee_paid: Decimal,
    pub prioritize_speed: bool,
    pub prioritize_security: bool,
    /// Opaque 32-byte commitment; batch approvals bind `hash(root, total)` here.
    pub commitment: [u8; 32],
}

/// An action awaiting (or having received) 2-of-3 approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// Monotonic registry nonce; also salts the proof leaf.
    pub nonce: u64,
    pub initiator: AccountId,
    pub class: OperationClass,
    pub source: ChainDomain,
    pub destination: ChainDomain,
    pub target: AccountId,
    pub amount: Decimal,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// One flag per domain, indexed by [`ChainDomain::index`].
    pub confirmations: [bool; constants::DOMAIN_COUNT],
    pub fee_paid: Decimal,
    pub commitment: [u8; 32],
    pub executed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Operation {
    /// Deterministic fingerprint over the request's immutable inputs, the
    /// creation time, and the nonce.
    #[must_use]
    pub fn fingerprint(
        request: &OperationRequest,
        created_at: DateTime<Utc>,
        nonce: u64,
    ) -> OperationId {
        OperationId(tagged_hash(
            b"triad:operation:v1:",
            &[
                &[request.class.tag()],
                request.initiator.0.as_bytes(),
                &created_at.timestamp_millis().to_le_bytes(),
                &[request.source.index() as u8, request.destination.index() as u8],
                request.target.0.as_bytes(),
                &amount_bytes(request.amount),
                &request.commitment,
                &nonce.to_le_bytes(),
            ],
        ))
    }

    /// Build a fresh `Pending` operation from a request.
    #[must_use]
    pub fn from_request(
        request: &OperationRequest,
        nonce: u64,
        created_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        let id = Self::fingerprint(request, created_at, nonce);
        Self {
            id,
            nonce,
            initiator: request.initiator,
            class: request.class,
            source: request.source,
            destination: request.destination,
            target: request.target,
            amount: request.amount,
            status: OperationStatus::Pending,
            created_at,
            expires_at: created_at + ttl,
            confirmations: [false; constants::DOMAIN_COUNT],
            fee_paid: request.fee_paid,
            commitment: request.commitment,
            executed_at: None,
            failure_reason: None,
        }
    }

    #[must_use]
    pub fn required_confirmations(&self) -> u8 {
        self.class.threshold()
    }

    #[must_use]
    pub fn confirmation_count(&self) -> u8 {
        self.confirmations.iter().filter(|c| **c).count() as u8
    }

    #[must_use]
    pub fn is_confirmed_by(&self, domain: ChainDomain) -> bool {
        self.confirmations[domain.index()]
    }

    #[must_use]
    pub fn confirmed_domains(&self) -> Vec<ChainDomain> {
        ChainDomain::ALL
            .into_iter()
            .filter(|d| self.is_confirmed_by(*d))
            .collect()
    }

    #[must_use]
    pub fn has_consensus(&self) -> bool {
        self.confirmation_count() >= self.required_confirmations()
    }

    /// A pending operation whose expiry has elapsed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending && now > self.expires_at
    }

    /// Set this domain's flag. Returns the new confirmation count.
    ///
    /// # Errors
    /// `DuplicateConfirmation` if the domain already confirmed.
    pub fn record_confirmation(&mut self, domain: ChainDomain) -> Result<u8> {
        if self.is_confirmed_by(domain) {
            return Err(TriadError::DuplicateConfirmation {
                operation: self.id,
                domain,
            });
        }
        self.confirmations[domain.index()] = true;
        Ok(self.confirmation_count())
    }

    /// Move into a terminal state.
    ///
    /// # Errors
    /// `OperationFinalized` if the operation already left `Pending`.
    pub fn transition(&mut self, target: OperationStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(TriadError::OperationFinalized {
                operation: self.id,
                status: self.status,
            });
        }
        self.status = target;
        Ok(())
    }
}

/// Dummy request for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl OperationRequest {
    /// A standard transfer of `amount` with a generous fee.
    pub fn dummy_transfer(amount: Decimal) -> Self {
        Self {
            initiator: AccountId::new(),
            class: OperationClass::Transfer,
            source: ChainDomain::Ethereum,
            destination: ChainDomain::Solana,
            target: AccountId::new(),
            amount,
            fee_paid: Decimal::ONE,
            prioritize_speed: false,
            prioritize_security: false,
            commitment: [0u8; 32],
        }
    }
}
