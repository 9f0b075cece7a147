//! Error types for the Triad consensus engine.
//!
//! All errors use the `TR_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by how a caller should react:
//! - 1xx: Validation errors (never retry with the same input)
//! - 2xx: Conflict errors (never retry; the state already moved on)
//! - 3xx: Not-yet errors (consensus not reached, window still open; retry later)
//! - 4xx: Expiry errors (terminal)
//! - 5xx: Circuit breaker errors (retry after resume)
//! - 6xx: Settlement errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{ChainDomain, ExitId, MerkleRoot, OperationId, OperationStatus, ProposalId};

/// Coarse classification of every error, used by callers to decide whether
/// to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    ConsensusNotReached,
    Expired,
    CircuitBreakerActive,
    SettlementFailure,
    Internal,
}

impl ErrorKind {
    /// Whether the same request may succeed if submitted again later.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ConsensusNotReached | Self::CircuitBreakerActive | Self::Internal
        )
    }
}

/// Central error enum for all Triad operations.
#[derive(Debug, Error)]
pub enum TriadError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// Amount is zero, negative, or otherwise unusable.
    #[error("TR_ERR_100: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// An identity, root, or reference was the all-zero value.
    #[error("TR_ERR_101: Zero value not allowed for {field}")]
    ZeroValue { field: &'static str },

    /// The Merkle path exceeds the configured bound.
    #[error("TR_ERR_102: Proof depth {depth} exceeds maximum {max}")]
    ProofTooDeep { depth: usize, max: usize },

    /// The Merkle path does not lead to the trusted root.
    #[error("TR_ERR_103: Invalid membership proof: {reason}")]
    InvalidProof { reason: String },

    /// The submitter's signature did not verify.
    #[error("TR_ERR_104: Proof signature verification failed")]
    InvalidSignature,

    /// A proof was submitted for a different domain than it claims.
    #[error("TR_ERR_105: Domain mismatch: expected {expected}, got {actual}")]
    DomainMismatch {
        expected: ChainDomain,
        actual: ChainDomain,
    },

    /// The submitter is not the seated validator for the domain.
    #[error("TR_ERR_106: Submitter is not the validator for {domain}")]
    UnauthorizedValidator { domain: ChainDomain },

    /// The caller lacks the role required for this call.
    #[error("TR_ERR_107: Caller is not authorized as {role}")]
    Unauthorized { role: &'static str },

    /// The declared fee does not cover the computed fee.
    #[error("TR_ERR_108: Insufficient fee: required {required}, paid {paid}")]
    InsufficientFee { required: Decimal, paid: Decimal },

    /// Batch size outside the configured range.
    #[error("TR_ERR_109: Batch size {size} outside [{min}, {max}]")]
    BatchSizeOutOfRange { size: usize, min: usize, max: usize },

    /// A commitment did not match the value derived from its inputs.
    #[error("TR_ERR_110: Commitment mismatch: {reason}")]
    CommitmentMismatch { reason: String },

    /// A governance proposal has degenerate inputs.
    #[error("TR_ERR_111: Invalid proposal: {reason}")]
    InvalidProposal { reason: String },

    /// The referenced swap cannot be exited by this caller.
    #[error("TR_ERR_112: Invalid swap: {reason}")]
    InvalidSwap { reason: String },

    /// The operation is unknown.
    #[error("TR_ERR_113: Operation not found: {0}")]
    OperationNotFound(OperationId),

    /// The exit request is unknown.
    #[error("TR_ERR_114: Exit not found: {0}")]
    ExitNotFound(ExitId),

    /// The batch is unknown.
    #[error("TR_ERR_115: Batch not found: {0}")]
    BatchNotFound(MerkleRoot),

    /// The proposal is unknown.
    #[error("TR_ERR_116: Proposal not found: {0}")]
    ProposalNotFound(ProposalId),

    /// The request is malformed for the component's current state.
    #[error("TR_ERR_117: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    // =================================================================
    // Conflict Errors (2xx)
    // =================================================================
    /// This domain already confirmed this operation.
    #[error("TR_ERR_200: Domain {domain} already confirmed operation {operation}")]
    DuplicateConfirmation {
        operation: OperationId,
        domain: ChainDomain,
    },

    /// The operation already reached a terminal state.
    #[error("TR_ERR_201: Operation {operation} is already {status}")]
    OperationFinalized {
        operation: OperationId,
        status: OperationStatus,
    },

    /// The proposer tried to confirm their own proposal.
    #[error("TR_ERR_202: Proposer cannot confirm their own proposal")]
    SelfConfirmation,

    /// The validator already confirmed this proposal.
    #[error("TR_ERR_203: Proposal {0} already confirmed by this validator")]
    AlreadyConfirmed(ProposalId),

    /// The proposal has already been executed.
    #[error("TR_ERR_204: Proposal {0} already executed")]
    ProposalExecuted(ProposalId),

    /// A proposal with identical inputs already exists.
    #[error("TR_ERR_205: Duplicate proposal {0}")]
    DuplicateProposal(ProposalId),

    /// The validator set changed since the proposal was raised.
    #[error("TR_ERR_206: Stale proposal: raised at set version {raised}, current {current}")]
    StaleProposal { raised: u64, current: u64 },

    /// The exit has already been claimed.
    #[error("TR_ERR_207: Exit already claimed: {0}")]
    ExitAlreadyClaimed(ExitId),

    /// The batch root has been used before.
    #[error("TR_ERR_208: Batch root already used: {0}")]
    BatchRootReused(MerkleRoot),

    /// The exit is not in a state that allows this call.
    #[error("TR_ERR_209: Exit {exit} is {state}, cannot proceed")]
    ExitStateConflict { exit: ExitId, state: String },

    /// The batch is not in a state that allows this call.
    #[error("TR_ERR_210: Batch {root} is {state}, cannot proceed")]
    BatchStateConflict { root: MerkleRoot, state: String },

    /// A claim would push the batch's claimed total past its committed total.
    #[error("TR_ERR_211: Claim of {amount} exceeds batch total: claimed {claimed} of {total}")]
    ClaimExceedsTotal {
        amount: Decimal,
        claimed: Decimal,
        total: Decimal,
    },

    /// Cancellation is not permitted in the current state.
    #[error("TR_ERR_212: Cancellation not allowed: {reason}")]
    CancelNotAllowed { reason: String },

    /// The swap already has an exit request.
    #[error("TR_ERR_213: Swap already exited")]
    SwapAlreadyExited,

    /// Nothing is owed to this recipient.
    #[error("TR_ERR_214: Nothing to claim")]
    NothingToClaim,

    /// The validator already voted to resume this pause.
    #[error("TR_ERR_215: Duplicate resume vote")]
    DuplicateResumeVote,

    // =================================================================
    // Not-yet Errors (3xx)
    // =================================================================
    /// The operation has not yet reached its confirmation threshold.
    #[error("TR_ERR_300: Consensus not reached for {operation}: {confirmations}/{required}")]
    ConsensusNotReached {
        operation: OperationId,
        confirmations: u8,
        required: u8,
    },

    /// The batch challenge window is still open.
    #[error("TR_ERR_301: Challenge period active for batch {root}")]
    ChallengePeriodActive { root: MerkleRoot },

    // =================================================================
    // Expiry Errors (4xx)
    // =================================================================
    /// The operation expired before reaching consensus.
    #[error("TR_ERR_400: Operation expired: {0}")]
    OperationExpired(OperationId),

    /// The proposal expiry window elapsed.
    #[error("TR_ERR_401: Proposal expired: {0}")]
    ProposalExpired(ProposalId),

    /// The challenge window already closed.
    #[error("TR_ERR_402: Challenge period elapsed for batch {root}")]
    ChallengePeriodElapsed { root: MerkleRoot },

    // =================================================================
    // Circuit Breaker Errors (5xx)
    // =================================================================
    /// The engine is paused; mutating calls are rejected.
    #[error("TR_ERR_500: Circuit breaker active: {reason}")]
    CircuitBreakerActive { reason: String },

    /// A resume vote was cast while the engine was not paused.
    #[error("TR_ERR_501: Circuit breaker not tripped")]
    CircuitBreakerNotTripped,

    // =================================================================
    // Settlement Errors (6xx)
    // =================================================================
    /// The settlement target rejected the payout.
    #[error("TR_ERR_600: Settlement failed for {operation}: {reason}")]
    SettlementFailed {
        operation: OperationId,
        reason: String,
    },

    /// A value-conservation invariant was violated.
    #[error("TR_ERR_601: Conservation invariant violation: {reason}")]
    ConservationViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("TR_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("TR_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, inconsistent values, etc.).
    #[error("TR_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("TR_ERR_903: I/O error: {0}")]
    Io(String),

    /// Persistent store error.
    #[error("TR_ERR_904: Storage error: {0}")]
    Storage(String),
}

impl TriadError {
    /// Map this error onto the retry taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. }
            | Self::ZeroValue { .. }
            | Self::ProofTooDeep { .. }
            | Self::InvalidProof { .. }
            | Self::InvalidSignature
            | Self::DomainMismatch { .. }
            | Self::UnauthorizedValidator { .. }
            | Self::Unauthorized { .. }
            | Self::InsufficientFee { .. }
            | Self::BatchSizeOutOfRange { .. }
            | Self::CommitmentMismatch { .. }
            | Self::InvalidProposal { .. }
            | Self::InvalidSwap { .. }
            | Self::OperationNotFound(_)
            | Self::ExitNotFound(_)
            | Self::BatchNotFound(_)
            | Self::ProposalNotFound(_)
            | Self::InvalidRequest { .. } => ErrorKind::Validation,

            Self::DuplicateConfirmation { .. }
            | Self::OperationFinalized { .. }
            | Self::SelfConfirmation
            | Self::AlreadyConfirmed(_)
            | Self::ProposalExecuted(_)
            | Self::DuplicateProposal(_)
            | Self::StaleProposal { .. }
            | Self::ExitAlreadyClaimed(_)
            | Self::BatchRootReused(_)
            | Self::ExitStateConflict { .. }
            | Self::BatchStateConflict { .. }
            | Self::ClaimExceedsTotal { .. }
            | Self::CancelNotAllowed { .. }
            | Self::SwapAlreadyExited
            | Self::NothingToClaim
            | Self::DuplicateResumeVote => ErrorKind::Conflict,

            Self::ConsensusNotReached { .. } | Self::ChallengePeriodActive { .. } => {
                ErrorKind::ConsensusNotReached
            }

            Self::OperationExpired(_)
            | Self::ProposalExpired(_)
            | Self::ChallengePeriodElapsed { .. } => ErrorKind::Expired,

            Self::CircuitBreakerActive { .. } | Self::CircuitBreakerNotTripped => {
                ErrorKind::CircuitBreakerActive
            }

            Self::SettlementFailed { .. } | Self::ConservationViolation { .. } => {
                ErrorKind::SettlementFailure
            }

            Self::Internal(_)
            | Self::Serialization(_)
            | Self::Configuration(_)
            | Self::Io(_)
            | Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, TriadError>;

impl From<std::io::Error> for TriadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TriadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
