//! # triad-consensus
//!
//! **Consensus Plane**: operation registry, 2-of-3 confirmation tracking,
//! circuit breaker, fee accounting, and validator governance.
//!
//! ## Architecture
//!
//! 1. **OperationRegistry**: creates operations, tracks per-domain confirmations, executes once
//! 2. **CircuitBreaker**: rolling-window anomaly checks, pause and resume voting
//! 3. **FeePool**: fee escrow, 80/20 split, epoch rewards, pull-based refunds
//! 4. **Governance**: rotation and trusted-root proposals over the [`ValidatorSet`](triad_types::ValidatorSet)
//! 5. **ConsensusEngine**: facade composing all of the above
//!
//! ## Proof Flow
//!
//! ```text
//! Validator → ConsensusEngine.submit_proof() → CircuitBreaker.ensure_active()
//!     → OperationRegistry.submit_proof() → ProofValidator.verify()
//!     → threshold reached → SettlementTarget.settle() → FeePool.distribute()
//! ```

pub mod breaker;
pub mod engine;
pub mod fees;
pub mod governance;
pub mod ledger;
pub mod registry;
pub mod target;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testkit;

pub use breaker::{BreakerState, CircuitBreaker, WindowStats};
pub use engine::{ConsensusEngine, EngineSnapshot};
pub use fees::{EpochSummary, FeePool, FeeSchedule, FeeSplit};
pub use governance::Governance;
pub use ledger::EscrowLedger;
pub use registry::{ConsensusStatus, OperationRegistry, ProofOutcome};
pub use target::SettlementTarget;

#[cfg(any(test, feature = "test-helpers"))]
pub use target::RecordingTarget;
