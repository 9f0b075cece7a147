//! System-wide constants for the Triad consensus engine.

/// Number of independent verification domains.
pub const DOMAIN_COUNT: usize = 3;

/// Confirmations required for standard operations (2-of-3).
pub const STANDARD_THRESHOLD: u8 = 2;

/// Confirmations required for emergency and governance-class operations (3-of-3).
pub const EMERGENCY_THRESHOLD: u8 = 3;

/// Maximum Merkle path length accepted in a proof.
pub const DEFAULT_MAX_PROOF_DEPTH: usize = 32;

/// Default lifetime of a pending operation (24 hours).
pub const DEFAULT_OPERATION_TTL_SECS: i64 = 24 * 60 * 60;

/// Rotation proposals expire after 7 days.
pub const DEFAULT_ROTATION_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

/// Root-update proposals expire after 3 days.
pub const DEFAULT_ROOT_UPDATE_EXPIRY_SECS: i64 = 3 * 24 * 60 * 60;

/// Confirmations (excluding the proposer) needed to execute a proposal.
pub const PROPOSAL_CONFIRMATIONS: usize = 2;

/// Distinct validator votes needed to resume a paused engine.
pub const RESUME_VOTES: usize = 2;

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Number of buckets in the rolling volume window.
pub const DEFAULT_WINDOW_SLOTS: usize = 24;

/// Duration of one rolling-window bucket (1 hour, so the window spans 24h).
pub const DEFAULT_BUCKET_SECS: i64 = 60 * 60;

/// Volume spike multiplier: an amount above `k × average` is anomalous.
pub const DEFAULT_VOLUME_SPIKE_FACTOR: u64 = 3;

/// Failure rate above which proof submissions are considered anomalous (30%).
pub const DEFAULT_MAX_FAILURE_RATE_PERCENT: u64 = 30;

/// Minimum number of proofs in the window before the failure rate is evaluated.
pub const DEFAULT_FAILURE_MIN_SAMPLE: u64 = 10;

/// Length of one discrete time slot used by the same-slot spam check.
pub const DEFAULT_SLOT_SECS: i64 = 12;

/// Maximum operations created within a single slot before it counts as spam.
pub const DEFAULT_MAX_OPS_PER_SLOT: u32 = 20;

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

/// Speed priority multiplier, in hundredths (1.5×).
pub const SPEED_MULTIPLIER_BPS: i64 = 150;

/// Security priority multiplier, in hundredths (1.2×).
pub const SECURITY_MULTIPLIER_BPS: i64 = 120;

/// Share of collected fees paid to validators, in percent.
pub const VALIDATOR_SHARE_PERCENT: i64 = 80;

// ---------------------------------------------------------------------------
// Batch settlement
// ---------------------------------------------------------------------------

/// Smallest batch the aggregator may commit.
pub const DEFAULT_MIN_BATCH_SIZE: usize = 10;

/// Largest batch the aggregator may commit.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 200;

/// Challenge window after a batch is marked (6 hours).
pub const DEFAULT_CHALLENGE_PERIOD_SECS: i64 = 6 * 60 * 60;

/// On-disk schema version for the store.
pub const STORE_SCHEMA_VERSION: &str = "1";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Triad";
