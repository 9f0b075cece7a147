//! Configuration for a Triad engine instance.
//!
//! Every tunable threshold lives here rather than in code, including the
//! circuit-breaker values that historically varied between deployments.
//! Missing fields fall back to the defaults in [`crate::constants`].

use std::path::Path;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, Result, TriadError, constants};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub consensus: ConsensusConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub fees: FeeConfig,
    pub governance: GovernanceConfig,
    pub gateway: GatewayConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| TriadError::Configuration(format!("invalid config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse, and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Reject internally inconsistent values.
    pub fn validate(&self) -> Result<()> {
        self.consensus.validate()?;
        self.circuit_breaker.validate()?;
        self.fees.validate()?;
        self.governance.validate()?;
        self.gateway.validate()
    }
}

fn invalid(msg: impl Into<String>) -> TriadError {
    TriadError::Configuration(msg.into())
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Lifetime of a pending operation.
    pub operation_ttl_secs: i64,
    /// Maximum Merkle path length accepted in a proof.
    pub max_proof_depth: usize,
    /// Holder of the emergency-cancel and emergency-pause powers.
    pub emergency_controller: Option<AccountId>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            operation_ttl_secs: constants::DEFAULT_OPERATION_TTL_SECS,
            max_proof_depth: constants::DEFAULT_MAX_PROOF_DEPTH,
            emergency_controller: None,
        }
    }
}

impl ConsensusConfig {
    #[must_use]
    pub fn operation_ttl(&self) -> Duration {
        Duration::seconds(self.operation_ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.operation_ttl_secs <= 0 {
            return Err(invalid("consensus.operation_ttl_secs must be positive"));
        }
        if self.max_proof_depth == 0 {
            return Err(invalid("consensus.max_proof_depth must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// `amount > spike_factor × average` trips the breaker.
    pub volume_spike_factor: Decimal,
    /// Failure rate (percent) above which proof submissions trip the breaker.
    pub max_failure_rate_percent: Decimal,
    /// Proofs required in the window before the failure rate is evaluated.
    pub failure_min_sample: u64,
    pub slot_secs: i64,
    pub max_ops_per_slot: u32,
    pub window_slots: usize,
    pub bucket_secs: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            volume_spike_factor: Decimal::from(constants::DEFAULT_VOLUME_SPIKE_FACTOR),
            max_failure_rate_percent: Decimal::from(constants::DEFAULT_MAX_FAILURE_RATE_PERCENT),
            failure_min_sample: constants::DEFAULT_FAILURE_MIN_SAMPLE,
            slot_secs: constants::DEFAULT_SLOT_SECS,
            max_ops_per_slot: constants::DEFAULT_MAX_OPS_PER_SLOT,
            window_slots: constants::DEFAULT_WINDOW_SLOTS,
            bucket_secs: constants::DEFAULT_BUCKET_SECS,
        }
    }
}

impl CircuitBreakerConfig {
    fn validate(&self) -> Result<()> {
        if self.volume_spike_factor < Decimal::ONE {
            return Err(invalid("circuit_breaker.volume_spike_factor must be >= 1"));
        }
        if self.max_failure_rate_percent <= Decimal::ZERO
            || self.max_failure_rate_percent > Decimal::ONE_HUNDRED
        {
            return Err(invalid(
                "circuit_breaker.max_failure_rate_percent must be in (0, 100]",
            ));
        }
        if self.failure_min_sample == 0 {
            return Err(invalid("circuit_breaker.failure_min_sample must be at least 1"));
        }
        if self.slot_secs <= 0 || self.bucket_secs <= 0 {
            return Err(invalid("circuit_breaker slot and bucket lengths must be positive"));
        }
        if self.window_slots == 0 {
            return Err(invalid("circuit_breaker.window_slots must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub base_fee: Decimal,
    /// Cap applied after multipliers.
    pub max_fee: Decimal,
    pub speed_multiplier: Decimal,
    pub security_multiplier: Decimal,
    /// Fraction of fees paid to validators; the rest goes to the protocol.
    pub validator_share: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_fee: Decimal::new(1, 2),
            max_fee: Decimal::ONE,
            speed_multiplier: Decimal::new(constants::SPEED_MULTIPLIER_BPS, 2),
            security_multiplier: Decimal::new(constants::SECURITY_MULTIPLIER_BPS, 2),
            validator_share: Decimal::new(constants::VALIDATOR_SHARE_PERCENT, 2),
        }
    }
}

impl FeeConfig {
    fn validate(&self) -> Result<()> {
        if self.base_fee < Decimal::ZERO || self.max_fee < self.base_fee {
            return Err(invalid("fees: require 0 <= base_fee <= max_fee"));
        }
        if self.speed_multiplier < Decimal::ONE || self.security_multiplier < Decimal::ONE {
            return Err(invalid("fees: multipliers must be >= 1"));
        }
        if self.validator_share < Decimal::ZERO || self.validator_share > Decimal::ONE {
            return Err(invalid("fees.validator_share must be in [0, 1]"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub rotation_expiry_secs: i64,
    pub root_update_expiry_secs: i64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            rotation_expiry_secs: constants::DEFAULT_ROTATION_EXPIRY_SECS,
            root_update_expiry_secs: constants::DEFAULT_ROOT_UPDATE_EXPIRY_SECS,
        }
    }
}

impl GovernanceConfig {
    fn validate(&self) -> Result<()> {
        if self.rotation_expiry_secs <= 0 || self.root_update_expiry_secs <= 0 {
            return Err(invalid("governance expiry windows must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Keeper allowed to mark, submit, finalize, and cancel batches.
    pub aggregator: Option<AccountId>,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub challenge_period_secs: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            aggregator: None,
            min_batch_size: constants::DEFAULT_MIN_BATCH_SIZE,
            max_batch_size: constants::DEFAULT_MAX_BATCH_SIZE,
            challenge_period_secs: constants::DEFAULT_CHALLENGE_PERIOD_SECS,
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn challenge_period(&self) -> Duration {
        Duration::seconds(self.challenge_period_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(invalid("gateway: require 1 <= min_batch_size <= max_batch_size"));
        }
        if self.challenge_period_secs < 0 {
            return Err(invalid("gateway.challenge_period_secs must not be negative"));
        }
        Ok(())
    }
}
