//! Value conservation invariant checker.
//!
//! Invariants enforced after every claim:
//! ```text
//! ∀ batch:  Σ(claimed) ≤ committed total
//! Σ(batch claims) + Σ(priority claims) == Σ(payouts credited)
//! ```
//!
//! A violation means the gateway paid out value no batch or approved
//! operation accounts for. The gateway refuses the claim that would cause it.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use triad_types::{MerkleRoot, Result, TriadError};

/// Tracks committed and claimed value per batch root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueConservation {
    /// Committed total per live (not cancelled) batch.
    committed: BTreeMap<MerkleRoot, Decimal>,
    claimed: BTreeMap<MerkleRoot, Decimal>,
    priority_claimed: Decimal,
}

impl ValueConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_commit(&mut self, root: MerkleRoot, total: Decimal) {
        self.committed.insert(root, total);
    }

    /// Drop a cancelled batch. Nothing can have been claimed from it.
    pub fn record_cancel(&mut self, root: &MerkleRoot) -> Result<()> {
        if self.claimed_for(root) > Decimal::ZERO {
            return Err(TriadError::ConservationViolation {
                reason: format!("batch {root} cancelled after claims"),
            });
        }
        self.committed.remove(root);
        Ok(())
    }

    /// Check that claiming `amount` from `root` stays within its total.
    ///
    /// # Errors
    /// [`TriadError::ClaimExceedsTotal`] if it would not.
    pub fn check_claim(&self, root: &MerkleRoot, amount: Decimal) -> Result<()> {
        let total = self.committed_for(root);
        let claimed = self.claimed_for(root);
        if claimed + amount > total {
            return Err(TriadError::ClaimExceedsTotal {
                amount,
                claimed,
                total,
            });
        }
        Ok(())
    }

    pub fn record_claim(&mut self, root: MerkleRoot, amount: Decimal) -> Result<()> {
        self.check_claim(&root, amount)?;
        *self.claimed.entry(root).or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    pub fn record_priority_claim(&mut self, amount: Decimal) {
        self.priority_claimed += amount;
    }

    #[must_use]
    pub fn committed_for(&self, root: &MerkleRoot) -> Decimal {
        self.committed.get(root).copied().unwrap_or(Decimal::ZERO)
    }

    #[must_use]
    pub fn claimed_for(&self, root: &MerkleRoot) -> Decimal {
        self.claimed.get(root).copied().unwrap_or(Decimal::ZERO)
    }

    /// Value committed by live batches and not yet claimed.
    #[must_use]
    pub fn outstanding(&self) -> Decimal {
        self.committed
            .iter()
            .map(|(root, total)| *total - self.claimed_for(root))
            .sum()
    }

    #[must_use]
    pub fn total_claimed(&self) -> Decimal {
        self.claimed.values().copied().sum::<Decimal>() + self.priority_claimed
    }

    /// Verify every batch is within its total and that `payouts_credited`
    /// matches the claims recorded here.
    ///
    /// # Errors
    /// [`TriadError::ConservationViolation`] on any mismatch.
    pub fn verify(&self, payouts_credited: Decimal) -> Result<()> {
        for (root, claimed) in &self.claimed {
            let total = self.committed_for(root);
            if *claimed > total {
                return Err(TriadError::ConservationViolation {
                    reason: format!("batch {root}: claimed {claimed} > committed {total}"),
                });
            }
        }
        let claimed = self.total_claimed();
        if claimed != payouts_credited {
            return Err(TriadError::ConservationViolation {
                reason: format!("claims {claimed} != payouts credited {payouts_credited}"),
            });
        }
        Ok(())
    }
}
