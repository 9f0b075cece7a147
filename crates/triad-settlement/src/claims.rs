//! One-time claim guard for exits.
//!
//! Each exit can be paid out exactly once, whether through a batch or the
//! priority lane. Claiming the same `ExitId` a second time returns
//! [`TriadError::ExitAlreadyClaimed`].
//!
//! Unlike a cache, the guard never evicts: a forgotten claim would be a
//! double payout.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use triad_types::{ExitId, Result, TriadError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimGuard {
    claimed: BTreeSet<ExitId>,
}

impl ClaimGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail if `exit_id` was already claimed, without recording anything.
    pub fn check(&self, exit_id: &ExitId) -> Result<()> {
        if self.claimed.contains(exit_id) {
            return Err(TriadError::ExitAlreadyClaimed(*exit_id));
        }
        Ok(())
    }

    /// Mark an exit as claimed.
    ///
    /// # Errors
    /// [`TriadError::ExitAlreadyClaimed`] if `exit_id` was claimed before.
    pub fn mark_claimed(&mut self, exit_id: ExitId) -> Result<()> {
        self.check(&exit_id)?;
        self.claimed.insert(exit_id);
        Ok(())
    }

    pub fn is_claimed(&self, exit_id: &ExitId) -> bool {
        self.claimed.contains(exit_id)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}
