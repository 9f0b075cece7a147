//! Proofs submitted by domain validators.

use serde::{Deserialize, Serialize};

use crate::{ChainDomain, OperationId, ValidatorId, tagged_hash};

/// A bounded-depth membership claim tying an observed event to one domain's
/// trusted root, signed by that domain's validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Domain this proof speaks for.
    pub domain: ChainDomain,
    /// Operation being confirmed.
    pub operation_id: OperationId,
    /// Hash of the observed event (transaction) on the domain.
    pub event_ref: [u8; 32],
    /// Block height or slot at which the event was observed.
    pub block_number: u64,
    /// Sibling hashes from the salted operation leaf up to the trusted root.
    pub merkle_path: Vec<[u8; 32]>,
    pub submitter: ValidatorId,
    /// Detached ed25519 signature over [`Proof::signing_payload`].
    pub signature: Vec<u8>,
}

impl Proof {
    /// Canonical bytes the submitter signs.
    #[must_use]
    pub fn signing_payload(&self) -> [u8; 32] {
        let path: Vec<u8> = self.merkle_path.iter().flatten().copied().collect();
        tagged_hash(
            b"triad:proof:v1:",
            &[
                &[self.domain.index() as u8],
                self.operation_id.as_bytes(),
                &self.event_ref,
                &self.block_number.to_le_bytes(),
                &path,
                self.submitter.as_bytes(),
            ],
        )
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.merkle_path.len()
    }
}
