//! Governance proposals that mutate the [`ValidatorSet`](crate::ValidatorSet).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChainDomain, MerkleRoot, ProposalId, ValidatorId, constants, tagged_hash};

/// What a proposal changes. Each kind touches exactly one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalKind {
    Rotation {
        domain: ChainDomain,
        old: ValidatorId,
        new: ValidatorId,
    },
    RootUpdate {
        domain: ChainDomain,
        new_root: MerkleRoot,
    },
}

impl ProposalKind {
    #[must_use]
    pub fn domain(&self) -> ChainDomain {
        match self {
            Self::Rotation { domain, .. } | Self::RootUpdate { domain, .. } => *domain,
        }
    }

    #[must_use]
    pub fn is_rotation(&self) -> bool {
        matches!(self, Self::Rotation { .. })
    }

    /// Default lifetime: rotations stay open longer than root updates.
    #[must_use]
    pub fn default_expiry_secs(&self) -> i64 {
        match self {
            Self::Rotation { .. } => constants::DEFAULT_ROTATION_EXPIRY_SECS,
            Self::RootUpdate { .. } => constants::DEFAULT_ROOT_UPDATE_EXPIRY_SECS,
        }
    }
}

impl std::fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rotation { domain, .. } => write!(f, "ROTATION({domain})"),
            Self::RootUpdate { domain, .. } => write!(f, "ROOT_UPDATE({domain})"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub kind: ProposalKind,
    pub proposer: ValidatorId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Confirming validators. Never contains the proposer.
    pub confirmations: BTreeSet<ValidatorId>,
    pub executed: bool,
    /// Version of the proposal's scope when it was raised: the domain's
    /// seat version for a rotation, its root version for a root update.
    pub scope_version: u64,
}

impl Proposal {
    /// Id = hash of the inputs plus creation time.
    #[must_use]
    pub fn derive_id(
        kind: &ProposalKind,
        proposer: &ValidatorId,
        created_at: DateTime<Utc>,
    ) -> ProposalId {
        let (tag, a, b): (u8, [u8; 32], [u8; 32]) = match kind {
            ProposalKind::Rotation { old, new, .. } => (0, old.0, new.0),
            ProposalKind::RootUpdate { new_root, .. } => (1, new_root.0, [0u8; 32]),
        };
        ProposalId(tagged_hash(
            b"triad:proposal:v1:",
            &[
                &[tag, kind.domain().index() as u8],
                &a,
                &b,
                proposer.as_bytes(),
                &created_at.timestamp_millis().to_le_bytes(),
            ],
        ))
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_differ_by_kind_and_time() {
        let proposer = ValidatorId([1; 32]);
        let now = Utc::now();
        let rotation = ProposalKind::Rotation {
            domain: ChainDomain::Solana,
            old: ValidatorId([2; 32]),
            new: ValidatorId([3; 32]),
        };
        let update = ProposalKind::RootUpdate {
            domain: ChainDomain::Solana,
            new_root: MerkleRoot([2; 32]),
        };
        let a = Proposal::derive_id(&rotation, &proposer, now);
        assert_eq!(a, Proposal::derive_id(&rotation, &proposer, now));
        assert_ne!(a, Proposal::derive_id(&update, &proposer, now));
        assert_ne!(
            a,
            Proposal::derive_id(&rotation, &proposer, now + chrono::Duration::seconds(1))
        );
    }

    #[test]
    fn rotation_lives_longer() {
        let rotation = ProposalKind::Rotation {
            domain: ChainDomain::Ton,
            old: ValidatorId([2; 32]),
            new: ValidatorId([3; 32]),
        };
        let update = ProposalKind::RootUpdate {
            domain: ChainDomain::Ton,
            new_root: MerkleRoot([4; 32]),
        };
        assert!(rotation.default_expiry_secs() > update.default_expiry_secs());
        assert_eq!(rotation.domain(), ChainDomain::Ton);
        assert_eq!(format!("{update}"), "ROOT_UPDATE(TON)");
    }
}
