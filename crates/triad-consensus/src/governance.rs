//! Validator governance: rotation and trusted-root proposals.
//!
//! A proposal executes exactly once, on the second confirmation from a
//! validator other than the proposer, and only while its own scope (the
//! target domain's seat for a rotation, its root for a root update) is
//! still at the version the proposal was raised against. Changes on other
//! domains never make a proposal stale. Expired proposals never execute.
//! Each proposal touches a single domain.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use triad_types::{
    ChainDomain, GovernanceConfig, MerkleRoot, Proposal, ProposalId, ProposalKind, Result,
    TriadError, ValidatorId, ValidatorSet, constants,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Governance {
    config: GovernanceConfig,
    proposals: BTreeMap<ProposalId, Proposal>,
}

impl Governance {
    #[must_use]
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            config,
            proposals: BTreeMap::new(),
        }
    }

    /// Propose replacing `old` with `new` on `domain`.
    pub fn propose_rotation(
        &mut self,
        validators: &ValidatorSet,
        proposer: ValidatorId,
        domain: ChainDomain,
        old: ValidatorId,
        new: ValidatorId,
        now: DateTime<Utc>,
    ) -> Result<ProposalId> {
        if old.is_zero() || new.is_zero() {
            return Err(TriadError::ZeroValue { field: "validator" });
        }
        if old == new {
            return Err(TriadError::InvalidProposal {
                reason: "old and new validator are identical".into(),
            });
        }
        if validators.validator(domain) != old {
            return Err(TriadError::InvalidProposal {
                reason: format!("{old} is not the current validator for {domain}"),
            });
        }
        if validators.is_validator(&new) {
            return Err(TriadError::InvalidProposal {
                reason: format!("{new} already holds a validator seat"),
            });
        }
        self.open(
            validators,
            proposer,
            ProposalKind::Rotation { domain, old, new },
            now,
        )
    }

    /// Propose a new trusted root for `domain`.
    pub fn propose_root_update(
        &mut self,
        validators: &ValidatorSet,
        proposer: ValidatorId,
        domain: ChainDomain,
        new_root: MerkleRoot,
        now: DateTime<Utc>,
    ) -> Result<ProposalId> {
        if new_root.is_zero() {
            return Err(TriadError::ZeroValue { field: "root" });
        }
        if validators.trusted_root(domain) == new_root {
            return Err(TriadError::InvalidProposal {
                reason: format!("{new_root} is already trusted for {domain}"),
            });
        }
        self.open(
            validators,
            proposer,
            ProposalKind::RootUpdate { domain, new_root },
            now,
        )
    }

    fn open(
        &mut self,
        validators: &ValidatorSet,
        proposer: ValidatorId,
        kind: ProposalKind,
        now: DateTime<Utc>,
    ) -> Result<ProposalId> {
        if !validators.is_validator(&proposer) {
            return Err(TriadError::Unauthorized { role: "validator" });
        }
        let id = Proposal::derive_id(&kind, &proposer, now);
        if self.proposals.contains_key(&id) {
            return Err(TriadError::DuplicateProposal(id));
        }
        let expiry = match kind {
            ProposalKind::Rotation { .. } => self.config.rotation_expiry_secs,
            ProposalKind::RootUpdate { .. } => self.config.root_update_expiry_secs,
        };
        self.proposals.insert(
            id,
            Proposal {
                id,
                kind,
                proposer,
                created_at: now,
                expires_at: now + Duration::seconds(expiry),
                confirmations: BTreeSet::new(),
                executed: false,
                scope_version: scope_version(validators, &kind),
            },
        );
        tracing::info!(proposal = %id, kind = %kind, proposer = %proposer, "Proposal opened");
        Ok(id)
    }

    /// Confirm a proposal. Returns `true` if this confirmation executed it.
    pub fn confirm(
        &mut self,
        validators: &mut ValidatorSet,
        id: ProposalId,
        confirmer: ValidatorId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let proposal = self
            .proposals
            .get_mut(&id)
            .ok_or(TriadError::ProposalNotFound(id))?;

        if proposal.executed {
            return Err(TriadError::ProposalExecuted(id));
        }
        if proposal.is_expired_at(now) {
            return Err(TriadError::ProposalExpired(id));
        }
        if !validators.is_validator(&confirmer) {
            return Err(TriadError::Unauthorized { role: "validator" });
        }
        if confirmer == proposal.proposer {
            return Err(TriadError::SelfConfirmation);
        }
        if proposal.confirmations.contains(&confirmer) {
            return Err(TriadError::AlreadyConfirmed(id));
        }

        let reaches_threshold =
            proposal.confirmations.len() + 1 >= constants::PROPOSAL_CONFIRMATIONS;
        let current = scope_version(validators, &proposal.kind);
        if reaches_threshold && proposal.scope_version != current {
            return Err(TriadError::StaleProposal {
                raised: proposal.scope_version,
                current,
            });
        }

        if reaches_threshold {
            // Apply before recording so a failed rotation leaves no trace.
            match proposal.kind {
                ProposalKind::Rotation { domain, old, new } => {
                    validators.rotate(domain, old, new)?;
                }
                ProposalKind::RootUpdate { domain, new_root } => {
                    validators.set_trusted_root(domain, new_root);
                }
            }
            proposal.confirmations.insert(confirmer);
            proposal.executed = true;
            tracing::info!(
                proposal = %id,
                kind = %proposal.kind,
                set_version = validators.version(),
                "Proposal executed"
            );
            return Ok(true);
        }

        proposal.confirmations.insert(confirmer);
        tracing::debug!(
            proposal = %id,
            confirmer = %confirmer,
            confirmations = proposal.confirmations.len(),
            "Proposal confirmed"
        );
        Ok(false)
    }

    #[must_use]
    pub fn get(&self, id: &ProposalId) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    /// Proposals neither executed nor expired at `now`.
    #[must_use]
    pub fn open_proposals(&self, now: DateTime<Utc>) -> Vec<&Proposal> {
        self.proposals
            .values()
            .filter(|p| !p.executed && !p.is_expired_at(now))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

fn scope_version(validators: &ValidatorSet, kind: &ProposalKind) -> u64 {
    match *kind {
        ProposalKind::Rotation { domain, .. } => validators.seat_version(domain),
        ProposalKind::RootUpdate { domain, .. } => validators.root_version(domain),
    }
}

#[cfg(test)]
mod tests {
    use triad_types::ValidatorKeys;

    use super::*;

    use ChainDomain::{Ethereum, Solana, Ton};

    fn setup() -> (Governance, ValidatorKeys, ValidatorSet) {
        let keys = ValidatorKeys::generate();
        let set = keys.validator_set([MerkleRoot([1; 32]); 3]);
        (Governance::default(), keys, set)
    }

    #[test]
    fn rotation_executes_on_second_non_proposer_confirmation() {
        let (mut gov, keys, mut set) = setup();
        let now = Utc::now();
        let newcomer = ValidatorId([42; 32]);
        let id = gov
            .propose_rotation(&set, keys.id(Ethereum), Solana, keys.id(Solana), newcomer, now)
            .unwrap();

        assert!(matches!(
            gov.confirm(&mut set, id, keys.id(Ethereum), now),
            Err(TriadError::SelfConfirmation)
        ));
        assert!(!gov.confirm(&mut set, id, keys.id(Solana), now).unwrap());
        assert!(matches!(
            gov.confirm(&mut set, id, keys.id(Solana), now),
            Err(TriadError::AlreadyConfirmed(_))
        ));
        assert_eq!(set.validator(Solana), keys.id(Solana));

        assert!(gov.confirm(&mut set, id, keys.id(Ton), now).unwrap());
        assert_eq!(set.validator(Solana), newcomer);
        assert_eq!(set.validator(Ethereum), keys.id(Ethereum));
        assert!(gov.get(&id).unwrap().executed);

        assert!(matches!(
            gov.confirm(&mut set, id, keys.id(Ton), now),
            Err(TriadError::ProposalExecuted(_))
        ));
    }

    #[test]
    fn expired_proposal_never_executes() {
        let (mut gov, keys, mut set) = setup();
        let now = Utc::now();
        let id = gov
            .propose_rotation(&set, keys.id(Ton), Ethereum, keys.id(Ethereum), ValidatorId([7; 32]), now)
            .unwrap();
        gov.confirm(&mut set, id, keys.id(Solana), now).unwrap();

        let late = now + Duration::days(7) + Duration::seconds(1);
        assert!(matches!(
            gov.confirm(&mut set, id, keys.id(Ethereum), late),
            Err(TriadError::ProposalExpired(_))
        ));
        assert_eq!(set.validator(Ethereum), keys.id(Ethereum));
    }

    #[test]
    fn root_updates_expire_sooner() {
        let (mut gov, keys, mut set) = setup();
        let now = Utc::now();
        let id = gov
            .propose_root_update(&set, keys.id(Ethereum), Ton, MerkleRoot([9; 32]), now)
            .unwrap();
        let after_three_days = now + Duration::days(3) + Duration::seconds(1);
        assert!(gov.confirm(&mut set, id, keys.id(Solana), after_three_days).is_err());

        let id2 = gov
            .propose_root_update(&set, keys.id(Ethereum), Ton, MerkleRoot([9; 32]), now + Duration::seconds(1))
            .unwrap();
        gov.confirm(&mut set, id2, keys.id(Solana), now).unwrap();
        assert!(gov.confirm(&mut set, id2, keys.id(Ton), now).unwrap());
        assert_eq!(set.trusted_root(Ton), MerkleRoot([9; 32]));
        assert_eq!(set.trusted_root(Ethereum), MerkleRoot([1; 32]));
    }

    #[test]
    fn degenerate_inputs_rejected() {
        let (mut gov, keys, set) = setup();
        let now = Utc::now();
        let p = keys.id(Ethereum);
        assert!(gov
            .propose_rotation(&set, p, Solana, keys.id(Solana), keys.id(Solana), now)
            .is_err());
        assert!(gov
            .propose_rotation(&set, p, Solana, ValidatorId::ZERO, ValidatorId([3; 32]), now)
            .is_err());
        assert!(gov
            .propose_rotation(&set, p, Solana, keys.id(Solana), ValidatorId::ZERO, now)
            .is_err());
        // Cross-domain: the new key already sits on Ton.
        assert!(gov
            .propose_rotation(&set, p, Solana, keys.id(Solana), keys.id(Ton), now)
            .is_err());
        assert!(gov
            .propose_root_update(&set, p, Solana, MerkleRoot::ZERO, now)
            .is_err());
        assert!(matches!(
            gov.propose_root_update(&set, ValidatorId([5; 32]), Solana, MerkleRoot([5; 32]), now),
            Err(TriadError::Unauthorized { .. })
        ));
        assert!(gov.is_empty());
    }

    #[test]
    fn duplicate_proposal_rejected() {
        let (mut gov, keys, set) = setup();
        let now = Utc::now();
        gov.propose_root_update(&set, keys.id(Ethereum), Solana, MerkleRoot([5; 32]), now)
            .unwrap();
        assert!(matches!(
            gov.propose_root_update(&set, keys.id(Ethereum), Solana, MerkleRoot([5; 32]), now),
            Err(TriadError::DuplicateProposal(_))
        ));
    }

    #[test]
    fn stale_proposal_cannot_execute() {
        let (mut gov, keys, mut set) = setup();
        let now = Utc::now();
        let a = gov
            .propose_root_update(&set, keys.id(Ethereum), Solana, MerkleRoot([5; 32]), now)
            .unwrap();
        let b = gov
            .propose_root_update(&set, keys.id(Ethereum), Solana, MerkleRoot([6; 32]), now)
            .unwrap();
        gov.confirm(&mut set, a, keys.id(Solana), now).unwrap();
        gov.confirm(&mut set, a, keys.id(Ton), now).unwrap();

        gov.confirm(&mut set, b, keys.id(Solana), now).unwrap();
        assert!(matches!(
            gov.confirm(&mut set, b, keys.id(Ton), now),
            Err(TriadError::StaleProposal { raised: 0, current: 1 })
        ));
        assert_eq!(set.trusted_root(Solana), MerkleRoot([5; 32]));
        assert_eq!(gov.open_proposals(now).len(), 1);
    }

    #[test]
    fn other_domain_changes_do_not_stale_a_proposal() {
        let (mut gov, keys, mut set) = setup();
        let now = Utc::now();
        let newcomer = ValidatorId([42; 32]);
        let rotation = gov
            .propose_rotation(&set, keys.id(Ethereum), Ton, keys.id(Ton), newcomer, now)
            .unwrap();
        gov.confirm(&mut set, rotation, keys.id(Solana), now).unwrap();

        // A Solana root update and a Ton root update execute in between.
        for domain in [Solana, Ton] {
            let update = gov
                .propose_root_update(&set, keys.id(Ethereum), domain, MerkleRoot([5; 32]), now)
                .unwrap();
            gov.confirm(&mut set, update, keys.id(Solana), now).unwrap();
            assert!(gov.confirm(&mut set, update, keys.id(Ton), now).unwrap());
        }
        assert_eq!(set.version(), 2);

        assert!(gov.confirm(&mut set, rotation, keys.id(Ton), now).unwrap());
        assert_eq!(set.validator(Ton), newcomer);
        assert_eq!(set.seat_version(Ton), 1);
    }

    #[test]
    fn competing_rotations_on_one_seat_execute_once() {
        let (mut gov, keys, mut set) = setup();
        let now = Utc::now();
        let first = gov
            .propose_rotation(&set, keys.id(Ethereum), Ton, keys.id(Ton), ValidatorId([42; 32]), now)
            .unwrap();
        let second = gov
            .propose_rotation(&set, keys.id(Solana), Ton, keys.id(Ton), ValidatorId([43; 32]), now)
            .unwrap();
        gov.confirm(&mut set, first, keys.id(Solana), now).unwrap();
        gov.confirm(&mut set, second, keys.id(Ethereum), now).unwrap();
        assert!(gov.confirm(&mut set, first, keys.id(Ton), now).unwrap());

        // Ton's old key is gone; the newcomer confirms the stale rival.
        assert!(matches!(
            gov.confirm(&mut set, second, ValidatorId([42; 32]), now),
            Err(TriadError::StaleProposal { raised: 0, current: 1 })
        ));
        assert_eq!(set.validator(Ton), ValidatorId([42; 32]));
    }
}
