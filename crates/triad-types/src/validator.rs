//! The validator set: one authorized identity and one trusted root per domain.
//!
//! The set is an explicit, versioned record. It changes only when a
//! governance proposal executes. Every change bumps the global `version`
//! and the per-domain counter for what changed (the seat or the root), so a
//! proposal can be recognised as stale when its own domain moved on while
//! changes elsewhere leave it untouched.

use serde::{Deserialize, Serialize};

use crate::{ChainDomain, MerkleRoot, Result, TriadError, ValidatorId, constants::DOMAIN_COUNT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: [ValidatorId; DOMAIN_COUNT],
    trusted_roots: [MerkleRoot; DOMAIN_COUNT],
    proofs_submitted: [u64; DOMAIN_COUNT],
    seat_versions: [u64; DOMAIN_COUNT],
    root_versions: [u64; DOMAIN_COUNT],
    version: u64,
}

impl ValidatorSet {
    /// Seat the genesis validators and roots.
    ///
    /// # Errors
    /// `ZeroValue` for a zero key or root, `InvalidRequest` if one key is
    /// seated on two domains.
    pub fn new(
        validators: [ValidatorId; DOMAIN_COUNT],
        trusted_roots: [MerkleRoot; DOMAIN_COUNT],
    ) -> Result<Self> {
        if validators.iter().any(ValidatorId::is_zero) {
            return Err(TriadError::ZeroValue { field: "validator" });
        }
        if trusted_roots.iter().any(MerkleRoot::is_zero) {
            return Err(TriadError::ZeroValue {
                field: "trusted_root",
            });
        }
        for (i, a) in validators.iter().enumerate() {
            if validators[i + 1..].contains(a) {
                return Err(TriadError::InvalidRequest {
                    reason: format!("validator {a} seated on more than one domain"),
                });
            }
        }
        Ok(Self {
            validators,
            trusted_roots,
            proofs_submitted: [0; DOMAIN_COUNT],
            seat_versions: [0; DOMAIN_COUNT],
            root_versions: [0; DOMAIN_COUNT],
            version: 0,
        })
    }

    #[must_use]
    pub fn validator(&self, domain: ChainDomain) -> ValidatorId {
        self.validators[domain.index()]
    }

    #[must_use]
    pub fn trusted_root(&self, domain: ChainDomain) -> MerkleRoot {
        self.trusted_roots[domain.index()]
    }

    /// The domain a validator is seated on, if any.
    #[must_use]
    pub fn domain_of(&self, validator: &ValidatorId) -> Option<ChainDomain> {
        self.validators
            .iter()
            .position(|v| v == validator)
            .and_then(ChainDomain::from_index)
    }

    #[must_use]
    pub fn is_validator(&self, validator: &ValidatorId) -> bool {
        self.domain_of(validator).is_some()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of rotations executed on `domain`.
    #[must_use]
    pub fn seat_version(&self, domain: ChainDomain) -> u64 {
        self.seat_versions[domain.index()]
    }

    /// Number of root updates executed on `domain`.
    #[must_use]
    pub fn root_version(&self, domain: ChainDomain) -> u64 {
        self.root_versions[domain.index()]
    }

    #[must_use]
    pub fn proofs_submitted(&self, domain: ChainDomain) -> u64 {
        self.proofs_submitted[domain.index()]
    }

    /// Count one accepted proof for the domain's validator.
    pub fn record_proof(&mut self, domain: ChainDomain) {
        self.proofs_submitted[domain.index()] += 1;
    }

    /// Replace `old` with `new` on `domain`. The new seat starts with a zero
    /// proof counter.
    ///
    /// # Errors
    /// `InvalidProposal` if `old` is no longer seated there or `new` already
    /// sits on any domain.
    pub fn rotate(
        &mut self,
        domain: ChainDomain,
        old: ValidatorId,
        new: ValidatorId,
    ) -> Result<()> {
        if self.validator(domain) != old {
            return Err(TriadError::InvalidProposal {
                reason: format!("{old} is not the current validator for {domain}"),
            });
        }
        if self.is_validator(&new) {
            return Err(TriadError::InvalidProposal {
                reason: format!("{new} is already a validator"),
            });
        }
        self.validators[domain.index()] = new;
        self.proofs_submitted[domain.index()] = 0;
        self.seat_versions[domain.index()] += 1;
        self.version += 1;
        Ok(())
    }

    /// Install a new trusted root for `domain` only.
    pub fn set_trusted_root(&mut self, domain: ChainDomain, root: MerkleRoot) {
        self.trusted_roots[domain.index()] = root;
        self.root_versions[domain.index()] += 1;
        self.version += 1;
    }
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

/// Deterministic-shape validator keyring for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
pub struct ValidatorKeys {
    keys: [ed25519_dalek::SigningKey; DOMAIN_COUNT],
}

#[cfg(any(test, feature = "test-helpers"))]
impl ValidatorKeys {
    /// Three fresh random keys, one per domain.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            keys: std::array::from_fn(|_| ed25519_dalek::SigningKey::generate(&mut rng)),
        }
    }

    pub fn signing_key(&self, domain: ChainDomain) -> &ed25519_dalek::SigningKey {
        &self.keys[domain.index()]
    }

    pub fn id(&self, domain: ChainDomain) -> ValidatorId {
        ValidatorId::from_pubkey(self.keys[domain.index()].verifying_key().to_bytes())
    }

    pub fn ids(&self) -> [ValidatorId; DOMAIN_COUNT] {
        std::array::from_fn(|i| ValidatorId::from_pubkey(self.keys[i].verifying_key().to_bytes()))
    }

    /// A validator set seating these keys with the given roots.
    pub fn validator_set(&self, roots: [MerkleRoot; DOMAIN_COUNT]) -> ValidatorSet {
        ValidatorSet::new(self.ids(), roots).expect("fixture keys are distinct and non-zero")
    }

    /// Fill in `submitter` and `signature` as `domain`'s validator.
    pub fn sign(&self, domain: ChainDomain, proof: &mut crate::Proof) {
        use ed25519_dalek::Signer;
        proof.submitter = self.id(domain);
        let sig = self.keys[domain.index()].sign(&proof.signing_payload());
        proof.signature = sig.to_bytes().to_vec();
    }
}
