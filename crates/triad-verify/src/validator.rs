//! Proof validation.
//!
//! Pure: reads the operation and validator set, never mutates. Checks run
//! cheapest first, and the depth bound runs before anything else so an
//! oversized path costs nothing beyond its length check.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use triad_types::{
    ChainDomain, Operation, Proof, Result, TriadError, ValidatorSet, constants,
};

use crate::leaf::operation_leaf;
use crate::merkle::verify_membership;

#[derive(Debug, Clone, Copy)]
pub struct ProofValidator {
    max_depth: usize,
}

impl Default for ProofValidator {
    fn default() -> Self {
        Self::new(constants::DEFAULT_MAX_PROOF_DEPTH)
    }
}

impl ProofValidator {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Verify `proof` as `domain`'s confirmation of `operation`.
    ///
    /// Order: depth bound, submitter authentication (see
    /// [`authenticate`](Self::authenticate)), operation binding, membership
    /// of the salted leaf in the domain's trusted root.
    pub fn verify(
        &self,
        domain: ChainDomain,
        proof: &Proof,
        operation: &Operation,
        validators: &ValidatorSet,
    ) -> Result<()> {
        if proof.depth() > self.max_depth {
            return Err(TriadError::ProofTooDeep {
                depth: proof.depth(),
                max: self.max_depth,
            });
        }
        self.authenticate(domain, proof, validators)?;
        if proof.operation_id != operation.id {
            return Err(TriadError::InvalidProof {
                reason: format!("proof is for {}, not {}", proof.operation_id, operation.id),
            });
        }

        let leaf = operation_leaf(&operation.id, operation.nonce);
        verify_membership(
            &leaf,
            &proof.merkle_path,
            &validators.trusted_root(domain),
            self.max_depth,
        )
    }

    /// Whether `proof` was signed by the validator seated for `domain`.
    /// Says nothing about the operation or the Merkle path.
    pub fn authenticate(
        &self,
        domain: ChainDomain,
        proof: &Proof,
        validators: &ValidatorSet,
    ) -> Result<()> {
        if proof.domain != domain {
            return Err(TriadError::DomainMismatch {
                expected: domain,
                actual: proof.domain,
            });
        }
        if proof.submitter != validators.validator(domain) {
            return Err(TriadError::UnauthorizedValidator { domain });
        }
        verify_signature(proof)
    }
}

fn verify_signature(proof: &Proof) -> Result<()> {
    let key = VerifyingKey::from_bytes(proof.submitter.as_bytes())
        .map_err(|_| TriadError::InvalidSignature)?;
    let sig = Signature::from_slice(&proof.signature).map_err(|_| TriadError::InvalidSignature)?;
    key.verify(&proof.signing_payload(), &sig)
        .map_err(|_| TriadError::InvalidSignature)
}
