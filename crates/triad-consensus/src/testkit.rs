//! Fixtures for driving operations to consensus. **Never use in production.**
//!
//! Trusted roots are installed through governance, so the fixtures exercise
//! the same path a live deployment uses.

use chrono::{DateTime, Utc};
use triad_types::{ChainDomain, OperationId, OperationStatus, Proof, ValidatorKeys};
use triad_verify::{MerkleTree, operation_leaf};

use crate::engine::ConsensusEngine;
use crate::registry::ProofOutcome;
use crate::target::SettlementTarget;

/// Install a root containing `id`'s salted leaf on every domain and return
/// the leaf's path.
///
/// # Panics
/// Panics if `id` is unknown or a governance step is rejected.
pub fn install_leaf(
    engine: &mut ConsensusEngine,
    keys: &ValidatorKeys,
    id: OperationId,
    now: DateTime<Utc>,
) -> Vec<[u8; 32]> {
    let nonce = engine.operation(&id).expect("operation exists").nonce;
    let tree = MerkleTree::build(&[operation_leaf(&id, nonce), [7; 32], [8; 32]])
        .expect("non-empty leaves");
    for domain in ChainDomain::ALL {
        let pid = engine
            .propose_root_update(keys.id(ChainDomain::Ethereum), domain, tree.root(), now)
            .expect("proposal accepted");
        engine
            .confirm_proposal(pid, keys.id(ChainDomain::Solana), now)
            .expect("first confirmation");
        engine
            .confirm_proposal(pid, keys.id(ChainDomain::Ton), now)
            .expect("second confirmation");
    }
    tree.proof(0).expect("leaf 0 exists")
}

/// A proof for `id` signed by `domain`'s validator.
pub fn signed_proof(
    keys: &ValidatorKeys,
    id: OperationId,
    domain: ChainDomain,
    path: &[[u8; 32]],
) -> Proof {
    let mut proof = Proof {
        domain,
        operation_id: id,
        event_ref: [3; 32],
        block_number: 9,
        merkle_path: path.to_vec(),
        submitter: keys.id(domain),
        signature: Vec::new(),
    };
    keys.sign(domain, &mut proof);
    proof
}

/// Submit proofs from Solana, Ton, then Ethereum until `id` leaves `Pending`.
///
/// # Panics
/// Panics if any proof is rejected.
pub fn approve(
    engine: &mut ConsensusEngine,
    keys: &ValidatorKeys,
    id: OperationId,
    target: &mut dyn SettlementTarget,
    now: DateTime<Utc>,
) -> ProofOutcome {
    let path = install_leaf(engine, keys, id, now);
    let mut last = None;
    for domain in [ChainDomain::Solana, ChainDomain::Ton, ChainDomain::Ethereum] {
        let proof = signed_proof(keys, id, domain, &path);
        let outcome = engine
            .submit_proof(id, domain, &proof, target, now)
            .expect("proof accepted");
        let done = outcome.status != OperationStatus::Pending;
        last = Some(outcome);
        if done {
            break;
        }
    }
    last.expect("at least one proof submitted")
}
