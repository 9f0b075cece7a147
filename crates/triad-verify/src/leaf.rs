//! Leaf and commitment encodings.
//!
//! Each encoding carries its own versioned tag so a leaf of one kind can
//! never be presented as a leaf of another, or as an interior node.

use rust_decimal::Decimal;
use triad_types::{AccountId, ExitId, MerkleRoot, OperationId, amount_bytes, tagged_hash};

/// Salted leaf a domain validator proves membership of.
///
/// The nonce ties the leaf to one registry entry, so an old valid proof
/// cannot be replayed against a later operation.
#[must_use]
pub fn operation_leaf(operation_id: &OperationId, nonce: u64) -> [u8; 32] {
    tagged_hash(
        b"triad:operation_leaf:v1:",
        &[operation_id.as_bytes(), &nonce.to_le_bytes()],
    )
}

/// Leaf of a settlement batch.
#[must_use]
pub fn exit_leaf(
    exit_id: &ExitId,
    recipient: &AccountId,
    amount: Decimal,
    secret_hash: &[u8; 32],
) -> [u8; 32] {
    tagged_hash(
        b"triad:exit_leaf:v1:",
        &[
            exit_id.as_bytes(),
            recipient.0.as_bytes(),
            &amount_bytes(amount),
            secret_hash,
        ],
    )
}

/// Commitment a `BatchCommit` operation must carry to approve `root`.
#[must_use]
pub fn batch_commitment(root: &MerkleRoot, total: Decimal) -> [u8; 32] {
    tagged_hash(
        b"triad:batch_commitment:v1:",
        &[root.as_bytes(), &amount_bytes(total)],
    )
}
