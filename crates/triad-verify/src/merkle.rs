//! Sorted-pair SHA-256 Merkle trees.
//!
//! Siblings are ordered before hashing, so a path is just a list of sibling
//! hashes with no left/right flags. On a level with an odd number of nodes
//! the last node is promoted unchanged, and contributes no path entry.

use sha2::{Digest, Sha256};
use triad_types::{MerkleRoot, Result, TriadError};

/// Hash two nodes in sorted order.
#[must_use]
pub fn hash_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(b"triad:node:v1:");
    hasher.update(lo);
    hasher.update(hi);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Fold a leaf up a path.
#[must_use]
pub fn compute_root(leaf: &[u8; 32], path: &[[u8; 32]]) -> [u8; 32] {
    path.iter().fold(*leaf, |acc, sibling| hash_pair(&acc, sibling))
}

/// Check that `leaf` is a member of `root` via `path`.
///
/// The depth bound is enforced before any hashing.
pub fn verify_membership(
    leaf: &[u8; 32],
    path: &[[u8; 32]],
    root: &MerkleRoot,
    max_depth: usize,
) -> Result<()> {
    if path.len() > max_depth {
        return Err(TriadError::ProofTooDeep {
            depth: path.len(),
            max: max_depth,
        });
    }
    if root.is_zero() {
        return Err(TriadError::ZeroValue { field: "root" });
    }
    let computed = compute_root(leaf, path);
    if computed != root.0 {
        return Err(TriadError::InvalidProof {
            reason: format!("path does not lead to {root}"),
        });
    }
    Ok(())
}

/// A fully materialized tree, used by aggregators and tests to produce roots
/// and per-leaf paths.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build a tree over `leaves` in the given order.
    pub fn build(leaves: &[[u8; 32]]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(TriadError::InvalidRequest {
                reason: "cannot build a Merkle tree with no leaves".into(),
            });
        }
        let mut levels = Vec::new();
        let mut current = leaves.to_vec();
        while current.len() > 1 {
            let next: Vec<[u8; 32]> = current
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => hash_pair(a, b),
                    _ => pair[0],
                })
                .collect();
            levels.push(current);
            current = next;
        }
        levels.push(current);
        Ok(Self { levels })
    }

    #[must_use]
    pub fn root(&self) -> MerkleRoot {
        MerkleRoot(self.levels.last().map_or([0u8; 32], |top| top[0]))
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Sibling path for the leaf at `index`.
    #[must_use]
    pub fn proof(&self, index: usize) -> Option<Vec<[u8; 32]>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut path = Vec::new();
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = idx ^ 1;
            if let Some(node) = level.get(sibling) {
                path.push(*node);
            }
            idx /= 2;
        }
        Some(path)
    }
}
