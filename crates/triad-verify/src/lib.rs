//! # triad-verify
//!
//! **Pure proof verification for Triad.**
//!
//! This is the compute plane: it takes proofs, leaves, and roots and answers
//! yes or no. It has:
//!
//! - **Zero side effects**: no registry access, no counters, no logging of state
//! - **Bounded cost**: path length is checked against a fixed maximum before hashing
//! - **Replay resistance**: operation leaves are salted with the registry nonce
//! - **Order-free paths**: sorted-pair hashing, so paths carry no direction bits

pub mod leaf;
pub mod merkle;
pub mod validator;

pub use leaf::{batch_commitment, exit_leaf, operation_leaf};
pub use merkle::{MerkleTree, compute_root, hash_pair, verify_membership};
pub use validator::ProofValidator;
