//! # triad-types
//!
//! Shared types, errors, and configuration for the **Triad** 2-of-3
//! cross-domain consensus engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`OperationId`], [`ExitId`], [`ProposalId`], [`MerkleRoot`], [`SwapId`], [`ValidatorId`], [`AccountId`], [`ChainDomain`]
//! - **Operation model**: [`Operation`], [`OperationClass`], [`OperationStatus`], [`OperationRequest`]
//! - **Proof model**: [`Proof`]
//! - **Validator set**: [`ValidatorSet`]
//! - **Governance model**: [`Proposal`], [`ProposalKind`]
//! - **Exit model**: [`ExitRequest`], [`ExitState`], [`Batch`], [`BatchState`]
//! - **Configuration**: [`EngineConfig`] and its sections
//! - **Errors**: [`TriadError`] with `TR_ERR_` prefix codes, [`ErrorKind`]
//! - **Constants**: system-wide limits and defaults

pub mod config;
pub mod constants;
pub mod error;
pub mod exit;
pub mod governance;
pub mod ids;
pub mod operation;
pub mod proof;
pub mod validator;

// Re-export all primary types at crate root for ergonomic imports:
//   use triad_types::{Operation, OperationId, ChainDomain, ...};

pub use config::*;
pub use error::*;
pub use exit::*;
pub use governance::*;
pub use ids::*;
pub use operation::*;
pub use proof::*;
pub use validator::*;

// Constants are accessed via `triad_types::constants::FOO`
// (not re-exported to avoid name collisions).
