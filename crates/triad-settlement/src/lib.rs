//! # triad-settlement
//!
//! **Finality Plane**: batched exit settlement gated by 2-of-3 consensus,
//! the priority exit lane, durable state, and the async service.
//!
//! ## Architecture
//!
//! 1. **BatchGateway**: exit requests, batch commitments, challenge window, claims
//! 2. **ClaimGuard**: each exit pays out at most once
//! 3. **ValueConservation**: claimed value never exceeds committed value
//! 4. **Store**: `sled` trees for operations, exits, batches, and snapshots
//! 5. **TriadService**: one lock around engine, gateway, target, and store
//!
//! ## Batch Lifecycle
//!
//! - **Marked**: aggregator commits exits under a root; challenge window starts
//! - **Bound**: an executed `BatchCommit` operation carrying `hash(root, total)` approves it
//! - **Finalized**: window elapsed without challenge; claims verify against the root

pub mod claims;
pub mod conservation;
pub mod gateway;
pub mod service;
pub mod store;
pub mod telemetry;

pub use claims::ClaimGuard;
pub use conservation::ValueConservation;
pub use gateway::{
    BatchGateway, ExitClaim, InMemorySwapBook, PriorityExitRequest, SwapBook, SwapRecord,
};
pub use service::TriadService;
pub use store::Store;
pub use telemetry::{LogFormat, init_tracing};
