//! Stagehand Storage
//!
//! Per-actor state snapshots for Stagehand actors.
//!
//! # Overview
//!
//! The runtime persists each actor's state as one opaque blob after every
//! action turn and reads it back when the actor is re-created. Backends:
//! - [`MemoryStore`] for tests and single-process use
//! - [`FaultyStore`] to inject load/save failures around any other store

pub mod faulty;
pub mod memory;
pub mod store;

pub use faulty::FaultyStore;
pub use memory::MemoryStore;
pub use store::StateStore;
