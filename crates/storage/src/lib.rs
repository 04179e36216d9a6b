//! Persistent storage layer for hermes.
//!
//! A node persists one snapshot: its accepted blocks, the pending pool and
//! the peers it knows about. [`NodeStore`] writes the snapshot into sled in a
//! single atomic batch so a crash never leaves half a chain behind.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │     BlockchainService (hermes-chain)     │
//! └────────────────────┬─────────────────────┘
//!                      │ StateStore
//! ┌────────────────────▼─────────────────────┐
//! │  NodeStore  - blocks by hash             │
//! │             - ordered hash index         │
//! │             - pool / peers records       │
//! ├──────────────────────────────────────────┤
//! │  Storage    - sled wrapper, bincode      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use hermes_storage::{NodeSnapshot, NodeStore, StateStore};
//!
//! let store = NodeStore::open("./hermes_data").unwrap();
//! store.save(&NodeSnapshot::default()).unwrap();
//! let restored = store.load().unwrap();
//! ```

pub mod db;
pub mod store;

pub use db::{BatchOp, Result, Storage, StorageError};
pub use store::{NodeSnapshot, NodeStore, StateStore};
