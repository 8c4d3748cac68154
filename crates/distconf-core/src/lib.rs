//! # Distconf Core - Layer 1: Shared Vocabulary
//!
//! Types shared by every participant of the distributed configuration
//! protocol:
//! - Identifiers for nodes, transport sessions and correlation cookies
//! - The replicated [`StorageConfig`] blob and its generation
//! - The peer message vocabulary exchanged between keepers
//! - Inbound [`KeeperEvent`]s delivered to a keeper by its collaborators
//! - Effect traits for membership, transport and storage collaborators
//! - Keeper configuration and the unified error type
//!
//! ## Design Principles
//!
//! - **Deterministic collections**: `BTreeMap`/`BTreeSet` everywhere so that
//!   replicas iterate state in the same order
//! - **Narrow collaborators**: everything outside the protocol core is reached
//!   through an async effect trait
//! - **No I/O in types**: this crate only describes data; handlers live in
//!   `distconf-keeper`

pub mod config;
pub mod effects;
pub mod errors;
pub mod events;
pub mod messages;
pub mod store;
pub mod types;
pub mod wire;

pub use config::KeeperConfig;
pub use errors::{DistconfError, Result};
pub use events::KeeperEvent;
pub use messages::{Envelope, GatherResult, PeerMessage, RejectReason, ScatterQuery};
pub use store::FileConfigStore;
pub use types::identifiers::{Cookie, NodeId, SessionId, TaskCookie};
pub use types::storage_config::StorageConfig;
