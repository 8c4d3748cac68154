//! # Distconf Keeper - Layer 2: Protocol Core
//!
//! Self-organizing spanning tree over the live node set, with scatter-gather
//! tasks and a root state machine that drives quorum checks and
//! configuration rounds.
//!
//! ## Architecture
//!
//! - **Pure core** ([`DistributedConfigKeeper`]): `handle(event) -> Vec<Command>`
//!   with no I/O, deterministic for a given seed
//! - **Bookkeeping** ([`bound_nodes`], [`subscriptions`], [`scatter`]): the
//!   state each handler reads and mutates
//! - **Root sequence** ([`root`]): quorum rule and configuration selection
//! - **Audit** ([`consistency`]): structural invariants, checked after every
//!   event in debug builds
//! - **Runtime** ([`runtime`]): tokio actor executing commands against the
//!   collaborator effects
//!
//! ## Example
//!
//! ```
//! use distconf_keeper::{Command, DistributedConfigKeeper};
//! use distconf_core::{KeeperConfig, KeeperEvent, NodeId};
//!
//! let mut keeper = DistributedConfigKeeper::new(NodeId(1), KeeperConfig::default());
//! assert_eq!(keeper.start(), vec![Command::ListNodes, Command::LoadConfig]);
//!
//! keeper.handle(KeeperEvent::NodeListReceived(vec![NodeId(1)]));
//! keeper.handle(KeeperEvent::ConfigLoaded { success: true, config: None });
//! assert!(keeper.is_steady());
//! assert_eq!(keeper.root_node_id(), NodeId(1));
//! ```

pub mod binding;
pub mod bound_nodes;
pub mod commands;
pub mod consistency;
pub mod diagnostics;
pub mod keeper;
pub mod root;
pub mod router;
pub mod runtime;
pub mod scatter;
pub mod subscriptions;

pub use binding::Binding;
pub use bound_nodes::{BoundNode, BoundNodeRegistry, BoundNodesDelta};
pub use commands::Command;
pub use consistency::{check_consistency, ConsistencyViolation};
pub use diagnostics::{render_status, KeeperStatus};
pub use keeper::DistributedConfigKeeper;
pub use root::{ConfigDecision, RootState};
pub use runtime::{spawn_keeper, KeeperEffects, KeeperHandle, KeeperRuntime};
pub use scatter::{CompletedTask, GatherOutcome, ScatterTask, TaskOrigin};
pub use subscriptions::SubscriptionTracker;
