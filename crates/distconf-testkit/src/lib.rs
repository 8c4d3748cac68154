//! # Distconf Testkit
//!
//! Harnesses for exercising keepers as a cluster:
//!
//! - [`sim::SimCluster`]: single-threaded deterministic simulator with a
//!   virtual clock, crash and restart injection
//! - [`memory`]: in-memory transport, storage and membership for async
//!   runtimes
//! - [`local::LocalCluster`]: real keeper runtimes on the current tokio
//!   runtime, connected through [`memory::MemoryNetwork`]
//! - [`assertions`]: convergence checks over status snapshots

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod assertions;
pub mod local;
pub mod memory;
pub mod sim;

pub use assertions::{assert_converged, convergence_report, ConvergenceReport};
pub use local::LocalCluster;
pub use memory::{MemoryNetwork, MemoryStorage, MemoryTransport, StaticMembership};
pub use sim::{SimCluster, SimError};

/// Install a test-friendly tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
