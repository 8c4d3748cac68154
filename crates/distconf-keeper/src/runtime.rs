//! Tokio actor runtime
//!
//! Runs one [`DistributedConfigKeeper`] inside a single task fed by an
//! unbounded mailbox. Transport commands are awaited inline so that messages
//! to a peer leave in the order they were emitted; membership and storage
//! calls run in spawned tasks and report back through the mailbox.

use crate::commands::Command;
use crate::diagnostics::{render_status, KeeperStatus};
use crate::keeper::DistributedConfigKeeper;
use distconf_core::effects::{EventSink, MembershipEffects, StorageEffects, TransportEffects};
use distconf_core::{DistconfError, KeeperConfig, KeeperEvent, NodeId, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Collaborators of a keeper runtime
#[derive(Clone)]
pub struct KeeperEffects {
    /// Live node list
    pub membership: Arc<dyn MembershipEffects>,
    /// Peer sessions
    pub transport: Arc<dyn TransportEffects>,
    /// Local config persistence
    pub storage: Arc<dyn StorageEffects>,
}

impl std::fmt::Debug for KeeperEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeeperEffects").finish_non_exhaustive()
    }
}

enum Mailbox {
    Event(KeeperEvent),
    Status(oneshot::Sender<KeeperStatus>),
    StatusPage(oneshot::Sender<String>),
    Stop,
}

/// Cloneable handle to a running keeper
#[derive(Debug, Clone)]
pub struct KeeperHandle {
    node_id: NodeId,
    tx: mpsc::UnboundedSender<Mailbox>,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mailbox::Event(event) => write!(f, "Event({})", event.kind()),
            Mailbox::Status(_) => f.write_str("Status"),
            Mailbox::StatusPage(_) => f.write_str("StatusPage"),
            Mailbox::Stop => f.write_str("Stop"),
        }
    }
}

impl KeeperHandle {
    /// Snapshot of the keeper state
    pub async fn status(&self) -> Result<KeeperStatus> {
        let (tx, rx) = oneshot::channel();
        self.request(Mailbox::Status(tx))?;
        rx.await
            .map_err(|_| DistconfError::internal(format!("keeper {} stopped", self.node_id)))
    }

    /// Rendered status page
    pub async fn status_page(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.request(Mailbox::StatusPage(tx))?;
        rx.await
            .map_err(|_| DistconfError::internal(format!("keeper {} stopped", self.node_id)))
    }

    /// Ask the keeper to stop after the events already queued
    pub fn shutdown(&self) {
        let _ = self.tx.send(Mailbox::Stop);
    }

    fn request(&self, message: Mailbox) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| DistconfError::internal(format!("keeper {} stopped", self.node_id)))
    }
}

impl EventSink for KeeperHandle {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn deliver(&self, event: KeeperEvent) {
        if self.tx.send(Mailbox::Event(event)).is_err() {
            tracing::trace!(node_id = %self.node_id, "dropping event for stopped keeper");
        }
    }
}

/// A keeper together with its mailbox, not yet running
pub struct KeeperRuntime {
    keeper: DistributedConfigKeeper,
    effects: KeeperEffects,
    handle: KeeperHandle,
    rx: mpsc::UnboundedReceiver<Mailbox>,
}

impl KeeperRuntime {
    /// Create the runtime; the handle is usable before [`Self::run`] starts
    pub fn new(node_id: NodeId, config: KeeperConfig, effects: KeeperEffects) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            keeper: DistributedConfigKeeper::new(node_id, config),
            effects,
            handle: KeeperHandle { node_id, tx },
            rx,
        }
    }

    /// Handle for delivering events and querying status
    pub fn handle(&self) -> KeeperHandle {
        self.handle.clone()
    }

    /// Drive the keeper until [`KeeperHandle::shutdown`]
    pub async fn run(mut self) {
        let node_id = self.keeper.self_id();
        let commands = self.keeper.start();
        self.execute(commands).await;

        while let Some(message) = self.rx.recv().await {
            match message {
                Mailbox::Event(event) => {
                    let commands = self.keeper.handle(event);
                    self.execute(commands).await;
                }
                Mailbox::Status(reply) => {
                    let _ = reply.send(KeeperStatus::capture(&self.keeper));
                }
                Mailbox::StatusPage(reply) => {
                    let _ = reply.send(render_status(&self.keeper));
                }
                Mailbox::Stop => break,
            }
        }
        tracing::info!(node_id = %node_id, "keeper stopped");
    }

    async fn execute(&self, commands: Vec<Command>) {
        for command in commands {
            self.execute_one(command).await;
        }
    }

    async fn execute_one(&self, command: Command) {
        let node_id = self.keeper.self_id();
        match command {
            Command::ListNodes => {
                let membership = self.effects.membership.clone();
                let sink = self.handle.clone();
                let retry = self.keeper.config().bind_retry_range().1;
                tokio::spawn(async move {
                    loop {
                        match membership.list_live_nodes().await {
                            Ok(nodes) => {
                                sink.deliver(KeeperEvent::NodeListReceived(nodes));
                                break;
                            }
                            Err(err) => {
                                tracing::warn!(node_id = %node_id, error = %err, "node list query failed, retrying");
                                tokio::time::sleep(retry).await;
                            }
                        }
                    }
                });
            }
            Command::LoadConfig => {
                let storage = self.effects.storage.clone();
                let sink = self.handle.clone();
                tokio::spawn(async move {
                    let event = match storage.load_persisted_config().await {
                        Ok(config) => KeeperEvent::ConfigLoaded {
                            success: true,
                            config,
                        },
                        Err(err) => {
                            tracing::warn!(node_id = %node_id, error = %err, "config load failed");
                            KeeperEvent::ConfigLoaded {
                                success: false,
                                config: None,
                            }
                        }
                    };
                    sink.deliver(event);
                });
            }
            Command::StoreConfig(config) => {
                let storage = self.effects.storage.clone();
                let sink = self.handle.clone();
                tokio::spawn(async move {
                    let generation = config.generation;
                    let success = match storage.store_persisted_config(&config).await {
                        Ok(()) => true,
                        Err(err) => {
                            tracing::warn!(node_id = %node_id, generation, error = %err, "config store failed");
                            false
                        }
                    };
                    sink.deliver(KeeperEvent::ConfigStored {
                        success,
                        generation,
                    });
                });
            }
            Command::Send {
                node_id: recipient,
                session_id,
                message,
            } => {
                if let Err(err) = self
                    .effects
                    .transport
                    .send(recipient, session_id, message.clone())
                    .await
                {
                    tracing::debug!(node_id = %node_id, peer = %recipient, error = %err, "send failed");
                    self.handle
                        .deliver(KeeperEvent::Undelivered { recipient, message });
                }
            }
            Command::Subscribe { node_id: peer } => {
                if let Err(err) = self.effects.transport.subscribe(peer).await {
                    tracing::debug!(node_id = %node_id, %peer, error = %err, "subscribe failed");
                    self.handle.deliver(KeeperEvent::SessionLost { node_id: peer });
                }
            }
            Command::Unsubscribe { node_id: peer } => {
                if let Err(err) = self.effects.transport.unsubscribe(peer).await {
                    tracing::debug!(node_id = %node_id, %peer, error = %err, "unsubscribe failed");
                }
            }
            Command::Schedule { after, event } => {
                let sink = self.handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    sink.deliver(event);
                });
            }
            Command::Yield => {
                tokio::task::yield_now().await;
                self.handle.deliver(KeeperEvent::ProcessPendingEvent);
            }
        }
    }
}

/// Spawn a keeper on the current tokio runtime
pub fn spawn_keeper(
    node_id: NodeId,
    config: KeeperConfig,
    effects: KeeperEffects,
) -> (KeeperHandle, JoinHandle<()>) {
    let runtime = KeeperRuntime::new(node_id, config, effects);
    let handle = runtime.handle();
    (handle, tokio::spawn(runtime.run()))
}
