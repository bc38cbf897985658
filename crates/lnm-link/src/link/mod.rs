//! The link: connection state machine using the Actor pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ LinkCommand ┌─────────────┐  LinkEvent  ┌───────────┐
//! │ RpcHandle /  │────────────▶│  LinkActor  │────────────▶│ observers │
//! │ LinkHandle   │   (mpsc)    │             │ (broadcast) └───────────┘
//! └──────────────┘             └──────┬──────┘
//!        ▲                            │ ActorEvent (mpsc)
//!        │ refresh()                  ▼
//! ┌──────────────┐         ┌─────────────────────────────┐
//! │collaborators │         │ connect attempts, socket    │
//! │  (models)    │         │ reader/writer, daemon watch │
//! └──────────────┘         └─────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use lnm_core::ConnectionConfig;

mod actor;
mod commands;
mod handle;

pub(crate) use commands::{ActorEvent, LinkCommand};
pub use commands::{LinkEvent, LinkStatus};
pub use handle::LinkHandle;

use crate::config::LinkConfig;
use crate::models::Models;
use crate::rpc::RpcHandle;
use crate::staging::{BinaryStager, NoStaging};
use crate::sync::{Collaborators, Refresh, SyncSlot};
use crate::transport::{Connector, UnixConnector};
use actor::{ActorWiring, LinkActor};

/// Broadcast buffer for link events.
const EVENT_BUFFER: usize = 100;

/// Assembles a link.
///
/// The builder creates the command channel up front, so collaborators can
/// be handed an `RpcHandle` before the actor exists.
///
/// # Example
///
/// ```no_run
/// use lnm_core::ConnectionConfig;
/// use lnm_link::{LinkBuilder, LinkConfig, Models};
///
/// #[tokio::main]
/// async fn main() {
///     let builder = LinkBuilder::new(ConnectionConfig::default())
///         .link_config(LinkConfig::default());
///     let models = Models::new(&builder.rpc());
///     let link = builder.collaborators(models.collaborators()).spawn();
///
///     let mut wallet = models.wallet.subscribe();
///     let _ = wallet.changed().await;
///     link.shutdown();
/// }
/// ```
pub struct LinkBuilder {
    config: ConnectionConfig,
    link_config: LinkConfig,
    connector: Arc<dyn Connector>,
    stager: Box<dyn BinaryStager>,
    collaborators: Collaborators,
    commands_tx: mpsc::UnboundedSender<LinkCommand>,
    commands_rx: mpsc::UnboundedReceiver<LinkCommand>,
    observers: broadcast::Sender<LinkEvent>,
    cancel: CancellationToken,
}

impl LinkBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (observers, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            config,
            link_config: LinkConfig::default(),
            connector: Arc::new(UnixConnector),
            stager: Box::new(NoStaging),
            collaborators: Collaborators::default(),
            commands_tx,
            commands_rx,
            observers,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn link_config(mut self, link_config: LinkConfig) -> Self {
        self.link_config = link_config;
        self
    }

    /// Replaces the socket connector.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Sets the binary stager used on first start.
    #[must_use]
    pub fn stager(mut self, stager: impl BinaryStager + 'static) -> Self {
        self.stager = Box::new(stager);
        self
    }

    /// Ties the link's lifetime to an external token.
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registers a single collaborator.
    #[must_use]
    pub fn collaborator(mut self, slot: SyncSlot, refresh: Arc<dyn Refresh>) -> Self {
        self.collaborators.set(slot, refresh);
        self
    }

    /// Replaces all collaborators.
    #[must_use]
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// RPC handle for the link being built.
    pub fn rpc(&self) -> RpcHandle {
        RpcHandle::new(self.commands_tx.clone())
    }

    /// Subscribes to link events, including those published at startup.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.observers.subscribe()
    }

    /// Spawns the actor and returns its handle.
    pub fn spawn(self) -> LinkHandle {
        let handle = LinkHandle::new(
            self.commands_tx.clone(),
            self.observers.clone(),
            self.cancel.clone(),
        );

        let wiring = ActorWiring {
            commands: self.commands_rx,
            rpc: RpcHandle::new(self.commands_tx),
            observers: self.observers,
            cancel: self.cancel,
        };
        let actor = LinkActor::new(
            Arc::new(self.config),
            self.link_config,
            self.connector,
            self.stager,
            self.collaborators,
            wiring,
        );
        tokio::spawn(actor.run());

        handle
    }
}

/// Spawns a link over the Unix socket in `config`, with the standard
/// sub-resource models registered.
pub fn spawn_link(config: ConnectionConfig, link_config: LinkConfig) -> (LinkHandle, Models) {
    let builder = LinkBuilder::new(config).link_config(link_config);
    let models = Models::new(&builder.rpc());
    let handle = builder.collaborators(models.collaborators()).spawn();
    (handle, models)
}
