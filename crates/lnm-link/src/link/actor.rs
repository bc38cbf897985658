//! Link actor - owns the connection state machine.
//!
//! The actor is the single owner of everything mutable about the link: the
//! connection state, the pending-call table, the node info snapshot, the
//! retry timer, the sync scheduler and the supervised daemon. Handles talk
//! to it over an mpsc channel; the tasks it spawns (connect attempts,
//! socket reader/writer, process watcher) report back over a second one.
//! One `select!` loop serializes all of it.
//!
//! # States
//!
//! ```text
//!   Disconnected ──start──▶ Connecting ──ok──▶ Connected
//!                              ▲   │                │
//!                        timer │   │ fail      lost │
//!                              │   ▼                │
//!                            Retrying ◀─────────────┘
//! ```
//!
//! A credentials failure reported by the supervisor halts the machine in
//! `Disconnected` until `restart()`.
//!
//! # Panic-Free Guarantees
//!
//! - Channel send failures are ignored (observers and callers may be gone)
//! - Stale events from torn-down connections and attempts are discarded

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use lnm_core::{ConnectionConfig, ConnectionState, LinkFailure, NodeInfo, RpcError, TransportError};
use lnm_protocol::{DaemonVersion, Frame, RawGetInfo};

use super::commands::{ActorEvent, LinkCommand, LinkEvent, LinkStatus};
use crate::config::LinkConfig;
use crate::rpc::{Dispatch, InternalReply, ReplySink, RpcClient, RpcHandle};
use crate::staging::BinaryStager;
use crate::supervisor::{DaemonSupervisor, LaunchOutcome};
use crate::sync::{Collaborators, NodeInfoRefresh, SyncScheduler};
use crate::transport::{BoxedStream, Connection, Connector};

/// Channels and tokens shared between the actor and its handles.
pub(crate) struct ActorWiring {
    pub commands: mpsc::UnboundedReceiver<LinkCommand>,
    pub rpc: RpcHandle,
    pub observers: broadcast::Sender<LinkEvent>,
    pub cancel: CancellationToken,
}

/// What woke the loop up.
enum Step {
    Command(LinkCommand),
    Event(ActorEvent),
    Retry,
    Sync,
    Shutdown,
}

/// The link actor.
pub(crate) struct LinkActor {
    config: Arc<ConnectionConfig>,
    link_config: LinkConfig,
    connector: Arc<dyn Connector>,
    supervisor: DaemonSupervisor,
    rpc: RpcClient,
    scheduler: SyncScheduler,

    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedReceiver<ActorEvent>,
    events_tx: mpsc::UnboundedSender<ActorEvent>,
    observers: broadcast::Sender<LinkEvent>,
    cancel: CancellationToken,

    state: ConnectionState,
    last_error: Option<LinkFailure>,
    /// Set by a terminal failure; suppresses all retrying.
    halted: bool,
    node_info: NodeInfo,

    connection: Option<Connection>,
    /// Generation of the most recent connection.
    generation: u64,
    /// Connect attempts started so far; doubles as the attempt id.
    attempts: u64,
    in_flight: Option<u64>,
    retry_delay: Duration,
    retry_at: Option<Instant>,

    /// Daemon versions already warned about.
    warned_versions: HashSet<String>,
}

impl LinkActor {
    pub(crate) fn new(
        config: Arc<ConnectionConfig>,
        link_config: LinkConfig,
        connector: Arc<dyn Connector>,
        stager: Box<dyn BinaryStager>,
        collaborators: Collaborators,
        wiring: ActorWiring,
    ) -> Self {
        let ActorWiring {
            commands,
            rpc,
            observers,
            cancel,
        } = wiring;

        let (events_tx, events) = mpsc::unbounded_channel();
        let supervisor = DaemonSupervisor::new(
            Arc::clone(&config),
            stager,
            link_config.daemon_relaunch_delay,
            events_tx.clone(),
            cancel.clone(),
        );
        let scheduler = SyncScheduler::new(
            link_config.sync_interval,
            collaborators,
            Arc::new(NodeInfoRefresh::new(rpc)),
        );
        let retry_delay = link_config.retry_initial_delay;

        Self {
            config,
            link_config,
            connector,
            supervisor,
            rpc: RpcClient::new(),
            scheduler,
            commands,
            events,
            events_tx,
            observers,
            cancel,
            state: ConnectionState::Disconnected,
            last_error: None,
            halted: false,
            node_info: NodeInfo::default(),
            connection: None,
            generation: 0,
            attempts: 0,
            in_flight: None,
            retry_delay,
            retry_at: None,
            warned_versions: HashSet::new(),
        }
    }

    /// Runs the actor until the link's cancellation token fires.
    pub(crate) async fn run(mut self) {
        info!(
            socket_path = %self.config.socket_path.display(),
            network = %self.config.network,
            spawn_daemon = self.link_config.spawn_daemon,
            "Link actor starting"
        );

        self.begin_connect();

        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Shutdown,
                Some(event) = self.events.recv() => Step::Event(event),
                Some(command) = self.commands.recv() => Step::Command(command),
                _ = retry_timer(self.retry_at) => Step::Retry,
                _ = self.scheduler.tick() => Step::Sync,
                else => Step::Shutdown,
            };

            match step {
                Step::Shutdown => break,
                Step::Event(event) => self.handle_event(event),
                Step::Command(command) => self.handle_command(command),
                Step::Retry => self.on_retry_timer(),
                Step::Sync => self.scheduler.run_pass(),
            }
        }

        self.teardown();
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::Call {
                method,
                params,
                sink,
            } => self.handle_call(method, params, sink),
            LinkCommand::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            LinkCommand::Restart => self.handle_restart(),
        }
    }

    fn handle_call(&mut self, method: String, params: Value, sink: ReplySink) {
        let Some(connection) = &self.connection else {
            debug!(method = %method, "Call issued while disconnected");
            sink.fail(RpcError::NotConnected);
            return;
        };

        let request = self.rpc.begin(method, params, sink);
        let id = request.id;
        if connection.send(request).is_err() {
            // The writer stopped; its TransportClosed is already queued.
            self.rpc.fail(id, RpcError::ConnectionLost);
        }
    }

    fn handle_restart(&mut self) {
        if self.halted {
            info!("Restarting link after terminal failure");
            self.halted = false;
            self.set_last_error(None);
            self.supervisor.reset_throttle();
        }
        self.retry_delay = self.link_config.retry_initial_delay;
        self.retry_at = None;
        self.begin_connect();
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            connected: self.state.is_connected(),
            last_error: self.last_error.clone(),
            halted: self.halted,
            node_info: self.node_info.clone(),
            pending_calls: self.rpc.pending_len(),
            connect_attempts: self.attempts,
            sync_passes: self.scheduler.passes(),
            daemon_pid: self.supervisor.pid(),
        }
    }

    // ========================================================================
    // Task Events
    // ========================================================================

    fn handle_event(&mut self, event: ActorEvent) {
        match event {
            ActorEvent::ConnectFinished { attempt, result } => {
                self.on_connect_finished(attempt, result);
            }
            ActorEvent::Frame { generation, frame } => self.on_frame(generation, frame),
            ActorEvent::TransportClosed { generation, error } => {
                self.on_transport_closed(generation, error);
            }
            ActorEvent::DaemonExited {
                launch,
                code,
                output,
            } => self.on_daemon_exited(launch, code, &output),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.generation() == generation)
    }

    fn on_frame(&mut self, generation: u64, frame: Frame) {
        if !self.is_current(generation) {
            trace!(generation, "Dropping frame from stale connection");
            return;
        }

        match self.rpc.dispatch(frame) {
            Dispatch::Delivered { id, method } => {
                trace!(id, method = %method, "Response delivered");
            }
            Dispatch::Internal { id, reply, result } => {
                trace!(id, reply = ?reply, "Internal response");
                match reply {
                    InternalReply::NodeInfo => self.on_node_info(result),
                }
            }
            Dispatch::Notification { method, params } => {
                debug!(method = %method, "Daemon notification");
                self.publish(LinkEvent::Notification { method, params });
            }
            Dispatch::Rejected(err) => {
                warn!(error = %err, "Discarding inbound frame");
            }
        }
    }

    fn on_transport_closed(&mut self, generation: u64, error: Option<TransportError>) {
        if !self.is_current(generation) {
            return;
        }

        self.connection = None;
        let failed = self.rpc.fail_all(RpcError::ConnectionLost);
        if self.scheduler.is_running() {
            debug!(passes = self.scheduler.passes(), "Sync stopped");
            self.scheduler.stop();
        }

        match &error {
            Some(err) => info!(error = %err, failed_calls = failed, "Lost connection to daemon"),
            None => info!(failed_calls = failed, "Daemon closed the connection"),
        }

        if self.halted {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.set_state(ConnectionState::Retrying);
        self.arm_retry();
    }

    fn on_daemon_exited(&mut self, launch: u64, code: Option<i32>, output: &[String]) {
        let Some(exit) = self.supervisor.on_exit(launch, code, output) else {
            return;
        };

        let failure = LinkFailure::from(&exit);
        if exit.is_disqualifying() {
            warn!(error = %exit, "Daemon cannot reach its upstream node; retrying stopped");
            self.halt(failure);
        } else {
            warn!(error = %exit, "Daemon exited; will keep retrying");
            self.set_last_error(Some(failure));
        }
    }

    fn halt(&mut self, failure: LinkFailure) {
        self.halted = true;
        self.retry_at = None;
        // Any attempt still running is now stale.
        self.in_flight = None;
        self.set_last_error(Some(failure));
        if self.connection.is_none() {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    // ========================================================================
    // Connecting
    // ========================================================================

    fn on_retry_timer(&mut self) {
        self.retry_at = None;
        if self.halted {
            return;
        }
        self.begin_connect();
    }

    /// Starts a connect attempt unless one is already running or the link
    /// is up.
    fn begin_connect(&mut self) {
        if self.connection.is_some() {
            return;
        }
        if let Some(attempt) = self.in_flight {
            debug!(attempt, "Connect attempt already in flight");
            return;
        }

        self.attempts = self.attempts.saturating_add(1);
        let attempt = self.attempts;
        self.in_flight = Some(attempt);
        self.set_state(ConnectionState::Connecting);

        debug!(
            attempt,
            socket_path = %self.config.socket_path.display(),
            "Connecting to daemon"
        );

        let connector = Arc::clone(&self.connector);
        let path = self.config.socket_path.clone();
        let limit = self.link_config.connect_timeout;
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(limit, connector.connect(&path)) => {
                    result.unwrap_or(Err(TransportError::Timeout))
                }
            };
            let _ = events.send(ActorEvent::ConnectFinished { attempt, result });
        });
    }

    fn on_connect_finished(&mut self, attempt: u64, result: Result<BoxedStream, TransportError>) {
        if self.in_flight != Some(attempt) {
            debug!(attempt, "Discarding stale connect result");
            return;
        }
        self.in_flight = None;

        match result {
            Ok(stream) => self.on_connected(stream),
            Err(err) => self.on_connect_failed(attempt, err),
        }
    }

    fn on_connected(&mut self, stream: BoxedStream) {
        self.generation = self.generation.saturating_add(1);
        self.connection = Some(Connection::open(
            stream,
            self.generation,
            self.events_tx.clone(),
            &self.cancel,
        ));
        self.retry_at = None;
        self.retry_delay = self.link_config.retry_initial_delay;

        self.set_state(ConnectionState::Connected);
        self.set_last_error(None);
        self.scheduler.start();
    }

    fn on_connect_failed(&mut self, attempt: u64, err: TransportError) {
        if attempt == 1 {
            info!(
                error = %err,
                socket_path = %self.config.socket_path.display(),
                "Daemon not reachable, will retry"
            );
        } else {
            debug!(attempt, error = %err, "Connect attempt failed");
        }

        self.set_state(ConnectionState::Retrying);
        if self.link_config.spawn_daemon {
            self.ensure_daemon();
        }
        self.arm_retry();
    }

    fn ensure_daemon(&mut self) {
        match self.supervisor.ensure_running() {
            Ok(LaunchOutcome::Launched { pid }) => {
                debug!(pid = ?pid, "Daemon launch requested");
            }
            Ok(LaunchOutcome::AlreadySupervised) => {}
            Ok(LaunchOutcome::Throttled { remaining }) => {
                trace!(remaining_ms = remaining.as_millis() as u64, "Daemon relaunch throttled");
            }
            Err(err) => {
                warn!(error = %err, "Failed to launch daemon");
                self.set_last_error(Some(LinkFailure::from(&err)));
            }
        }
    }

    fn arm_retry(&mut self) {
        let delay = self.retry_delay;
        self.retry_at = Some(Instant::now() + delay);
        self.retry_delay = self.link_config.next_retry_delay(delay);
        trace!(delay_ms = delay.as_millis() as u64, "Retry armed");
    }

    // ========================================================================
    // Node Info
    // ========================================================================

    fn on_node_info(&mut self, result: Result<Value, RpcError>) {
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "getinfo failed");
                return;
            }
        };
        let raw: RawGetInfo = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "Unexpected getinfo result");
                return;
            }
        };

        let info = raw.to_node_info();
        self.check_version(&info.version);

        if info != self.node_info {
            info!(
                node_id = info.id.short(),
                blockheight = info.blockheight,
                network = %info.network,
                version = %info.version,
                "Node info updated"
            );
            self.node_info = info.clone();
            self.publish(LinkEvent::InfoChanged(info));
        }
    }

    fn check_version(&mut self, version: &str) {
        if version.is_empty() || self.warned_versions.contains(version) {
            return;
        }
        match DaemonVersion::parse(version) {
            Ok(parsed) if parsed.is_supported() => {}
            Ok(parsed) => {
                warn!(
                    version = %parsed,
                    minimum = %DaemonVersion::MINIMUM_SUPPORTED,
                    "Daemon is older than the oldest supported release"
                );
                self.warned_versions.insert(version.to_string());
            }
            Err(err) => {
                warn!(error = %err, "Unrecognised daemon version");
                self.warned_versions.insert(version.to_string());
            }
        }
    }

    // ========================================================================
    // Observers
    // ========================================================================

    fn publish(&self, event: LinkEvent) {
        // No subscribers is not an error.
        let _ = self.observers.send(event);
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "Link state changed");

        let was_connected = self.state.is_connected();
        self.state = next;
        if was_connected != next.is_connected() {
            if next.is_connected() {
                info!(socket_path = %self.config.socket_path.display(), "Connected to daemon");
            }
            self.publish(LinkEvent::ConnectionChanged {
                connected: next.is_connected(),
            });
        }
    }

    fn set_last_error(&mut self, next: Option<LinkFailure>) {
        if self.last_error == next {
            return;
        }
        self.last_error = next.clone();
        self.publish(LinkEvent::ErrorChanged(next));
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    fn teardown(&mut self) {
        info!("Link actor stopping");

        self.scheduler.stop();
        self.retry_at = None;
        self.in_flight = None;
        self.connection = None;
        let failed = self.rpc.fail_all(RpcError::ConnectionLost);
        self.supervisor.shutdown();

        // Refuse new commands, then answer whatever was already queued.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                LinkCommand::Call { sink, .. } => sink.fail(RpcError::ConnectionLost),
                LinkCommand::Status { respond_to } => {
                    let _ = respond_to.send(self.status());
                }
                LinkCommand::Restart => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(failed_calls = failed, "Link actor stopped");
    }
}

async fn retry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
