//! Client interface for interacting with the link actor.
//!
//! # Panic-Free Guarantees
//!
//! - Channel errors are mapped to `LinkError::ChannelClosed`

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use super::commands::{LinkCommand, LinkEvent, LinkStatus};
use crate::error::LinkError;
use crate::rpc::RpcHandle;

/// Handle for observing and controlling a running link.
///
/// Cheap to clone; every clone talks to the same actor.
///
/// # Usage
///
/// ```ignore
/// let mut events = link.subscribe();
/// link.wait_connected(Duration::from_secs(30)).await?;
/// let info = link.status().await?.node_info;
/// let peers = link.rpc().call("listpeers", Value::Null).await?;
/// ```
#[derive(Clone, Debug)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<LinkCommand>,
    rpc: RpcHandle,
    observers: broadcast::Sender<LinkEvent>,
    cancel: CancellationToken,
}

impl LinkHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<LinkCommand>,
        observers: broadcast::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rpc: RpcHandle::new(commands.clone()),
            commands,
            observers,
            cancel,
        }
    }

    /// Returns a handle for issuing RPC calls.
    pub fn rpc(&self) -> RpcHandle {
        self.rpc.clone()
    }

    /// Subscribes to link events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.observers.subscribe()
    }

    /// Returns a snapshot of the link.
    ///
    /// # Errors
    ///
    /// - `LinkError::ChannelClosed` if the actor has shut down
    pub async fn status(&self) -> Result<LinkStatus, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(LinkCommand::Status { respond_to: tx })
            .map_err(|_| LinkError::ChannelClosed)?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    /// Waits until the link is connected.
    ///
    /// # Errors
    ///
    /// - `LinkError::Timeout` if not connected within `limit`
    /// - `LinkError::Halted` if the link stopped retrying
    /// - `LinkError::ChannelClosed` if the actor has shut down
    pub async fn wait_connected(&self, limit: Duration) -> Result<(), LinkError> {
        let deadline = Instant::now() + limit;
        // Subscribe before asking for status so no transition is missed.
        let mut events = self.subscribe();

        if let Some(outcome) = settled(self.status().await?) {
            return outcome;
        }

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Err(LinkError::ChannelClosed),
                event = timeout_at(deadline, events.recv()) => event,
            };

            match event {
                Err(_) => return Err(LinkError::Timeout(limit)),
                Ok(Ok(LinkEvent::ConnectionChanged { connected: true })) => return Ok(()),
                Ok(Ok(LinkEvent::ErrorChanged(Some(failure)))) if failure.is_terminal() => {
                    return Err(LinkError::Halted(failure));
                }
                Ok(Ok(_)) => {}
                Ok(Err(RecvError::Lagged(_))) => {
                    // The dropped events may have included the transition.
                    if let Some(outcome) = settled(self.status().await?) {
                        return outcome;
                    }
                }
                Ok(Err(RecvError::Closed)) => return Err(LinkError::ChannelClosed),
            }
        }
    }

    /// Clears a terminal failure and reconnects immediately.
    ///
    /// On a link that is merely retrying, skips the remaining retry delay.
    ///
    /// # Errors
    ///
    /// - `LinkError::ChannelClosed` if the actor has shut down
    pub fn restart(&self) -> Result<(), LinkError> {
        self.commands
            .send(LinkCommand::Restart)
            .map_err(|_| LinkError::ChannelClosed)
    }

    /// Tears the link down: pending calls fail with `ConnectionLost`, the
    /// socket is closed and a supervised daemon is stopped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Returns true while the actor is accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// What `wait_connected` should return for `status`, if it is final.
fn settled(status: LinkStatus) -> Option<Result<(), LinkError>> {
    if status.connected {
        return Some(Ok(()));
    }
    match (status.halted, status.last_error) {
        (true, Some(failure)) => Some(Err(LinkError::Halted(failure))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lnm_core::{ConnectionState, LinkFailure, NodeInfo};
    use serde_json::Value;

    fn status(connected: bool, last_error: Option<LinkFailure>) -> LinkStatus {
        LinkStatus {
            state: if connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Retrying
            },
            connected,
            halted: last_error.as_ref().is_some_and(LinkFailure::is_terminal),
            last_error,
            node_info: NodeInfo::default(),
            pending_calls: 0,
            connect_attempts: 1,
            sync_passes: 0,
            daemon_pid: None,
        }
    }

    /// Runs a stand-in actor. The first status query is answered only
    /// after `burst` has been published, so a one-slot subscriber lags.
    fn fake_actor(burst: Vec<LinkEvent>, later: LinkStatus) -> LinkHandle {
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
        let (observers, _) = broadcast::channel(1);
        let handle = LinkHandle::new(commands_tx, observers.clone(), CancellationToken::new());

        tokio::spawn(async move {
            let mut first = true;
            while let Some(command) = commands_rx.recv().await {
                if let LinkCommand::Status { respond_to } = command {
                    if first {
                        first = false;
                        for event in &burst {
                            let _ = observers.send(event.clone());
                        }
                        let _ = respond_to.send(status(false, None));
                    } else {
                        let _ = respond_to.send(later.clone());
                    }
                }
            }
        });

        handle
    }

    fn noise() -> LinkEvent {
        LinkEvent::Notification {
            method: "log".into(),
            params: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_wait_connected_reports_halt_hidden_by_lag() {
        let failure = LinkFailure::Credentials("Incorrect rpcuser or rpcpassword".into());
        let link = fake_actor(
            vec![LinkEvent::ErrorChanged(Some(failure.clone())), noise(), noise()],
            status(false, Some(failure.clone())),
        );

        match link.wait_connected(Duration::from_secs(5)).await {
            Err(LinkError::Halted(reported)) => assert_eq!(reported, failure),
            other => panic!("Expected Halted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_connected_reports_connect_hidden_by_lag() {
        let link = fake_actor(
            vec![LinkEvent::ConnectionChanged { connected: true }, noise(), noise()],
            status(true, None),
        );

        assert!(link.wait_connected(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_connected_times_out_while_retrying() {
        let link = fake_actor(Vec::new(), status(false, None));

        assert!(matches!(
            link.wait_connected(Duration::from_secs(3)).await,
            Err(LinkError::Timeout(_))
        ));
    }
}
