//! Sub-resource models kept in sync with the daemon.
//!
//! Each model owns one RPC method, holds its last parsed state in a
//! `watch` channel, and refreshes when the sync scheduler asks. A refresh
//! that is still waiting for its reply makes the next one a no-op.
//! RPC failures are logged and leave the previous state in place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use lnm_core::RpcError;

use crate::rpc::RpcHandle;
use crate::sync::Collaborators;

mod invoices;
mod nodes;
mod payments;
mod peers;
mod wallet;

pub use invoices::InvoicesModel;
pub use nodes::NodesModel;
pub use payments::PaymentsModel;
pub use peers::PeersModel;
pub use wallet::WalletModel;

// ============================================================================
// Shared Refresh Machinery
// ============================================================================

/// Issues one RPC method and publishes the converted result.
struct Refresher<T> {
    rpc: RpcHandle,
    method: &'static str,
    state: Arc<watch::Sender<T>>,
    in_flight: Arc<AtomicBool>,
}

impl<T> Refresher<T>
where
    T: Default + PartialEq + Send + Sync + 'static,
{
    fn new(rpc: RpcHandle, method: &'static str) -> Self {
        let (state, _) = watch::channel(T::default());
        Self {
            rpc,
            method,
            state: Arc::new(state),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn subscribe(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    fn borrow(&self) -> watch::Ref<'_, T> {
        self.state.borrow()
    }

    /// Issues the call and applies `convert` to its parsed result.
    fn refresh_with<R>(&self, convert: fn(&R) -> T)
    where
        R: DeserializeOwned + Send + 'static,
    {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(method = self.method, "Previous refresh still outstanding, skipping");
            return;
        }

        let reply = self.rpc.call(self.method, Value::Null);
        let state = Arc::clone(&self.state);
        let in_flight = Arc::clone(&self.in_flight);
        let method = self.method;

        tokio::spawn(async move {
            let parsed = reply.await.and_then(|value| {
                serde_json::from_value::<R>(value).map_err(|e| RpcError::Decode(e.to_string()))
            });

            match parsed {
                Ok(raw) => {
                    let next = convert(&raw);
                    state.send_if_modified(|current| {
                        if *current == next {
                            false
                        } else {
                            *current = next;
                            true
                        }
                    });
                }
                Err(RpcError::NotConnected | RpcError::ConnectionLost) => {
                    debug!(method, "Refresh dropped: daemon not connected");
                }
                Err(err) => warn!(method, error = %err, "Refresh failed"),
            }

            in_flight.store(false, Ordering::Release);
        });
    }
}

// ============================================================================
// Model Set
// ============================================================================

/// The standard set of models for one link.
#[derive(Clone)]
pub struct Models {
    pub peers: Arc<PeersModel>,
    pub payments: Arc<PaymentsModel>,
    pub wallet: Arc<WalletModel>,
    pub invoices: Arc<InvoicesModel>,
    pub nodes: Arc<NodesModel>,
}

impl Models {
    pub fn new(rpc: &RpcHandle) -> Self {
        Self {
            peers: Arc::new(PeersModel::new(rpc.clone())),
            payments: Arc::new(PaymentsModel::new(rpc.clone())),
            wallet: Arc::new(WalletModel::new(rpc.clone())),
            invoices: Arc::new(InvoicesModel::new(rpc.clone())),
            nodes: Arc::new(NodesModel::new(rpc.clone())),
        }
    }

    /// Registers every model in its sync slot.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            payments: Some(self.payments.clone()),
            wallet: Some(self.wallet.clone()),
            invoices: Some(self.invoices.clone()),
            peers: Some(self.peers.clone()),
            nodes: Some(self.nodes.clone()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Answers `LinkCommand::Call`s in place of the link actor.

    use serde_json::Value;
    use tokio::sync::mpsc;

    use lnm_core::RpcError;

    use crate::link::LinkCommand;
    use crate::rpc::{ReplySink, RpcHandle, RpcResult};

    pub(crate) struct FakeLink {
        rx: mpsc::UnboundedReceiver<LinkCommand>,
    }

    pub(crate) fn fake_link() -> (RpcHandle, FakeLink) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RpcHandle::new(tx), FakeLink { rx })
    }

    impl FakeLink {
        /// Receives the next call and returns its method and reply slot.
        pub(crate) async fn next_call(&mut self) -> (String, tokio::sync::oneshot::Sender<RpcResult>) {
            match self.rx.recv().await {
                Some(LinkCommand::Call {
                    method,
                    sink: ReplySink::Caller(reply),
                    ..
                }) => (method, reply),
                _ => panic!("Expected a caller RPC"),
            }
        }

        /// Answers the next call with `result`.
        pub(crate) async fn answer(&mut self, result: Result<Value, RpcError>) -> String {
            let (method, reply) = self.next_call().await;
            let _ = reply.send(result);
            method
        }

        /// Returns the method of a call queued right now, if any.
        pub(crate) fn try_next_method(&mut self) -> Option<String> {
            match self.rx.try_recv() {
                Ok(LinkCommand::Call { method, .. }) => Some(method),
                _ => None,
            }
        }
    }

    /// Lets spawned reply handlers run.
    pub(crate) async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
}
