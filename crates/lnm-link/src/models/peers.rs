use tokio::sync::watch;

use lnm_core::Peer;
use lnm_protocol::RawListPeers;

use super::Refresher;
use crate::rpc::RpcHandle;
use crate::sync::Refresh;

/// Peers of the node, from `listpeers`.
pub struct PeersModel {
    inner: Refresher<Vec<Peer>>,
}

impl PeersModel {
    pub fn new(rpc: RpcHandle) -> Self {
        Self {
            inner: Refresher::new(rpc, "listpeers"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Peer>> {
        self.inner.subscribe()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.inner.borrow().clone()
    }

    /// Number of peers with a live connection.
    pub fn connected_count(&self) -> usize {
        self.inner.borrow().iter().filter(|p| p.connected).count()
    }
}

impl Refresh for PeersModel {
    fn name(&self) -> &'static str {
        "peers"
    }

    fn refresh(&self) {
        self.inner.refresh_with::<RawListPeers>(RawListPeers::to_peers);
    }
}
