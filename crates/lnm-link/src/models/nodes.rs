use tokio::sync::watch;

use lnm_core::{GraphNode, NodeId};
use lnm_protocol::RawListNodes;

use super::Refresher;
use crate::rpc::RpcHandle;
use crate::sync::Refresh;

/// Gossip graph nodes, from `listnodes`.
///
/// The scheduler refreshes this once per connection rather than on every
/// pass; call `refresh()` directly for an update.
pub struct NodesModel {
    inner: Refresher<Vec<GraphNode>>,
}

impl NodesModel {
    pub fn new(rpc: RpcHandle) -> Self {
        Self {
            inner: Refresher::new(rpc, "listnodes"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<GraphNode>> {
        self.inner.subscribe()
    }

    pub fn nodes(&self) -> Vec<GraphNode> {
        self.inner.borrow().clone()
    }

    pub fn alias_of(&self, id: &NodeId) -> Option<String> {
        self.inner
            .borrow()
            .iter()
            .find(|n| &n.id == id)
            .and_then(|n| n.alias.clone())
    }
}

impl Refresh for NodesModel {
    fn name(&self) -> &'static str {
        "nodes"
    }

    fn refresh(&self) {
        self.inner.refresh_with::<RawListNodes>(RawListNodes::to_graph_nodes);
    }
}
