//! Periodic refresh of the daemon's sub-resources.
//!
//! While the link is connected, every `sync_interval` the scheduler asks
//! each collaborator to refresh, in a fixed order: payments, wallet,
//! invoices, node info, peers. Peers go last because `listpeers` is the
//! call least tolerant of concurrent traffic on the daemon. Refreshes are
//! fire-and-forget: the scheduler issues them back to back and never waits
//! for one to complete before issuing the next.
//!
//! The node graph is refreshed once per connection, not on every tick.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::rpc::{InternalReply, RpcHandle};

/// A sub-resource that knows how to refresh itself over RPC.
///
/// `refresh()` must not block: implementations issue their call and
/// process the reply on their own time.
pub trait Refresh: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Issues the refresh.
    fn refresh(&self);
}

/// Positions a collaborator can occupy in the sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncSlot {
    Payments,
    Wallet,
    Invoices,
    Peers,
    /// Refreshed once on connect instead of every pass.
    Nodes,
}

/// The collaborators registered with a link. Empty slots are skipped.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub payments: Option<Arc<dyn Refresh>>,
    pub wallet: Option<Arc<dyn Refresh>>,
    pub invoices: Option<Arc<dyn Refresh>>,
    pub peers: Option<Arc<dyn Refresh>>,
    pub nodes: Option<Arc<dyn Refresh>>,
}

impl Collaborators {
    /// Places `refresh` in `slot`, replacing any previous occupant.
    pub fn set(&mut self, slot: SyncSlot, refresh: Arc<dyn Refresh>) {
        let entry = match slot {
            SyncSlot::Payments => &mut self.payments,
            SyncSlot::Wallet => &mut self.wallet,
            SyncSlot::Invoices => &mut self.invoices,
            SyncSlot::Peers => &mut self.peers,
            SyncSlot::Nodes => &mut self.nodes,
        };
        *entry = Some(refresh);
    }
}

/// Refreshes the link's own node info snapshot via `getinfo`.
pub(crate) struct NodeInfoRefresh {
    rpc: RpcHandle,
}

impl NodeInfoRefresh {
    pub(crate) fn new(rpc: RpcHandle) -> Self {
        Self { rpc }
    }
}

impl Refresh for NodeInfoRefresh {
    fn name(&self) -> &'static str {
        "info"
    }

    fn refresh(&self) {
        self.rpc
            .call_internal("getinfo", Value::Null, InternalReply::NodeInfo);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Drives sync passes while the link is connected.
pub(crate) struct SyncScheduler {
    period: Duration,
    pass: Vec<Arc<dyn Refresh>>,
    nodes: Option<Arc<dyn Refresh>>,
    interval: Option<Interval>,
    passes: u64,
}

impl SyncScheduler {
    pub(crate) fn new(period: Duration, collaborators: Collaborators, info: Arc<dyn Refresh>) -> Self {
        let Collaborators {
            payments,
            wallet,
            invoices,
            peers,
            nodes,
        } = collaborators;

        let pass = [payments, wallet, invoices, Some(info), peers]
            .into_iter()
            .flatten()
            .collect();

        Self {
            period,
            pass,
            nodes,
            interval: None,
            passes: 0,
        }
    }

    /// Number of passes run since the link started.
    pub(crate) fn passes(&self) -> u64 {
        self.passes
    }

    pub(crate) fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Runs the immediate pass for a fresh connection, refreshes the node
    /// graph, and arms the periodic timer.
    pub(crate) fn start(&mut self) {
        self.run_pass();
        if let Some(nodes) = &self.nodes {
            debug!(collaborator = nodes.name(), "Refreshing node graph");
            nodes.refresh();
        }

        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    /// Disarms the periodic timer.
    pub(crate) fn stop(&mut self) {
        self.interval = None;
    }

    /// Issues one refresh per collaborator, in pass order.
    pub(crate) fn run_pass(&mut self) {
        self.passes = self.passes.saturating_add(1);
        debug!(pass = self.passes, "Sync pass");
        for collaborator in &self.pass {
            collaborator.refresh();
        }
    }

    /// Completes at the next tick. Never completes while stopped.
    pub(crate) async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Refresh for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn refresh(&self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Refresh> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
        })
    }

    fn full_scheduler(log: &Arc<Mutex<Vec<&'static str>>>) -> SyncScheduler {
        let mut collaborators = Collaborators::default();
        // Registration order must not matter.
        collaborators.set(SyncSlot::Peers, recorder("peers", log));
        collaborators.set(SyncSlot::Nodes, recorder("nodes", log));
        collaborators.set(SyncSlot::Invoices, recorder("invoices", log));
        collaborators.set(SyncSlot::Wallet, recorder("wallet", log));
        collaborators.set(SyncSlot::Payments, recorder("payments", log));
        SyncScheduler::new(Duration::from_secs(15), collaborators, recorder("info", log))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_pass_then_node_graph() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = full_scheduler(&log);

        scheduler.start();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["payments", "wallet", "invoices", "info", "peers", "nodes"]
        );
        assert!(scheduler.is_running());
        assert_eq!(scheduler.passes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_passes_skip_node_graph() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = full_scheduler(&log);
        scheduler.start();
        log.lock().unwrap().clear();

        let started = Instant::now();
        scheduler.tick().await;
        scheduler.run_pass();

        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["payments", "wallet", "invoices", "info", "peers"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_scheduler_never_ticks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = full_scheduler(&log);
        scheduler.start();
        scheduler.stop();

        let ticked = tokio::time::timeout(Duration::from_secs(60), scheduler.tick()).await;
        assert!(ticked.is_err());
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_empty_slots_are_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut collaborators = Collaborators::default();
        collaborators.set(SyncSlot::Wallet, recorder("wallet", &log));
        let mut scheduler = SyncScheduler::new(Duration::from_secs(15), collaborators, recorder("info", &log));

        scheduler.run_pass();
        assert_eq!(*log.lock().unwrap(), vec!["wallet", "info"]);
    }
}
