use tokio::sync::watch;

use lnm_core::{Payment, PaymentStatus};
use lnm_protocol::RawListPays;

use super::Refresher;
use crate::rpc::RpcHandle;
use crate::sync::Refresh;

/// Outgoing payments, from `listpays`.
pub struct PaymentsModel {
    inner: Refresher<Vec<Payment>>,
}

impl PaymentsModel {
    pub fn new(rpc: RpcHandle) -> Self {
        Self {
            inner: Refresher::new(rpc, "listpays"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Payment>> {
        self.inner.subscribe()
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.inner.borrow().clone()
    }

    /// Payments still in flight.
    pub fn pending(&self) -> Vec<Payment> {
        self.inner
            .borrow()
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending)
            .cloned()
            .collect()
    }
}

impl Refresh for PaymentsModel {
    fn name(&self) -> &'static str {
        "payments"
    }

    fn refresh(&self) {
        self.inner.refresh_with::<RawListPays>(RawListPays::to_payments);
    }
}
