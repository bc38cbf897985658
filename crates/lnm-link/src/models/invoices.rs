use tokio::sync::watch;

use lnm_core::{Invoice, InvoiceStatus};
use lnm_protocol::RawListInvoices;

use super::Refresher;
use crate::rpc::RpcHandle;
use crate::sync::Refresh;

/// Invoices created by the node, from `listinvoices`.
pub struct InvoicesModel {
    inner: Refresher<Vec<Invoice>>,
}

impl InvoicesModel {
    pub fn new(rpc: RpcHandle) -> Self {
        Self {
            inner: Refresher::new(rpc, "listinvoices"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Invoice>> {
        self.inner.subscribe()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.inner.borrow().clone()
    }

    pub fn find(&self, label: &str) -> Option<Invoice> {
        self.inner.borrow().iter().find(|i| i.label == label).cloned()
    }

    /// Sum of amounts received on paid invoices.
    pub fn received_msat(&self) -> u64 {
        self.inner
            .borrow()
            .iter()
            .filter(|i| i.status == InvoiceStatus::Paid)
            .filter_map(|i| i.amount_msat)
            .fold(0u64, u64::saturating_add)
    }
}

impl Refresh for InvoicesModel {
    fn name(&self) -> &'static str {
        "invoices"
    }

    fn refresh(&self) {
        self.inner.refresh_with::<RawListInvoices>(RawListInvoices::to_invoices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::{fake_link, settle};
    use serde_json::json;

    #[tokio::test]
    async fn test_refresh_tracks_invoice_status() {
        let (rpc, mut link) = fake_link();
        let model = InvoicesModel::new(rpc);

        model.refresh();
        let method = link
            .answer(Ok(json!({
                "invoices": [
                    {"label": "coffee", "payment_hash": "aa", "status": "paid", "amount_msat": 4000},
                    {"label": "tea", "payment_hash": "bb", "status": "unpaid", "amount_msat": 2000},
                    {"label": "old", "payment_hash": "cc", "status": "expired"}
                ]
            })))
            .await;
        settle().await;

        assert_eq!(method, "listinvoices");
        assert_eq!(model.invoices().len(), 3);
        assert_eq!(model.received_msat(), 4000);
        assert_eq!(
            model.find("old").map(|i| i.status),
            Some(InvoiceStatus::Expired)
        );
        assert!(model.find("missing").is_none());
    }

    #[tokio::test]
    async fn test_undecodable_result_is_ignored() {
        let (rpc, mut link) = fake_link();
        let model = InvoicesModel::new(rpc);

        model.refresh();
        link.answer(Ok(json!({"invoices": "nope"}))).await;
        settle().await;

        assert!(model.invoices().is_empty());
    }
}
