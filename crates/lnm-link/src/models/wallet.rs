use tokio::sync::watch;

use lnm_core::Funds;
use lnm_protocol::RawListFunds;

use super::Refresher;
use crate::rpc::RpcHandle;
use crate::sync::Refresh;

/// Wallet balances, from `listfunds`.
pub struct WalletModel {
    inner: Refresher<Funds>,
}

impl WalletModel {
    pub fn new(rpc: RpcHandle) -> Self {
        Self {
            inner: Refresher::new(rpc, "listfunds"),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Funds> {
        self.inner.subscribe()
    }

    pub fn funds(&self) -> Funds {
        *self.inner.borrow()
    }
}

impl Refresh for WalletModel {
    fn name(&self) -> &'static str {
        "wallet"
    }

    fn refresh(&self) {
        self.inner.refresh_with::<RawListFunds>(RawListFunds::to_funds);
    }
}
