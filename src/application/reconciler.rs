use std::sync::Arc;

use tokio::sync::watch;

use super::{AccountStore, EngineConfig, LedgerView, TransactionLedger, derive_view};

/// Recomputes the derived [`LedgerView`] from the account and ledger
/// snapshots and pushes it to every subscriber.
///
/// Never reads the store. A view is replaced wholesale, so subscribers only
/// ever observe complete snapshots.
pub struct Reconciler {
    accounts: Arc<AccountStore>,
    ledger: Arc<TransactionLedger>,
    recent_limit: usize,
    view: watch::Sender<Arc<LedgerView>>,
}

impl Reconciler {
    pub fn new(
        accounts: Arc<AccountStore>,
        ledger: Arc<TransactionLedger>,
        config: &EngineConfig,
    ) -> Self {
        let (view, _) = watch::channel(Arc::new(LedgerView::default()));
        Self {
            accounts,
            ledger,
            recent_limit: config.recent_limit,
            view,
        }
    }

    /// Rebuild the view and notify subscribers.
    pub fn publish(&self) -> Arc<LedgerView> {
        let snapshot = self.accounts.snapshot();
        let transactions = self.ledger.list();
        let view = Arc::new(derive_view(
            &snapshot.accounts,
            snapshot.active.as_ref(),
            &transactions,
            self.recent_limit,
        ));

        if !view.is_consistent() {
            tracing::warn!(
                accounts = view.discrepancies.len(),
                "published view has balances that disagree with the ledger"
            );
        }
        self.view.send_replace(Arc::clone(&view));
        view
    }

    pub fn current(&self) -> Arc<LedgerView> {
        Arc::clone(&self.view.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<LedgerView>> {
        self.view.subscribe()
    }
}
