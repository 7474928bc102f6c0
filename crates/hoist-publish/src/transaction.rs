//! Store transaction lifecycle.
//!
//! Each store name has its own state machine:
//!
//! ```text
//! Idle --start--> Active --commit--> Idle
//! ```
//!
//! The store's lock file is the only cross-process signal. Finding it on
//! `start` is taken to mean a previous process died mid-transaction, so the
//! lingering transaction is aborted before a fresh one is opened.

use std::collections::HashMap;
use std::sync::Arc;

use hoist_common::{HoistError, HoistResult, TxnOp};
use parking_lot::Mutex;

use crate::control::StoreControl;

/// Transaction state of one store within this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxnState {
    /// No transaction opened by this process.
    #[default]
    Idle,
    /// A transaction opened by this process awaits commit.
    Active,
}

/// What to do when aborting a lingering transaction fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AbortPolicy {
    /// Log a warning and still try to open a new transaction.
    #[default]
    BestEffort,
    /// Fail `start` with the abort error.
    FailFast,
}

/// Tracks and drives store transactions, one mutex per store name.
#[derive(Debug)]
pub struct TransactionManager<C> {
    control: C,
    abort_policy: AbortPolicy,
    stores: Mutex<HashMap<String, Arc<Mutex<TxnState>>>>,
}

impl<C: StoreControl> TransactionManager<C> {
    /// Create a manager with the default abort policy.
    pub fn new(control: C) -> Self {
        Self::with_abort_policy(control, AbortPolicy::default())
    }

    /// Create a manager with an explicit abort policy.
    pub fn with_abort_policy(control: C, abort_policy: AbortPolicy) -> Self {
        Self {
            control,
            abort_policy,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The store control in use.
    pub fn control(&self) -> &C {
        &self.control
    }

    fn slot(&self, store: &str) -> Arc<Mutex<TxnState>> {
        Arc::clone(self.stores.lock().entry(store.to_string()).or_default())
    }

    /// Current state for `store`.
    pub fn state(&self, store: &str) -> TxnState {
        *self.slot(store).lock()
    }

    /// Whether this process holds an open transaction on `store`.
    pub fn is_active(&self, store: &str) -> bool {
        self.state(store) == TxnState::Active
    }

    /// Open a transaction on `store` unless this process already holds one.
    ///
    /// # Errors
    ///
    /// Returns [`HoistError::Transaction`] when the begin command fails (the
    /// state stays idle and no writes may follow). Under
    /// [`AbortPolicy::FailFast`] a failed or unspawnable abort of a lingering
    /// transaction is returned as well.
    pub fn start(&self, store: &str) -> HoistResult<()> {
        let slot = self.slot(store);
        let mut state = slot.lock();
        if *state == TxnState::Active {
            return Ok(());
        }

        if self.control.has_lingering_transaction(store) {
            tracing::info!(store, "Aborting lingering transaction");
            let failure = match self.control.run(TxnOp::Abort, store) {
                Ok(0) => None,
                Ok(status) => Some(HoistError::Transaction {
                    store: store.to_string(),
                    op: TxnOp::Abort,
                    status,
                }),
                Err(e) => Some(e),
            };
            if let Some(error) = failure {
                match self.abort_policy {
                    AbortPolicy::BestEffort => tracing::warn!(
                        store,
                        %error,
                        "Failed to abort lingering transaction; trying to start anyway"
                    ),
                    AbortPolicy::FailFast => return Err(error),
                }
            }
        }

        let status = self.control.run(TxnOp::Begin, store)?;
        if status != 0 {
            tracing::error!(store, status, "Transaction start failed; will not attempt update");
            return Err(HoistError::Transaction {
                store: store.to_string(),
                op: TxnOp::Begin,
                status,
            });
        }

        *state = TxnState::Active;
        tracing::info!(store, "Transaction started");
        Ok(())
    }

    /// Publish the transaction this process opened on `store`, if any.
    ///
    /// The state returns to idle whatever the publish command reports.
    ///
    /// # Errors
    ///
    /// Returns [`HoistError::Transaction`] carrying the publish exit status.
    pub fn commit(&self, store: &str) -> HoistResult<()> {
        let slot = self.slot(store);
        let mut state = slot.lock();
        if *state == TxnState::Idle {
            return Ok(());
        }

        *state = TxnState::Idle;
        let status = self.control.run(TxnOp::Publish, store)?;
        if status != 0 {
            return Err(HoistError::Transaction {
                store: store.to_string(),
                op: TxnOp::Publish,
                status,
            });
        }

        tracing::info!(store, "Transaction published");
        Ok(())
    }
}
