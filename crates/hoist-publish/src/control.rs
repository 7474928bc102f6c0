//! Store transaction control commands.

use std::path::PathBuf;
use std::process::Command;

use hoist_common::{HoistError, HoistPaths, HoistResult, TxnOp};

/// Control surface of a transactional store.
pub trait StoreControl {
    /// Run a control operation and return its exit status (-1 if killed by a signal).
    ///
    /// # Errors
    ///
    /// Returns [`HoistError::Command`] when the command cannot be started.
    fn run(&self, op: TxnOp, store: &str) -> HoistResult<i32>;

    /// Whether the store's lock file marks an open transaction.
    fn has_lingering_transaction(&self, store: &str) -> bool;
}

impl<T: StoreControl + ?Sized> StoreControl for &T {
    fn run(&self, op: TxnOp, store: &str) -> HoistResult<i32> {
        (**self).run(op, store)
    }

    fn has_lingering_transaction(&self, store: &str) -> bool {
        (**self).has_lingering_transaction(store)
    }
}

/// `cvmfs_server` style control tool.
#[derive(Debug, Clone)]
pub struct CvmfsServer {
    program: String,
    paths: HoistPaths,
}

impl CvmfsServer {
    /// Default control program.
    pub const DEFAULT_PROGRAM: &'static str = "cvmfs_server";

    /// Use `program` with the spool directory from `paths`.
    pub fn new(program: impl Into<String>, paths: HoistPaths) -> Self {
        Self {
            program: program.into(),
            paths,
        }
    }

    /// Command line arguments for an operation.
    #[must_use]
    pub fn args(op: TxnOp, store: &str) -> Vec<&str> {
        match op {
            TxnOp::Abort => vec![op.as_str(), "-f", store],
            TxnOp::Begin | TxnOp::Publish => vec![op.as_str(), store],
        }
    }

    /// Lock file for `store`.
    #[must_use]
    pub fn lock_file(&self, store: &str) -> PathBuf {
        self.paths.lock_file(store)
    }
}

impl Default for CvmfsServer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PROGRAM, HoistPaths::default())
    }
}

impl StoreControl for CvmfsServer {
    fn run(&self, op: TxnOp, store: &str) -> HoistResult<i32> {
        let args = Self::args(op, store);
        tracing::debug!(program = %self.program, ?args, "Running store control command");

        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .map_err(|e| HoistError::Command {
                program: self.program.clone(),
                message: format!("{} {}: {}", self.program, args.join(" "), e),
            })?;

        if !status.success() {
            tracing::debug!(%status, store, %op, "Store control command failed");
        }
        Ok(status.code().unwrap_or(-1))
    }

    fn has_lingering_transaction(&self, store: &str) -> bool {
        self.lock_file(store).exists()
    }
}
