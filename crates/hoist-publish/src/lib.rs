//! # hoist-publish
//!
//! Publishing into a transactional, versioned distribution store.
//!
//! This crate provides:
//! - Store control commands and the lock file convention ([`StoreControl`], [`CvmfsServer`])
//! - Per-store transaction state with crash recovery ([`TransactionManager`])
//! - Idempotent `<namespace>/<repo>:<tag>` symlink publishing ([`PublishCoordinator`])
//! - Bounded re-checks while the store materializes paths ([`RetryPolicy`])

#![warn(missing_docs)]

pub mod config;
pub mod control;
pub mod publish;
pub mod reference;
pub mod retry;
pub mod transaction;

pub use config::PublishConfig;
pub use control::{CvmfsServer, StoreControl};
pub use hoist_common::TxnOp;
pub use publish::{PublishCoordinator, PublishStatus, PublishTarget};
pub use reference::ImageReference;
pub use retry::RetryPolicy;
pub use transaction::{AbortPolicy, TransactionManager, TxnState};
