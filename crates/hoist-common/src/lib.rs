//! # hoist-common
//!
//! Shared utilities and types for hoist.
//!
//! This crate provides common functionality used across all hoist crates:
//! - Standard filesystem paths (overlay driver, scratch, store spool and root)
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{HoistError, HoistResult, TxnOp};
pub use paths::HoistPaths;
