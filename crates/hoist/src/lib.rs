//! # hoist
//!
//! Mounts a docker image's overlay2 layers as one read-only view and
//! publishes a `<namespace>/<repo>:<tag>` symlink to it inside a
//! transactional store.
//!
//! ## Usage
//!
//! ```text
//! hoist sync centos:7 --store images.example.org
//! ```

#![warn(missing_docs)]

pub mod cli;
