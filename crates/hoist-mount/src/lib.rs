//! # hoist-mount
//!
//! Read-only overlay mounts of layered container images.
//!
//! This crate provides:
//! - Image metadata lookup ([`ImageSource`], [`DockerInspect`])
//! - Short link resolution for overlay2 layers ([`LayerResolver`])
//! - Overlay mount construction and teardown ([`OverlayMounter`], [`MountCleanup`])
//! - The mount primitive seam ([`MountCapability`], [`SystemMount`])

#![warn(missing_docs)]

pub mod layers;
pub mod mounts;
pub mod overlay;
pub mod source;

pub use layers::{LayerResolver, LayerSet, LinkedLayer};
pub use mounts::{MountCapability, MountParam, SystemMount};
pub use overlay::{MountCleanup, MountHandle, OverlayMounter, PreparedMount};
pub use source::{DockerInspect, GraphDriver, GraphDriverData, ImageSource};
