//! Standard filesystem paths for hoist.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default overlay2 graph driver root.
pub static HOIST_OVERLAY_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("HOIST_OVERLAY_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/docker/overlay2"))
});

/// Default scratch directory for mount points and placeholder layers.
pub static HOIST_SCRATCH_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("HOIST_SCRATCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
});

/// Default spool directory of the distribution store.
pub static HOIST_SPOOL_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("HOIST_SPOOL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/spool/cvmfs"))
});

/// Default base under which each store is visible.
pub static HOIST_STORE_BASE: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("HOIST_STORE_BASE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/cvmfs"))
});

/// Name of the directory holding overlay2 short links.
const LINK_DIR: &str = "l";

/// Lock file whose presence marks an open store transaction.
const TRANSACTION_LOCK: &str = "in_transaction.lock";

/// Standard paths used by hoist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoistPaths {
    /// overlay2 graph driver root (default: /var/lib/docker/overlay2).
    pub overlay_root: PathBuf,
    /// Scratch directory (default: /tmp).
    pub scratch: PathBuf,
    /// Store spool directory (default: /var/spool/cvmfs).
    pub spool: PathBuf,
    /// Base directory where stores are visible (default: /cvmfs).
    pub store_base: PathBuf,
}

impl HoistPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overlay2 root.
    #[must_use]
    pub fn with_overlay_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.overlay_root = root.into();
        self
    }

    /// Set the scratch directory.
    #[must_use]
    pub fn with_scratch(mut self, scratch: impl Into<PathBuf>) -> Self {
        self.scratch = scratch.into();
        self
    }

    /// Set the store spool directory.
    #[must_use]
    pub fn with_spool(mut self, spool: impl Into<PathBuf>) -> Self {
        self.spool = spool.into();
        self
    }

    /// Set the store base directory.
    #[must_use]
    pub fn with_store_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.store_base = base.into();
        self
    }

    /// Directory of overlay2 short links.
    #[must_use]
    pub fn link_root(&self) -> PathBuf {
        self.overlay_root.join(LINK_DIR)
    }

    /// Spool directory for a specific store.
    #[must_use]
    pub fn store_spool(&self, store: &str) -> PathBuf {
        self.spool.join(store)
    }

    /// Transaction lock file for a store.
    #[must_use]
    pub fn lock_file(&self, store: &str) -> PathBuf {
        self.store_spool(store).join(TRANSACTION_LOCK)
    }

    /// Root of a store as seen by writers.
    #[must_use]
    pub fn store_root(&self, store: &str) -> PathBuf {
        self.store_base.join(store)
    }
}

impl Default for HoistPaths {
    fn default() -> Self {
        Self {
            overlay_root: HOIST_OVERLAY_ROOT.clone(),
            scratch: HOIST_SCRATCH_DIR.clone(),
            spool: HOIST_SPOOL_DIR.clone(),
            store_base: HOIST_STORE_BASE.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_paths() {
        let paths = HoistPaths::new()
            .with_overlay_root("/srv/docker/overlay2")
            .with_spool("/srv/spool")
            .with_store_base("/srv/stores");
        assert_eq!(paths.link_root(), PathBuf::from("/srv/docker/overlay2/l"));
        assert_eq!(
            paths.lock_file("images.example.org"),
            PathBuf::from("/srv/spool/images.example.org/in_transaction.lock")
        );
        assert_eq!(
            paths.store_root("images.example.org"),
            PathBuf::from("/srv/stores/images.example.org")
        );
    }

    #[test]
    fn scratch_override() {
        let paths = HoistPaths::new().with_scratch("/var/tmp/hoist");
        assert_eq!(paths.scratch, PathBuf::from("/var/tmp/hoist"));
    }
}
