//! Publishing image symlinks into a transactional store.
//!
//! The published layout is `<store-root>/<namespace>/<repo>:<tag>`, a
//! symlink to the image directory. Replacing a stale link is an unlink
//! followed by a symlink; that is only safe because every mutation happens
//! inside a store transaction and becomes visible at commit. Never point a
//! [`PublishCoordinator`] at a store without transactional commit semantics.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hoist_common::{HoistError, HoistResult};

use crate::control::StoreControl;
use crate::retry::RetryPolicy;
use crate::transaction::TransactionManager;

/// Outcome of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    /// The symlink was created or replaced.
    Published,
    /// The symlink already pointed at the image; nothing was touched.
    UpToDate,
    /// The image path is not materialized yet; retry later. The store
    /// transaction is left open.
    Pending,
}

/// Where a (namespace, repository, tag) symlink lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    /// Store root.
    pub store_root: PathBuf,
    /// Namespace directory.
    pub namespace: String,
    /// Repository name.
    pub repo: String,
    /// Tag.
    pub tag: String,
}

impl PublishTarget {
    /// Create a target.
    pub fn new(
        store_root: impl Into<PathBuf>,
        namespace: impl Into<String>,
        repo: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            store_root: store_root.into(),
            namespace: namespace.into(),
            repo: repo.into(),
            tag: tag.into(),
        }
    }

    /// `<store-root>/<namespace>/<repo>:<tag>`.
    #[must_use]
    pub fn link_path(&self) -> PathBuf {
        self.store_root
            .join(&self.namespace)
            .join(format!("{}:{}", self.repo, self.tag))
    }
}

/// Create `dir` and its parents; an existing directory is fine.
fn ensure_dir(dir: &Path) -> HoistResult<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Points published symlinks at image directories inside store transactions.
#[derive(Debug)]
pub struct PublishCoordinator<'a, C> {
    txn: &'a TransactionManager<C>,
    store: String,
    store_root: PathBuf,
    retry: RetryPolicy,
}

impl<'a, C: StoreControl> PublishCoordinator<'a, C> {
    /// Create a coordinator publishing under `store_root` of `store`.
    pub fn new(
        txn: &'a TransactionManager<C>,
        store: impl Into<String>,
        store_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            txn,
            store: store.into(),
            store_root: store_root.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Re-check policy used while waiting for an image path to materialize.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The store name.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Target for (namespace, repo, tag) in this store.
    pub fn target(&self, namespace: &str, repo: &str, tag: &str) -> PublishTarget {
        PublishTarget::new(&self.store_root, namespace, repo, tag)
    }

    /// Make `<namespace>/<repo>:<tag>` point at `image_path`.
    ///
    /// Does not commit. Returns [`PublishStatus::UpToDate`] without opening a
    /// transaction when the link already has the right value.
    ///
    /// # Errors
    ///
    /// Transaction start failures, [`HoistError::TargetConflict`] when the
    /// target is not a symlink, and filesystem errors.
    pub fn publish_symlink(
        &self,
        image_path: &Path,
        namespace: &str,
        repo: &str,
        tag: &str,
    ) -> HoistResult<PublishStatus> {
        let link = self.target(namespace, repo, tag).link_path();

        if let Some(parent) = link.parent() {
            if !parent.exists() {
                self.txn.start(&self.store)?;
                ensure_dir(parent)?;
            }
        }

        match fs::read_link(&link) {
            Ok(current) if current == image_path => {
                tracing::info!(link = %link.display(), "Image is already latest revision");
                return Ok(PublishStatus::UpToDate);
            }
            Ok(current) => {
                self.txn.start(&self.store)?;
                tracing::debug!(
                    link = %link.display(),
                    old = %current.display(),
                    "Removing stale symlink"
                );
                fs::remove_file(&link)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                return Err(HoistError::TargetConflict { path: link });
            }
            Err(e) => return Err(e.into()),
        }

        self.txn.start(&self.store)?;
        std::os::unix::fs::symlink(image_path, &link)?;
        tracing::info!(
            link = %link.display(),
            image = %image_path.display(),
            "Published symlink"
        );
        Ok(PublishStatus::Published)
    }

    /// Publish `image_path` and commit, or ask the caller to retry.
    ///
    /// When the image path is missing, opening a transaction is expected to
    /// make the store materialize it; it is re-checked per the retry policy.
    /// If it never shows up the path is created as a directory and
    /// [`PublishStatus::Pending`] is returned with the transaction still open.
    ///
    /// # Errors
    ///
    /// See [`PublishCoordinator::publish_symlink`]; commit failures surface
    /// as [`HoistError::Transaction`].
    pub fn publish_image(
        &self,
        image_path: &Path,
        namespace: &str,
        repo: &str,
        tag: &str,
    ) -> HoistResult<PublishStatus> {
        if !image_path.exists() {
            tracing::info!(
                image = %image_path.display(),
                "Image dir does not exist; triggering store mount"
            );
            self.txn.start(&self.store)?;

            if !self.retry.poll(|| image_path.exists()) {
                ensure_dir(image_path)?;
                return Ok(PublishStatus::Pending);
            }
        }

        let status = self.publish_symlink(image_path, namespace, repo, tag)?;
        self.txn.commit(&self.store)?;
        Ok(status)
    }
}
