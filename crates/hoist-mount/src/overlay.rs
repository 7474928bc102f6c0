//! Read-only OverlayFS views of layered images.
//!
//! All layers, including the image's designated upper layer, are stacked as
//! `lowerdir` entries and no `upperdir`/`workdir` is supplied, so the kernel
//! mounts the result read-only.

use std::fs;
use std::path::{Path, PathBuf};

use hoist_common::{HoistError, HoistPaths, HoistResult};

use crate::layers::{LayerResolver, LayerSet};
use crate::mounts::MountCapability;

const OVERLAY: &str = "overlay";
const MOUNT_POINT_PREFIX: &str = "hoist-image-";
const PLACEHOLDER_PREFIX: &str = "empty-dir-";

/// Build the `lowerdir=` option; entries listed first shadow later ones.
#[must_use]
pub fn lowerdir_option(links: &[PathBuf], placeholder: Option<&Path>) -> String {
    let lower = links
        .iter()
        .map(PathBuf::as_path)
        .chain(placeholder)
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":");
    format!("lowerdir={lower}")
}

/// A mounted composite view and the scratch directories backing it.
#[derive(Debug, PartialEq, Eq)]
pub struct MountHandle {
    /// Where the overlay is (or was to be) mounted.
    pub mount_point: PathBuf,
    /// Empty placeholder layer created for single-layer images.
    pub cleanup_dir: Option<PathBuf>,
}

/// Scratch directories allocated and the option string assembled for one mount.
#[derive(Debug)]
pub struct PreparedMount {
    handle: MountHandle,
    options: String,
}

impl PreparedMount {
    /// The handle this mount will produce.
    pub fn handle(&self) -> &MountHandle {
        &self.handle
    }

    /// The overlay option string.
    pub fn options(&self) -> &str {
        &self.options
    }

    /// Give up the prepared mount, keeping ownership of its directories.
    pub fn into_handle(self) -> MountHandle {
        self.handle
    }
}

/// Builds read-only overlay mounts from layer sets.
#[derive(Debug, Clone)]
pub struct OverlayMounter<M> {
    resolver: LayerResolver,
    scratch: PathBuf,
    capability: M,
}

impl<M: MountCapability> OverlayMounter<M> {
    /// Create a mounter allocating its directories under `scratch`.
    pub fn new(resolver: LayerResolver, scratch: impl Into<PathBuf>, capability: M) -> Self {
        Self {
            resolver,
            scratch: scratch.into(),
            capability,
        }
    }

    /// Create a mounter from the standard paths.
    pub fn from_paths(paths: &HoistPaths, capability: M) -> Self {
        Self::new(
            LayerResolver::new(paths.link_root()),
            paths.scratch.clone(),
            capability,
        )
    }

    /// The link resolver in use.
    pub fn resolver(&self) -> &LayerResolver {
        &self.resolver
    }

    /// Resolve layers and allocate the mount point (and placeholder, if needed).
    ///
    /// # Errors
    ///
    /// Fails on an empty layer set, on resolution errors, or when the scratch
    /// directories cannot be created.
    pub fn prepare(&self, layers: &LayerSet) -> HoistResult<PreparedMount> {
        if layers.is_empty() {
            return Err(HoistError::Config {
                message: "image has no layer directories to mount".to_string(),
            });
        }

        let links = self.resolver.lower_dirs(layers)?;

        let cleanup_dir = if layers.needs_placeholder() {
            Some(self.scratch_dir(PLACEHOLDER_PREFIX)?)
        } else {
            None
        };
        let options = lowerdir_option(&links, cleanup_dir.as_deref());

        let mount_point = match self.scratch_dir(MOUNT_POINT_PREFIX) {
            Ok(dir) => dir,
            Err(e) => {
                if let Some(dir) = &cleanup_dir {
                    remove_scratch(dir);
                }
                return Err(e);
            }
        };

        tracing::debug!(
            mount_point = %mount_point.display(),
            layers = links.len(),
            placeholder = cleanup_dir.is_some(),
            "Prepared overlay mount"
        );

        Ok(PreparedMount {
            handle: MountHandle {
                mount_point,
                cleanup_dir,
            },
            options,
        })
    }

    /// Mount a prepared overlay.
    ///
    /// Scratch directories are not removed on failure; pass the handle to
    /// [`MountCleanup::discard`] to abandon it.
    ///
    /// # Errors
    ///
    /// Returns [`HoistError::Mount`] when the mount primitive fails.
    pub fn attach(&self, prepared: &PreparedMount) -> HoistResult<()> {
        self.capability.mount(
            OVERLAY,
            &prepared.handle.mount_point,
            OVERLAY,
            &prepared.options,
        )
    }

    /// Prepare and mount in one step.
    ///
    /// # Errors
    ///
    /// See [`OverlayMounter::prepare`] and [`OverlayMounter::attach`]. When the
    /// mount itself fails the scratch directories named in the error remain.
    pub fn mount(&self, layers: &LayerSet) -> HoistResult<MountHandle> {
        let prepared = self.prepare(layers)?;
        self.attach(&prepared)?;
        Ok(prepared.into_handle())
    }

    fn scratch_dir(&self, prefix: &str) -> HoistResult<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.scratch)?;
        Ok(dir.keep())
    }
}

/// Remove an unused scratch directory; failures are logged, not returned.
fn remove_scratch(dir: &Path) -> bool {
    match fs::remove_dir(dir) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove scratch directory");
            false
        }
    }
}

/// Tears down mounts made by [`OverlayMounter`].
#[derive(Debug, Clone)]
pub struct MountCleanup<M> {
    capability: M,
}

impl<M: MountCapability> MountCleanup<M> {
    /// Create a cleanup using `capability` to unmount.
    pub const fn new(capability: M) -> Self {
        Self { capability }
    }

    /// Unmount and remove the handle's directories.
    ///
    /// # Errors
    ///
    /// An unmount failure leaves both directories in place.
    pub fn cleanup(&self, handle: MountHandle) -> HoistResult<()> {
        self.capability.unmount(&handle.mount_point)?;
        Self::discard(handle)
    }

    /// Remove the directories of a handle that is not mounted.
    ///
    /// # Errors
    ///
    /// Propagates directory removal failures.
    pub fn discard(handle: MountHandle) -> HoistResult<()> {
        fs::remove_dir(&handle.mount_point)?;
        if let Some(dir) = &handle.cleanup_dir {
            fs::remove_dir(dir)?;
        }
        tracing::debug!(mount_point = %handle.mount_point.display(), "Removed mount directories");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::layers::write_layer;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Mount {
            source: String,
            target: PathBuf,
            fstype: String,
            options: String,
        },
        Unmount(PathBuf),
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<Call>>,
        fail_with: Option<&'static str>,
    }

    impl MountCapability for Recorder {
        fn mount(
            &self,
            source: &str,
            target: &Path,
            fstype: &str,
            options: &str,
        ) -> HoistResult<()> {
            self.calls.borrow_mut().push(Call::Mount {
                source: source.to_string(),
                target: target.to_path_buf(),
                fstype: fstype.to_string(),
                options: options.to_string(),
            });
            match self.fail_with {
                Some(message) => Err(HoistError::Mount {
                    fs_source: source.to_string(),
                    target: target.to_path_buf(),
                    fstype: fstype.to_string(),
                    options: options.to_string(),
                    message: message.to_string(),
                }),
                None => Ok(()),
            }
        }

        fn unmount(&self, target: &Path) -> HoistResult<()> {
            self.calls.borrow_mut().push(Call::Unmount(target.to_path_buf()));
            Ok(())
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        root: PathBuf,
        scratch: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().unwrap();
            let root = temp.path().join("overlay2");
            let scratch = temp.path().join("scratch");
            fs::create_dir_all(&scratch).unwrap();
            Self {
                root,
                scratch,
                _temp: temp,
            }
        }

        fn layer(&self, id: &str, link: &str) -> PathBuf {
            write_layer(&self.root, id, link).unwrap()
        }

        fn mounter<'a>(&self, recorder: &'a Recorder) -> OverlayMounter<&'a Recorder> {
            OverlayMounter::new(LayerResolver::new(self.root.join("l")), &self.scratch, recorder)
        }
    }

    #[test]
    fn lowerdir_option_joins_in_order() {
        let option = lowerdir_option(
            &[PathBuf::from("/l/A"), PathBuf::from("/l/B")],
            Some(Path::new("/tmp/empty-dir-1")),
        );
        assert_eq!(option, "lowerdir=/l/A:/l/B:/tmp/empty-dir-1");
    }

    #[test_log::test]
    fn scratch_removal_failure_is_reported() {
        let fx = Fixture::new();
        let busy = fx.scratch.join("empty-dir-busy");
        fs::create_dir_all(busy.join("child")).unwrap();
        let idle = fx.scratch.join("empty-dir-idle");
        fs::create_dir_all(&idle).unwrap();

        assert!(!remove_scratch(&busy));
        assert!(busy.is_dir());
        assert!(remove_scratch(&idle));
        assert!(!idle.exists());
    }

    #[test]
    fn single_layer_gets_placeholder() {
        let fx = Fixture::new();
        let upper = fx.layer("u", "UPPER");
        let recorder = Recorder::default();

        let handle = fx
            .mounter(&recorder)
            .mount(&LayerSet::new(vec![upper], vec![]))
            .unwrap();

        let placeholder = handle.cleanup_dir.clone().unwrap();
        assert!(placeholder.is_dir());
        assert!(handle.mount_point.is_dir());
        assert_eq!(
            recorder.calls.borrow()[0],
            Call::Mount {
                source: "overlay".to_string(),
                target: handle.mount_point.clone(),
                fstype: "overlay".to_string(),
                options: format!(
                    "lowerdir={}:{}",
                    fx.root.join("l/UPPER").display(),
                    placeholder.display()
                ),
            }
        );
    }

    #[test]
    fn multi_layer_puts_upper_first() {
        let fx = Fixture::new();
        let upper = fx.layer("u", "UPPER");
        let l1 = fx.layer("l1", "LOWER1");
        let l2 = fx.layer("l2", "LOWER2");
        let recorder = Recorder::default();

        let handle = fx
            .mounter(&recorder)
            .mount(&LayerSet::new(vec![upper], vec![l1, l2]))
            .unwrap();

        assert!(handle.cleanup_dir.is_none());
        let link = |name: &str| fx.root.join("l").join(name).display().to_string();
        let expected = format!(
            "lowerdir={}:{}:{}",
            link("UPPER"),
            link("LOWER1"),
            link("LOWER2")
        );
        assert!(matches!(
            &recorder.calls.borrow()[0],
            Call::Mount { options, .. } if *options == expected
        ));
    }

    #[test]
    fn options_never_contain_upperdir() {
        let fx = Fixture::new();
        let upper = fx.layer("u", "UPPER");
        let lower = fx.layer("d", "LOWER");
        let recorder = Recorder::default();

        let prepared = fx
            .mounter(&recorder)
            .prepare(&LayerSet::new(vec![upper], vec![lower]))
            .unwrap();
        assert!(!prepared.options().contains("upperdir"));
        assert!(!prepared.options().contains("workdir"));
    }

    #[test]
    fn empty_layer_set_is_rejected() {
        let fx = Fixture::new();
        let recorder = Recorder::default();

        let err = fx.mounter(&recorder).mount(&LayerSet::default()).unwrap_err();
        assert!(matches!(err, HoistError::Config { .. }));
        assert!(recorder.calls.borrow().is_empty());
    }

    #[test]
    fn missing_layer_never_reaches_mount() {
        let fx = Fixture::new();
        let upper = fx.layer("u", "UPPER");
        let recorder = Recorder::default();

        let err = fx
            .mounter(&recorder)
            .mount(&LayerSet::new(vec![upper], vec![fx.root.join("gone/diff")]))
            .unwrap_err();
        assert!(matches!(err, HoistError::MissingLayer { .. }));
        assert!(recorder.calls.borrow().is_empty());
        assert_eq!(fs::read_dir(&fx.scratch).unwrap().count(), 0);
    }

    #[test_log::test]
    fn mount_failure_reports_context_and_keeps_scratch() {
        let fx = Fixture::new();
        let upper = fx.layer("u", "UPPER");
        let recorder = Recorder {
            fail_with: Some("Operation not permitted"),
            ..Recorder::default()
        };
        let mounter = fx.mounter(&recorder);

        let prepared = mounter.prepare(&LayerSet::new(vec![upper], vec![])).unwrap();
        let err = mounter.attach(&prepared).unwrap_err();
        match err {
            HoistError::Mount {
                fs_source,
                target,
                fstype,
                options,
                message,
            } => {
                assert_eq!(fs_source, "overlay");
                assert_eq!(fstype, "overlay");
                assert_eq!(target, prepared.handle().mount_point);
                assert_eq!(options, prepared.options());
                assert_eq!(message, "Operation not permitted");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let handle = prepared.into_handle();
        assert!(handle.mount_point.is_dir());
        MountCleanup::<&Recorder>::discard(handle).unwrap();
        assert_eq!(fs::read_dir(&fx.scratch).unwrap().count(), 0);
    }

    #[test]
    fn cleanup_single_layer_removes_both_directories() {
        let fx = Fixture::new();
        let upper = fx.layer("u", "UPPER");
        let recorder = Recorder::default();
        let handle = fx
            .mounter(&recorder)
            .mount(&LayerSet::new(vec![upper], vec![]))
            .unwrap();
        let mount_point = handle.mount_point.clone();
        let placeholder = handle.cleanup_dir.clone().unwrap();

        MountCleanup::new(&recorder).cleanup(handle).unwrap();

        assert!(!mount_point.exists());
        assert!(!placeholder.exists());
        assert_eq!(
            recorder.calls.borrow().last(),
            Some(&Call::Unmount(mount_point))
        );
    }

    #[test]
    fn cleanup_multi_layer_removes_mount_point_only() {
        let fx = Fixture::new();
        let upper = fx.layer("u", "UPPER");
        let lower = fx.layer("d", "LOWER");
        let recorder = Recorder::default();
        let handle = fx
            .mounter(&recorder)
            .mount(&LayerSet::new(vec![upper], vec![lower]))
            .unwrap();
        let mount_point = handle.mount_point.clone();

        MountCleanup::new(&recorder).cleanup(handle).unwrap();

        assert!(!mount_point.exists());
        assert_eq!(fs::read_dir(&fx.scratch).unwrap().count(), 0);
    }
}
