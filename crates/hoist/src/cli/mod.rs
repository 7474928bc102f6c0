//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use hoist_common::HoistPaths;
use hoist_mount::overlay::lowerdir_option;
use hoist_mount::{
    DockerInspect, ImageSource, MountCapability, MountCleanup, MountHandle, OverlayMounter,
    SystemMount,
};
use hoist_publish::{
    AbortPolicy, ImageReference, PublishConfig, PublishCoordinator, PublishStatus, RetryPolicy,
};

/// Exit status telling the caller to retry later (`EX_TEMPFAIL`).
const EXIT_PENDING: u8 = 75;

/// hoist - read-only image mounts published into a transactional store
#[derive(Parser)]
#[command(name = "hoist")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// overlay2 graph driver root
    #[arg(
        long,
        global = true,
        env = "HOIST_OVERLAY_ROOT",
        default_value = "/var/lib/docker/overlay2"
    )]
    pub overlay_root: PathBuf,

    /// Directory for mount points and placeholder layers
    #[arg(long, global = true, env = "HOIST_SCRATCH_DIR", default_value = "/tmp")]
    pub scratch_dir: PathBuf,

    /// Store spool directory (holds the transaction lock files)
    #[arg(
        long,
        global = true,
        env = "HOIST_SPOOL_DIR",
        default_value = "/var/spool/cvmfs"
    )]
    pub spool_dir: PathBuf,

    /// Directory under which each store is visible
    #[arg(long, global = true, env = "HOIST_STORE_BASE", default_value = "/cvmfs")]
    pub store_base: PathBuf,

    /// Docker CLI used to inspect images
    #[arg(long, global = true, default_value = "docker")]
    pub docker: String,

    /// Store control program
    #[arg(long, global = true, default_value = "cvmfs_server")]
    pub store_command: String,

    /// What to do when a lingering transaction cannot be aborted
    #[arg(long, global = true, value_enum, default_value_t = AbortMode::BestEffort)]
    pub abort_policy: AbortMode,

    /// How many times to check for a missing image path after opening a transaction
    #[arg(long, global = true, default_value_t = 1)]
    pub retry_attempts: u32,

    /// Delay before the second check, doubled for each further check
    #[arg(long, global = true, default_value_t = 0)]
    pub retry_interval_ms: u64,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Handling of a failed abort of a lingering transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AbortMode {
    /// Warn and open a new transaction anyway
    BestEffort,
    /// Stop before opening a new transaction
    FailFast,
}

impl From<AbortMode> for AbortPolicy {
    fn from(mode: AbortMode) -> Self {
        match mode {
            AbortMode::BestEffort => Self::BestEffort,
            AbortMode::FailFast => Self::FailFast,
        }
    }
}

/// Helper commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Print the overlay options an image would be mounted with
    Resolve {
        /// Image name or ID
        image: String,
    },

    /// Mount an image read-only and print the mount point
    Mount {
        /// Image name or ID
        image: String,
    },

    /// Unmount an image mounted by `hoist mount`
    Unmount {
        /// Mount point
        mount_point: PathBuf,

        /// Placeholder directory printed by `hoist mount`
        #[arg(long)]
        cleanup_dir: Option<PathBuf>,
    },

    /// Point <namespace>/<repo>:<tag> in a store at an image directory and commit
    Publish {
        /// Image directory the symlink should point at
        image_path: PathBuf,

        /// Reference naming the symlink ([namespace/]repo[:tag])
        reference: String,

        /// Store name
        #[arg(long)]
        store: String,

        /// Store root (default: <store-base>/<store>)
        #[arg(long)]
        store_root: Option<PathBuf>,
    },

    /// Mount an image and publish the mount point
    Sync {
        /// Image name or ID
        image: String,

        /// Store name
        #[arg(long)]
        store: String,

        /// Reference naming the symlink (default: the image name)
        #[arg(long)]
        reference: Option<String>,

        /// Store root (default: <store-base>/<store>)
        #[arg(long)]
        store_root: Option<PathBuf>,
    },
}

impl Cli {
    fn paths(&self) -> HoistPaths {
        HoistPaths::new()
            .with_overlay_root(&self.overlay_root)
            .with_scratch(&self.scratch_dir)
            .with_spool(&self.spool_dir)
            .with_store_base(&self.store_base)
    }

    fn publish_config(&self) -> PublishConfig {
        let retry = if self.retry_interval_ms == 0 {
            RetryPolicy {
                attempts: self.retry_attempts,
                ..RetryPolicy::default()
            }
        } else {
            RetryPolicy::exponential(
                self.retry_attempts,
                Duration::from_millis(self.retry_interval_ms),
            )
        };

        PublishConfig::default()
            .with_paths(self.paths())
            .with_store_command(&self.store_command)
            .with_abort_policy(self.abort_policy.into())
            .with_retry(retry)
    }

    /// Execute the CLI command.
    pub fn execute(self) -> Result<ExitCode> {
        let paths = self.paths();
        let source = DockerInspect::new(&self.docker);

        match &self.command {
            Commands::Resolve { image } => {
                let layers = source.layers(image)?;
                let mounter = OverlayMounter::from_paths(&paths, SystemMount);
                let links = mounter.resolver().lower_dirs(&layers)?;
                let placeholder = layers
                    .needs_placeholder()
                    .then(|| paths.scratch.join("empty-dir-XXXXXX"));
                println!("{}", lowerdir_option(&links, placeholder.as_deref()));
                Ok(ExitCode::SUCCESS)
            }

            Commands::Mount { image } => {
                let handle = mount_image(&source, &paths, image)?;
                println!("mount-point: {}", handle.mount_point.display());
                if let Some(dir) = &handle.cleanup_dir {
                    println!("cleanup-dir: {}", dir.display());
                }
                Ok(ExitCode::SUCCESS)
            }

            Commands::Unmount {
                mount_point,
                cleanup_dir,
            } => {
                MountCleanup::new(SystemMount).cleanup(MountHandle {
                    mount_point: mount_point.clone(),
                    cleanup_dir: cleanup_dir.clone(),
                })?;
                println!("Unmounted {}", mount_point.display());
                Ok(ExitCode::SUCCESS)
            }

            Commands::Publish {
                image_path,
                reference,
                store,
                store_root,
            } => self.publish(image_path, reference, store, store_root.as_deref()),

            Commands::Sync {
                image,
                store,
                reference,
                store_root,
            } => {
                let handle = mount_image(&source, &paths, image)?;
                println!("mount-point: {}", handle.mount_point.display());
                if let Some(dir) = &handle.cleanup_dir {
                    println!("cleanup-dir: {}", dir.display());
                }
                let reference = reference.as_deref().unwrap_or(image);
                let published =
                    self.publish(&handle.mount_point, reference, store, store_root.as_deref());
                release_on_error(SystemMount, handle, published)
            }
        }
    }

    fn publish(
        &self,
        image_path: &Path,
        reference: &str,
        store: &str,
        store_root: Option<&Path>,
    ) -> Result<ExitCode> {
        let reference = ImageReference::parse(reference)?;
        let config = self.publish_config();
        let store_root =
            store_root.map_or_else(|| config.paths.store_root(store), Path::to_path_buf);

        let txn = config.transaction_manager();
        let publisher =
            PublishCoordinator::new(&txn, store, store_root).with_retry(config.retry.clone());

        let status = publisher.publish_image(
            image_path,
            &reference.namespace,
            &reference.repository,
            &reference.tag,
        )?;

        let name = format!(
            "{}/{}:{}",
            reference.namespace, reference.repository, reference.tag
        );
        match status {
            PublishStatus::Published => {
                println!("Published {name} -> {}", image_path.display());
                Ok(ExitCode::SUCCESS)
            }
            PublishStatus::UpToDate => {
                println!("Image is already latest revision.");
                Ok(ExitCode::SUCCESS)
            }
            PublishStatus::Pending => {
                println!(
                    "Image dir, {}, does not exist; triggered store mount. Retry once it is materialized.",
                    image_path.display()
                );
                Ok(ExitCode::from(EXIT_PENDING))
            }
        }
    }
}

fn mount_image(source: &impl ImageSource, paths: &HoistPaths, image: &str) -> Result<MountHandle> {
    let layers = source.layers(image)?;
    let mounter = OverlayMounter::from_paths(paths, SystemMount);
    let prepared = mounter.prepare(&layers)?;

    if let Err(e) = mounter.attach(&prepared) {
        if let Err(cleanup) = MountCleanup::<SystemMount>::discard(prepared.into_handle()) {
            tracing::warn!(error = %cleanup, "Failed to remove scratch directories");
        }
        return Err(e.into());
    }
    Ok(prepared.into_handle())
}

/// Unmount `handle` when `result` failed, naming the mount point in the error.
fn release_on_error<M: MountCapability, T>(
    capability: M,
    handle: MountHandle,
    result: Result<T>,
) -> Result<T> {
    if result.is_ok() {
        return result;
    }

    let mount_point = handle.mount_point.clone();
    if let Err(cleanup) = MountCleanup::new(capability).cleanup(handle) {
        tracing::warn!(
            mount_point = %mount_point.display(),
            error = %cleanup,
            "Failed to unmount after publish error"
        );
    }
    result.wrap_err_with(|| format!("Failed to publish mount point {}", mount_point.display()))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use color_eyre::eyre::eyre;
    use hoist_common::HoistResult;

    use super::*;

    #[derive(Default)]
    struct Unmounts(RefCell<Vec<PathBuf>>);

    impl MountCapability for Unmounts {
        fn mount(&self, _: &str, _: &Path, _: &str, _: &str) -> HoistResult<()> {
            Ok(())
        }

        fn unmount(&self, target: &Path) -> HoistResult<()> {
            self.0.borrow_mut().push(target.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn failed_publish_releases_mount() {
        let temp = tempfile::tempdir().unwrap();
        let mount_point = temp.path().join("hoist-image-1");
        std::fs::create_dir(&mount_point).unwrap();
        let unmounts = Unmounts::default();
        let handle = MountHandle {
            mount_point: mount_point.clone(),
            cleanup_dir: None,
        };

        let err = release_on_error(&unmounts, handle, Err::<(), _>(eyre!("store down")))
            .unwrap_err();

        assert!(err.to_string().contains(&mount_point.display().to_string()));
        assert_eq!(*unmounts.0.borrow(), [mount_point.clone()]);
        assert!(!mount_point.exists());
    }

    #[test]
    fn successful_publish_keeps_mount() {
        let temp = tempfile::tempdir().unwrap();
        let unmounts = Unmounts::default();
        let handle = MountHandle {
            mount_point: temp.path().to_path_buf(),
            cleanup_dir: None,
        };

        release_on_error(&unmounts, handle, Ok(())).unwrap();

        assert!(unmounts.0.borrow().is_empty());
        assert!(temp.path().is_dir());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn retry_flags_build_policy() {
        let cli = Cli::parse_from([
            "hoist",
            "--retry-attempts",
            "4",
            "--retry-interval-ms",
            "250",
            "--abort-policy",
            "fail-fast",
            "publish",
            "/tmp/img",
            "centos:7",
            "--store",
            "r.org",
        ]);
        let config = cli.publish_config();
        assert_eq!(config.retry.attempts, 4);
        assert_eq!(config.retry.interval, Duration::from_millis(250));
        assert_eq!(config.abort_policy, AbortPolicy::FailFast);
    }
}
