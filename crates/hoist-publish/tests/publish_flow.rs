//! Integration tests driving the publish protocol through a scripted store tool.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use hoist_common::HoistPaths;
use hoist_publish::{PublishConfig, PublishCoordinator, PublishStatus};
use tempfile::TempDir;

const STORE: &str = "images.example.org";

/// Writes a fake `cvmfs_server` that logs its arguments and clears the lock on abort.
fn fake_server(dir: &Path, log: &Path, lock: &Path) -> PathBuf {
    let script = dir.join("cvmfs_server");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\necho \"$*\" >> '{}'\nif [ \"$1\" = abort ]; then rm -f '{}'; fi\nexit 0\n",
            log.display(),
            lock.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn logged(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn crash_recovery_then_steady_state() {
    let temp = TempDir::new().unwrap();
    let paths = HoistPaths::new()
        .with_spool(temp.path().join("spool"))
        .with_store_base(temp.path().join("cvmfs"));
    let lock = paths.lock_file(STORE);
    let log = temp.path().join("calls.log");
    let script = fake_server(temp.path(), &log, &lock);

    // A previous run died mid-transaction.
    fs::create_dir_all(lock.parent().unwrap()).unwrap();
    fs::write(&lock, "").unwrap();

    let image = temp.path().join("mnt/hoist-image-1");
    fs::create_dir_all(&image).unwrap();
    fs::create_dir_all(paths.store_root(STORE)).unwrap();

    let config = PublishConfig::default()
        .with_paths(paths.clone())
        .with_store_command(script.display().to_string());
    let txn = config.transaction_manager();
    let publisher = PublishCoordinator::new(&txn, STORE, paths.store_root(STORE))
        .with_retry(config.retry.clone());

    let status = publisher
        .publish_image(&image, "library", "centos", "7")
        .unwrap();
    assert_eq!(status, PublishStatus::Published);
    assert_eq!(
        logged(&log),
        [
            format!("abort -f {STORE}"),
            format!("transaction {STORE}"),
            format!("publish {STORE}"),
        ]
    );
    assert_eq!(
        fs::read_link(paths.store_root(STORE).join("library/centos:7")).unwrap(),
        image
    );

    // Publishing the same image again must not touch the store.
    let status = publisher
        .publish_image(&image, "library", "centos", "7")
        .unwrap();
    assert_eq!(status, PublishStatus::UpToDate);
    assert_eq!(logged(&log).len(), 3);
}
