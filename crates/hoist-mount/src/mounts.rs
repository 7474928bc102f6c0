//! Mount operations.

use std::path::Path;

use hoist_common::HoistResult;

/// The platform's mount and unmount primitives.
pub trait MountCapability {
    /// Mount `source` of kind `fstype` on `target` with a comma separated option string.
    ///
    /// # Errors
    ///
    /// Returns [`hoist_common::HoistError::Mount`] carrying the OS error text.
    fn mount(&self, source: &str, target: &Path, fstype: &str, options: &str) -> HoistResult<()>;

    /// Unmount `target`.
    ///
    /// # Errors
    ///
    /// Returns [`hoist_common::HoistError::Unmount`] carrying the OS error text.
    fn unmount(&self, target: &Path) -> HoistResult<()>;
}

impl<T: MountCapability + ?Sized> MountCapability for &T {
    fn mount(&self, source: &str, target: &Path, fstype: &str, options: &str) -> HoistResult<()> {
        (**self).mount(source, target, fstype, options)
    }

    fn unmount(&self, target: &Path) -> HoistResult<()> {
        (**self).unmount(target)
    }
}

/// One entry of a filesystem option string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountParam<'a> {
    /// A bare flag such as `ro`.
    Flag(&'a str),
    /// A `key=value` pair.
    Value(&'a str, &'a str),
}

/// Split `a=b,c` into parameters; empty entries are skipped.
#[must_use]
pub fn parse_options(options: &str) -> Vec<MountParam<'_>> {
    options
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => MountParam::Value(key, value),
            None => MountParam::Flag(entry),
        })
        .collect()
}

/// Mounts through the kernel's filesystem context API (`fsopen`/`fsmount`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMount;

#[cfg(target_os = "linux")]
impl MountCapability for SystemMount {
    fn mount(&self, source: &str, target: &Path, fstype: &str, options: &str) -> HoistResult<()> {
        tracing::debug!(
            source,
            target = %target.display(),
            fstype,
            options,
            "Mounting filesystem"
        );

        fs_context::mount(source, target, fstype, options).map_err(|e| {
            hoist_common::HoistError::Mount {
                fs_source: source.to_string(),
                target: target.to_path_buf(),
                fstype: fstype.to_string(),
                options: options.to_string(),
                message: std::io::Error::from(e).to_string(),
            }
        })?;

        tracing::info!(target = %target.display(), fstype, "Filesystem mounted");
        Ok(())
    }

    fn unmount(&self, target: &Path) -> HoistResult<()> {
        use rustix::mount::{UnmountFlags, unmount};

        tracing::debug!(target = %target.display(), "Unmounting filesystem");

        unmount(target, UnmountFlags::empty()).map_err(|e| {
            hoist_common::HoistError::Unmount {
                target: target.to_path_buf(),
                message: std::io::Error::from(e).to_string(),
            }
        })?;

        tracing::info!(target = %target.display(), "Filesystem unmounted");
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl MountCapability for SystemMount {
    fn mount(
        &self,
        _source: &str,
        _target: &Path,
        fstype: &str,
        _options: &str,
    ) -> HoistResult<()> {
        Err(hoist_common::HoistError::Unsupported {
            feature: format!("{fstype} mounts"),
        })
    }

    fn unmount(&self, _target: &Path) -> HoistResult<()> {
        Err(hoist_common::HoistError::Unsupported {
            feature: "unmount".to_string(),
        })
    }
}

#[cfg(target_os = "linux")]
mod fs_context {
    use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
    use std::path::Path;

    use rustix::io::Result;
    use rustix::mount::{
        FsMountFlags, FsOpenFlags, MountAttrFlags, MoveMountFlags, fsconfig_create,
        fsconfig_set_flag, fsconfig_set_string, fsmount, fsopen, move_mount,
    };

    use super::{MountParam, parse_options};

    /// An open filesystem context; kernel messages are logged when it is dropped.
    struct FsHandle {
        fd: OwnedFd,
    }

    impl FsHandle {
        fn open(fstype: &str) -> Result<Self> {
            Ok(Self {
                fd: fsopen(fstype, FsOpenFlags::FSOPEN_CLOEXEC)?,
            })
        }
    }

    impl AsFd for FsHandle {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.fd.as_fd()
        }
    }

    impl Drop for FsHandle {
        fn drop(&mut self) {
            let mut buffer = [0u8; 1024];
            loop {
                match rustix::io::read(&self.fd, &mut buffer) {
                    Err(_) | Ok(0) => return, // ENODATA once drained
                    Ok(size) => {
                        let message = String::from_utf8_lossy(&buffer[..size]);
                        tracing::warn!(message = %message.trim_end(), "Kernel mount message");
                    }
                }
            }
        }
    }

    pub(super) fn mount(source: &str, target: &Path, fstype: &str, options: &str) -> Result<()> {
        let fs = FsHandle::open(fstype)?;
        fsconfig_set_string(fs.as_fd(), "source", source)?;
        for param in parse_options(options) {
            match param {
                MountParam::Flag(key) => fsconfig_set_flag(fs.as_fd(), key)?,
                MountParam::Value(key, value) => fsconfig_set_string(fs.as_fd(), key, value)?,
            }
        }
        fsconfig_create(fs.as_fd())?;

        let mnt = fsmount(
            fs.as_fd(),
            FsMountFlags::FSMOUNT_CLOEXEC,
            MountAttrFlags::empty(),
        )?;
        move_mount(
            mnt.as_fd(),
            "",
            rustix::fs::CWD,
            target,
            MoveMountFlags::MOVE_MOUNT_F_EMPTY_PATH,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_overlay_options() {
        let params = parse_options("lowerdir=/l/A:/l/B,ro,,index=off");
        assert_eq!(
            params,
            vec![
                MountParam::Value("lowerdir", "/l/A:/l/B"),
                MountParam::Flag("ro"),
                MountParam::Value("index", "off"),
            ]
        );
    }

    #[test]
    fn value_may_contain_equals() {
        let params = parse_options("source=a=b");
        assert_eq!(params, vec![MountParam::Value("source", "a=b")]);
    }
}
