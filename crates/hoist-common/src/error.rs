//! Common error types for hoist.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`HoistError`].
pub type HoistResult<T> = Result<T, HoistError>;

/// Store transaction control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnOp {
    /// Force-abort an open transaction.
    Abort,
    /// Open a write transaction.
    Begin,
    /// Publish (commit) the open transaction.
    Publish,
}

impl TxnOp {
    /// Subcommand name understood by the store's control tool.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Begin => "transaction",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for TxnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common errors across hoist.
#[derive(Error, Diagnostic, Debug)]
pub enum HoistError {
    /// A store control command exited with a non-zero status.
    #[error("Store {op} failed for {store} (exit status {status})")]
    #[diagnostic(code(hoist::store::transaction))]
    Transaction {
        /// Store name.
        store: String,
        /// The control operation that failed.
        op: TxnOp,
        /// Exit status of the control command (-1 when killed by a signal).
        status: i32,
    },

    /// The mount primitive failed.
    #[error("Error mounting {fs_source} ({fstype}) on {target} with options '{options}': {message}")]
    #[diagnostic(
        code(hoist::mount::failed),
        help("Overlay mounts need CAP_SYS_ADMIN; scratch directories were left for the caller")
    )]
    Mount {
        /// Mount source.
        fs_source: String,
        /// Mount target.
        target: PathBuf,
        /// Filesystem kind.
        fstype: String,
        /// Option string handed to the filesystem.
        options: String,
        /// OS error text.
        message: String,
    },

    /// The unmount primitive failed.
    #[error("Error unmounting {target}: {message}")]
    #[diagnostic(code(hoist::mount::unmount))]
    Unmount {
        /// Mount point.
        target: PathBuf,
        /// OS error text.
        message: String,
    },

    /// A layer's link file could not be read.
    #[error("Cannot resolve short link for {diff_dir} from {link_file}: {message}")]
    #[diagnostic(code(hoist::layer::resolution))]
    Resolution {
        /// Layer diff directory.
        diff_dir: PathBuf,
        /// Link file that was read.
        link_file: PathBuf,
        /// Reason.
        message: String,
    },

    /// A layer directory named by the image metadata does not exist.
    #[error("Layer directory does not exist: {diff_dir}")]
    #[diagnostic(
        code(hoist::layer::missing),
        help("The image metadata is stale; inspect the image again")
    )]
    MissingLayer {
        /// Layer diff directory.
        diff_dir: PathBuf,
    },

    /// The publish target exists but is not a symlink.
    #[error("Publish target exists and is not a symlink: {path}")]
    #[diagnostic(code(hoist::publish::conflict))]
    TargetConflict {
        /// Target path.
        path: PathBuf,
    },

    /// Image not found.
    #[error("Image not found: {reference}")]
    #[diagnostic(code(hoist::image::not_found))]
    ImageNotFound {
        /// The image reference that was not found.
        reference: String,
    },

    /// Invalid image reference.
    #[error("Invalid image reference: {reference}")]
    #[diagnostic(
        code(hoist::image::invalid_reference),
        help("Use [registry/][namespace/]repository[:tag]")
    )]
    InvalidReference {
        /// The reference that failed to parse.
        reference: String,
    },

    /// An external program could not be run.
    #[error("Failed to execute {program}: {message}")]
    #[diagnostic(code(hoist::command))]
    Command {
        /// Program name.
        program: String,
        /// Reason.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(hoist::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(hoist::serialization))]
    Serialization(String),

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(code(hoist::unsupported))]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(hoist::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl From<serde_json::Error> for HoistError {
    fn from(err: serde_json::Error) -> Self {
        HoistError::Serialization(err.to_string())
    }
}
