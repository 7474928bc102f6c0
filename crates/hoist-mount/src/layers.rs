//! Layer sets and short link resolution.
//!
//! The overlay2 driver stores each layer as `<overlay-root>/<layer-id>/`:
//!
//! ```text
//! <overlay-root>/<layer-id>/
//! +-- diff/        # Layer file contents
//! +-- link         # Short link name (26 chars)
//! <overlay-root>/l/<link-name> -> ../<layer-id>/diff
//! ```
//!
//! Mount arguments are limited to one page, so layers are referenced through
//! their short links rather than their full diff paths.

use std::fs;
use std::path::{Path, PathBuf};

use hoist_common::{HoistError, HoistResult};

/// Leaf name of the per-layer file holding the short link name.
const LINK_FILE: &str = "link";

/// Ordered layer directories of one image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSet {
    /// Upper (most recent) layer directories, highest priority first.
    pub upper: Vec<PathBuf>,
    /// Lower (ancestor) layer directories, highest priority first.
    pub lower: Vec<PathBuf>,
}

impl LayerSet {
    /// Create a layer set.
    pub fn new(upper: Vec<PathBuf>, lower: Vec<PathBuf>) -> Self {
        Self { upper, lower }
    }

    /// All directories, upper layers before lower layers.
    pub fn combined(&self) -> impl Iterator<Item = &PathBuf> {
        self.upper.iter().chain(self.lower.iter())
    }

    /// Total number of directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.upper.len() + self.lower.len()
    }

    /// Whether the set has no directories at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overlay needs two lower directories; a lone layer gets an empty placeholder.
    #[must_use]
    pub fn needs_placeholder(&self) -> bool {
        self.len() == 1
    }
}

/// A layer directory together with its short link, if the directory exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedLayer {
    /// The layer's diff directory from the image metadata.
    pub diff_dir: PathBuf,
    /// `<link-root>/<name>`, or `None` when `diff_dir` does not exist.
    pub link: Option<PathBuf>,
}

/// Maps layer diff directories to their overlay2 short links.
#[derive(Debug, Clone)]
pub struct LayerResolver {
    link_root: PathBuf,
}

impl LayerResolver {
    /// Create a resolver for links under `link_root` (usually `<overlay-root>/l`).
    pub fn new(link_root: impl Into<PathBuf>) -> Self {
        Self {
            link_root: link_root.into(),
        }
    }

    /// The short link directory.
    pub fn link_root(&self) -> &Path {
        &self.link_root
    }

    /// Resolve one diff directory.
    ///
    /// # Errors
    ///
    /// Returns [`HoistError::Resolution`] when the directory exists but its
    /// link file is missing, unreadable or empty.
    pub fn resolve_layer(&self, diff_dir: &Path) -> HoistResult<LinkedLayer> {
        if !diff_dir.exists() {
            tracing::debug!(diff_dir = %diff_dir.display(), "Layer directory missing");
            return Ok(LinkedLayer {
                diff_dir: diff_dir.to_path_buf(),
                link: None,
            });
        }

        let link_file = diff_dir.with_file_name(LINK_FILE);
        let resolution_error = |message: String| HoistError::Resolution {
            diff_dir: diff_dir.to_path_buf(),
            link_file: link_file.clone(),
            message,
        };

        let content = fs::read_to_string(&link_file).map_err(|e| resolution_error(e.to_string()))?;
        let name = content.lines().next().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(resolution_error("link file is empty".to_string()));
        }
        if name.contains('/') || name.contains(':') || name.contains(',') {
            return Err(resolution_error(format!("invalid link name '{name}'")));
        }

        let link = self.link_root.join(name);
        tracing::trace!(diff_dir = %diff_dir.display(), link = %link.display(), "Resolved layer");

        Ok(LinkedLayer {
            diff_dir: diff_dir.to_path_buf(),
            link: Some(link),
        })
    }

    /// Resolve every layer, upper layers first, each list in its original order.
    ///
    /// # Errors
    ///
    /// Propagates [`LayerResolver::resolve_layer`] failures.
    pub fn resolve(&self, layers: &LayerSet) -> HoistResult<Vec<LinkedLayer>> {
        layers
            .combined()
            .map(|dir| self.resolve_layer(dir))
            .collect()
    }

    /// Resolve every layer into a mountable link, rejecting missing layers.
    ///
    /// # Errors
    ///
    /// Returns [`HoistError::MissingLayer`] for the first directory that does
    /// not exist, or any resolution error.
    pub fn lower_dirs(&self, layers: &LayerSet) -> HoistResult<Vec<PathBuf>> {
        self.resolve(layers)?
            .into_iter()
            .map(|layer| {
                layer
                    .link
                    .ok_or(HoistError::MissingLayer {
                        diff_dir: layer.diff_dir,
                    })
            })
            .collect()
    }
}

/// Create a layer fixture `<root>/<id>/diff` with a `link` file naming `link`.
#[cfg(test)]
pub(crate) fn write_layer(root: &Path, id: &str, link: &str) -> std::io::Result<PathBuf> {
    let layer = root.join(id);
    fs::create_dir_all(layer.join("diff"))?;
    fs::write(layer.join(LINK_FILE), format!("{link}\n"))?;
    Ok(layer.join("diff"))
}
