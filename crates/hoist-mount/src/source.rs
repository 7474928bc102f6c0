//! Image metadata sources.

use std::path::PathBuf;
use std::process::Command;

use hoist_common::{HoistError, HoistResult};
use serde::{Deserialize, Deserializer};

use crate::layers::LayerSet;

/// Graph driver this crate knows how to mount.
const OVERLAY2: &str = "overlay2";

/// Provides the layer directories of an already-present image.
pub trait ImageSource {
    /// Look up the layer set of `image`.
    ///
    /// # Errors
    ///
    /// Returns an error when the image is unknown or not stored by a supported driver.
    fn layers(&self, image: &str) -> HoistResult<LayerSet>;
}

/// `GraphDriver` section of `docker image inspect` output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphDriver {
    /// Storage driver name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Driver-specific directories.
    #[serde(rename = "Data", default, deserialize_with = "null_as_default")]
    pub data: GraphDriverData,
}

/// overlay2 driver data; each value is a `:`-separated list of directories.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphDriverData {
    /// Upper (most recent) layer directories.
    #[serde(rename = "UpperDir", default)]
    pub upper_dir: Option<String>,
    /// Ancestor layer directories.
    #[serde(rename = "LowerDir", default)]
    pub lower_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "GraphDriver", default)]
    graph_driver: GraphDriver,
}

/// Docker prints `null` for sections a driver does not fill in.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn split_dirs(list: Option<&str>) -> Vec<PathBuf> {
    list.unwrap_or_default()
        .split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

impl From<&GraphDriverData> for LayerSet {
    fn from(data: &GraphDriverData) -> Self {
        Self::new(
            split_dirs(data.upper_dir.as_deref()),
            split_dirs(data.lower_dir.as_deref()),
        )
    }
}

impl GraphDriver {
    /// Parse the JSON array printed by `docker image inspect`.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or an empty array.
    pub fn from_inspect_json(image: &str, json: &str) -> HoistResult<Self> {
        let entries: Vec<InspectEntry> = serde_json::from_str(json)?;
        entries
            .into_iter()
            .next()
            .map(|entry| entry.graph_driver)
            .ok_or_else(|| HoistError::ImageNotFound {
                reference: image.to_string(),
            })
    }

    /// The layer set, if this driver is overlay2.
    ///
    /// # Errors
    ///
    /// Returns [`HoistError::Unsupported`] for any other driver.
    pub fn layer_set(&self) -> HoistResult<LayerSet> {
        if self.name != OVERLAY2 {
            return Err(HoistError::Unsupported {
                feature: format!("graph driver '{}'", self.name),
            });
        }
        Ok(LayerSet::from(&self.data))
    }
}

/// Reads image metadata with `docker image inspect`.
#[derive(Debug, Clone)]
pub struct DockerInspect {
    program: String,
}

impl DockerInspect {
    /// Use `program` as the docker CLI.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerInspect {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl ImageSource for DockerInspect {
    fn layers(&self, image: &str) -> HoistResult<LayerSet> {
        tracing::debug!(program = %self.program, image, "Inspecting image");

        let output = Command::new(&self.program)
            .args(["image", "inspect", image])
            .output()
            .map_err(|e| HoistError::Command {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            tracing::debug!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                "Image inspect failed"
            );
            return Err(HoistError::ImageNotFound {
                reference: image.to_string(),
            });
        }

        let json = String::from_utf8_lossy(&output.stdout);
        let layers = GraphDriver::from_inspect_json(image, &json)?.layer_set()?;

        tracing::info!(
            image,
            upper = layers.upper.len(),
            lower = layers.lower.len(),
            "Resolved image layers"
        );
        Ok(layers)
    }
}
