//! Image reference parsing.

use std::fmt;
use std::str::FromStr;

use hoist_common::{HoistError, HoistResult};

/// A parsed image reference, split into the parts that name a published symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname.
    pub registry: String,
    /// Namespace (everything between registry and repository).
    pub namespace: String,
    /// Repository name.
    pub repository: String,
    /// Tag.
    pub tag: String,
}

impl ImageReference {
    /// Default registry.
    pub const DEFAULT_REGISTRY: &'static str = "docker.io";
    /// Namespace of official images.
    pub const DEFAULT_NAMESPACE: &'static str = "library";
    /// Default tag.
    pub const DEFAULT_TAG: &'static str = "latest";

    /// Parse an image reference string.
    ///
    /// Examples:
    /// - `alpine` -> docker.io/library/alpine:latest
    /// - `alpine:3.19` -> docker.io/library/alpine:3.19
    /// - `myuser/myapp` -> docker.io/myuser/myapp:latest
    /// - `ghcr.io/org/app:v1.0` -> ghcr.io/org/app:v1.0
    ///
    /// # Errors
    ///
    /// Digest references and empty components are rejected; a published
    /// symlink needs a tag.
    pub fn parse(reference: &str) -> HoistResult<Self> {
        let trimmed = reference.trim();
        let invalid = || HoistError::InvalidReference {
            reference: reference.to_string(),
        };

        if trimmed.is_empty() || trimmed.contains('@') {
            return Err(invalid());
        }

        // A colon followed by a slash belongs to a registry port, not a tag.
        let (name, tag) = match trimmed.rfind(':') {
            Some(idx) if !trimmed[idx + 1..].contains('/') => {
                (&trimmed[..idx], &trimmed[idx + 1..])
            }
            _ => (trimmed, Self::DEFAULT_TAG),
        };

        let mut parts: Vec<&str> = name.split('/').collect();
        if tag.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        let registry = if parts.len() > 1
            && (parts[0].contains('.') || parts[0].contains(':') || parts[0] == "localhost")
        {
            parts.remove(0).to_string()
        } else {
            Self::DEFAULT_REGISTRY.to_string()
        };

        let repository = parts.pop().ok_or_else(invalid)?.to_string();
        let namespace = if parts.is_empty() {
            Self::DEFAULT_NAMESPACE.to_string()
        } else {
            parts.join("/")
        };

        Ok(Self {
            registry,
            namespace,
            repository,
            tag: tag.to_string(),
        })
    }

    /// Get the full reference string.
    #[must_use]
    pub fn full_reference(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            self.registry, self.namespace, self.repository, self.tag
        )
    }
}

impl FromStr for ImageReference {
    type Err = HoistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}
