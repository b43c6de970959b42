//! Mod manifest (`mod.json`).

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a mod ships its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// A crate that the host compiles into a dynamic library.
    Source,
    /// A dynamic library that is loaded as-is.
    PrebuiltBinary,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Source => "Source",
            ArtifactKind::PrebuiltBinary => "PrebuiltBinary",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared metadata for one mod.
///
/// Parsed from the manifest at discovery and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescriptor {
    /// Unique, stable id. Also names the cache entry.
    pub id: String,

    /// Display name; empty in the manifest means "use the id".
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type")]
    pub kind: ArtifactKind,

    /// Relative to the manifest's directory. For `Source` this is the crate
    /// root (a `Cargo.toml` or a `.rs` file), for `PrebuiltBinary` the library.
    pub artifact_filename: PathBuf,

    /// Name under which the entry type is published in the export table.
    pub entry_type_name: String,
}

impl ExtensionDescriptor {
    /// Create a new descriptor
    pub fn new(
        id: impl Into<String>,
        kind: ArtifactKind,
        artifact_filename: impl Into<PathBuf>,
        entry_type_name: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            kind,
            artifact_filename: artifact_filename.into(),
            entry_type_name: entry_type_name.into(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Parse a manifest, defaulting the display name to the id.
    pub fn from_json(manifest: &str) -> Result<Self, serde_json::Error> {
        let mut descriptor: Self = serde_json::from_str(manifest)?;
        if descriptor.name.trim().is_empty() {
            descriptor.name = descriptor.id.clone();
        }
        Ok(descriptor)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{}] {} -> {}",
            self.name,
            self.id,
            self.kind,
            self.artifact_filename.display(),
            self.entry_type_name
        )?;
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        Ok(())
    }
}
