//! Loading `modloader.json` and resolving referenced libraries.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use modhost_sdk::{LibraryReference, LoaderConfig};
use tracing::{info, warn};

use crate::error::ConfigError;

/// A referenced library after path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLibrary {
    /// Looked up by the toolchain.
    System(String),
    /// Existing file, as an absolute path.
    Local(PathBuf),
}

impl ResolvedLibrary {
    /// Crate or library name derived from the file name
    /// (`libfoo.rlib` and `libfoo-1a2b.so` both give `foo`).
    pub fn link_name(&self) -> String {
        match self {
            ResolvedLibrary::System(name) => name.clone(),
            ResolvedLibrary::Local(path) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stem = stem.strip_prefix("lib").unwrap_or(&stem);
                stem.split('-').next().unwrap_or(stem).to_string()
            }
        }
    }

    /// Whether this is a Rust library (`.rlib`) rather than a native one.
    pub fn is_rust_library(&self) -> bool {
        match self {
            ResolvedLibrary::Local(path) => path.extension().is_some_and(|ext| ext == "rlib"),
            ResolvedLibrary::System(_) => false,
        }
    }
}

impl fmt::Display for ResolvedLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedLibrary::System(name) => write!(f, "system:{}", name),
            ResolvedLibrary::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Write a default configuration to `path`.
pub fn write_default(path: &Path) -> Result<LoaderConfig, ConfigError> {
    let config = LoaderConfig::default();
    let json = serde_json::to_string_pretty(&config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    fs::write(path, json).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config)
}

/// Read the configuration at `path`.
///
/// A missing file is replaced by a default one and still reported as an error
/// so the operator gets a chance to edit it before anything is loaded.
pub fn load_or_create(path: &Path) -> Result<LoaderConfig, ConfigError> {
    if !path.exists() {
        write_default(path)?;
        warn!(path = %path.display(), "Configuration not found, wrote defaults");
        return Err(ConfigError::CreatedDefault {
            path: path.to_path_buf(),
        });
    }

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Resolve every referenced library, in order. Local files must exist.
pub fn resolve_libraries(
    config: &LoaderConfig,
    working_dir: &Path,
) -> Result<Vec<ResolvedLibrary>, ConfigError> {
    config
        .referenced_libraries
        .iter()
        .map(|reference| match reference {
            LibraryReference::System(name) => Ok(ResolvedLibrary::System(name.clone())),
            LibraryReference::Local(path) => {
                let resolved = resolve_path(working_dir, path);
                if resolved.is_file() {
                    Ok(ResolvedLibrary::Local(resolved))
                } else {
                    Err(ConfigError::MissingLibrary { path: resolved })
                }
            }
        })
        .collect()
}
