//! Artifact cache for compiled `Source` mods.
//!
//! Layout: `<root>/<id>/` holding the library (`<id>.<dll-ext>`), the optional
//! debug-symbol companion (`<id>.symbols`) and `checksum.hash`, the SHA-256 of
//! the mod's source tree at the time of the last resolution.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::CacheError;

pub const CHECKSUM_FILE_NAME: &str = "checksum.hash";
pub const SYMBOLS_EXTENSION: &str = "symbols";

/// A trusted cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub id: String,
    pub artifact_path: PathBuf,
    pub symbols_path: Option<PathBuf>,
    pub checksum: String,
}

/// Outcome of [`ArtifactCache::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheResolution {
    Hit(CachedArtifact),
    /// `checksum` is already persisted; `previous` is what was stored before.
    Miss {
        checksum: String,
        previous: Option<String>,
    },
}

impl CacheResolution {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheResolution::Hit(_))
    }
}

/// Size summary of the cache directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheInfo {
    pub entries: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    sort_inputs: bool,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sort_inputs: false,
        }
    }

    /// Hash source files in sorted path order.
    pub fn with_sorted_inputs(mut self, sorted: bool) -> Self {
        self.sort_inputs = sorted;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn artifact_path(&self, id: &str) -> PathBuf {
        self.entry_dir(id)
            .join(format!("{}.{}", id, std::env::consts::DLL_EXTENSION))
    }

    pub fn symbols_path(&self, id: &str) -> PathBuf {
        self.entry_dir(id).join(format!("{}.{}", id, SYMBOLS_EXTENSION))
    }

    pub fn checksum_path(&self, id: &str) -> PathBuf {
        self.entry_dir(id).join(CHECKSUM_FILE_NAME)
    }

    /// Scratch directory compilers may use for intermediate output.
    pub fn build_dir(&self, id: &str) -> PathBuf {
        self.entry_dir(id).join("build")
    }

    /// Create the cache root if needed.
    pub fn ensure(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))
    }

    /// Delete and recreate the cache root.
    pub fn reset(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&self.root, e)),
        }
        self.ensure()
    }

    pub fn stored_checksum(&self, id: &str) -> Result<Option<String>, CacheError> {
        let path = self.checksum_path(id);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Check the entry for `id` against the current source tree.
    ///
    /// A changed or missing checksum is overwritten before returning `Miss`,
    /// so the new value is persisted even if the following compile fails.
    pub fn resolve(
        &self,
        id: &str,
        source_dir: &Path,
        require_symbols: bool,
    ) -> Result<CacheResolution, CacheError> {
        let checksum = checksum_source_tree(source_dir, self.sort_inputs)?;
        let previous = self.stored_checksum(id)?;

        if previous.as_deref() != Some(checksum.as_str()) {
            let dir = self.entry_dir(id);
            fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
            let path = self.checksum_path(id);
            fs::write(&path, &checksum).map_err(|e| CacheError::io(&path, e))?;
            // The old artifact no longer matches the checksum on disk.
            let artifact_path = self.artifact_path(id);
            match fs::remove_file(&artifact_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&artifact_path, e)),
            }
            return Ok(CacheResolution::Miss { checksum, previous });
        }

        let artifact_path = self.artifact_path(id);
        let symbols_path = self.symbols_path(id);
        if !artifact_path.is_file() || (require_symbols && !symbols_path.is_file()) {
            return Ok(CacheResolution::Miss { checksum, previous });
        }

        Ok(CacheResolution::Hit(CachedArtifact {
            id: id.to_string(),
            artifact_path,
            symbols_path: symbols_path.is_file().then_some(symbols_path),
            checksum,
        }))
    }

    /// Write a freshly compiled artifact into the entry for `id`.
    ///
    /// A stale companion is removed when the new output has none.
    pub fn store(
        &self,
        id: &str,
        artifact: &[u8],
        symbols: Option<&[u8]>,
    ) -> Result<CachedArtifact, CacheError> {
        let dir = self.entry_dir(id);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let artifact_path = self.artifact_path(id);
        fs::write(&artifact_path, artifact).map_err(|e| CacheError::io(&artifact_path, e))?;

        let symbols_path = self.symbols_path(id);
        let symbols_path = match symbols {
            Some(bytes) => {
                fs::write(&symbols_path, bytes).map_err(|e| CacheError::io(&symbols_path, e))?;
                Some(symbols_path)
            }
            None => {
                if symbols_path.exists() {
                    fs::remove_file(&symbols_path).map_err(|e| CacheError::io(&symbols_path, e))?;
                }
                None
            }
        };

        Ok(CachedArtifact {
            id: id.to_string(),
            artifact_path,
            symbols_path,
            checksum: self.stored_checksum(id)?.unwrap_or_default(),
        })
    }

    /// Delete every entry directory whose name is not in `keep`.
    /// Returns the ids that were removed.
    pub fn purge_stale(&self, keep: &HashSet<String>) -> Result<Vec<String>, CacheError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        let mut purged = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if keep.contains(&name) {
                continue;
            }
            fs::remove_dir_all(&path).map_err(|e| CacheError::io(&path, e))?;
            purged.push(name);
        }
        purged.sort();
        Ok(purged)
    }

    pub fn info(&self) -> Result<CacheInfo, CacheError> {
        if !self.root.exists() {
            return Ok(CacheInfo::default());
        }

        let mut info = CacheInfo::default();
        let entries = fs::read_dir(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                info.entries += 1;
            }
        }
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                if let Ok(meta) = entry.metadata() {
                    info.total_bytes += meta.len();
                }
            }
        }
        Ok(info)
    }
}

/// Files and directories a build writes next to the sources. They are not
/// part of the mod's identity and would otherwise change the checksum.
const BUILD_BYPRODUCTS: &[&str] = &["Cargo.lock", "target"];

/// SHA-256 over the bytes of every file under `dir`, concatenated.
///
/// Files are visited in directory-enumeration order unless `sorted` is set,
/// in which case each directory is walked by file name. Build byproducts
/// such as `Cargo.lock` are skipped.
pub fn checksum_source_tree(dir: &Path, sorted: bool) -> Result<String, CacheError> {
    let mut walker = WalkDir::new(dir).min_depth(1);
    if sorted {
        walker = walker.sort_by_file_name();
    }

    let mut hasher = Sha256::new();
    let entries = walker.into_iter().filter_entry(|entry| {
        !entry
            .file_name()
            .to_str()
            .is_some_and(|name| BUILD_BYPRODUCTS.contains(&name))
    });
    for entry in entries {
        let entry = entry.map_err(|source| CacheError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = fs::read(entry.path()).map_err(|e| CacheError::io(entry.path(), e))?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}
