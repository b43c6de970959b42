//! Native loader for .so/.dylib/.dll mod libraries.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use modhost_sdk::{
    EntryExport, ExportTable, ExtensionDescriptor, ModuleInfo, ABI_VERSION_SYMBOL,
    EXPORTS_SYMBOL, MODHOST_ABI_VERSION,
};
use tracing::debug;

use super::shadow::{self, ActiveShadows, ShadowCleanupReport, ShadowLease};
use super::{CodeLoader, LoadedModule};
use crate::error::LoadError;

const DEFAULT_SHADOW_DIR: &str = "modhost-shadow";

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type ExportsFn = unsafe fn() -> &'static ExportTable;

/// Loads libraries with `libloading` and reads their export table.
///
/// Mods must be built with the same compiler and SDK version as the host:
/// the export table crosses the boundary as a Rust reference.
///
/// Each load opens a private copy of the artifact under the shadow root, so
/// a rebuilt library is never confused with one that is still mapped.
#[derive(Debug)]
pub struct NativeCodeLoader {
    shadow_root: PathBuf,
    active: ActiveShadows,
}

impl NativeCodeLoader {
    /// Shadow copies go to `modhost-shadow` in the system temp directory.
    pub fn new() -> Self {
        Self::with_shadow_root(std::env::temp_dir().join(DEFAULT_SHADOW_DIR))
    }

    pub fn with_shadow_root(root: impl Into<PathBuf>) -> Self {
        Self {
            shadow_root: root.into(),
            active: ActiveShadows::default(),
        }
    }

    pub fn shadow_root(&self) -> &Path {
        &self.shadow_root
    }

    /// Delete copies left by earlier loads that nothing maps any more.
    pub fn cleanup_shadow_copies(&self) -> ShadowCleanupReport {
        let report = shadow::cleanup_stale_shadow_copies(
            &self.shadow_root,
            &self.active.snapshot(),
            shadow::CLEANUP_GRACE_PERIOD,
            shadow::CLEANUP_MAX_DELETIONS_PER_RUN,
        );
        if !report.is_empty() {
            debug!(
                root = %self.shadow_root.display(),
                scanned = report.scanned,
                deleted = report.deleted,
                failed = report.failed,
                skipped_active = report.skipped_active,
                skipped_recent = report.skipped_recent,
                skipped_unrecognized = report.skipped_unrecognized,
                "Shadow cleanup completed"
            );
        }
        report
    }
}

impl Default for NativeCodeLoader {
    fn default() -> Self {
        Self::new()
    }
}

struct NativeModule {
    info: ModuleInfo,
    table: &'static ExportTable,
    // Keeps `table` and all code created from it mapped.
    _library: Library,
    // Declared after `_library` so the file outlives the mapping.
    _shadow: ShadowLease,
}

impl LoadedModule for NativeModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn find_export(&self, name: &str) -> Option<EntryExport> {
        self.table.find(name).copied()
    }
}

impl CodeLoader for NativeCodeLoader {
    fn load(
        &self,
        descriptor: &ExtensionDescriptor,
        artifact: &Path,
    ) -> Result<Box<dyn LoadedModule>, LoadError> {
        if !artifact.is_file() {
            return Err(LoadError::Library {
                path: artifact.to_path_buf(),
                message: "file not found".to_string(),
            });
        }

        self.cleanup_shadow_copies();
        let lease =
            shadow::create_shadow_copy(&self.shadow_root, &descriptor.id, artifact, &self.active)
                .map_err(|source| LoadError::ShadowCopy {
                    path: artifact.to_path_buf(),
                    source,
                })?;

        // SAFETY: loading a library runs its initializers. Mods are trusted
        // code with full host privileges.
        let library = unsafe {
            Library::new(lease.path()).map_err(|e| LoadError::Library {
                path: artifact.to_path_buf(),
                message: e.to_string(),
            })?
        };

        let version = unsafe {
            let abi: Symbol<AbiVersionFn> =
                library
                    .get(ABI_VERSION_SYMBOL.as_bytes())
                    .map_err(|e| LoadError::MissingSymbol {
                        path: artifact.to_path_buf(),
                        symbol: ABI_VERSION_SYMBOL,
                        message: e.to_string(),
                    })?;
            abi()
        };
        if version != MODHOST_ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                expected: MODHOST_ABI_VERSION,
                got: version,
            });
        }

        let table = unsafe {
            let exports: Symbol<ExportsFn> =
                library
                    .get(EXPORTS_SYMBOL.as_bytes())
                    .map_err(|e| LoadError::MissingSymbol {
                        path: artifact.to_path_buf(),
                        symbol: EXPORTS_SYMBOL,
                        message: e.to_string(),
                    })?;
            exports()
        };
        if table.abi_version() != MODHOST_ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                expected: MODHOST_ABI_VERSION,
                got: table.abi_version(),
            });
        }

        debug!(
            extension_id = %descriptor.id,
            path = %artifact.display(),
            shadow = %lease.path().display(),
            exports = ?table.names(),
            "Library loaded"
        );
        Ok(Box::new(NativeModule {
            info: ModuleInfo {
                path: Some(artifact.to_path_buf()),
                exports: table.names(),
            },
            table,
            _library: library,
            _shadow: lease,
        }))
    }
}
