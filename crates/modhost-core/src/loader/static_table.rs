//! Loader for mods linked into the host binary.

use std::collections::HashMap;
use std::path::Path;

use modhost_sdk::{EntryExport, ExportTable, ExtensionDescriptor, ModuleInfo, MODHOST_ABI_VERSION};

use super::{CodeLoader, LoadedModule};
use crate::error::LoadError;

/// Resolves mods by id to export tables compiled into the host.
///
/// The artifact path is ignored; discovery and caching still run as usual.
#[derive(Debug, Default)]
pub struct StaticCodeLoader {
    tables: HashMap<String, &'static ExportTable>,
}

impl StaticCodeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `id` already has a table.
    pub fn register(&mut self, id: impl Into<String>, table: &'static ExportTable) -> bool {
        let id = id.into();
        if self.tables.contains_key(&id) {
            return false;
        }
        self.tables.insert(id, table);
        true
    }

    pub fn with(mut self, id: impl Into<String>, table: &'static ExportTable) -> Self {
        self.register(id, table);
        self
    }
}

struct StaticModule {
    info: ModuleInfo,
    table: &'static ExportTable,
}

impl LoadedModule for StaticModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn find_export(&self, name: &str) -> Option<EntryExport> {
        self.table.find(name).copied()
    }
}

impl CodeLoader for StaticCodeLoader {
    fn load(
        &self,
        descriptor: &ExtensionDescriptor,
        _artifact: &Path,
    ) -> Result<Box<dyn LoadedModule>, LoadError> {
        let table = self
            .tables
            .get(&descriptor.id)
            .copied()
            .ok_or_else(|| LoadError::NotRegistered(descriptor.id.clone()))?;
        if table.abi_version() != MODHOST_ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                expected: MODHOST_ABI_VERSION,
                got: table.abi_version(),
            });
        }
        Ok(Box::new(StaticModule {
            info: ModuleInfo {
                path: None,
                exports: table.names(),
            },
            table,
        }))
    }
}
