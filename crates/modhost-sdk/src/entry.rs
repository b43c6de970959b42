//! Entry types and the export table a mod library publishes.

use crate::context::ModContext;
use crate::error::ModError;
use crate::MODHOST_ABI_VERSION;

/// Entry object of a mod.
pub trait Mod: Send {
    /// Called once after loading. Patches and timers are usually set up here.
    fn init(&mut self, ctx: &mut dyn ModContext) -> Result<(), ModError>;

    /// Called before the host releases the mod's patches and timers.
    fn stop(&mut self, _ctx: &mut dyn ModContext) -> Result<(), ModError> {
        Ok(())
    }
}

pub type ModFactory = fn() -> Box<dyn Mod>;

/// One named export of a library.
#[derive(Debug, Clone, Copy)]
pub enum EntryExport {
    /// A type implementing [`Mod`].
    Mod { name: &'static str, create: ModFactory },
    /// Published under a name but not usable as an entry type.
    Other { name: &'static str },
}

impl EntryExport {
    pub const fn name(&self) -> &'static str {
        match self {
            EntryExport::Mod { name, .. } => name,
            EntryExport::Other { name } => name,
        }
    }
}

/// Table of entry types published by a library through `modhost_exports`.
#[derive(Debug)]
pub struct ExportTable {
    abi_version: u32,
    entries: &'static [EntryExport],
}

impl ExportTable {
    pub const fn new(entries: &'static [EntryExport]) -> Self {
        Self {
            abi_version: MODHOST_ABI_VERSION,
            entries,
        }
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    pub fn entries(&self) -> &'static [EntryExport] {
        self.entries
    }

    pub fn find(&self, name: &str) -> Option<&'static EntryExport> {
        self.entries.iter().find(|entry| entry.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name().to_string()).collect()
    }
}

/// Factory used by [`export_mods!`](crate::export_mods).
pub fn construct<T: Mod + Default + 'static>() -> Box<dyn Mod> {
    Box::new(T::default())
}
