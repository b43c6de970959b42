//! Code loaders: bring a mod's library into the process and expose its
//! export table.

mod native;
mod shadow;
mod static_table;

use std::path::Path;

use modhost_sdk::{EntryExport, ExtensionDescriptor, Mod, ModuleInfo};

use crate::error::LoadError;

pub use native::NativeCodeLoader;
pub use shadow::ShadowCleanupReport;
pub use static_table::StaticCodeLoader;

/// A library loaded into the process. Dropping it may unload the code, so
/// it must outlive every object created from it.
pub trait LoadedModule: Send + Sync {
    fn info(&self) -> &ModuleInfo;

    fn find_export(&self, name: &str) -> Option<EntryExport>;
}

/// Strategy for turning an artifact path into a [`LoadedModule`].
pub trait CodeLoader: Send {
    fn load(
        &self,
        descriptor: &ExtensionDescriptor,
        artifact: &Path,
    ) -> Result<Box<dyn LoadedModule>, LoadError>;
}

/// Look up `entry` in the module's exports and construct it.
pub fn instantiate(module: &dyn LoadedModule, entry: &str) -> Result<Box<dyn Mod>, LoadError> {
    match module.find_export(entry) {
        Some(EntryExport::Mod { create, .. }) => Ok(create()),
        Some(EntryExport::Other { name }) => Err(LoadError::NotAnEntry(name.to_string())),
        None => Err(LoadError::EntryNotFound(entry.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_sdk::{construct, ArtifactKind, ExportTable, ModContext, ModError};

    #[derive(Default)]
    struct Noop;

    impl Mod for Noop {
        fn init(&mut self, _ctx: &mut dyn ModContext) -> Result<(), ModError> {
            Ok(())
        }
    }

    const ENTRIES: &[EntryExport] = &[
        EntryExport::Mod {
            name: "Noop",
            create: construct::<Noop>,
        },
        EntryExport::Other { name: "Helper" },
    ];

    static TABLE: ExportTable = ExportTable::new(ENTRIES);

    #[test]
    fn test_instantiate() {
        let mut loader = StaticCodeLoader::new();
        loader.register("m1", &TABLE);
        let descriptor = ExtensionDescriptor::new("m1", ArtifactKind::PrebuiltBinary, "m1.so", "Noop");
        let module = loader.load(&descriptor, Path::new("m1.so")).unwrap();

        assert!(instantiate(module.as_ref(), "Noop").is_ok());
        assert!(matches!(
            instantiate(module.as_ref(), "Helper"),
            Err(LoadError::NotAnEntry(name)) if name == "Helper"
        ));
        assert!(matches!(
            instantiate(module.as_ref(), "Missing"),
            Err(LoadError::EntryNotFound(name)) if name == "Missing"
        ));
    }
}
