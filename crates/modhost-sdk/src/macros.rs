//! Declarative macros for mod development.

/// Publish a library's entry types.
///
/// Generates the two symbols the host looks up after loading the library:
/// `modhost_abi_version` and `modhost_exports`. Each entry is published under
/// the given name, which is what `entryTypeName` in `mod.json` refers to.
/// Entry types must implement [`Mod`](crate::Mod) and `Default`.
///
/// # Example
///
/// ```rust,ignore
/// use modhost_sdk::prelude::*;
///
/// #[derive(Default)]
/// struct Greeter;
///
/// impl Mod for Greeter {
///     fn init(&mut self, _ctx: &mut dyn ModContext) -> Result<(), ModError> {
///         Ok(())
///     }
/// }
///
/// export_mods! {
///     "Greeter" => Greeter,
/// }
/// ```
#[macro_export]
macro_rules! export_mods {
    ($($name:literal => $ty:ty),+ $(,)?) => {
        const __MODHOST_ENTRIES: &[$crate::entry::EntryExport] = &[
            $(
                $crate::entry::EntryExport::Mod {
                    name: $name,
                    create: $crate::entry::construct::<$ty>,
                },
            )+
        ];

        static __MODHOST_EXPORTS: $crate::entry::ExportTable =
            $crate::entry::ExportTable::new(__MODHOST_ENTRIES);

        #[no_mangle]
        pub extern "C" fn modhost_abi_version() -> u32 {
            $crate::MODHOST_ABI_VERSION
        }

        #[no_mangle]
        pub fn modhost_exports() -> &'static $crate::entry::ExportTable {
            &__MODHOST_EXPORTS
        }
    };
}
