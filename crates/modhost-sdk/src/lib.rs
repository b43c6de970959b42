//! ModHost SDK
//!
//! Types shared by the host and by the mods it loads: the [`Mod`] entry
//! trait, the [`ModContext`] a mod talks to during `init`/`stop`, manifest
//! and loader configuration types, hook and timer types, and the
//! [`export_mods!`] macro that publishes a library's entry types.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use modhost_sdk::prelude::*;
//!
//! #[derive(Default)]
//! struct Greeter;
//!
//! impl Mod for Greeter {
//!     fn init(&mut self, ctx: &mut dyn ModContext) -> Result<(), ModError> {
//!         ctx.patch(PatchRequest::on("host::greet").pre(shout))?;
//!         Ok(())
//!     }
//! }
//!
//! fn shout(frame: &mut CallFrame) -> HookFlow {
//!     HookFlow::Continue
//! }
//!
//! export_mods! {
//!     "Greeter" => Greeter,
//! }
//! ```

pub mod config;
pub mod context;
pub mod descriptor;
pub mod entry;
pub mod error;
pub mod hook;
#[macro_use]
pub mod macros;
pub mod timer;

pub use config::{DebugTopic, DebugTopics, LibraryReference, LoaderConfig};
pub use context::{ModContext, ModuleInfo};
pub use descriptor::{ArtifactKind, ExtensionDescriptor};
pub use entry::{construct, EntryExport, ExportTable, Mod, ModFactory};
pub use error::{HookSlot, ModError, PatchError, TimerError};
pub use hook::{CallFrame, HookFlow, PatchId, PatchRequest, PostHook, PreHook};
pub use timer::{TimerCallback, TimerHandle};

/// ABI version of the export table.
///
/// Bumped whenever [`ExportTable`], [`Mod`] or [`ModContext`] change shape.
/// The host refuses libraries reporting a different value.
pub const MODHOST_ABI_VERSION: u32 = 1;

/// Symbol name of the exported ABI version function.
pub const ABI_VERSION_SYMBOL: &str = "modhost_abi_version";

/// Symbol name of the exported export-table function.
pub const EXPORTS_SYMBOL: &str = "modhost_exports";

/// Prelude module with common imports
pub mod prelude {
    pub use crate::config::{DebugTopic, LoaderConfig};
    pub use crate::context::ModContext;
    pub use crate::descriptor::ExtensionDescriptor;
    pub use crate::entry::{Mod, ModFactory};
    pub use crate::error::{ModError, PatchError, TimerError};
    pub use crate::hook::{CallFrame, HookFlow, PatchId, PatchRequest};
    pub use crate::timer::{TimerCallback, TimerHandle};
    pub use crate::export_mods;
    pub use serde_json::{json, Value};
    pub use std::sync::Arc;
    pub use std::time::Duration;
}
