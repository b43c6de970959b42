//! ModHost core
//!
//! Discovers mods under a mods directory, turns each into a loadable library
//! (compiling `Source` mods through a [`compiler::Compiler`] and caching the
//! output in an [`cache::ArtifactCache`]), loads it, instantiates the entry
//! type and runs its `init` hook. Mods patch host call sites through a
//! [`patch::PatchEngine`] and register periodic callbacks with the
//! [`timer::TimerScheduler`]; both are released when the mod stops.
//!
//! The entry point is [`host::ModHost`].

pub mod cache;
pub mod compiler;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod host;
pub mod loader;
pub mod patch;
pub mod timer;

pub use cache::{ArtifactCache, CacheInfo, CacheResolution, CachedArtifact};
pub use compiler::{CompileFailure, CompileOutput, CompileRequest, Compiler, CompilerRegistry};
pub use config::ResolvedLibrary;
pub use error::{CacheError, ConfigError, HostError, LoadError, Result};
pub use host::{
    ArtifactOrigin, ExtensionState, LoadSummary, LoadedExtension, ModHost, ModHostBuilder,
};
pub use loader::{CodeLoader, LoadedModule, NativeCodeLoader, ShadowCleanupReport, StaticCodeLoader};
pub use patch::{HookTable, PatchEngine, PatchInfo, PatchScope};
pub use timer::{ExtensionTimers, HostState, Lifecycle, TimerScheduler};

pub use modhost_sdk as sdk;
