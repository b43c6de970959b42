//! The host side of a mod's `init`/`stop` hooks.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::config::{DebugTopic, LoaderConfig};
use crate::descriptor::ExtensionDescriptor;
use crate::error::{PatchError, TimerError};
use crate::hook::{PatchId, PatchRequest};
use crate::timer::{TimerCallback, TimerHandle};

/// Loaded-code handle handed to a mod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Library path; `None` for statically linked mods.
    pub path: Option<PathBuf>,
    /// Entry names published by the library's export table.
    pub exports: Vec<String>,
}

/// Services the host offers a running mod.
///
/// Every patch and timer created through a context is owned by that context's
/// extension and released when the extension stops.
pub trait ModContext {
    fn descriptor(&self) -> &ExtensionDescriptor;

    /// Configuration of the current load cycle.
    fn config(&self) -> &LoaderConfig;

    fn module(&self) -> &ModuleInfo;

    /// Install an interception owned by this extension.
    fn patch(&mut self, request: PatchRequest) -> Result<PatchId, PatchError>;

    /// Remove one of this extension's patches. Returns `false` if unknown.
    fn unpatch(&mut self, id: PatchId) -> bool;

    /// Register a periodic callback. Ids are unique per extension.
    fn create_timer(
        &mut self,
        id: &str,
        interval: Duration,
        state: Option<Value>,
        callback: TimerCallback,
    ) -> Result<TimerHandle, TimerError>;

    fn timer(&self, id: &str) -> Option<TimerHandle>;

    fn debug_enabled(&self, topic: DebugTopic) -> bool {
        self.config().debug(topic)
    }
}
