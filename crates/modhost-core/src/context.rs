//! Per-extension [`ModContext`] implementation.

use std::sync::Arc;
use std::time::Duration;

use modhost_sdk::{
    ExtensionDescriptor, LoaderConfig, ModContext, ModuleInfo, PatchError, PatchId,
    PatchRequest, TimerCallback, TimerError, TimerHandle,
};
use serde_json::Value;

use crate::patch::PatchScope;
use crate::timer::ExtensionTimers;

/// Owns everything an extension acquired while running.
pub struct HostContext {
    descriptor: ExtensionDescriptor,
    config: Arc<LoaderConfig>,
    module: ModuleInfo,
    patches: PatchScope,
    timers: ExtensionTimers,
}

impl HostContext {
    pub fn new(
        descriptor: ExtensionDescriptor,
        config: Arc<LoaderConfig>,
        module: ModuleInfo,
        patches: PatchScope,
        timers: ExtensionTimers,
    ) -> Self {
        Self {
            descriptor,
            config,
            module,
            patches,
            timers,
        }
    }

    /// Cancel every timer and revoke every patch of this extension.
    /// Returns `(patches revoked, timers cancelled)`.
    pub fn release(&mut self) -> (usize, usize) {
        let timers = self.timers.cancel_all();
        let patches = self.patches.revoke_all();
        (patches, timers)
    }

    pub fn patches(&self) -> &PatchScope {
        &self.patches
    }

    pub fn timers(&self) -> &ExtensionTimers {
        &self.timers
    }
}

impl ModContext for HostContext {
    fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn module(&self) -> &ModuleInfo {
        &self.module
    }

    fn patch(&mut self, request: PatchRequest) -> Result<PatchId, PatchError> {
        self.patches.install(request)
    }

    fn unpatch(&mut self, id: PatchId) -> bool {
        self.patches.revoke(id)
    }

    fn create_timer(
        &mut self,
        id: &str,
        interval: Duration,
        state: Option<Value>,
        callback: TimerCallback,
    ) -> Result<TimerHandle, TimerError> {
        self.timers.create(id, interval, state, callback)
    }

    fn timer(&self, id: &str) -> Option<TimerHandle> {
        self.timers.get(id)
    }
}
