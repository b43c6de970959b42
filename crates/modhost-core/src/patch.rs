//! Patch engine: pre/post interception of named host call sites.
//!
//! [`HookTable`] is the built-in engine. Host code routes a call through
//! [`HookTable::call`]; every installed pre-hook for that target runs in
//! installation order, then the original unless a pre-hook asked to skip it,
//! then every post-hook in installation order. The table lock is released
//! before any hook runs, so hooks may install or revoke patches themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use modhost_sdk::{
    CallFrame, HookFlow, HookSlot, PatchError, PatchId, PatchRequest, PostHook, PreHook,
};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

/// Summary of one installed patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    pub id: PatchId,
    pub owner: String,
    pub target: String,
    pub has_pre: bool,
    pub has_post: bool,
}

/// Interception mechanism. Implementations receive requests that already
/// passed validation in [`PatchScope`].
pub trait PatchEngine: Send + Sync {
    fn install(
        &self,
        owner: &str,
        target: &str,
        pre: Option<PreHook>,
        post: Option<PostHook>,
    ) -> Result<PatchId, PatchError>;

    /// Remove one patch. Returns `false` if it was not installed.
    fn revoke(&self, id: PatchId) -> bool;

    /// Remove every patch owned by `owner`. Returns how many were removed.
    fn revoke_owner(&self, owner: &str) -> usize;

    fn registrations(&self) -> Vec<PatchInfo>;
}

#[derive(Debug, Clone)]
struct Registration {
    id: PatchId,
    owner: String,
    target: String,
    pre: Option<PreHook>,
    post: Option<PostHook>,
}

/// Call-site indirection table.
#[derive(Debug, Default)]
pub struct HookTable {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `original` for `target` through every installed hook and return
    /// the final result.
    pub fn call<F>(&self, target: &str, args: Vec<Value>, original: F) -> Value
    where
        F: FnOnce(&[Value]) -> Value,
    {
        self.call_frame(target, args, original).result
    }

    /// Like [`call`](Self::call) but returns the whole frame, including
    /// arguments as rewritten by pre-hooks.
    pub fn call_frame<F>(&self, target: &str, args: Vec<Value>, original: F) -> CallFrame
    where
        F: FnOnce(&[Value]) -> Value,
    {
        let hooks: Vec<(Option<PreHook>, Option<PostHook>)> = self
            .registrations
            .read()
            .iter()
            .filter(|r| r.target == target)
            .map(|r| (r.pre.clone(), r.post.clone()))
            .collect();

        let mut frame = CallFrame::new(target, args);
        let mut skip = false;
        for pre in hooks.iter().filter_map(|(pre, _)| pre.as_ref()) {
            if pre.invoke(&mut frame) == HookFlow::Skip {
                skip = true;
            }
        }
        if !skip {
            frame.result = original(&frame.args);
        }
        for post in hooks.iter().filter_map(|(_, post)| post.as_ref()) {
            post.invoke(&mut frame);
        }
        frame
    }

    pub fn is_patched(&self, target: &str) -> bool {
        self.registrations.read().iter().any(|r| r.target == target)
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PatchEngine for HookTable {
    fn install(
        &self,
        owner: &str,
        target: &str,
        pre: Option<PreHook>,
        post: Option<PostHook>,
    ) -> Result<PatchId, PatchError> {
        let id = PatchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.registrations.write().push(Registration {
            id,
            owner: owner.to_string(),
            target: target.to_string(),
            pre,
            post,
        });
        Ok(id)
    }

    fn revoke(&self, id: PatchId) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    fn revoke_owner(&self, owner: &str) -> usize {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.owner != owner);
        before - registrations.len()
    }

    fn registrations(&self) -> Vec<PatchInfo> {
        self.registrations
            .read()
            .iter()
            .map(|r| PatchInfo {
                id: r.id,
                owner: r.owner.clone(),
                target: r.target.clone(),
                has_pre: r.pre.is_some(),
                has_post: r.post.is_some(),
            })
            .collect()
    }
}

/// Patches owned by one extension.
///
/// Validates requests before they reach the engine and revokes everything
/// it installed on [`revoke_all`](Self::revoke_all) or drop.
pub struct PatchScope {
    owner: String,
    engine: Arc<dyn PatchEngine>,
    installed: Vec<PatchId>,
    log_injections: bool,
}

impl PatchScope {
    pub fn new(owner: impl Into<String>, engine: Arc<dyn PatchEngine>, log_injections: bool) -> Self {
        Self {
            owner: owner.into(),
            engine,
            installed: Vec::new(),
            log_injections,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Validate and install. Checks run in order: target, hook presence,
    /// pre-hook statelessness, post-hook statelessness.
    pub fn install(&mut self, request: PatchRequest) -> Result<PatchId, PatchError> {
        let PatchRequest { target, pre, post } = request;
        let target = match target {
            Some(target) if !target.trim().is_empty() => target,
            _ => return Err(PatchError::MissingTarget),
        };
        if pre.is_none() && post.is_none() {
            return Err(PatchError::MissingHook { target });
        }
        if pre.as_ref().is_some_and(|hook| !hook.is_stateless()) {
            return Err(PatchError::NotStateless {
                target,
                slot: HookSlot::Pre,
            });
        }
        if post.as_ref().is_some_and(|hook| !hook.is_stateless()) {
            return Err(PatchError::NotStateless {
                target,
                slot: HookSlot::Post,
            });
        }

        let (has_pre, has_post) = (pre.is_some(), post.is_some());
        let id = self.engine.install(&self.owner, &target, pre, post)?;
        self.installed.push(id);
        if self.log_injections {
            info!(extension_id = %self.owner, %target, patch = %id, has_pre, has_post, "Patch installed");
        }
        Ok(id)
    }

    /// Revoke one of this scope's patches.
    pub fn revoke(&mut self, id: PatchId) -> bool {
        let Some(position) = self.installed.iter().position(|p| *p == id) else {
            return false;
        };
        self.installed.remove(position);
        self.engine.revoke(id)
    }

    /// Revoke every patch this extension owns. Returns how many were removed.
    pub fn revoke_all(&mut self) -> usize {
        self.installed.clear();
        let removed = self.engine.revoke_owner(&self.owner);
        if removed > 0 {
            debug!(extension_id = %self.owner, removed, "Patches revoked");
        }
        removed
    }

    pub fn installed(&self) -> &[PatchId] {
        &self.installed
    }
}

impl Drop for PatchScope {
    fn drop(&mut self) {
        if !self.installed.is_empty() {
            self.revoke_all();
        }
    }
}
