//! Patch requests and hook types.
//!
//! A patch wraps a named call site of the host. Pre-hooks see the arguments
//! before the original runs and may suppress it; post-hooks see (and may
//! replace) the result. Only plain `fn` items are accepted as hooks so a
//! patch never keeps mod state alive past the mod's own lifetime.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Arguments and result of one call routed through the hook table.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    target: String,
    pub args: Vec<Value>,
    pub result: Value,
}

impl CallFrame {
    pub fn new(target: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            args,
            result: Value::Null,
        }
    }

    /// The call site this frame belongs to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }
}

/// What a pre-hook wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookFlow {
    /// Run the remaining pre-hooks and the original.
    #[default]
    Continue,
    /// Suppress the original call. Remaining hooks still run.
    Skip,
}

pub type PreHookFn = fn(&mut CallFrame) -> HookFlow;
pub type PostHookFn = fn(&mut CallFrame);

/// Hook run before the original.
#[derive(Clone)]
pub enum PreHook {
    Static(PreHookFn),
    /// Closure-backed hook. Representable so the host can reject it.
    Bound(Arc<dyn Fn(&mut CallFrame) -> HookFlow + Send + Sync>),
}

impl PreHook {
    pub fn is_stateless(&self) -> bool {
        matches!(self, PreHook::Static(_))
    }

    pub fn invoke(&self, frame: &mut CallFrame) -> HookFlow {
        match self {
            PreHook::Static(hook) => hook(frame),
            PreHook::Bound(hook) => hook(frame),
        }
    }
}

impl fmt::Debug for PreHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreHook::Static(hook) => write!(f, "PreHook::Static({:p})", *hook as *const ()),
            PreHook::Bound(_) => write!(f, "PreHook::Bound(..)"),
        }
    }
}

/// Hook run after the original.
#[derive(Clone)]
pub enum PostHook {
    Static(PostHookFn),
    Bound(Arc<dyn Fn(&mut CallFrame) + Send + Sync>),
}

impl PostHook {
    pub fn is_stateless(&self) -> bool {
        matches!(self, PostHook::Static(_))
    }

    pub fn invoke(&self, frame: &mut CallFrame) {
        match self {
            PostHook::Static(hook) => hook(frame),
            PostHook::Bound(hook) => hook(frame),
        }
    }
}

impl fmt::Debug for PostHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostHook::Static(hook) => write!(f, "PostHook::Static({:p})", *hook as *const ()),
            PostHook::Bound(_) => write!(f, "PostHook::Bound(..)"),
        }
    }
}

/// Builder for one interception.
#[derive(Debug, Clone, Default)]
pub struct PatchRequest {
    pub target: Option<String>,
    pub pre: Option<PreHook>,
    pub post: Option<PostHook>,
}

impl PatchRequest {
    /// Empty request; fails validation until a target and a hook are set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request targeting `target`.
    pub fn on(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn pre(mut self, hook: PreHookFn) -> Self {
        self.pre = Some(PreHook::Static(hook));
        self
    }

    pub fn post(mut self, hook: PostHookFn) -> Self {
        self.post = Some(PostHook::Static(hook));
        self
    }

    pub fn pre_bound(mut self, hook: impl Fn(&mut CallFrame) -> HookFlow + Send + Sync + 'static) -> Self {
        self.pre = Some(PreHook::Bound(Arc::new(hook)));
        self
    }

    pub fn post_bound(mut self, hook: impl Fn(&mut CallFrame) + Send + Sync + 'static) -> Self {
        self.post = Some(PostHook::Bound(Arc::new(hook)));
        self
    }
}

/// Identity of an installed patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatchId(pub u64);

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "patch#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn double_first(frame: &mut CallFrame) -> HookFlow {
        if let Some(Value::Number(n)) = frame.args.first().cloned() {
            frame.args[0] = json!(n.as_i64().unwrap_or_default() * 2);
        }
        HookFlow::Continue
    }

    fn stamp(frame: &mut CallFrame) {
        frame.result = json!("stamped");
    }

    #[test]
    fn test_static_hooks_are_stateless() {
        let request = PatchRequest::on("host::add").pre(double_first).post(stamp);
        assert!(request.pre.as_ref().unwrap().is_stateless());
        assert!(request.post.as_ref().unwrap().is_stateless());
    }

    #[test]
    fn test_bound_hooks_are_not_stateless() {
        let captured = 3;
        let request = PatchRequest::on("host::add")
            .pre_bound(move |_| if captured > 0 { HookFlow::Skip } else { HookFlow::Continue })
            .post_bound(|_| {});
        assert!(!request.pre.as_ref().unwrap().is_stateless());
        assert!(!request.post.as_ref().unwrap().is_stateless());
    }

    #[test]
    fn test_invoke() {
        let mut frame = CallFrame::new("host::add", vec![json!(4)]);
        assert_eq!(PreHook::Static(double_first).invoke(&mut frame), HookFlow::Continue);
        assert_eq!(frame.arg(0), Some(&json!(8)));

        PostHook::Static(stamp).invoke(&mut frame);
        assert_eq!(frame.result, json!("stamped"));
        assert_eq!(frame.target(), "host::add");
    }

    #[test]
    fn test_empty_request() {
        let request = PatchRequest::new();
        assert!(request.target.is_none());
        assert!(request.pre.is_none() && request.post.is_none());
    }
}
