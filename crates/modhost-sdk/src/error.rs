//! Error types returned to mods.
//!
//! Patch and timer errors are local to the call that produced them; the host
//! never aborts a load cycle because of them unless the mod propagates them
//! out of `init`.

use std::fmt;

use thiserror::Error;

/// Error reported by a mod's `init` or `stop` hook.
#[derive(Debug, Error)]
pub enum ModError {
    /// Free-form failure reported by the mod itself.
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Timer(#[from] TimerError),
}

impl ModError {
    /// Shorthand for [`ModError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        ModError::Failed(message.into())
    }
}

/// Which hook of a patch an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookSlot {
    Pre,
    Post,
}

impl fmt::Display for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookSlot::Pre => write!(f, "pre"),
            HookSlot::Post => write!(f, "post"),
        }
    }
}

/// Rejected patch request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("patch request has no target")]
    MissingTarget,

    #[error("patch on '{target}' has neither a pre-hook nor a post-hook")]
    MissingHook { target: String },

    #[error("{slot}-hook on '{target}' is not stateless (closures cannot be installed)")]
    NotStateless { target: String, slot: HookSlot },

    #[error("patch engine rejected '{target}': {message}")]
    Engine { target: String, message: String },
}

/// Rejected timer request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("timer '{id}' already exists")]
    DuplicateId { id: String },

    #[error("timer '{id}' has a zero interval")]
    ZeroInterval { id: String },

    #[error("no scheduler runtime available for timer '{id}'")]
    SchedulerUnavailable { id: String },
}
