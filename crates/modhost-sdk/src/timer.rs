//! Timer handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

/// Periodic callback. Receives the optional state supplied at creation.
pub type TimerCallback = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

/// Shared view of one registered timer.
///
/// Clones observe the same active flag; cancelling any clone stops future
/// ticks of the timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: String,
    owner: String,
    interval: Duration,
    active: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn new(owner: impl Into<String>, id: impl Into<String>, interval: Duration) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            interval,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the owning extension.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop future ticks. Does not wait for a tick already running.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }
}
