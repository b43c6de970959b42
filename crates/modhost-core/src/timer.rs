//! Host lifecycle flags and per-extension periodic timers.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modhost_sdk::{TimerCallback, TimerError, TimerHandle};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Where the host is in its load/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostState {
    Unloaded = 0,
    Loading = 1,
    Loaded = 2,
    Unloading = 3,
}

impl HostState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => HostState::Loading,
            2 => HostState::Loaded,
            3 => HostState::Unloading,
            _ => HostState::Unloaded,
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Unloaded => "unloaded",
            HostState::Loading => "loading",
            HostState::Loaded => "loaded",
            HostState::Unloading => "unloading",
        };
        f.write_str(name)
    }
}

/// Lifecycle token shared between the host and every timer task.
///
/// Timer ticks run their callback only while the host is `Loaded` and timers
/// are allowed. The check is best-effort: a tick that passed the gate may
/// still be running when the state changes.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    timers_allowed: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(HostState::Unloaded as u8),
            timers_allowed: AtomicBool::new(true),
        }
    }

    pub fn state(&self) -> HostState {
        HostState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: HostState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == HostState::Loaded
    }

    pub fn timers_allowed(&self) -> bool {
        self.timers_allowed.load(Ordering::Acquire)
    }

    pub fn set_timers_allowed(&self, allowed: bool) {
        self.timers_allowed.store(allowed, Ordering::Release);
    }

    /// Both gates open.
    pub fn ticks_permitted(&self) -> bool {
        self.is_loaded() && self.timers_allowed()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Value a timer task keeps alive until it exits, typically the library the
/// callback's code lives in.
pub type KeepAlive = Arc<dyn Any + Send + Sync>;

/// Spawns timer tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TimerScheduler {
    runtime: Option<Handle>,
    lifecycle: Arc<Lifecycle>,
}

impl TimerScheduler {
    pub fn new(runtime: Option<Handle>, lifecycle: Arc<Lifecycle>) -> Self {
        Self { runtime, lifecycle }
    }

    /// Scheduler on the runtime of the calling thread, if there is one.
    pub fn from_current(lifecycle: Arc<Lifecycle>) -> Self {
        Self::new(Handle::try_current().ok(), lifecycle)
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn has_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    fn spawn(
        &self,
        timer: TimerHandle,
        state: Option<Value>,
        callback: TimerCallback,
        keep_alive: Option<KeepAlive>,
    ) -> Result<(), TimerError> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(TimerError::SchedulerUnavailable {
                id: timer.id().to_string(),
            });
        };
        let lifecycle = self.lifecycle.clone();
        let interval = timer.interval();

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !timer.is_active() {
                    break;
                }
                if !lifecycle.ticks_permitted() {
                    continue;
                }
                callback(state.as_ref());
            }
            // The callback may live in the library held by `keep_alive`.
            drop(callback);
            drop(state);
            drop(keep_alive);
        });
        Ok(())
    }
}

/// Timers owned by one extension.
pub struct ExtensionTimers {
    owner: String,
    scheduler: TimerScheduler,
    timers: Vec<TimerHandle>,
    keep_alive: Option<KeepAlive>,
    log_timers: bool,
}

impl ExtensionTimers {
    pub fn new(owner: impl Into<String>, scheduler: TimerScheduler, log_timers: bool) -> Self {
        Self {
            owner: owner.into(),
            scheduler,
            timers: Vec::new(),
            keep_alive: None,
            log_timers,
        }
    }

    /// Keep `value` alive in every timer task spawned from now on.
    pub fn with_keep_alive(mut self, value: KeepAlive) -> Self {
        self.keep_alive = Some(value);
        self
    }

    /// Register a timer. A duplicate id fails and leaves the existing timer
    /// running; cancelled timers free their id.
    pub fn create(
        &mut self,
        id: &str,
        interval: Duration,
        state: Option<Value>,
        callback: TimerCallback,
    ) -> Result<TimerHandle, TimerError> {
        self.timers.retain(|t| t.is_active());
        if self.timers.iter().any(|t| t.id() == id) {
            return Err(TimerError::DuplicateId { id: id.to_string() });
        }
        if interval.is_zero() {
            return Err(TimerError::ZeroInterval { id: id.to_string() });
        }

        let handle = TimerHandle::new(self.owner.clone(), id, interval);
        self.scheduler
            .spawn(handle.clone(), state, callback, self.keep_alive.clone())?;
        self.timers.push(handle.clone());

        if self.log_timers {
            info!(extension_id = %self.owner, timer_id = id, interval_ms = interval.as_millis() as u64, "Timer created");
        }
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<TimerHandle> {
        self.timers
            .iter()
            .find(|t| t.id() == id && t.is_active())
            .cloned()
    }

    /// Cancel every timer. Returns how many were still active.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for timer in self.timers.drain(..) {
            if timer.is_active() {
                timer.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(extension_id = %self.owner, cancelled, "Timers cancelled");
        }
        cancelled
    }

    pub fn active_count(&self) -> usize {
        self.timers.iter().filter(|t| t.is_active()).count()
    }
}

impl Drop for ExtensionTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = counter.clone();
        Arc::new(move |_: Option<&Value>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn loaded_lifecycle() -> Arc<Lifecycle> {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.set_state(HostState::Loaded);
        lifecycle
    }

    #[test]
    fn test_lifecycle_gates() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), HostState::Unloaded);
        assert!(!lifecycle.ticks_permitted());

        lifecycle.set_state(HostState::Loaded);
        assert!(lifecycle.ticks_permitted());

        lifecycle.set_timers_allowed(false);
        assert!(!lifecycle.ticks_permitted());
        assert!(lifecycle.is_loaded());
    }

    #[test]
    fn test_no_runtime() {
        let scheduler = TimerScheduler::new(None, loaded_lifecycle());
        let mut timers = ExtensionTimers::new("m1", scheduler, false);
        let err = timers
            .create("tick", Duration::from_millis(10), None, Arc::new(|_: Option<&Value>| {}))
            .unwrap_err();
        assert_eq!(err, TimerError::SchedulerUnavailable { id: "tick".into() });
        assert!(timers.get("tick").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timer_ticks_and_duplicate_is_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = TimerScheduler::from_current(loaded_lifecycle());
        let mut timers = ExtensionTimers::new("m1", scheduler, false);

        let first = timers
            .create("tick", Duration::from_millis(10), None, counting_callback(&counter))
            .unwrap();
        let err = timers
            .create("tick", Duration::from_millis(10), None, Arc::new(|_: Option<&Value>| {}))
            .unwrap_err();
        assert_eq!(err, TimerError::DuplicateId { id: "tick".into() });
        assert!(first.is_active());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert_eq!(timers.get("tick").map(|t| t.interval()), Some(Duration::from_millis(10)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_interval() {
        let scheduler = TimerScheduler::from_current(loaded_lifecycle());
        let mut timers = ExtensionTimers::new("m1", scheduler, false);
        let err = timers
            .create("tick", Duration::ZERO, None, Arc::new(|_: Option<&Value>| {}))
            .unwrap_err();
        assert_eq!(err, TimerError::ZeroInterval { id: "tick".into() });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_gates_skip_callback_body() {
        let counter = Arc::new(AtomicUsize::new(0));
        let lifecycle = Arc::new(Lifecycle::new());
        let scheduler = TimerScheduler::from_current(lifecycle.clone());
        let mut timers = ExtensionTimers::new("m1", scheduler, false);
        timers
            .create("tick", Duration::from_millis(5), None, counting_callback(&counter))
            .unwrap();

        // Not loaded yet.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Loaded but timers disabled.
        lifecycle.set_state(HostState::Loaded);
        lifecycle.set_timers_allowed(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        lifecycle.set_timers_allowed(true);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_all_stops_future_ticks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = TimerScheduler::from_current(loaded_lifecycle());
        let mut timers = ExtensionTimers::new("m1", scheduler, false);
        let handle = timers
            .create("tick", Duration::from_millis(5), Some(serde_json::json!(1)), counting_callback(&counter))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(timers.cancel_all(), 1);
        assert!(!handle.is_active());

        // Allow an in-flight tick to finish, then the count must stay put.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_cancel = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_cancel);
        assert_eq!(timers.active_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_id_can_be_reused() {
        let scheduler = TimerScheduler::from_current(loaded_lifecycle());
        let mut timers = ExtensionTimers::new("m1", scheduler, false);
        let handle = timers
            .create("tick", Duration::from_millis(5), None, Arc::new(|_: Option<&Value>| {}))
            .unwrap();
        handle.cancel();
        assert!(timers.get("tick").is_none());
        assert!(timers
            .create("tick", Duration::from_millis(5), None, Arc::new(|_: Option<&Value>| {}))
            .is_ok());
    }
}
