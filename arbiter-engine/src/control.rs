//! Inbound control surface: pause, resume, and the kill switch. These
//! are the only commands the engine accepts from outside.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

struct ControlState {
    paused: AtomicBool,
    kill: AtomicBool,
    notify: Notify,
}

/// Cloneable handle shared between the engine loop and external callers.
#[derive(Clone)]
pub struct ControlHandle {
    inner: Arc<ControlState>,
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlHandle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlState {
                paused: AtomicBool::new(false),
                kill: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Suspend trading; the loop keeps running but executes nothing.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("engine paused");
        }
        self.inner.notify.notify_waiters();
    }

    /// Resume trading after a pause.
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("engine resumed");
        }
        self.inner.notify.notify_waiters();
    }

    /// Request an orderly shutdown with a forced state flush.
    pub fn kill_switch(&self) {
        if !self.inner.kill.swap(true, Ordering::SeqCst) {
            info!("kill switch engaged");
        }
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn kill_requested(&self) -> bool {
        self.inner.kill.load(Ordering::SeqCst)
    }

    /// Map Ctrl-C onto the kill switch.
    pub fn bind_ctrl_c(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.kill_switch();
            }
        });
    }

    /// Sleep up to `duration`, waking early on any control transition.
    /// Returns `false` when shutdown was requested.
    pub(crate) async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.inner.notify.notified() => {}
        }
        !self.kill_requested()
    }
}
