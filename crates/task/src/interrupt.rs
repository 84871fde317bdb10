//! Cancellation shared between the signal handler and the running job

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// What an interrupt did when it was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptDisposition {
    /// A child process is running and will receive the interrupt
    Forwarded,
    /// Nothing is running; the caller should exit right away
    Idle,
}

/// Handle to the currently cancellable operation.
///
/// Cloned into the signal handler and the supervisor. Raising it is sticky:
/// once requested, every later wait resolves immediately.
#[derive(Debug, Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    requested: watch::Sender<bool>,
    active_children: AtomicUsize,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                requested,
                active_children: AtomicUsize::new(0),
            }),
        }
    }

    /// Raise the interrupt.
    pub fn trigger(&self) -> InterruptDisposition {
        self.inner.requested.send_replace(true);
        if self.has_active_child() {
            InterruptDisposition::Forwarded
        } else {
            InterruptDisposition::Idle
        }
    }

    pub fn is_requested(&self) -> bool {
        *self.inner.requested.borrow()
    }

    /// Resolves once the interrupt has been raised.
    pub async fn requested(&self) {
        let mut rx = self.inner.requested.subscribe();
        // The sender lives as long as `self`, so this only returns once raised
        let _ = rx.wait_for(|raised| *raised).await;
    }

    pub fn has_active_child(&self) -> bool {
        self.inner.active_children.load(Ordering::SeqCst) > 0
    }

    /// Mark a child process as running until the guard is dropped.
    pub(crate) fn enter_child(&self) -> ActiveChildGuard {
        self.inner.active_children.fetch_add(1, Ordering::SeqCst);
        ActiveChildGuard {
            interrupt: self.clone(),
        }
    }
}

pub(crate) struct ActiveChildGuard {
    interrupt: Interrupt,
}

impl Drop for ActiveChildGuard {
    fn drop(&mut self) {
        self.interrupt
            .inner
            .active_children
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_idle_when_no_child() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.is_requested());
        assert_eq!(interrupt.trigger(), InterruptDisposition::Idle);
        assert!(interrupt.is_requested());
    }

    #[test]
    fn test_forwarded_while_child_active() {
        let interrupt = Interrupt::new();
        let guard = interrupt.enter_child();
        assert!(interrupt.has_active_child());
        assert_eq!(interrupt.clone().trigger(), InterruptDisposition::Forwarded);
        drop(guard);
        assert!(!interrupt.has_active_child());
    }

    #[tokio::test]
    async fn test_requested_wakes_waiter() {
        let interrupt = Interrupt::new();
        let raiser = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            raiser.trigger();
        });

        tokio::time::timeout(Duration::from_secs(5), interrupt.requested())
            .await
            .expect("interrupt should wake the waiter");
    }

    #[tokio::test]
    async fn test_requested_is_sticky() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        tokio::time::timeout(Duration::from_millis(100), interrupt.requested())
            .await
            .expect("already raised interrupt resolves immediately");
    }
}
