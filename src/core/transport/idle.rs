// src/core/transport/idle.rs

//! Idle detection for transports whose client library has none.
//!
//! An [`IdleWatchdog`] counts operations in flight and remembers when the last
//! one finished. Its watch task emits a single [`TransportEvent::Idle`] once
//! nothing has been in flight for the idle duration, and exits without a word
//! once the session is closed.

use super::{EventSink, TransportEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Activity tracker for one session.
#[derive(Debug)]
pub struct IdleWatchdog {
    in_flight: AtomicUsize,
    last: Mutex<Instant>,
    changed: Notify,
    closed: AtomicBool,
}

impl Default for IdleWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleWatchdog {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            last: Mutex::new(Instant::now()),
            changed: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Marks one operation as in flight until the guard is dropped.
    pub fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_one();
        ActivityGuard {
            watchdog: self.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the session closed. The watch task exits without emitting.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.changed.notify_one();
    }

    /// Spawns the watch task. It holds `events` until it exits.
    pub fn spawn(self: &Arc<Self>, idle_timeout: Duration, events: EventSink) -> JoinHandle<()> {
        tokio::spawn(self.clone().watch(idle_timeout, events))
    }

    async fn watch(self: Arc<Self>, idle_timeout: Duration, events: EventSink) {
        loop {
            if self.is_closed() {
                return;
            }
            if self.in_flight() > 0 {
                self.changed.notified().await;
                continue;
            }

            let deadline = *self.last.lock() + idle_timeout;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    // Something may have started and finished while asleep.
                    let quiet = self.in_flight() == 0
                        && self.last.lock().elapsed() >= idle_timeout;
                    if quiet && !self.is_closed() {
                        let _ = events.send(TransportEvent::Idle);
                        return;
                    }
                }
                _ = self.changed.notified() => {}
            }
        }
    }
}

/// Keeps an operation counted as in flight while alive.
#[derive(Debug)]
pub struct ActivityGuard {
    watchdog: Arc<IdleWatchdog>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        *self.watchdog.last.lock() = Instant::now();
        self.watchdog.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.watchdog.changed.notify_one();
    }
}
