// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Wake notification and shutdown signalling shared by the supervised loops.
//!
//! Two primitives:
//!
//! - [`WakeNotifier`] - auto-reset wake signal with an atomic fast-path and
//!   a condvar fallback for idle waits. Producers call [`WakeNotifier::notify`]
//!   (an atomic store on the hot path); consumers poll
//!   [`WakeNotifier::check_and_clear`] or block in
//!   [`WakeNotifier::wait_timeout`].
//! - [`ShutdownToken`] - one shared cancellation flag per node. Every
//!   supervised loop checks it at each suspension point and uses
//!   [`ShutdownToken::wait_timeout`] instead of plain sleeps so that
//!   shutdown interrupts backoff waits immediately.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Auto-reset wake signal with atomic fast-path.
///
/// A notification posted while no one is waiting is latched and consumed by
/// the next wait, so producers never need to know whether the consumer is
/// currently blocked.
#[derive(Debug)]
pub struct WakeNotifier {
    /// Atomic flag for the lock-free fast path
    data_ready: AtomicBool,
    /// Mutex for the condvar (only touched when a waiter sleeps)
    sleeping: Mutex<bool>,
    /// Condvar for idle waits
    condvar: Condvar,
}

impl WakeNotifier {
    /// Create a new wake notifier.
    #[inline]
    pub fn new() -> Self {
        Self {
            data_ready: AtomicBool::new(false),
            sleeping: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Post a notification.
    ///
    /// Atomic store on the fast path; the condvar is only signalled when a
    /// consumer might be sleeping. The sleeping check is racy but safe -
    /// worst case is one extra signal.
    #[inline]
    pub fn notify(&self) {
        self.data_ready.store(true, Ordering::Release);
        if *self.sleeping.lock() {
            self.condvar.notify_all();
        }
    }

    /// Consume a pending notification if one is latched.
    #[inline]
    pub fn check_and_clear(&self) -> bool {
        self.data_ready.swap(false, Ordering::Acquire)
    }

    /// Wait for a notification, consuming it.
    ///
    /// Returns `true` if notified, `false` on timeout. Returns immediately
    /// when a notification is already latched.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.data_ready.swap(false, Ordering::Acquire) {
            return true;
        }

        let mut sleeping = self.sleeping.lock();

        // Double-check after acquiring the lock
        if self.data_ready.swap(false, Ordering::Acquire) {
            return true;
        }

        *sleeping = true;
        let result = self.condvar.wait_for(&mut sleeping, timeout);
        *sleeping = false;

        if self.data_ready.swap(false, Ordering::Acquire) {
            !result.timed_out()
        } else {
            false
        }
    }
}

impl Default for WakeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared cancellation signal observed by every supervised loop of a node.
///
/// Cloning shares the underlying flag. Triggering is irreversible.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    triggered: AtomicBool,
    notifier: WakeNotifier,
}

impl ShutdownToken {
    /// Create an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the shutdown signal and wake every waiter.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::Release);
        self.inner.notifier.notify();
    }

    /// Has shutdown been requested?
    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Sleep for `timeout` unless shutdown is triggered first.
    ///
    /// Returns `true` when shutdown interrupted the wait. Backoff delays and
    /// watchdog timers go through here so disposal cancels them promptly.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        // The notifier is notify_all + re-latched on trigger, so concurrent
        // waiters all observe the flag.
        let _ = self.inner.notifier.wait_timeout(timeout);
        if self.is_triggered() {
            // Re-latch for any other waiter that lost the race
            self.inner.notifier.notify();
            true
        } else {
            false
        }
    }
}
