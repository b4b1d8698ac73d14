// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! Shared dispatch queue decoupling network receipt from user callbacks.
//!
//! Inbound messages and events are enqueued as callback records; a worker
//! thread drains them and runs the callbacks. Guarantees:
//!
//! - FIFO order among records sharing an owner id; no cross-owner order.
//! - Records of the same owner never execute concurrently, even with
//!   several drain threads: each invocation holds that owner's call-guard.
//! - [`CallbackQueue::remove_by_owner`] suppresses all pending records of
//!   an owner without interrupting one already executing.
//! - `TryAgain` re-enqueues at the tail for a later drain pass, so one
//!   stubborn callback cannot starve other owners.
//!
//! Disabling the queue is irreversible; a replacement queue must be
//! constructed to resume dispatch. Call-guards live in an explicit map with
//! an eviction path ([`CallbackQueue::evict_owner`]) so long-lived
//! processes do not accumulate guards for dead subscriptions.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::POLL_INTERVAL;
use crate::sync::{ShutdownToken, WakeNotifier};

/// Outcome reported by a callback invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallResult {
    /// Work done; record is consumed.
    Success,
    /// Not ready; re-enqueue for a later drain pass.
    TryAgain,
    /// Record no longer applicable (e.g. its message was dropped); consumed.
    Invalid,
}

/// Outcome of one drain pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainResult {
    /// At least one callback ran.
    Called,
    /// Nothing to run within the timeout.
    Empty,
    /// Queue has been disabled; no further work will ever run.
    Disabled,
}

type Callback = Box<dyn FnMut() -> CallResult + Send>;

/// One pending unit of work.
struct CallbackRecord {
    /// The callback; a mutex because `TryAgain` may run it again later,
    /// possibly from another drain thread.
    callback: Mutex<Callback>,
    /// Owner id used for bulk removal and the call-guard.
    owner: u64,
    /// Set by `remove_by_owner`; checked under the owner guard before
    /// every invocation.
    removed: AtomicBool,
}

struct QueueState {
    records: VecDeque<Arc<CallbackRecord>>,
    enabled: bool,
}

/// Shared, per-node work queue running user callbacks on a worker thread.
pub struct CallbackQueue {
    state: Mutex<QueueState>,
    /// Wakes drain calls waiting for work.
    signal: WakeNotifier,
    /// Owner id -> call-guard. Entries are created lazily on first enqueue
    /// and removed by [`CallbackQueue::evict_owner`].
    guards: DashMap<u64, Arc<Mutex<()>>>,
}

impl CallbackQueue {
    /// Create an enabled queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                records: VecDeque::new(),
                enabled: true,
            }),
            signal: WakeNotifier::new(),
            guards: DashMap::new(),
        }
    }

    /// Enqueue a callback under the given owner id.
    ///
    /// Silently discarded when the queue is disabled.
    pub fn add_callback<F>(&self, callback: F, owner: u64)
    where
        F: FnMut() -> CallResult + Send + 'static,
    {
        let record = Arc::new(CallbackRecord {
            callback: Mutex::new(Box::new(callback)),
            owner,
            removed: AtomicBool::new(false),
        });

        {
            let mut state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.records.push_back(record);
        }
        self.guards
            .entry(owner)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        self.signal.notify();
    }

    /// Mark every pending record of `owner` for removal and strip them
    /// from the queue. A callback of that owner already executing finishes
    /// normally; it is only future dequeues that are suppressed.
    pub fn remove_by_owner(&self, owner: u64) {
        let mut state = self.state.lock();
        state.records.retain(|record| {
            if record.owner == owner {
                record.removed.store(true, Ordering::Release);
                false
            } else {
                true
            }
        });
    }

    /// Remove the owner's pending work AND its call-guard. Call when the
    /// owning subscription is disposed; the guard map would otherwise grow
    /// for the life of the process.
    pub fn evict_owner(&self, owner: u64) {
        self.remove_by_owner(owner);
        self.guards.remove(&owner);
    }

    /// Pending record count.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// True when no records are pending.
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Discard all pending records without disabling the queue.
    pub fn clear(&self) {
        self.state.lock().records.clear();
    }

    /// Still accepting and running work?
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Disable the queue: wake all waiters, drop pending work, refuse new
    /// work. Irreversible for this instance.
    pub fn disable(&self) {
        {
            let mut state = self.state.lock();
            state.enabled = false;
            state.records.clear();
        }
        self.signal.notify();
    }

    /// Run available callbacks, waiting up to `timeout` for work.
    ///
    /// The whole pending list is moved into a local batch under the lock,
    /// then each record runs outside it: owner guard held, removal flag
    /// checked, result interpreted. `TryAgain` goes back to the shared tail
    /// rather than retrying inline.
    pub fn call_available(&self, timeout: Duration) -> DrainResult {
        {
            let state = self.state.lock();
            if !state.enabled {
                return DrainResult::Disabled;
            }
            if state.records.is_empty() && timeout.is_zero() {
                return DrainResult::Empty;
            }
        }

        // Wait for the signal outside the lock; a notify latched before we
        // got here returns immediately.
        if self.is_empty() && !self.signal.wait_timeout(timeout) {
            return if self.is_enabled() {
                DrainResult::Empty
            } else {
                DrainResult::Disabled
            };
        }

        let batch: Vec<Arc<CallbackRecord>> = {
            let mut state = self.state.lock();
            if !state.enabled {
                return DrainResult::Disabled;
            }
            state.records.drain(..).collect()
        };
        if batch.is_empty() {
            return DrainResult::Empty;
        }

        let mut called = false;
        for record in batch {
            // Guard evicted mid-flight means the owner is gone entirely.
            let Some(guard) = self.guards.get(&record.owner).map(|g| Arc::clone(&g)) else {
                continue;
            };

            let result = {
                let _exclusive = guard.lock();
                if record.removed.load(Ordering::Acquire) {
                    continue;
                }
                let mut callback = record.callback.lock();
                (*callback)()
            };
            called = true;

            if result == CallResult::TryAgain && !record.removed.load(Ordering::Acquire) {
                let mut state = self.state.lock();
                if state.enabled {
                    state.records.push_back(record);
                }
            }
        }

        if called {
            DrainResult::Called
        } else {
            DrainResult::Empty
        }
    }

    /// Spawn the dedicated worker loop: drain with a fixed poll timeout
    /// until shutdown or disable.
    pub fn spawn_worker(self: &Arc<Self>, token: ShutdownToken) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        std::thread::Builder::new()
            .name("roslink-callback-queue".to_string())
            .spawn(move || {
                while !token.is_triggered() {
                    if queue.call_available(POLL_INTERVAL) == DrainResult::Disabled {
                        break;
                    }
                }
                crate::debug!("callback queue worker exiting");
            })
            .expect("failed to spawn callback queue worker")
    }
}

impl Default for CallbackQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
