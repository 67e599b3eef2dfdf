// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fixed-size worker pool executing transfer tasks.
//!
//! Submissions go through an unbounded [`crossbeam`] channel to a fixed set of
//! named worker threads. [`WorkerPool::submit`] never blocks on the transfer
//! itself: it returns a [`TransferHandle`] that resolves once a worker has run
//! the task.
//!
//! Shutdown is a cooperative drain: intake stops, every queued and in-flight
//! task runs to completion, and progress is logged periodically until the
//! queue is empty. There is no hard timeout.

use crate::error::TransferError;
use crate::ledger::{AccountIndex, Amount, Ledger};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, trace, warn};

/// A single transfer between two accounts of a ledger.
#[derive(Debug, Clone)]
pub struct TransferTask {
    ledger: Arc<Ledger>,
    sender: AccountIndex,
    recipient: AccountIndex,
    amount: Amount,
}

impl TransferTask {
    pub fn new(
        ledger: Arc<Ledger>,
        sender: AccountIndex,
        recipient: AccountIndex,
        amount: Amount,
    ) -> Self {
        Self {
            ledger,
            sender,
            recipient,
            amount,
        }
    }

    pub fn run(&self) -> Result<(), TransferError> {
        self.ledger.transfer(self.sender, self.recipient, self.amount)
    }
}

/// Outcome slot shared by every clone of a handle.
///
/// Blocking waiters park on the condvar, async waiters on the notify.
#[derive(Debug)]
struct OutcomeCell {
    outcome: Mutex<Option<Result<(), TransferError>>>,
    resolved: Condvar,
    notify: Notify,
}

/// Shared handle to the outcome of a scheduled transfer.
///
/// Clones observe the same outcome. Once resolved, the outcome never changes.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    inner: Arc<OutcomeCell>,
}

impl TransferHandle {
    fn pending() -> Self {
        Self {
            inner: Arc::new(OutcomeCell {
                outcome: Mutex::new(None),
                resolved: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// A handle that is already resolved to `outcome`.
    pub fn resolved(outcome: Result<(), TransferError>) -> Self {
        let handle = Self::pending();
        handle.complete(outcome);
        handle
    }

    fn complete(&self, outcome: Result<(), TransferError>) {
        let mut slot = self.inner.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.inner.resolved.notify_all();
            drop(slot);
            self.inner.notify.notify_waiters();
        }
    }

    /// Blocks until the transfer completes and returns its outcome.
    pub fn wait(&self) -> Result<(), TransferError> {
        let mut slot = self.inner.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.inner.resolved.wait(&mut slot);
        }
    }

    /// Waits for the outcome without blocking the calling thread.
    pub async fn wait_async(&self) -> Result<(), TransferError> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Registered before the check, so a completion in between still wakes us.
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Like [`TransferHandle::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), TransferError>> {
        let mut slot = self.inner.outcome.lock();
        if slot.is_none() {
            self.inner.resolved.wait_while_for(&mut slot, |slot| slot.is_none(), timeout);
        }
        slot.clone()
    }

    /// Non-blocking peek at the outcome.
    pub fn outcome(&self) -> Option<Result<(), TransferError>> {
        self.inner.outcome.lock().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.outcome.lock().is_some()
    }

    /// Whether both handles refer to the same scheduled transfer.
    pub fn same_transfer(&self, other: &TransferHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct Job {
    task: TransferTask,
    handle: TransferHandle,
}

/// Count of submitted but not yet completed tasks.
///
/// The counter is atomic; the mutex only pairs with the condvar so a drain
/// waiter cannot miss the final wakeup.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    lock: Mutex<()>,
    drained: Condvar,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.lock.lock();
            self.drained.notify_all();
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn wait_drained(&self, progress_interval: Duration) {
        let mut guard = self.lock.lock();
        while self.get() > 0 {
            if self.drained.wait_for(&mut guard, progress_interval).timed_out() {
                let remaining = self.get();
                if remaining > 0 {
                    info!(remaining, "waiting for transfers completion");
                }
            }
        }
    }
}

/// Bounded set of threads running [`TransferTask`]s.
pub struct WorkerPool {
    sender: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<Pending>,
    progress_interval: Duration,
}

impl WorkerPool {
    /// Starts `threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns the OS error if a worker thread cannot be spawned.
    pub fn new(threads: usize, progress_interval: Duration) -> io::Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();
        let pending = Arc::new(Pending::default());

        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads {
            let receiver = receiver.clone();
            let pending = Arc::clone(&pending);
            let worker = thread::Builder::new()
                .name(format!("processing-{n}"))
                .spawn(move || work(receiver, pending))?;
            workers.push(worker);
        }
        info!(threads, "worker pool started");

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            pending,
            progress_interval,
        })
    }

    /// Schedules `task` and returns a handle to its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ShuttingDown`] once [`WorkerPool::shutdown`]
    /// has been called.
    pub fn submit(&self, task: TransferTask) -> Result<TransferHandle, TransferError> {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return Err(TransferError::ShuttingDown);
        };

        let handle = TransferHandle::pending();
        self.pending.add();
        let job = Job {
            task,
            handle: handle.clone(),
        };
        if sender.send(job).is_err() {
            // All workers are gone; nothing will ever run this job.
            self.pending.finish();
            return Err(TransferError::ShuttingDown);
        }
        trace!("transfer scheduled");
        Ok(handle)
    }

    /// Number of tasks queued or running.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Stops intake and blocks until every submitted task has completed.
    ///
    /// Calls after the first return immediately.
    pub fn shutdown(&self) {
        let Some(sender) = self.sender.write().take() else {
            return;
        };
        drop(sender);
        info!(pending = self.pending(), "worker pool shutting down");

        self.pending.wait_drained(self.progress_interval);

        for worker in self.workers.lock().drain(..) {
            if worker.join().is_err() {
                warn!("worker thread terminated abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(receiver: Receiver<Job>, pending: Arc<Pending>) {
    // Ends once the sender is dropped and the queue is empty.
    for job in receiver.iter() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.task.run()))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(%message, "transfer task panicked");
                Err(TransferError::Internal(message))
            });
        job.handle.complete(outcome);
        pending.finish();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "transfer task panicked".to_owned()
    }
}
