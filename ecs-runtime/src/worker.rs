// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Fixed-size worker pool
//!
//! Workers drain two bounded queues: a shared queue any worker may take from,
//! and a private lane per worker. [`WorkerPool::execute_keyed`] routes a job to
//! lane `key % workers`, so jobs submitted with the same key run one after
//! another on the same thread and never concurrently.
//!
//! [`TaskGroup`] is the wait-for-completion latch used by the scheduler after
//! every batch and by the flush after its per-type jobs.

use crate::error::{Result, RuntimeError};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Unit of work accepted by the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queues {
    shared: Sender<Job>,
    lanes: Vec<Sender<Job>>,
}

/// A fixed set of worker threads consuming bounded job queues
pub struct WorkerPool {
    queues: RwLock<Option<Queues>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn `workers` threads, each queue holding at most `queue_size` jobs
    ///
    /// Zero values are raised to one.
    pub fn new(workers: usize, queue_size: usize) -> Result<Self> {
        let workers = workers.max(1);
        let queue_size = queue_size.max(1);

        let (shared_tx, shared_rx) = bounded::<Job>(queue_size);
        let mut lanes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (lane_tx, lane_rx) = bounded::<Job>(queue_size);
            let shared_rx = shared_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("ecs-worker-{index}"))
                .spawn(move || worker_loop(index, lane_rx, shared_rx))?;
            lanes.push(lane_tx);
            handles.push(handle);
        }

        tracing::debug!(workers, queue_size, "worker pool started");

        Ok(WorkerPool {
            queues: RwLock::new(Some(Queues {
                shared: shared_tx,
                lanes,
            })),
            handles: Mutex::new(handles),
            workers,
        })
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` on whichever worker takes it first
    ///
    /// Blocks while the shared queue is full.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = match self.queues.read().as_ref() {
            Some(queues) => queues.shared.clone(),
            None => return Err(RuntimeError::PoolClosed),
        };
        sender
            .send(Box::new(job))
            .map_err(|_| RuntimeError::PoolClosed)
    }

    /// Run `job` on the worker selected by `key`
    ///
    /// Jobs with equal keys are executed in submission order on one thread.
    pub fn execute_keyed<F>(&self, key: u64, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = match self.queues.read().as_ref() {
            Some(queues) => {
                let lane = (key % queues.lanes.len() as u64) as usize;
                queues.lanes[lane].clone()
            }
            None => return Err(RuntimeError::PoolClosed),
        };
        sender
            .send(Box::new(job))
            .map_err(|_| RuntimeError::PoolClosed)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_closed(&self) -> bool {
        self.queues.read().is_none()
    }

    /// Close every queue and join the workers
    ///
    /// Jobs already queued still run. Calling this twice is a no-op.
    pub fn shutdown(&self) {
        let closed = self.queues.write().take();
        if closed.is_none() {
            return;
        }
        drop(closed);

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }
        tracing::debug!(workers = self.workers, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, lane: Receiver<Job>, shared: Receiver<Job>) {
    loop {
        let next = select! {
            recv(lane) -> job => job,
            recv(shared) -> job => job,
        };
        match next {
            Ok(job) => run_job(index, job),
            Err(_) => break,
        }
    }

    // One side disconnected; finish whatever is still buffered on either.
    for job in lane.iter().chain(shared.iter()) {
        run_job(index, job);
    }
}

fn run_job(index: usize, job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!(
            worker = index,
            "job panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

struct GroupState {
    pending: Mutex<usize>,
    done: Condvar,
}

/// Counting latch for a set of submitted jobs
///
/// Every job passed through [`wrap`](Self::wrap) counts as pending until it
/// finishes, panics, or is dropped unexecuted.
#[derive(Clone)]
pub struct TaskGroup {
    state: Arc<GroupState>,
}

impl TaskGroup {
    /// Create an empty group
    pub fn new() -> Self {
        TaskGroup {
            state: Arc::new(GroupState {
                pending: Mutex::new(0),
                done: Condvar::new(),
            }),
        }
    }

    /// Register `job` with the group and return the tracked job
    pub fn wrap<F>(&self, job: F) -> impl FnOnce() + Send + 'static
    where
        F: FnOnce() + Send + 'static,
    {
        *self.state.pending.lock() += 1;
        let guard = CompletionGuard {
            state: Arc::clone(&self.state),
        };
        move || {
            let _guard = guard;
            job();
        }
    }

    /// Number of registered jobs that have not completed
    pub fn pending(&self) -> usize {
        *self.state.pending.lock()
    }

    /// Block until every registered job has completed
    pub fn wait(&self) {
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            self.state.done.wait(&mut pending);
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

struct CompletionGuard {
    state: Arc<GroupState>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let mut pending = self.state.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.state.done.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_pool_runs_jobs() {
        let pool = WorkerPool::new(4, 8).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let group = TaskGroup::new();

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.execute(group.wrap(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        group.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn test_zero_sizes_are_raised() {
        let pool = WorkerPool::new(0, 0).unwrap();
        assert_eq!(pool.workers(), 1);
    }

    #[test]
    fn test_keyed_jobs_run_in_submission_order() {
        let pool = WorkerPool::new(4, 16).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let group = TaskGroup::new();

        for i in 0..200u32 {
            let log = Arc::clone(&log);
            pool.execute_keyed(7, group.wrap(move || log.lock().push(i)))
                .unwrap();
        }

        group.wait();
        let log = log.lock();
        assert_eq!(*log, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_keyed_jobs_never_overlap() {
        let pool = WorkerPool::new(4, 16).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let group = TaskGroup::new();

        for _ in 0..50 {
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            pool.execute_keyed(3, group.wrap(move || {
                if active.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(50));
                active.fetch_sub(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        group.wait();
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_job_still_counts_down() {
        let pool = WorkerPool::new(2, 4).unwrap();
        let group = TaskGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.execute(group.wrap(|| panic!("boom"))).unwrap();
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.execute(group.wrap(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        group.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 5);

        // Worker survived the panic
        let group = TaskGroup::new();
        pool.execute(group.wrap(|| {})).unwrap();
        group.wait();
    }

    #[test]
    fn test_dropped_job_counts_down() {
        let group = TaskGroup::new();
        let job = group.wrap(|| {});
        assert_eq!(group.pending(), 1);
        drop(job);
        assert_eq!(group.pending(), 0);
        group.wait();
    }

    #[test]
    fn test_execute_after_shutdown_fails() {
        let pool = WorkerPool::new(2, 4).unwrap();
        pool.shutdown();
        assert!(pool.is_closed());
        assert!(matches!(pool.execute(|| {}), Err(RuntimeError::PoolClosed)));
        assert!(matches!(
            pool.execute_keyed(1, || {}),
            Err(RuntimeError::PoolClosed)
        ));
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_finishes_queued_jobs() {
        let pool = WorkerPool::new(1, 64).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_worker_threads_are_named() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(move || {
            let name = thread::current().name().map(str::to_string);
            let _ = tx.send(name);
        })
        .unwrap();
        let name = rx.recv().unwrap();
        assert_eq!(name.as_deref(), Some("ecs-worker-0"));
    }
}
