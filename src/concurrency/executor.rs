// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Dynamically sized worker pool with a bounded task queue.
//!
//! The pool keeps between `low_watermark` and `high_watermark` threads
//! alive. Submission never blocks: when the queue is full or the pool is not
//! running, [`Executor::execute`] reports rejection and the caller decides
//! what backpressure means. Workers that sit idle past `idle_time` reap
//! themselves down to the low watermark.
//!
//! Accounting discipline: the submission path owns `total` (it increments it
//! when deciding to spawn, so the high watermark can never be overshot by a
//! racing pair of submitters), while the worker alone owns every `idle`
//! transition: +1 on entry, -1 on pop, +1 on return to waiting, -1 on exit.

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolFsm {
    /// Built but not started; tasks are rejected.
    Created,
    /// Accepting and executing tasks.
    Running,
    /// Draining: no new tasks, queued ones still run.
    Stopping,
    /// No workers left, queue empty.
    Stopped,
}

struct PoolState {
    state: PoolFsm,
    tasks: VecDeque<Task>,
    total: usize,
    idle: usize,
    spawned: usize,
}

struct Shared {
    name: String,
    low_watermark: usize,
    high_watermark: usize,
    max_queue: usize,
    idle_time: Duration,
    sync: Mutex<PoolState>,
    task_arrived: Condvar,
    stopped: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the pool. Cheap to share behind an `Arc`; all methods take
/// `&self`.
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    pub fn new(
        name: impl Into<String>,
        low_watermark: usize,
        high_watermark: usize,
        max_queue: usize,
        idle_time: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                low_watermark,
                high_watermark,
                max_queue,
                idle_time,
                sync: Mutex::new(PoolState {
                    state: PoolFsm::Created,
                    tasks: VecDeque::new(),
                    total: 0,
                    idle: 0,
                    spawned: 0,
                }),
                task_arrived: Condvar::new(),
                stopped: Condvar::new(),
            }),
        }
    }

    /// Transition to `Running` and spawn the low-watermark worker set.
    pub fn start(&self) -> Result<()> {
        let mut st = self.shared.lock();
        ensure!(
            st.state == PoolFsm::Created,
            "pool {} already started",
            self.shared.name
        );
        st.state = PoolFsm::Running;
        for _ in 0..self.shared.low_watermark {
            st.total += 1;
            let seq = st.spawned;
            st.spawned += 1;
            if let Err(e) = spawn_worker(&self.shared, seq) {
                st.total -= 1;
                return Err(e).context("failed to spawn pool worker");
            }
        }
        Ok(())
    }

    /// Try to enqueue a task. Returns false when the pool is not running or
    /// the queue is at capacity; the task is dropped in that case.
    pub fn execute<F>(&self, task: F) -> bool
    where F: FnOnce() + Send + 'static {
        let mut st = self.shared.lock();
        if st.state != PoolFsm::Running || st.tasks.len() >= self.shared.max_queue {
            return false;
        }
        st.tasks.push_back(Box::new(task));

        // Nobody is waiting and there is headroom: grow by one.
        if st.idle == 0 && st.total < self.shared.high_watermark {
            st.total += 1;
            let seq = st.spawned;
            st.spawned += 1;
            if let Err(e) = spawn_worker(&self.shared, seq) {
                st.total -= 1;
                warn!(pool = %self.shared.name, "failed to grow pool: {e}");
            }
        }
        drop(st);

        self.shared.task_arrived.notify_one();
        true
    }

    /// Stop accepting tasks and let the workers drain the queue. The pool
    /// becomes `Stopped` at the moment the last worker exits; with
    /// `wait = true` the call blocks on that transition.
    pub fn stop(&self, wait: bool) {
        let mut st = self.shared.lock();
        match st.state {
            PoolFsm::Created => {
                st.state = PoolFsm::Stopped;
                return;
            },
            PoolFsm::Running => st.state = PoolFsm::Stopping,
            PoolFsm::Stopping | PoolFsm::Stopped => {},
        }

        if st.total == 0 {
            st.tasks.clear();
            st.state = PoolFsm::Stopped;
            self.shared.stopped.notify_all();
            return;
        }

        self.shared.task_arrived.notify_all();
        if wait {
            while st.state != PoolFsm::Stopped {
                st = match self.shared.stopped.wait(st) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        }
    }

    pub fn total_workers(&self) -> usize {
        self.shared.lock().total
    }

    pub fn idle_workers(&self) -> usize {
        self.shared.lock().idle
    }

    pub fn queued_tasks(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().state == PoolFsm::Stopped
    }
}

fn spawn_worker(shared: &Arc<Shared>, seq: usize) -> std::io::Result<()> {
    let cloned = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("{}-worker-{seq}", shared.name))
        .spawn(move || worker_loop(&cloned))?;
    Ok(())
}

fn worker_loop(shared: &Arc<Shared>) {
    let mut st = shared.lock();
    st.idle += 1;

    loop {
        if matches!(st.state, PoolFsm::Running | PoolFsm::Stopping)
            && let Some(task) = st.tasks.pop_front()
        {
            st.idle -= 1;
            drop(st);
            run_task(&shared.name, task);
            st = shared.lock();
            st.idle += 1;
            continue;
        }

        match st.state {
            PoolFsm::Stopped => break,
            PoolFsm::Stopping if st.tasks.is_empty() => break,
            _ => {},
        }

        let (guard, timeout) = match shared.task_arrived.wait_timeout(st, shared.idle_time) {
            Ok(woken) => woken,
            Err(poisoned) => poisoned.into_inner(),
        };
        st = guard;

        if timeout.timed_out() && st.tasks.is_empty() && st.total > shared.low_watermark {
            debug!(pool = %shared.name, "reaping idle worker");
            break;
        }
    }

    // Exiting: the last worker under Stopping completes the shutdown.
    st.idle -= 1;
    st.total -= 1;
    if st.total == 0 && st.state == PoolFsm::Stopping {
        st.state = PoolFsm::Stopped;
        shared.stopped.notify_all();
    }
}

fn run_task(pool: &str, task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<opaque panic payload>");
        warn!(pool, "task panicked: {message}");
    }
}
