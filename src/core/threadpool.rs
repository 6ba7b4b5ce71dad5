//! Self-scaling worker pool shared by every collector of a session.
//!
//! The pool starts at its soft limit. Each enqueue and each completed job
//! adjusts a pending counter (queued plus running jobs); whenever pending
//! work outnumbers the workers, just enough new workers are spawned to cover
//! the gap without crossing the hard limit. Workers never retire on their own,
//! so long-lived trigger loops cannot starve short collectors.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::collector::state::MAX_WAIT;

/// How long an idle worker parks on the queue before re-checking shutdown
pub const DATA_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Progress of one submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TokenStatus {
    Pending = 0,
    Running = 1,
    Finished = 2,
}

struct TokenInner<T> {
    state: Mutex<(TokenStatus, Option<T>)>,
    done: Condvar,
}

/// Handle to a submitted job: blocking wait plus result retrieval
pub struct Token<T> {
    inner: Arc<TokenInner<T>>,
}

impl<T> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Token<T> {
    fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                state: Mutex::new((TokenStatus::Pending, None)),
                done: Condvar::new(),
            }),
        }
    }

    fn execute<F: FnOnce() -> T>(&self, func: F) {
        {
            let mut state = self.inner.state.lock();
            debug_assert_eq!(state.0, TokenStatus::Pending);
            state.0 = TokenStatus::Running;
        }

        let result = match panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(value) => Some(value),
            Err(_) => {
                log::error!("Job panicked in {:?}", thread::current().name());
                None
            }
        };

        self.finish(result);
    }

    fn finish(&self, result: Option<T>) {
        let mut state = self.inner.state.lock();
        state.0 = TokenStatus::Finished;
        state.1 = result;
        self.inner.done.notify_all();
    }

    pub fn status(&self) -> TokenStatus {
        self.inner.state.lock().0
    }

    /// Block until the job finishes or `timeout` elapses; returns the status reached
    pub fn wait(&self, timeout: Option<Duration>) -> TokenStatus {
        let deadline = Instant::now() + timeout.unwrap_or(MAX_WAIT);
        let mut state = self.inner.state.lock();
        while state.0 < TokenStatus::Finished {
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.0
    }

    /// Move the result out; `None` if unfinished, panicked, cancelled or already taken
    pub fn take_result(&self) -> Option<T> {
        let mut state = self.inner.state.lock();
        if state.0 != TokenStatus::Finished {
            return None;
        }
        state.1.take()
    }
}

impl<T: Clone> Token<T> {
    pub fn get_result(&self) -> Option<T> {
        let state = self.inner.state.lock();
        if state.0 != TokenStatus::Finished {
            return None;
        }
        state.1.clone()
    }
}

/// Queued unit of work. `true` runs it, `false` cancels it.
type Job = Box<dyn FnOnce(bool) + Send + 'static>;

struct Worker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    pending: Mutex<usize>,
    workers: Mutex<Vec<Worker>>,
    spawned: AtomicUsize,
    soft_limit: usize,
    hard_limit: usize,
}

impl Shared {
    fn spawn_worker(self: &Arc<Self>) -> Option<Worker> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let id = self.spawned.fetch_add(1, Ordering::Relaxed);
        let shared = self.clone();
        let flag = shutdown.clone();

        match thread::Builder::new()
            .name(format!("rdiag-worker-{}", id))
            .spawn(move || worker_loop(shared, flag))
        {
            Ok(handle) => {
                log::debug!("rdiag-worker-{} created in pool", id);
                Some(Worker { shutdown, handle: Some(handle) })
            }
            Err(e) => {
                log::error!("Error while creating worker: {}", e);
                None
            }
        }
    }

    fn add_workers(self: &Arc<Self>, workers: &mut Vec<Worker>, count: usize) {
        for _ in 0..count {
            if let Some(worker) = self.spawn_worker() {
                workers.push(worker);
            }
        }
    }

    fn alter_pending(self: &Arc<Self>, increment: bool) {
        let pending = {
            let mut pending = self.pending.lock();
            if increment {
                *pending += 1;
            } else {
                *pending = pending.saturating_sub(1);
            }
            *pending
        };
        self.adjust_threadpool_size(pending);
    }

    fn adjust_threadpool_size(self: &Arc<Self>, pending: usize) {
        let mut workers = self.workers.lock();
        let total = workers.len();
        if pending > total && total < self.hard_limit {
            let to_spawn = (pending - total).min(self.hard_limit - total);
            log::debug!("Growing pool from {} by {} workers", total, to_spawn);
            self.add_workers(&mut workers, to_spawn);
        }
    }
}

fn worker_loop(shared: Arc<Shared>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Acquire) {
        let job = {
            let mut queue = shared.queue.lock();
            if queue.is_empty() {
                shared.available.wait_for(&mut queue, DATA_WAIT_TIMEOUT);
            }
            queue.pop_front()
        };

        if let Some(job) = job {
            job(true);
            shared.alter_pending(false);
        }
    }
}

/// Bounded pool of worker threads consuming a shared job queue
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    pub fn new(soft_limit: usize, hard_limit: usize) -> Self {
        let hard_limit = hard_limit.max(1);
        let soft_limit = soft_limit.clamp(1, hard_limit);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            pending: Mutex::new(0),
            workers: Mutex::new(Vec::new()),
            spawned: AtomicUsize::new(0),
            soft_limit,
            hard_limit,
        });
        {
            let mut workers = shared.workers.lock();
            shared.add_workers(&mut workers, soft_limit);
        }
        Self { shared }
    }

    /// Enqueue `func` and return the token tracking it
    pub fn add_task<F, T>(&self, func: F) -> Token<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let token = Token::new();
        let job_token = token.clone();
        let job: Job = Box::new(move |run| {
            if run {
                job_token.execute(func);
            } else {
                job_token.finish(None);
            }
        });

        self.shared.queue.lock().push_back(job);
        self.shared.available.notify_one();
        self.shared.alter_pending(true);
        token
    }

    pub fn get_total_workers_count(&self) -> usize {
        self.shared.workers.lock().len()
    }

    pub fn soft_limit(&self) -> usize {
        self.shared.soft_limit
    }

    pub fn hard_limit(&self) -> usize {
        self.shared.hard_limit
    }

    /// Drop every queued job and replace all workers with fresh ones.
    ///
    /// Running jobs are not interrupted; this call waits for them to return.
    /// Tokens of dropped jobs finish without a result.
    pub fn abort(&self) {
        let drained: Vec<Job> = self.shared.queue.lock().drain(..).collect();
        for job in drained {
            job(false);
            self.shared.alter_pending(false);
        }

        let old: Vec<Worker> = std::mem::take(&mut *self.shared.workers.lock());
        let count = old.len();
        stop_workers(old, true);
        self.shared.available.notify_all();

        // jobs finishing during the join may already have grown the new set
        let mut workers = self.shared.workers.lock();
        let missing = count.saturating_sub(workers.len());
        self.shared.add_workers(&mut workers, missing);
    }
}

fn stop_workers(mut workers: Vec<Worker>, join: bool) {
    for worker in &workers {
        worker.shutdown.store(true, Ordering::Release);
    }
    if join {
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let drained: Vec<Job> = self.shared.queue.lock().drain(..).collect();
        for job in drained {
            job(false);
        }
        // idle workers exit within one wait timeout; busy ones after their job
        let workers = std::mem::take(&mut *self.shared.workers.lock());
        stop_workers(workers, false);
        self.shared.available.notify_all();
    }
}
