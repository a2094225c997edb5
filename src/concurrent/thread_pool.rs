use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::concurrent::cancel::{CancelToken, Cancelled};
use crate::concurrent::deadline::{park, Deadline, Timeout};

/// Unit of work accepted by the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An error that occurs when a submission fails.
#[derive(Error, Debug)]
pub enum ExecuteError {
  /// The pool is shutting down; no new work is accepted.
  #[error("thread pool is shutting down")]
  Rejected,
  #[error(transparent)]
  Cancelled(#[from] Cancelled),
  #[error("failed to spawn worker thread: {0}")]
  Spawn(#[from] std::io::Error),
}

static WORKER_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Bounded elastic pool of reusable worker threads.
///
/// Submissions are handed directly to an idle worker when one is parked,
/// spawn a new worker while the pool is below its maximum size, and
/// otherwise queue up under a submission deadline. Workers that stay idle
/// past the keep-alive budget retire; `shutdown` stops intake while letting
/// queued and executing work complete.
pub struct ThreadPool {
  shared: Arc<PoolShared>,
}

struct PoolShared {
  state: Mutex<PoolState>,
  termination: Arc<Condvar>,
  max_pool_size: usize,
  keep_alive: Timeout,
}

struct PoolState {
  shutting_down: bool,
  worker_count: usize,
  pending_count: usize,
  queue: VecDeque<Arc<WorkItem>>,
  idle: VecDeque<Arc<WorkerSlot>>,
}

struct WorkItem {
  wake: Arc<Condvar>,
  cell: Mutex<WorkCell>,
}

struct WorkCell {
  job: Option<Job>,
  being_executed: bool,
}

struct WorkerSlot {
  wake: Arc<Condvar>,
  assigned: Mutex<Option<Arc<WorkItem>>>,
}

impl ThreadPool {
  pub fn new(max_pool_size: usize, keep_alive: Timeout) -> Self {
    assert!(max_pool_size > 0, "max_pool_size must be greater than zero");
    Self {
      shared: Arc::new(PoolShared {
        state: Mutex::new(PoolState {
          shutting_down: false,
          worker_count: 0,
          pending_count: 0,
          queue: VecDeque::new(),
          idle: VecDeque::new(),
        }),
        termination: Arc::new(Condvar::new()),
        max_pool_size,
        keep_alive,
      }),
    }
  }

  /// Submits `work`, waiting up to `timeout` for the pool to accept it.
  ///
  /// `Ok(true)` means the work is being executed or was queued and claimed;
  /// `Ok(false)` means the deadline passed first and the submission was
  /// withdrawn. A claim that lands while the deadline elapses concurrently
  /// still counts as accepted.
  pub fn execute<F>(&self, work: F, timeout: Timeout, token: &CancelToken) -> Result<bool, ExecuteError>
  where
    F: FnOnce() + Send + 'static, {
    let mut state = self.shared.state.lock();
    if state.shutting_down {
      return Err(ExecuteError::Rejected);
    }

    let item = Arc::new(WorkItem {
      wake: Arc::new(Condvar::new()),
      cell: Mutex::new(WorkCell {
        job: Some(Box::new(work)),
        being_executed: false,
      }),
    });

    // Fast path 1: an idle worker is parked, hand the work over directly.
    if let Some(worker) = state.idle.pop_front() {
      state.pending_count += 1;
      *worker.assigned.lock() = Some(item);
      worker.wake.notify_one();
      return Ok(true);
    }

    // Fast path 2: the pool has room for another worker.
    if state.worker_count < self.shared.max_pool_size {
      self.spawn_worker(item)?;
      state.worker_count += 1;
      state.pending_count += 1;
      return Ok(true);
    }

    if timeout.is_no_wait() {
      return Ok(false);
    }

    let deadline = Deadline::start(timeout);
    state.queue.push_back(item.clone());
    state.pending_count += 1;

    let _watch = token.watch(&item.wake);
    loop {
      if item.cell.lock().being_executed {
        return Ok(true);
      }
      if token.is_cancelled() {
        state.queue.retain(|w| !Arc::ptr_eq(w, &item));
        state.pending_count -= 1;
        return Err(Cancelled.into());
      }
      if deadline.is_expired() {
        state.queue.retain(|w| !Arc::ptr_eq(w, &item));
        state.pending_count -= 1;
        return Ok(false);
      }
      park(&deadline, &item.wake, &mut state);
    }
  }

  /// Stops intake of new work. Existing and queued work still completes.
  pub fn shutdown(&self) {
    let mut state = self.shared.state.lock();
    if !state.shutting_down {
      state.shutting_down = true;
      // Idle workers have nothing left to do; let them retire now instead
      // of sleeping out their keep-alive.
      for worker in &state.idle {
        worker.wake.notify_one();
      }
      tracing::debug!("thread pool shutting down");
    }
  }

  /// Blocks until every submitted unit of work has completed (`Ok(true)`) or
  /// the deadline passes (`Ok(false)`). A cancellation observed while the
  /// pending count is already zero still reports success.
  pub fn await_termination(&self, timeout: Timeout, token: &CancelToken) -> Result<bool, Cancelled> {
    let mut state = self.shared.state.lock();
    if state.pending_count == 0 {
      return Ok(true);
    }
    if timeout.is_no_wait() {
      return Ok(false);
    }
    let deadline = Deadline::start(timeout);
    let _watch = token.watch(&self.shared.termination);
    loop {
      if state.pending_count == 0 {
        return Ok(true);
      }
      if token.is_cancelled() {
        return Err(Cancelled);
      }
      if deadline.is_expired() {
        return Ok(false);
      }
      park(&deadline, &self.shared.termination, &mut state);
    }
  }

  fn spawn_worker(&self, initial: Arc<WorkItem>) -> Result<(), std::io::Error> {
    let slot = Arc::new(WorkerSlot {
      wake: Arc::new(Condvar::new()),
      assigned: Mutex::new(Some(initial)),
    });
    let shared = self.shared.clone();
    let id = WORKER_SEQ.fetch_add(1, Ordering::Relaxed);
    thread::Builder::new()
      .name(format!("coord-worker-{}", id))
      .spawn(move || worker_loop(shared, slot))?;
    tracing::debug!(worker = id, "spawned pool worker");
    Ok(())
  }
}

/// Run loop of one worker thread: execute the assigned item, then claim the
/// next queued one, or park idle up to the keep-alive budget.
fn worker_loop(shared: Arc<PoolShared>, slot: Arc<WorkerSlot>) {
  loop {
    let item = match slot.assigned.lock().take() {
      Some(item) => item,
      None => return,
    };
    let job = item.cell.lock().job.take();
    if let Some(job) = job {
      // Contain panics so pool accounting survives a failing job.
      if catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("worker job panicked");
      }
    }

    let mut state = shared.state.lock();
    state.pending_count -= 1;
    if state.pending_count == 0 {
      shared.termination.notify_all();
    }

    // Claim the next queued item, FIFO. The claim satisfies the submitter
    // even if its deadline elapses concurrently.
    if let Some(next) = state.queue.pop_front() {
      next.cell.lock().being_executed = true;
      next.wake.notify_one();
      *slot.assigned.lock() = Some(next);
      continue;
    }

    if state.shutting_down {
      state.worker_count -= 1;
      shared.termination.notify_all();
      tracing::debug!("worker exiting on shutdown");
      return;
    }

    if shared.keep_alive.is_no_wait() {
      state.worker_count -= 1;
      return;
    }

    let deadline = Deadline::start(shared.keep_alive);
    state.idle.push_back(slot.clone());
    loop {
      park(&deadline, &slot.wake, &mut state);
      if slot.assigned.lock().is_some() {
        break;
      }
      if state.shutting_down || deadline.is_expired() {
        state.idle.retain(|w| !Arc::ptr_eq(w, &slot));
        state.worker_count -= 1;
        if state.shutting_down {
          shared.termination.notify_all();
        }
        tracing::debug!("idle worker retiring");
        return;
      }
    }
  }
}

impl Clone for ThreadPool {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl Debug for ThreadPool {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let state = self.shared.state.lock();
    f.debug_struct("ThreadPool")
      .field("max_pool_size", &self.shared.max_pool_size)
      .field("keep_alive", &self.shared.keep_alive)
      .field("worker_count", &state.worker_count)
      .field("pending_count", &state.pending_count)
      .field("shutting_down", &state.shutting_down)
      .finish()
  }
}

static_assertions::assert_impl_all!(ThreadPool: Send, Sync);
