/// Blocking work queue driving one scan worker pool.
///
/// One mutex-guarded state struct and two condition variables:
/// `pushed` wakes workers when work arrives (or the queue unblocks), and
/// `idle` wakes observers whenever a worker reaches the waiting state.
/// The split is what lets `suspend` and `wait_for_completion_or_cancel`
/// observe true quiescence — all workers waiting, queue empty — without
/// polling.
///
/// Cancellation is a sticky flag returned as a value from the blocking
/// operations; workers propagate it by early return, never by unwinding.
use crate::error::Cancelled;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

#[derive(Debug)]
struct QueueState<T> {
    queue: VecDeque<T>,
    worker_count: u32,
    workers_waiting: u32,
    started: bool,
    suspended: bool,
    cancelled: bool,
}

impl<T> QueueState<T> {
    fn all_idle(&self) -> bool {
        self.workers_waiting == self.worker_count
    }

    /// Natural completion: at least one task ran, nothing is suspended,
    /// nothing is queued, and every worker is back in the waiting state.
    fn complete(&self) -> bool {
        self.started && !self.suspended && self.all_idle() && self.queue.is_empty()
    }
}

/// A suspendable, cancellable FIFO of scan tasks.
#[derive(Debug)]
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    pushed: Condvar,
    idle: Condvar,
}

impl<T> TaskQueue<T> {
    /// Create a queue serviced by `worker_count` workers. The count is
    /// what quiescence is measured against; the threads themselves are
    /// spawned and joined by the coordinator.
    pub fn new(worker_count: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                worker_count,
                workers_waiting: 0,
                started: false,
                suspended: false,
                cancelled: false,
            }),
            pushed: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Enqueue a task. Never blocks.
    pub fn push(&self, task: T) {
        let mut s = self.state.lock();
        s.queue.push_back(task);
        self.pushed.notify_one();
    }

    /// Take the next task, blocking while the queue is empty or
    /// suspended. Returns `Err(Cancelled)` once cancellation is
    /// requested.
    pub fn pop(&self) -> Result<T, Cancelled> {
        let mut s = self.state.lock();
        s.workers_waiting += 1;
        self.idle.notify_all();
        self.pushed
            .wait_while(&mut s, |s| !s.cancelled && (s.suspended || s.queue.is_empty()));
        s.workers_waiting -= 1;

        if s.cancelled {
            return Err(Cancelled);
        }

        s.started = true;
        Ok(s.queue.pop_front().expect("woken with work available"))
    }

    /// Safe point for a worker mid-task: blocks while suspended, returns
    /// `Err(Cancelled)` if the scan was cancelled meanwhile.
    pub fn wait_if_suspended(&self) -> Result<(), Cancelled> {
        let mut s = self.state.lock();
        if s.cancelled {
            return Err(Cancelled);
        }
        if !s.suspended {
            return Ok(());
        }
        s.workers_waiting += 1;
        self.idle.notify_all();
        self.idle.wait_while(&mut s, |s| s.suspended && !s.cancelled);
        s.workers_waiting -= 1;
        if s.cancelled {
            return Err(Cancelled);
        }
        Ok(())
    }

    /// Suspend the queue and block until every worker is observed
    /// waiting, giving the caller a quiescent point. Idempotent.
    pub fn suspend(&self) {
        let mut s = self.state.lock();
        s.suspended = true;
        self.idle.notify_all();
        self.idle
            .wait_while(&mut s, |s| !s.all_idle() && !s.cancelled);
    }

    /// Resume a suspended queue. Idempotent.
    pub fn resume(&self) {
        let mut s = self.state.lock();
        s.suspended = false;
        self.idle.notify_all();
        self.pushed.notify_all();
    }

    /// Request cancellation: sticky, wakes every waiter. The coordinator
    /// joins the worker threads afterwards.
    pub fn cancel(&self) {
        let mut s = self.state.lock();
        s.cancelled = true;
        self.idle.notify_all();
        self.pushed.notify_all();
    }

    /// Block until the scan naturally completes or is cancelled.
    /// Returns `true` on natural completion.
    pub fn wait_for_completion_or_cancel(&self) -> bool {
        let mut s = self.state.lock();
        self.idle
            .wait_while(&mut s, |s| !s.cancelled && !s.complete());
        !s.cancelled
    }

    /// Whether a running scan is currently suspended.
    pub fn is_suspended(&self) -> bool {
        let s = self.state.lock();
        s.started && s.suspended
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Clear all state for a fresh lifecycle.
    pub fn reset(&self, worker_count: u32) {
        let mut s = self.state.lock();
        s.queue.clear();
        s.worker_count = worker_count;
        s.workers_waiting = 0;
        s.started = false;
        s.suspended = false;
        s.cancelled = false;
    }
}
