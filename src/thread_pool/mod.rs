//! The worker thread pool.
//!
//! Producers on any thread submit work through a shared [`TaskPool`] handle;
//! a configurable set of long-lived workers drains the queue in FIFO order.
//! The pool is started and stopped explicitly and can be resized while
//! running.

pub use self::state::PoolState;

mod queue;
mod state;
mod worker;

use std::cmp;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::PoolError;
use crate::task::{SocketTask, Task};
use crate::Result;

use self::queue::{Admission, TaskQueue};
use self::state::StateCell;
use self::worker::WorkerRoster;

/// Hard cap on the worker count, default or explicit.
const MAX_WORKER_THREADS: usize = 500;

/// How long `stop` pauses so late submitters observe the state change.
const STOP_SETTLE: Duration = Duration::from_millis(15);

/// Strategy applied when a submission meets a full bounded queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RejectedPolicy {
    /// Fail the submission immediately.
    CallFail,
    /// Block the submitter until a slot frees or the deadline expires.
    WaitFor,
    /// Run the task synchronously on the submitting thread.
    CallerRun,
}

impl RejectedPolicy {
    fn as_u8(self) -> u8 {
        match self {
            RejectedPolicy::CallFail => 0,
            RejectedPolicy::WaitFor => 1,
            RejectedPolicy::CallerRun => 2,
        }
    }

    fn from_u8(value: u8) -> RejectedPolicy {
        match value {
            0 => RejectedPolicy::CallFail,
            1 => RejectedPolicy::WaitFor,
            2 => RejectedPolicy::CallerRun,
            _ => unreachable!("corrupt rejection policy"),
        }
    }
}

impl Default for RejectedPolicy {
    fn default() -> RejectedPolicy {
        RejectedPolicy::CallFail
    }
}

/// Pool configuration, frozen from `start` until `stop`.
#[derive(Debug, Clone, Default)]
pub struct PoolOptions {
    /// Worker count: positive is taken literally, `0` picks a default scaled
    /// to the logical CPUs, and `-n` means `n` times the logical CPUs. The
    /// resolved count may not exceed 500.
    pub thread_count: i32,
    /// Queue capacity; `0` means unbounded.
    pub max_queue_size: usize,
    /// What a submission does when the bounded queue is full.
    pub policy: RejectedPolicy,
    /// Worker stack size in bytes; `0` keeps the platform default.
    pub stack_size: usize,
}

/// A worker thread pool.
///
/// The handle is cheap to clone, so producers on many threads can share one
/// pool. Every deadline parameter is an `Option<Duration>`: `None` waits
/// without bound, `Some(Duration::from_millis(0))` gives up immediately.
///
/// ```rust
/// # use taskpool::{PoolOptions, TaskPool, Result};
/// # fn try_main() -> Result<()> {
/// let pool = TaskPool::new();
/// pool.start(&PoolOptions {
///     thread_count: 2,
///     ..PoolOptions::default()
/// })?;
/// pool.submit(|| println!("hello from a worker"), None)?;
/// pool.stop(None)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

/// A failed socket-task submission, handing the task back to the producer.
///
/// The pool only owns a socket task it actually accepted; on rejection the
/// producer gets the task back and decides whether to retry or drop it.
#[derive(Debug)]
pub struct RejectedTask {
    error: PoolError,
    task: SocketTask,
}

impl RejectedTask {
    /// Why the submission failed.
    pub fn error(&self) -> &PoolError {
        &self.error
    }

    /// Recover the socket task.
    pub fn into_task(self) -> SocketTask {
        self.task
    }

    /// Split into the error and the task.
    pub fn into_parts(self) -> (PoolError, SocketTask) {
        (self.error, self.task)
    }
}

impl fmt::Display for RejectedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl TaskPool {
    /// Create a pool in the stopped state.
    pub fn new() -> TaskPool {
        TaskPool {
            inner: Arc::new(PoolInner {
                state: StateCell::new(),
                state_lock: Mutex::new(()),
                state_cv: Condvar::new(),
                queue: TaskQueue::new(),
                roster: WorkerRoster::new(),
                max_queue: AtomicUsize::new(0),
                stack: AtomicUsize::new(0),
                policy: AtomicU8::new(RejectedPolicy::CallFail.as_u8()),
                task_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Freeze the configuration and spawn the initial worker population.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the pool was stopped. `InvalidParameter` if the
    /// resolved worker count is out of range. A worker spawn failure is
    /// fatal: the pool rolls back to stopped and the OS error is returned.
    pub fn start(&self, opts: &PoolOptions) -> Result<()> {
        let inner = &self.inner;

        if !inner.state.transition(PoolState::Stopped, PoolState::Starting) {
            return Err(PoolError::InvalidState);
        }

        inner.max_queue.store(opts.max_queue_size, Ordering::SeqCst);
        inner.stack.store(opts.stack_size, Ordering::SeqCst);
        inner.policy.store(opts.policy.as_u8(), Ordering::SeqCst);

        let target = match resolve_thread_count(opts.thread_count) {
            Ok(target) => target,
            Err(e) => {
                // Roll back through the regular stop path; the option error wins.
                let _ = self.stop(None);
                return Err(e);
            }
        };
        info!("starting task pool with {} worker(s)", target);

        if let Err(e) = worker::resize(inner, target) {
            error!("task pool failed to start: {}", e);
            let _ = self.stop(None);
            return Err(e);
        }

        inner.state.store(PoolState::Started);
        Ok(())
    }

    /// Drain the workers and reset the pool to stopped.
    ///
    /// Blocked `WaitFor` submitters are woken so they can observe the state
    /// change and abandon. Workers finish the task they already hold; queued
    /// tasks they drain before exiting. `max_wait` bounds the drain: on
    /// expiry the remaining workers are abandoned to exit on their own and
    /// whatever is still queued is discarded.
    ///
    /// # Errors
    ///
    /// `Cancelled` if anything was discarded or abandoned (the pool still
    /// ends up stopped). `InvalidState` if another caller owns the shutdown;
    /// such callers return once that shutdown completes.
    pub fn stop(&self, max_wait: Option<Duration>) -> Result<()> {
        let inner = &self.inner;

        if !inner.state.transition(PoolState::Started, PoolState::Stopping)
            && !inner.state.transition(PoolState::Starting, PoolState::Stopping)
        {
            // A concurrent stop owns the transition; wait it out.
            let mut guard = inner.state_lock.lock().unwrap();
            while inner.state.load() != PoolState::Stopped {
                guard = inner.state_cv.wait(guard).unwrap();
            }
            return Err(PoolError::InvalidState);
        }

        thread::sleep(STOP_SETTLE);

        if inner.signals_slots() && inner.max_queue_size() > 0 {
            inner.queue.broadcast_slots();
        }

        worker::shrink_to_zero(inner);
        let abandoned = inner.roster.wait_drained(max_wait);

        let discarded = inner.queue.drain();
        if discarded > 0 {
            warn!("discarded {} queued task(s) at shutdown", discarded);
        }

        inner.reset();

        {
            let _guard = inner.state_lock.lock().unwrap();
            inner.state.store(PoolState::Stopped);
            inner.state_cv.notify_all();
        }

        info!("task pool stopped");

        if discarded == 0 && abandoned == 0 {
            Ok(())
        } else {
            Err(PoolError::Cancelled {
                discarded,
                abandoned,
            })
        }
    }

    /// Submit a plain task.
    ///
    /// `max_wait` only matters under [`RejectedPolicy::WaitFor`], where it
    /// bounds how long the call may block on a full queue.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the pool is started; `DestinationFull` under
    /// `CallFail` with a full queue; `Timeout` when a `WaitFor` deadline
    /// expires.
    pub fn submit<F>(&self, job: F, max_wait: Option<Duration>) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .do_submit(Task::Plain(Box::new(job)), max_wait)
            .map_err(|(e, _job)| e)
    }

    /// Submit a socket task.
    ///
    /// Ownership transfers to the pool only on an accepted submission: the
    /// pool then destroys the task (releasing its buffer per the ownership
    /// mode) exactly once, after the callback has run or while discarding
    /// pending work at shutdown. A rejected submission hands the task back
    /// inside the error, so the producer keeps ownership and can retry.
    ///
    /// # Errors
    ///
    /// [`RejectedTask`] wrapping the same error cases as
    /// [`TaskPool::submit`], plus the task itself.
    pub fn submit_socket_task(
        &self,
        task: SocketTask,
        max_wait: Option<Duration>,
    ) -> std::result::Result<(), RejectedTask> {
        self.inner
            .do_submit(Task::Socket(task), max_wait)
            .map_err(|(error, task)| RejectedTask {
                error,
                task: match task {
                    Task::Socket(task) => task,
                    Task::Plain(_) => unreachable!("plain task from a socket submission"),
                },
            })
    }

    /// Resize the worker set while the pool is running.
    ///
    /// Growing spawns threads with the configured stack size; shrinking
    /// lowers the target and lets surplus workers exit once they find the
    /// queue empty. `count` follows the same convention as
    /// [`PoolOptions::thread_count`].
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the pool is started. `InvalidParameter` if the
    /// resolved worker count is out of range. A spawn failure aborts the
    /// grow but keeps the workers already created, so [`TaskPool::thread_count`]
    /// reflects the partial result.
    pub fn adjust_thread_count(&self, count: i32) -> Result<()> {
        if self.inner.state.load() != PoolState::Started {
            return Err(PoolError::InvalidState);
        }
        worker::resize(&self.inner, resolve_thread_count(count)?)
    }

    /// Tasks queued and not yet picked up by a worker.
    pub fn queue_size(&self) -> usize {
        self.inner.queue.len()
    }

    /// Tasks currently executing, on workers or caller-run submitters.
    pub fn task_count(&self) -> usize {
        self.inner.task_count.load(Ordering::SeqCst)
    }

    /// The intended worker count. The live count may briefly exceed it while
    /// surplus workers drain after a shrink.
    pub fn thread_count(&self) -> usize {
        self.inner.roster.target()
    }

    /// The configured queue capacity; `0` when unbounded.
    pub fn max_queue_size(&self) -> usize {
        self.inner.max_queue_size()
    }

    /// The configured rejection policy.
    pub fn rejected_policy(&self) -> RejectedPolicy {
        self.inner.policy()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.inner.state.load()
    }
}

impl Default for TaskPool {
    fn default() -> TaskPool {
        TaskPool::new()
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("state", &self.state())
            .field("thread_count", &self.thread_count())
            .field("queue_size", &self.queue_size())
            .field("task_count", &self.task_count())
            .finish()
    }
}

// Shared between the user-facing handles and the worker threads.
pub(crate) struct PoolInner {
    state: StateCell,
    // The pair below only serializes concurrent stop callers; state
    // transitions themselves go through the atomic cell.
    state_lock: Mutex<()>,
    state_cv: Condvar,
    queue: TaskQueue,
    roster: WorkerRoster,
    max_queue: AtomicUsize,
    stack: AtomicUsize,
    policy: AtomicU8,
    task_count: AtomicUsize,
}

impl PoolInner {
    pub(crate) fn max_queue_size(&self) -> usize {
        self.max_queue.load(Ordering::SeqCst)
    }

    pub(crate) fn stack_size(&self) -> usize {
        self.stack.load(Ordering::SeqCst)
    }

    fn policy(&self) -> RejectedPolicy {
        RejectedPolicy::from_u8(self.policy.load(Ordering::SeqCst))
    }

    /// Whether dequeues must signal the not-full condvar.
    pub(crate) fn signals_slots(&self) -> bool {
        self.policy() == RejectedPolicy::WaitFor
    }

    /// Run one task with the executing-task counter held around the call.
    /// `epoch` is the pool generation the runner belongs to; a stale
    /// generation must not touch the counter of a restarted pool.
    pub(crate) fn run_task(&self, task: Task, epoch: u64) {
        let _guard = TaskCountGuard::enter(self, epoch);
        task.run();
    }

    // Rejected submissions hand the task back alongside the error so the
    // public layer can return ownership to the producer.
    fn do_submit(
        &self,
        task: Task,
        max_wait: Option<Duration>,
    ) -> std::result::Result<(), (PoolError, Task)> {
        let task = match self.try_enqueue(task) {
            Admission::Accepted => return Ok(()),
            Admission::NotStarted(task) => return Err((PoolError::InvalidState, task)),
            Admission::Full(task) => task,
        };

        match self.policy() {
            RejectedPolicy::CallFail => Err((PoolError::DestinationFull, task)),
            RejectedPolicy::WaitFor => self.wait_enqueue(task, max_wait),
            RejectedPolicy::CallerRun => {
                self.run_task(task, self.roster.epoch());
                Ok(())
            }
        }
    }

    // The whole admission sequence is one critical section over the queue
    // lock: state check, capacity check, push, worker wakeup.
    fn try_enqueue(&self, task: Task) -> Admission {
        let mut tasks = self.queue.lock();
        self.admit_locked(&mut tasks, task)
    }

    fn admit_locked(&self, tasks: &mut VecDeque<Task>, task: Task) -> Admission {
        if self.state.load() != PoolState::Started {
            return Admission::NotStarted(task);
        }
        self.queue.push_locked(tasks, task, self.max_queue_size())
    }

    // The submit-wait loop of the wait-for policy: keep retrying admission
    // while the pool stays started, sleeping on the not-full condvar between
    // attempts.
    fn wait_enqueue(
        &self,
        mut task: Task,
        max_wait: Option<Duration>,
    ) -> std::result::Result<(), (PoolError, Task)> {
        debug_assert!(self.max_queue_size() > 0);

        let deadline = max_wait.map(|wait| Instant::now() + wait);

        while self.state.load() == PoolState::Started {
            let mut tasks = self.queue.lock();
            task = match self.admit_locked(&mut tasks, task) {
                Admission::Accepted => return Ok(()),
                Admission::NotStarted(task) => return Err((PoolError::InvalidState, task)),
                Admission::Full(task) => task,
            };

            match deadline {
                None => {
                    let _tasks = self.queue.wait_slot(tasks);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err((PoolError::Timeout, task));
                    }
                    let (_tasks, timed_out) =
                        self.queue.wait_slot_timeout(tasks, deadline - now);
                    if timed_out {
                        return Err((PoolError::Timeout, task));
                    }
                }
            }
        }

        Err((PoolError::InvalidState, task))
    }

    fn reset(&self) {
        self.max_queue.store(0, Ordering::SeqCst);
        self.stack.store(0, Ordering::SeqCst);
        self.policy
            .store(RejectedPolicy::CallFail.as_u8(), Ordering::SeqCst);
        self.task_count.store(0, Ordering::SeqCst);
    }
}

// Keeps the executing-task count correct even when the task unwinds.
struct TaskCountGuard<'a> {
    inner: &'a PoolInner,
    epoch: u64,
}

impl<'a> TaskCountGuard<'a> {
    fn enter(inner: &'a PoolInner, epoch: u64) -> TaskCountGuard<'a> {
        inner.task_count.fetch_add(1, Ordering::SeqCst);
        TaskCountGuard { inner, epoch }
    }
}

impl Drop for TaskCountGuard<'_> {
    fn drop(&mut self) {
        // A worker abandoned at a stop deadline finishes its task in a later
        // generation; its decrement must not touch the restarted pool's count.
        if self.inner.roster.is_stale(self.epoch) {
            return;
        }
        // Saturating: a caller-run task can outlive the counter reset with
        // no epoch bump.
        let _ = self
            .inner
            .task_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            });
    }
}

fn resolve_thread_count(count: i32) -> Result<usize> {
    let resolved = if count == 0 {
        cmp::min(num_cpus::get() * 2 + 2, MAX_WORKER_THREADS)
    } else if count < 0 {
        num_cpus::get() * count.unsigned_abs() as usize
    } else {
        count as usize
    };

    if resolved > MAX_WORKER_THREADS {
        return Err(PoolError::InvalidParameter(format!(
            "worker count {} exceeds the supported maximum of {}",
            resolved, MAX_WORKER_THREADS
        )));
    }
    Ok(resolved)
}
