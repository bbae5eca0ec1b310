use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::task::Task;

/// Outcome of one admission attempt. The rejected variants hand the task
/// back so the policy layer can retry or run it elsewhere.
pub(crate) enum Admission {
    /// Queued; one worker has been woken.
    Accepted,
    /// Bounded queue at capacity.
    Full(Task),
    /// The pool is not in the started state.
    NotStarted(Task),
}

/// FIFO of pending tasks plus the two queue condition variables.
///
/// `len` mirrors the queue length and is only written while the queue lock is
/// held, so `len == |queue|` at every instant an observer can see.
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    len: AtomicUsize,
    /// Signaled once per enqueued task; workers sleep here when idle.
    has_work: Condvar,
    /// Signaled by workers when the wait-for policy frees a slot; broadcast
    /// once by shutdown so blocked submitters can abandon.
    not_full: Condvar,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue {
            tasks: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
            has_work: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap()
    }

    /// Admission step under an already-held queue lock: capacity check, push,
    /// wake one worker. State checking is done by the caller, which owns the
    /// lock for the whole admission sequence.
    pub fn push_locked(
        &self,
        tasks: &mut VecDeque<Task>,
        task: Task,
        max_queue_size: usize,
    ) -> Admission {
        if max_queue_size > 0 && tasks.len() >= max_queue_size {
            return Admission::Full(task);
        }

        tasks.push_back(task);
        self.len.fetch_add(1, Ordering::SeqCst);
        self.has_work.notify_one();

        Admission::Accepted
    }

    /// Pop under an already-held queue lock, keeping `len` in step.
    pub fn pop_locked(&self, tasks: &mut VecDeque<Task>) -> Option<Task> {
        let task = tasks.pop_front();
        if task.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        task
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn notify_work(&self) {
        self.has_work.notify_one();
    }

    pub fn wait_work<'a>(
        &self,
        tasks: MutexGuard<'a, VecDeque<Task>>,
    ) -> MutexGuard<'a, VecDeque<Task>> {
        self.has_work.wait(tasks).unwrap()
    }

    pub fn notify_slot(&self) {
        self.not_full.notify_one();
    }

    /// Wake every submitter blocked on a full queue.
    pub fn broadcast_slots(&self) {
        let _tasks = self.lock();
        self.not_full.notify_all();
    }

    pub fn wait_slot<'a>(
        &self,
        tasks: MutexGuard<'a, VecDeque<Task>>,
    ) -> MutexGuard<'a, VecDeque<Task>> {
        self.not_full.wait(tasks).unwrap()
    }

    pub fn wait_slot_timeout<'a>(
        &self,
        tasks: MutexGuard<'a, VecDeque<Task>>,
        timeout: std::time::Duration,
    ) -> (MutexGuard<'a, VecDeque<Task>>, bool) {
        let (tasks, result) = self.not_full.wait_timeout(tasks, timeout).unwrap();
        (tasks, result.timed_out())
    }

    /// Throw away everything still queued. Dropping the tasks destroys any
    /// socket-task buffers they carry. Returns how many were discarded.
    pub fn drain(&self) -> usize {
        let mut tasks = self.lock();
        let discarded = tasks.len();
        tasks.clear();
        self.len.store(0, Ordering::SeqCst);
        discarded
    }
}
