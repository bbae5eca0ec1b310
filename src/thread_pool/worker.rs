use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::task::Task;
use crate::Result;

use super::PoolInner;

// Book-keeping guarded by the roster lock. `target` is the intended worker
// count; `live` is how many threads are registered; `epoch` advances when a
// shutdown deadline abandons the remaining workers, so stragglers from an
// old pool generation exit without touching the counts.
struct RosterSlots {
    live: usize,
    target: usize,
    epoch: u64,
    next_id: u64,
}

/// The worker set: live/target counts and the shutdown drain condvar.
///
/// Protected by its own lock, distinct from the queue lock, so the "wake a
/// worker" and "a worker has exited" paths cannot deadlock. The atomic
/// mirrors let the worker loop check for surplus without leaving the queue
/// lock; they are only written while the roster lock is held.
pub(crate) struct WorkerRoster {
    slots: Mutex<RosterSlots>,
    /// Signaled when the live count reaches zero.
    drained: Condvar,
    live_count: AtomicUsize,
    target_count: AtomicUsize,
    epoch_count: AtomicU64,
}

impl WorkerRoster {
    pub fn new() -> WorkerRoster {
        WorkerRoster {
            slots: Mutex::new(RosterSlots {
                live: 0,
                target: 0,
                epoch: 0,
                next_id: 0,
            }),
            drained: Condvar::new(),
            live_count: AtomicUsize::new(0),
            target_count: AtomicUsize::new(0),
            epoch_count: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RosterSlots> {
        self.slots.lock().unwrap()
    }

    /// The intended worker count.
    pub fn target(&self) -> usize {
        self.target_count.load(Ordering::SeqCst)
    }

    // More threads registered than intended: someone has to go.
    fn is_surplus(&self) -> bool {
        self.target_count.load(Ordering::SeqCst) < self.live_count.load(Ordering::SeqCst)
    }

    /// The current pool generation; advances when a stop deadline abandons
    /// workers.
    pub fn epoch(&self) -> u64 {
        self.epoch_count.load(Ordering::SeqCst)
    }

    /// Whether the given generation was abandoned at a stop deadline.
    pub fn is_stale(&self, epoch: u64) -> bool {
        self.epoch_count.load(Ordering::SeqCst) != epoch
    }

    /// Re-check the exit decision under the roster lock and deregister if it
    /// still holds. Returns true iff the calling worker must exit.
    fn confirm_exit(&self, epoch: u64) -> bool {
        let mut slots = self.lock();

        if slots.epoch != epoch {
            // Abandoned; the counts were already zeroed on our behalf.
            return true;
        }

        if slots.target >= slots.live {
            return false;
        }

        slots.live -= 1;
        self.live_count.store(slots.live, Ordering::SeqCst);
        let empty = slots.live == 0;
        drop(slots);

        if empty {
            self.drained.notify_all();
        }

        debug!("worker exiting on shrink");
        true
    }

    /// Block until every worker has deregistered, bounded by `max_wait`
    /// (`None` waits forever). If the deadline expires first the remaining
    /// workers are abandoned: the epoch advances and the counts are zeroed.
    /// Returns how many workers were abandoned.
    pub fn wait_drained(&self, max_wait: Option<Duration>) -> usize {
        let deadline = max_wait.map(|wait| Instant::now() + wait);
        let mut slots = self.lock();

        while slots.live > 0 {
            match deadline {
                None => slots = self.drained.wait(slots).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _timeout) =
                        self.drained.wait_timeout(slots, deadline - now).unwrap();
                    slots = guard;
                }
            }
        }

        let abandoned = slots.live;
        if abandoned > 0 {
            slots.epoch += 1;
            slots.live = 0;
            self.epoch_count.store(slots.epoch, Ordering::SeqCst);
            self.live_count.store(0, Ordering::SeqCst);
            warn!(
                "shutdown deadline expired; abandoning {} worker(s)",
                abandoned
            );
        }

        abandoned
    }
}

/// Move the worker set toward `new_target`.
///
/// Growing spawns the missing threads, registering each before it runs; a
/// spawn error aborts the grow and keeps the partial state, so the observed
/// thread count reflects what was actually created. Shrinking lowers the
/// target and pokes that many idle workers; whichever workers wake to an
/// empty queue deregister themselves.
pub(crate) fn resize(inner: &Arc<PoolInner>, new_target: usize) -> Result<()> {
    let mut slots = inner.roster.lock();
    if new_target > slots.target {
        grow_locked(inner, &mut slots, new_target)
    } else {
        shrink_locked(inner, slots, new_target);
        Ok(())
    }
}

/// The shutdown shrink; cannot fail because it never spawns.
pub(crate) fn shrink_to_zero(inner: &Arc<PoolInner>) {
    let slots = inner.roster.lock();
    shrink_locked(inner, slots, 0);
}

fn grow_locked(
    inner: &Arc<PoolInner>,
    slots: &mut MutexGuard<'_, RosterSlots>,
    new_target: usize,
) -> Result<()> {
    while slots.target < new_target {
        spawn_worker(inner, slots)?;
        slots.target += 1;
        inner
            .roster
            .target_count
            .store(slots.target, Ordering::SeqCst);
    }
    Ok(())
}

fn shrink_locked(
    inner: &Arc<PoolInner>,
    mut slots: MutexGuard<'_, RosterSlots>,
    new_target: usize,
) {
    if new_target >= slots.target {
        return;
    }

    let removed = slots.target - new_target;
    slots.target = new_target;
    inner.roster.target_count.store(new_target, Ordering::SeqCst);
    drop(slots);

    // The queue lock orders these wakeups after the target change for any
    // worker mid-decision about going to sleep.
    let _tasks = inner.queue.lock();
    for _ in 0..removed {
        inner.queue.notify_work();
    }
}

// Spawn one worker registered under the current epoch. Only touches the live
// count; the caller decides what happens to the target.
fn spawn_worker(
    inner: &Arc<PoolInner>,
    slots: &mut MutexGuard<'_, RosterSlots>,
) -> io::Result<()> {
    let id = slots.next_id;
    slots.next_id += 1;

    let mut builder = thread::Builder::new().name(format!("taskpool-worker-{}", id));
    let stack_size = inner.stack_size();
    if stack_size > 0 {
        builder = builder.stack_size(stack_size);
    }

    let epoch = slots.epoch;
    let worker_inner = Arc::clone(inner);
    builder.spawn(move || worker_main(worker_inner, epoch))?;

    slots.live += 1;
    inner.roster.live_count.store(slots.live, Ordering::SeqCst);
    debug!("spawned worker {}", id);

    Ok(())
}

// If this drop runs during an unwind, the thread is dying with a task's
// panic; the pool keeps its population by spawning a successor.
struct Sentinel {
    inner: Arc<PoolInner>,
    epoch: u64,
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }

        let mut slots = self.inner.roster.lock();
        if slots.epoch != self.epoch {
            return;
        }

        slots.live -= 1;
        self.inner
            .roster
            .live_count
            .store(slots.live, Ordering::SeqCst);

        if slots.live < slots.target {
            match spawn_worker(&self.inner, &mut slots) {
                Ok(()) => error!("worker panicked while running a task; spawned a replacement"),
                Err(e) => error!("failed to replace a panicked worker: {}", e),
            }
        } else if slots.live == 0 {
            drop(slots);
            self.inner.roster.drained.notify_all();
        }
    }
}

enum Step {
    Run(Task),
    Exit,
}

fn worker_main(inner: Arc<PoolInner>, epoch: u64) {
    let _sentinel = Sentinel {
        inner: Arc::clone(&inner),
        epoch,
    };

    // Both are frozen between start and stop, so one read per worker
    // lifetime is enough.
    let bounded = inner.max_queue_size() > 0;
    let wait_for = inner.signals_slots();

    loop {
        let step = {
            let mut tasks = inner.queue.lock();
            loop {
                if inner.roster.is_stale(epoch) {
                    break Step::Exit;
                }
                if let Some(task) = inner.queue.pop_locked(&mut tasks) {
                    if wait_for && bounded {
                        inner.queue.notify_slot();
                    }
                    break Step::Run(task);
                }
                if inner.roster.is_surplus() {
                    break Step::Exit;
                }
                tasks = inner.queue.wait_work(tasks);
            }
        };

        match step {
            Step::Run(task) => inner.run_task(task, epoch),
            Step::Exit => {
                if inner.roster.confirm_exit(epoch) {
                    break;
                }
            }
        }
    }
}
