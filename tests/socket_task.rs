use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taskpool::{
    PoolError, PoolOptions, RejectedPolicy, Sender, SocketTask, TaskBuf, TaskPool,
};

// Attached as the task sender; counts destructions of the socket task.
struct DropProbe {
    drops: Arc<AtomicUsize>,
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn probe(drops: &Arc<AtomicUsize>) -> Sender {
    Arc::new(DropProbe {
        drops: Arc::clone(drops),
    })
}

fn noop(_task: &SocketTask) {}

fn opts(threads: i32, queue: usize, policy: RejectedPolicy) -> PoolOptions {
    PoolOptions {
        thread_count: threads,
        max_queue_size: queue,
        policy,
        stack_size: 0,
    }
}

#[test]
fn refer_buffer_stays_with_the_caller() {
    static SEEN: AtomicUsize = AtomicUsize::new(0);
    fn check(task: &SocketTask) {
        if task.buf() == b"0123456789abcdef".as_ref() && task.conn_id() == 7 {
            SEEN.fetch_add(1, Ordering::SeqCst);
        }
    }

    let source = Bytes::from_static(b"0123456789abcdef");
    let task = SocketTask::new(check, None, 7, TaskBuf::Refer(source.clone()), 0, 0);

    let pool = TaskPool::new();
    pool.start(&opts(1, 0, RejectedPolicy::CallFail)).unwrap();
    pool.submit_socket_task(task, None).unwrap();
    pool.stop(None).unwrap();

    assert_eq!(SEEN.load(Ordering::SeqCst), 1);
    // The caller's handle still owns the bytes after the pool is gone.
    assert_eq!(&source[..], b"0123456789abcdef");
}

#[test]
fn every_submitted_socket_task_is_destroyed_exactly_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let payload: &[u8] = b"0123456789abcdef";

    let pool = TaskPool::new();
    pool.start(&opts(1, 0, RejectedPolicy::CallFail)).unwrap();

    pool.submit_socket_task(
        SocketTask::new(
            noop,
            Some(probe(&drops)),
            1,
            TaskBuf::Refer(Bytes::from_static(b"0123456789abcdef")),
            0,
            0,
        ),
        None,
    )
    .unwrap();
    pool.submit_socket_task(
        SocketTask::new(
            noop,
            Some(probe(&drops)),
            2,
            TaskBuf::Attach(payload.to_vec()),
            0,
            0,
        ),
        None,
    )
    .unwrap();
    pool.submit_socket_task(
        SocketTask::new(noop, Some(probe(&drops)), 3, TaskBuf::Copy(payload), 0, 0),
        None,
    )
    .unwrap();

    pool.stop(None).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[test]
fn discarded_tasks_are_destroyed_at_shutdown() {
    let drops = Arc::new(AtomicUsize::new(0));

    let pool = TaskPool::new();
    pool.start(&opts(1, 0, RejectedPolicy::CallFail)).unwrap();

    pool.submit(|| thread::sleep(Duration::from_millis(300)), None)
        .unwrap();
    thread::sleep(Duration::from_millis(20));
    pool.submit_socket_task(
        SocketTask::new(noop, Some(probe(&drops)), 9, TaskBuf::Copy(b"abc"), 0, 0),
        None,
    )
    .unwrap();

    match pool.stop(Some(Duration::from_millis(30))) {
        Err(PoolError::Cancelled { discarded, .. }) => assert_eq!(discarded, 1),
        other => panic!("expected Cancelled, got {:?}", other),
    }
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    thread::sleep(Duration::from_millis(350));
}

#[test]
fn rejected_socket_task_returns_to_the_producer() {
    let drops = Arc::new(AtomicUsize::new(0));

    let pool = TaskPool::new();
    pool.start(&opts(1, 1, RejectedPolicy::CallFail)).unwrap();

    // Occupy the worker, then fill the queue.
    pool.submit(|| thread::sleep(Duration::from_millis(100)), None)
        .unwrap();
    thread::sleep(Duration::from_millis(20));
    pool.submit(|| {}, None).unwrap();

    let task = SocketTask::new(noop, Some(probe(&drops)), 5, TaskBuf::Copy(b"abc"), 0, 0);
    let rejected = pool.submit_socket_task(task, None).unwrap_err();
    match rejected.error() {
        PoolError::DestinationFull => {}
        other => panic!("expected DestinationFull, got {:?}", other),
    }

    // The pool never owned it: nothing was destroyed, and the producer can
    // retry with the very same task once a slot frees up.
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    let task = rejected.into_task();
    assert_eq!(task.conn_id(), 5);
    assert_eq!(task.buf(), b"abc".as_ref());

    thread::sleep(Duration::from_millis(150));
    pool.submit_socket_task(task, None).unwrap();

    pool.stop(None).unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn caller_run_socket_task_is_destroyed() {
    static RAN: AtomicUsize = AtomicUsize::new(0);
    fn bump(_task: &SocketTask) {
        RAN.fetch_add(1, Ordering::SeqCst);
    }

    let pool = TaskPool::new();
    pool.start(&opts(1, 1, RejectedPolicy::CallerRun)).unwrap();

    pool.submit(|| thread::sleep(Duration::from_millis(100)), None)
        .unwrap();
    thread::sleep(Duration::from_millis(20));
    pool.submit(|| {}, None).unwrap();

    let drops = Arc::new(AtomicUsize::new(0));
    pool.submit_socket_task(
        SocketTask::new(bump, Some(probe(&drops)), 1, TaskBuf::Copy(b"x"), 0, 0),
        None,
    )
    .unwrap();

    // Ran synchronously during the submit call, and was destroyed right after.
    assert_eq!(RAN.load(Ordering::SeqCst), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    pool.stop(None).unwrap();
}

#[test]
fn copy_mode_takes_an_independent_snapshot() {
    let mut source = vec![1u8, 2, 3, 4];
    let task = SocketTask::new(noop, None, 1, TaskBuf::Copy(&source), 0, 0);
    source.clear();

    assert_eq!(task.buf(), &[1, 2, 3, 4]);
    assert_eq!(task.buf_len(), 4);
}

#[test]
fn empty_copy_adopts_without_allocating() {
    let task = SocketTask::new(noop, None, 1, TaskBuf::Copy(&[]), 0, 0);
    assert_eq!(task.buf_len(), 0);
    assert!(task.buf().is_empty());
}

#[test]
fn accessors_round_trip() {
    let task = SocketTask::new(
        noop,
        Some(Arc::new(42u32) as Sender),
        99,
        TaskBuf::Attach(vec![5; 8]),
        11,
        22,
    );

    assert_eq!(task.conn_id(), 99);
    assert_eq!(task.wparam(), 11);
    assert_eq!(task.lparam(), 22);
    assert_eq!(task.buf_len(), 8);
    assert_eq!(task.buf(), &[5u8; 8][..]);

    let sender = task.sender().unwrap();
    assert_eq!(sender.downcast_ref::<u32>(), Some(&42));
}
