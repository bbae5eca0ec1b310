#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use rand::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use taskpool::{PoolOptions, SocketTask, TaskBuf, TaskPool};

fn plain_submit_bench(c: &mut Criterion) {
    let thread_nums = vec![2, 4, 6, 8];
    c.bench_function_over_inputs(
        "plain_submit",
        |b, &num| {
            let pool = TaskPool::new();
            pool.start(&PoolOptions {
                thread_count: num,
                ..PoolOptions::default()
            })
            .unwrap();
            let counter = Arc::new(AtomicUsize::new(0));
            b.iter(|| {
                for _ in 0..1000 {
                    let counter = Arc::clone(&counter);
                    pool.submit(
                        move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        },
                        None,
                    )
                    .unwrap();
                }
                while pool.queue_size() > 0 {
                    thread::yield_now();
                }
            });
            pool.stop(None).unwrap();
        },
        thread_nums,
    );
}

fn socket_submit_bench(c: &mut Criterion) {
    fn consume(task: &SocketTask) {
        black_box(task.buf().len());
    }

    let payload_sizes = vec![64usize, 1024, 16 * 1024];
    c.bench_function_over_inputs(
        "socket_submit_copy",
        |b, &size| {
            let pool = TaskPool::new();
            pool.start(&PoolOptions {
                thread_count: 4,
                ..PoolOptions::default()
            })
            .unwrap();
            let mut payload = vec![0u8; size];
            rand::thread_rng().fill_bytes(&mut payload);
            b.iter(|| {
                for i in 0..100 {
                    let task =
                        SocketTask::new(consume, None, i as u64, TaskBuf::Copy(&payload), 0, 0);
                    pool.submit_socket_task(task, None).unwrap();
                }
                while pool.queue_size() > 0 {
                    thread::yield_now();
                }
            });
            pool.stop(None).unwrap();
        },
        payload_sizes,
    );
}

criterion_group!(benches, plain_submit_bench, socket_submit_bench);
criterion_main!(benches);
