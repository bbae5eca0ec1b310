#[macro_use]
extern crate clap;
#[macro_use(slog_o)]
extern crate slog;
#[macro_use]
extern crate slog_scope;

use crossbeam::channel;
use slog::Drain;
use std::collections::HashSet;
use std::process::exit;
use std::thread;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use taskpool::{PoolOptions, RejectedPolicy, Result, TaskPool};

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Policy {
        call_fail,
        wait_for,
        caller_run,
    }
}

impl Policy {
    fn to_rejected(self) -> RejectedPolicy {
        match self {
            Policy::call_fail => RejectedPolicy::CallFail,
            Policy::wait_for => RejectedPolicy::WaitFor,
            Policy::caller_run => RejectedPolicy::CallerRun,
        }
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "taskpool-stress")]
struct Opt {
    #[structopt(
        long,
        help = "Worker count: 0 picks a default, -n means n times the CPUs",
        value_name = "N",
        default_value = "0",
        allow_hyphen_values = true
    )]
    threads: i32,
    #[structopt(
        long,
        help = "Queue capacity, 0 means unbounded",
        value_name = "SIZE",
        default_value = "0"
    )]
    queue_size: usize,
    #[structopt(
        long,
        help = "Rejection policy for a full queue",
        value_name = "POLICY",
        possible_values = &Policy::variants(),
        default_value = "call_fail"
    )]
    policy: Policy,
    #[structopt(
        long,
        help = "How many tasks to push through the pool",
        value_name = "COUNT",
        default_value = "100000"
    )]
    tasks: usize,
    #[structopt(
        long,
        help = "Busy time per task in microseconds",
        value_name = "MICROS",
        default_value = "10"
    )]
    task_micros: u64,
    #[structopt(
        long,
        help = "Submit deadline in milliseconds, wait_for only",
        value_name = "MS"
    )]
    max_wait_ms: Option<u64>,
}

fn main() {
    let opt = Opt::from_args();
    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, slog_o!());
    let _guard = slog_scope::set_global_logger(logger);

    info!("taskpool-stress {}", env!("CARGO_PKG_VERSION"));

    let pool = TaskPool::new();
    pool.start(&PoolOptions {
        thread_count: opt.threads,
        max_queue_size: opt.queue_size,
        policy: opt.policy.to_rejected(),
        stack_size: 0,
    })?;
    info!("pool running with {} worker(s)", pool.thread_count());

    let max_wait = opt.max_wait_ms.map(Duration::from_millis);
    let busy = Duration::from_micros(opt.task_micros);
    let (done_sender, done_receiver) = channel::unbounded();

    let begin = Instant::now();
    let mut rejected = 0usize;
    for _ in 0..opt.tasks {
        let done = done_sender.clone();
        let outcome = pool.submit(
            move || {
                let spin = Instant::now();
                while spin.elapsed() < busy {}
                let _ = done.send(thread::current().id());
            },
            max_wait,
        );
        if outcome.is_err() {
            rejected += 1;
        }
    }
    drop(done_sender);

    // Every sender clone lives inside a task; the channel disconnects once
    // the last task has run.
    let mut completed = 0usize;
    let mut threads = HashSet::new();
    for id in done_receiver.iter() {
        completed += 1;
        threads.insert(id);
    }
    let elapsed = begin.elapsed();

    info!(
        "{} task(s) completed on {} thread(s), {} rejected",
        completed,
        threads.len(),
        rejected
    );
    info!(
        "throughput: {:.0} tasks/s",
        completed as f64 / elapsed.as_secs_f64()
    );

    pool.stop(None)?;
    Ok(())
}
