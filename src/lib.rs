#![deny(missing_docs)]
//! A worker thread pool built to sit under a socket server.
//!
//! Producer threads hand short-lived tasks to a shared [`TaskPool`]; a
//! configurable set of long-lived worker threads runs them in FIFO order.
//! The queue may be bounded, in which case one of three rejection policies
//! decides what a submission does at capacity: fail fast, block with an
//! optional deadline, or run the task on the submitting thread. Socket
//! tasks additionally carry a byte buffer whose ownership mode (shared,
//! attached, or copied) determines what is released when the task is
//! destroyed.

extern crate slog;
#[macro_use]
extern crate slog_scope;

pub use error::{PoolError, Result};
pub use task::{Sender, SocketTask, SocketTaskProc, TaskBuf};
pub use thread_pool::{PoolOptions, PoolState, RejectedPolicy, RejectedTask, TaskPool};

mod error;
mod task;
pub mod thread_pool;
