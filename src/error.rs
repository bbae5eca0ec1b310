use failure::Fail;
use std::io;

/// Custom pool error type.
#[derive(Fail, Debug)]
pub enum PoolError {
    /// The operation is not allowed in the current pool state.
    #[fail(display = "Operation invalid in current pool state")]
    InvalidState,
    /// The task queue is full and the rejection policy refused the submission.
    #[fail(display = "Task queue is full")]
    DestinationFull,
    /// A deadline expired before the operation could complete.
    #[fail(display = "Operation timed out")]
    Timeout,
    /// Shutdown had to discard queued tasks or abandon live workers.
    #[fail(
        display = "Shutdown cancelled work: {} task(s) discarded, {} worker(s) abandoned",
        discarded, abandoned
    )]
    Cancelled {
        /// Tasks still queued when shutdown drained the queue.
        discarded: usize,
        /// Workers still live when the shutdown deadline expired.
        abandoned: usize,
    },
    /// A contract violation, such as a worker count beyond the supported
    /// maximum.
    #[fail(display = "Invalid parameter: {}", _0)]
    InvalidParameter(String),
    /// OS error from thread creation or attribute setup.
    #[fail(display = "{}", _0)]
    Io(#[cause] io::Error),
}

impl From<io::Error> for PoolError {
    fn from(err: io::Error) -> PoolError {
        PoolError::Io(err)
    }
}

/// Result alias for the pool.
pub type Result<T> = std::result::Result<T, PoolError>;
