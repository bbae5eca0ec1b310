use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// The socket-task callback signature.
pub type SocketTaskProc = fn(&SocketTask);

/// Opaque back-reference to the component that produced a socket task.
pub type Sender = Arc<dyn Any + Send + Sync>;

/// Buffer argument of a socket task, with its ownership mode.
///
/// `Refer` storage is shared: the pool drops its handle when the task is
/// destroyed but never frees the underlying bytes while the caller holds a
/// clone. `Attach` storage belongs to the task and is freed with it. `Copy`
/// is a construction-time mode: the bytes are copied into a fresh owned
/// allocation which from then on behaves like `Attach`.
pub enum TaskBuf<'a> {
    /// Shared storage the pool never frees.
    Refer(Bytes),
    /// Storage owned by the socket task.
    Attach(Vec<u8>),
    /// Copy the source into a fresh owned allocation.
    Copy(&'a [u8]),
}

// Storage form after construction: Copy collapses into Attach.
enum BufStorage {
    Refer(Bytes),
    Attach(Vec<u8>),
}

impl BufStorage {
    fn as_slice(&self) -> &[u8] {
        match self {
            BufStorage::Refer(bytes) => bytes,
            BufStorage::Attach(vec) => vec,
        }
    }
}

/// A task whose argument carries a byte buffer and connection metadata.
///
/// Created by the producer, consumed by the pool: after the callback has run
/// (on a worker, or on the submitter under the caller-run policy) the task is
/// dropped, which releases the buffer according to its ownership mode. A task
/// that is never submitted is simply dropped by the producer.
pub struct SocketTask {
    proc: SocketTaskProc,
    sender: Option<Sender>,
    conn_id: u64,
    buf: BufStorage,
    wparam: usize,
    lparam: usize,
}

impl SocketTask {
    /// Create a socket task.
    ///
    /// Under [`TaskBuf::Copy`] with a non-empty source this allocates
    /// `buf.len()` bytes and copies the source in; an empty source is adopted
    /// as-is without allocating.
    pub fn new(
        proc: SocketTaskProc,
        sender: Option<Sender>,
        conn_id: u64,
        buf: TaskBuf<'_>,
        wparam: usize,
        lparam: usize,
    ) -> SocketTask {
        let buf = match buf {
            TaskBuf::Refer(bytes) => BufStorage::Refer(bytes),
            TaskBuf::Attach(vec) => BufStorage::Attach(vec),
            TaskBuf::Copy(src) => {
                if src.is_empty() {
                    BufStorage::Attach(Vec::new())
                } else {
                    BufStorage::Attach(src.to_vec())
                }
            }
        };

        SocketTask {
            proc,
            sender,
            conn_id,
            buf,
            wparam,
            lparam,
        }
    }

    /// The connection identifier carried by this task.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// The carried bytes, regardless of ownership mode.
    pub fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Length of the carried bytes.
    pub fn buf_len(&self) -> usize {
        self.buf.as_slice().len()
    }

    /// First user payload.
    pub fn wparam(&self) -> usize {
        self.wparam
    }

    /// Second user payload.
    pub fn lparam(&self) -> usize {
        self.lparam
    }

    /// The producer back-reference, if one was supplied.
    pub fn sender(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.sender.as_deref()
    }

    pub(crate) fn proc(&self) -> SocketTaskProc {
        self.proc
    }
}

impl fmt::Debug for SocketTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTask")
            .field("conn_id", &self.conn_id)
            .field("buf_len", &self.buf_len())
            .field("wparam", &self.wparam)
            .field("lparam", &self.lparam)
            .finish()
    }
}

/// A queued unit of work.
///
/// The socket variant owns its argument, so the obligation to destroy it
/// after execution travels with the task instead of a runtime flag.
pub(crate) enum Task {
    Plain(Box<dyn FnOnce() + Send + 'static>),
    Socket(SocketTask),
}

impl Task {
    /// Run the task to completion, consuming it. A socket task is destroyed
    /// right after its callback returns.
    pub(crate) fn run(self) {
        match self {
            Task::Plain(job) => job(),
            Task::Socket(task) => (task.proc())(&task),
        }
    }
}
