//! Bounded task queues and admission control.
//!
//! Both queues are bounded FIFO channels: a producer that finds its queue
//! full waits for space (backpressure) unless it asked for a non-blocking or
//! deadline-bounded admission.
//!
//! Admission and close are serialized through a read/write gate. Producers
//! hold the read side for the whole enqueue, so once [`TaskQueues::close`]
//! returns no further task can land on a queue and every accepted write is
//! visible to the batcher's final drain.

use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;

use super::task::{ReadTask, WriteRequest};
use crate::error::{Error, Result};

/// How a producer waits for queue space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Wait as long as it takes
    Block,
    /// Fail with `ResourceExhausted` if the queue is full
    Try,
    /// Wait until `deadline`, then fail with `Timeout(timeout)`
    Until { deadline: Instant, timeout: Duration },
}

impl Admission {
    /// Deadline-bounded admission starting now.
    ///
    /// A timeout too large to express as a deadline waits without bound.
    pub fn within(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Admission::Until { deadline, timeout },
            None => Admission::Block,
        }
    }
}

/// Consumer ends of the queues, handed to the batcher and the worker pool.
pub struct QueueReceivers {
    pub reads: Receiver<ReadTask>,
    pub writes: Receiver<WriteRequest>,
}

/// Producer ends of the read and write queues.
pub struct TaskQueues {
    reads: Sender<ReadTask>,
    writes: Sender<WriteRequest>,
    /// `true` once the queues stop accepting work
    closed: RwLock<bool>,
}

impl TaskQueues {
    /// Create both queues with the given capacities.
    pub fn new(read_capacity: usize, write_capacity: usize) -> (Self, QueueReceivers) {
        let (read_tx, read_rx) = channel::bounded(read_capacity);
        let (write_tx, write_rx) = channel::bounded(write_capacity);

        let queues = Self {
            reads: read_tx,
            writes: write_tx,
            closed: RwLock::new(false),
        };
        let receivers = QueueReceivers {
            reads: read_rx,
            writes: write_rx,
        };
        (queues, receivers)
    }

    /// Enqueue a read task.
    pub fn push_read(&self, task: ReadTask, admission: Admission) -> Result<()> {
        self.push(&self.reads, task, admission, "read")
    }

    /// Enqueue a write request.
    pub fn push_write(&self, request: WriteRequest, admission: Admission) -> Result<()> {
        self.push(&self.writes, request, admission, "write")
    }

    fn push<T>(&self, queue: &Sender<T>, item: T, admission: Admission, name: &str) -> Result<()> {
        let closed = self.closed.read();
        if *closed {
            return Err(Error::Closed);
        }

        match admission {
            Admission::Block => queue.send(item).map_err(|_| Error::Closed),
            Admission::Try => queue.try_send(item).map_err(|e| match e {
                TrySendError::Full(_) => Error::ResourceExhausted(format!(
                    "{} queue full ({} pending)",
                    name,
                    queue.len()
                )),
                TrySendError::Disconnected(_) => Error::Closed,
            }),
            Admission::Until { deadline, timeout } => {
                queue.send_deadline(item, deadline).map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => Error::Timeout(timeout),
                    SendTimeoutError::Disconnected(_) => Error::Closed,
                })
            }
        }
    }

    /// Stop admitting work. Waits for producers already inside an enqueue.
    ///
    /// Returns `true` if this call closed the queues.
    pub fn close(&self) -> bool {
        let mut closed = self.closed.write();
        let was_open = !*closed;
        *closed = true;
        was_open
    }

    /// Whether the queues have been closed
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Read tasks waiting for a worker
    pub fn pending_reads(&self) -> usize {
        self.reads.len()
    }

    /// Write requests waiting for the batcher
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
