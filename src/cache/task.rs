//! Units of work carried by the task queues.

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};

use crate::error::Result;
use crate::storage::KeyValue;

/// Outcome of a lookup: `Ok(None)` when the key is absent
pub type ReadReply = Result<Option<Bytes>>;

/// A pending point lookup.
///
/// Consumed by exactly one read worker, which answers on `reply` once.
#[derive(Debug)]
pub struct ReadTask {
    /// Key to look up
    pub key: String,
    /// Single-use reply channel back to the waiting caller
    pub reply: Sender<ReadReply>,
}

impl ReadTask {
    /// Create a task together with the receiving end of its reply channel.
    pub fn new(key: String) -> (Self, Receiver<ReadReply>) {
        let (reply, rx) = channel::bounded(1);
        (Self { key, reply }, rx)
    }

    /// Send the reply. Returns `false` if the caller stopped waiting.
    pub fn respond(self, reply: ReadReply) -> bool {
        self.reply.send(reply).is_ok()
    }
}

/// A point write waiting to be batched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTask {
    /// Key to write
    pub key: String,
    /// Value to store
    pub value: Bytes,
}

impl WriteTask {
    /// Create a new write task
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Convert into the pair handed to the storage engine
    pub fn into_pair(self) -> KeyValue {
        (self.key, self.value)
    }
}

/// Item on the write queue.
#[derive(Debug)]
pub enum WriteRequest {
    /// Add a write to the pending batch
    Put(WriteTask),
    /// Flush everything queued before this request and report the outcome
    Flush(Sender<Result<()>>),
}

// =============================================================================
// Tests
// =============================================================================
