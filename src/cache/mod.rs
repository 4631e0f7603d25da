//! Write-Behind Cache Core
//!
//! Concurrency and batching layer in front of the storage engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              Cache (facade)                              │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │   set ──▶ write queue (bounded) ──▶ Write Batcher ──▶ write_batch ─┐     │
//! │                                     (1 thread)                     │     │
//! │                                                                    ▼     │
//! │   get ──▶ read queue (bounded) ──▶ Read Worker Pool ──▶ get ──▶ Storage  │
//! │    ▲                               (N threads)                           │
//! │    └──────────── private reply channel ◀────────┘                        │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - A full queue blocks the producer; nothing accepted is dropped
//! - Batches flush at `batch_size` writes or every `flush_interval`
//! - Writes within a batch keep arrival order; the last write per key wins
//! - One writer: flush N is applied before flush N+1 starts
//! - Every lookup gets exactly one answer: a value, "absent", or an error
//!
//! Lookups go straight to the storage engine, so a `get` does not see a
//! write that is still waiting in the batcher.

mod batcher;
mod facade;
mod queue;
mod stats;
mod task;
mod workers;

#[cfg(test)]
mod proptest;

pub use batcher::{FlushTrigger, PendingBatch};
pub use facade::Cache;
pub use queue::Admission;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use task::{ReadReply, ReadTask, WriteRequest, WriteTask};
