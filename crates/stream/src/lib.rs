//! Readable streams with an exclusive reader lock.
//!
//! A [`ReadableStream`] can hand out one [`ExclusiveReader`] at a time. While
//! a reader holds the lock, the stream's own `read`/`state`/`ready`/`closed`/
//! `cancel` operations are rejected with [`StreamError::StreamLocked`] and all
//! access goes through the reader, which forwards to the stream after checking
//! that it is still the recognized holder.
//!
//! * [`ReadableStream`]: stream handle, lock slot and direct operations
//! * [`StreamController`]: producer side (enqueue, close, error)
//! * [`ExclusiveReader`]: lock-holding capability
//! * [`StreamConfig`]: backpressure and lock policy knobs
//!
//! Streams and readers are single-threaded (`!Send`); notifications are plain
//! futures driven by whatever local executor the caller uses.

#![warn(missing_docs)]

pub mod config;
pub mod error;
/// Boxed local futures and notification helpers.
pub mod future;
/// Lock tokens, release signals and the stream's lock slot.
pub mod lock;
pub mod reader;
pub mod stream;

pub use config::{ConfigError, StreamConfig, TerminalAcquire};
pub use error::{Result, StreamError};
pub use future::{BoxFutureLocal, Pending};
pub use lock::{LockToken, ReleaseSignal};
pub use reader::ExclusiveReader;
pub use stream::{EnqueueOutcome, NoopSource, ReadOutcome, ReadableStream, StreamController, StreamState, UnderlyingSource};
