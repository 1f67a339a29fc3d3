//! Readable stream: queue, lock slot and direct operations.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

use crate::config::{StreamConfig, TerminalAcquire};
use crate::future::{BoxFutureLocal, Pending, rejected, resolved};
use crate::lock::{Holder, LockClock, LockSlot, LockToken, ReleaseSignal};
use crate::{ExclusiveReader, Result, StreamError};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Observable stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
	/// At least one chunk is queued.
	Readable,
	/// The queue is empty and the stream is still open.
	Waiting,
	/// The stream closed and every chunk has been read, or it was cancelled.
	Closed,
	/// The stream was errored by its producer.
	Errored,
}

impl StreamState {
	/// Returns true for `Closed` and `Errored`.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Closed | Self::Errored)
	}

	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Readable => "readable",
			Self::Waiting => "waiting",
			Self::Closed => "closed",
			Self::Errored => "errored",
		}
	}
}

/// Result of a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<T> {
	/// The next queued chunk.
	Chunk(T),
	/// The stream is closed; no more chunks will arrive.
	Done,
}

/// Outcome from enqueueing a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
	/// Chunk was queued below the high-water mark.
	Enqueued,
	/// Chunk was queued, but the queue reached the high-water mark.
	Backpressure,
}

/// Producer-side hook invoked when the stream is cancelled.
pub trait UnderlyingSource {
	/// Tears the source down. Receives the reason passed to `cancel` unchanged.
	fn cancel(&mut self, reason: String) -> BoxFutureLocal<'static, Result<(), String>>;
}

impl<F, Fut> UnderlyingSource for F
where
	F: FnMut(String) -> Fut,
	Fut: Future<Output = Result<(), String>> + 'static,
{
	fn cancel(&mut self, reason: String) -> BoxFutureLocal<'static, Result<(), String>> {
		Box::pin(self(reason))
	}
}

/// Source whose cancellation completes immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSource;

impl UnderlyingSource for NoopSource {
	fn cancel(&mut self, _reason: String) -> BoxFutureLocal<'static, Result<(), String>> {
		Box::pin(std::future::ready(Ok(())))
	}
}

enum Phase {
	Open,
	Closed,
	Errored(StreamError),
}

struct Inner<T> {
	queue: VecDeque<T>,
	close_requested: bool,
	phase: Phase,
	lock: LockSlot,
}

impl<T> Inner<T> {
	fn state(&self) -> StreamState {
		match self.phase {
			Phase::Open if self.queue.is_empty() => StreamState::Waiting,
			Phase::Open => StreamState::Readable,
			Phase::Closed => StreamState::Closed,
			Phase::Errored(_) => StreamState::Errored,
		}
	}

	/// Rejects new chunks and close requests once closing has begun.
	fn ensure_accepting(&self) -> Result<()> {
		match &self.phase {
			Phase::Errored(err) => Err(err.clone()),
			Phase::Closed => Err(StreamError::Closed),
			Phase::Open if self.close_requested => Err(StreamError::Closed),
			Phase::Open => Ok(()),
		}
	}
}

struct Shared<T> {
	id: u64,
	config: StreamConfig,
	clock: LockClock,
	inner: RefCell<Inner<T>>,
	source: RefCell<Box<dyn UnderlyingSource>>,
	changed: Notify,
}

impl<T> Shared<T> {
	fn on_terminal(&self, state: StreamState) {
		tracing::debug!(stream = self.id, state = state.as_str(), "stream.terminal");
		self.changed.notify_waiters();
		if self.config.auto_release() {
			self.auto_release();
		}
	}

	fn auto_release(&self) {
		let released = self.inner.borrow_mut().lock.release_any();
		if let Some(holder) = released {
			tracing::debug!(stream = self.id, lock = %holder.token, "stream.lock.auto_release");
			holder.signal.fire();
		}
	}
}

/// Handle to a readable stream.
///
/// Handles are cheap to clone and share one queue and one lock slot. While a
/// reader holds the lock every direct operation fails with
/// [`StreamError::StreamLocked`].
pub struct ReadableStream<T> {
	shared: Rc<Shared<T>>,
}

impl<T> Clone for ReadableStream<T> {
	fn clone(&self) -> Self {
		Self {
			shared: Rc::clone(&self.shared),
		}
	}
}

impl<T> fmt::Debug for ReadableStream<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let inner = self.shared.inner.try_borrow();
		f.debug_struct("ReadableStream")
			.field("id", &self.shared.id)
			.field("state", &inner.as_ref().map(|inner| inner.state()).ok())
			.field("locked", &inner.as_ref().map(|inner| inner.lock.holder().is_some()).ok())
			.finish()
	}
}

impl<T: 'static> ReadableStream<T> {
	/// Creates an open, empty stream and its producer handle.
	pub fn new(source: impl UnderlyingSource + 'static, config: StreamConfig) -> (Self, StreamController<T>) {
		let shared = Rc::new(Shared {
			id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
			inner: RefCell::new(Inner {
				queue: VecDeque::new(),
				close_requested: false,
				phase: Phase::Open,
				lock: LockSlot::Unlocked,
			}),
			config,
			clock: LockClock::default(),
			source: RefCell::new(Box::new(source)),
			changed: Notify::new(),
		});
		let controller = StreamController {
			shared: Rc::clone(&shared),
		};
		(Self { shared }, controller)
	}

	/// Locks the stream to a new exclusive reader.
	///
	/// Fails with [`StreamError::AlreadyLocked`] while another reader holds
	/// the lock. Closed and errored streams are handled according to
	/// [`StreamConfig::terminal_acquire`].
	pub fn acquire_reader(&self) -> Result<ExclusiveReader<T>> {
		let (holder, terminal) = {
			let mut inner = self.shared.inner.borrow_mut();
			if inner.lock.holder().is_some() {
				tracing::trace!(stream = self.id(), "stream.lock.contended");
				return Err(StreamError::AlreadyLocked);
			}
			match (self.shared.config.terminal_acquire(), &inner.phase) {
				(TerminalAcquire::RejectErrored | TerminalAcquire::RejectTerminal, Phase::Errored(err)) => return Err(err.clone()),
				(TerminalAcquire::RejectTerminal, Phase::Closed) => return Err(StreamError::Closed),
				_ => {}
			}
			let holder = Holder {
				token: self.shared.clock.next(),
				signal: ReleaseSignal::new(),
			};
			inner.lock = LockSlot::Held(holder.clone());
			(holder, inner.state().is_terminal())
		};

		tracing::debug!(stream = self.id(), lock = %holder.token, "stream.lock.acquire");
		let reader = ExclusiveReader::new(self.clone(), holder.token, holder.signal);
		if terminal && self.shared.config.auto_release() {
			self.shared.auto_release();
		}
		Ok(reader)
	}

	/// Dequeues the next chunk.
	///
	/// Returns [`ReadOutcome::Done`] on a closed stream, the stored error on an
	/// errored one and [`StreamError::Empty`] while open with nothing queued.
	pub fn read(&self) -> Result<ReadOutcome<T>> {
		self.ensure_direct("read")?;

		let (chunk, closed) = {
			let mut inner = self.shared.inner.borrow_mut();
			match &inner.phase {
				Phase::Errored(err) => return Err(err.clone()),
				Phase::Closed => return Ok(ReadOutcome::Done),
				Phase::Open => {}
			}
			let chunk = inner.queue.pop_front().ok_or(StreamError::Empty)?;
			let closed = inner.close_requested && inner.queue.is_empty();
			if closed {
				inner.phase = Phase::Closed;
			}
			(chunk, closed)
		};

		if closed {
			self.shared.on_terminal(StreamState::Closed);
		}
		Ok(ReadOutcome::Chunk(chunk))
	}

	/// Returns the current state.
	pub fn state(&self) -> Result<StreamState> {
		self.ensure_direct("state")?;
		Ok(self.shared.inner.borrow().state())
	}

	/// Readiness notification: settles with the state once the stream is no
	/// longer [`StreamState::Waiting`].
	pub fn ready(&self) -> Pending<StreamState> {
		if let Err(err) = self.ensure_direct("ready") {
			return rejected(err);
		}

		let shared = Rc::clone(&self.shared);
		Box::pin(async move {
			loop {
				let notified = shared.changed.notified();
				let state = shared.inner.borrow().state();
				if state != StreamState::Waiting {
					return Ok(state);
				}
				notified.await;
			}
		})
	}

	/// Closed notification: fulfilled once the stream closes, rejected with
	/// the stored error if it errors.
	pub fn closed(&self) -> Pending<()> {
		if let Err(err) = self.ensure_direct("closed") {
			return rejected(err);
		}

		let shared = Rc::clone(&self.shared);
		Box::pin(async move {
			loop {
				let notified = shared.changed.notified();
				let settled = match &shared.inner.borrow().phase {
					Phase::Open => None,
					Phase::Closed => Some(Ok(())),
					Phase::Errored(err) => Some(Err(err.clone())),
				};
				if let Some(outcome) = settled {
					return outcome;
				}
				notified.await;
			}
		})
	}

	/// Cancels the stream, discarding queued chunks and tearing down the
	/// underlying source with `reason`.
	///
	/// Fails synchronously with [`StreamError::StreamLocked`] while a reader
	/// holds the lock; cancel through the reader instead.
	pub fn cancel(&self, reason: impl Into<String>) -> Result<Pending<()>> {
		self.ensure_direct("cancel")?;

		{
			let mut inner = self.shared.inner.borrow_mut();
			match &inner.phase {
				Phase::Closed => return Ok(resolved(())),
				Phase::Errored(err) => return Ok(rejected(err.clone())),
				Phase::Open => {}
			}
			inner.queue.clear();
			inner.close_requested = true;
			inner.phase = Phase::Closed;
		}

		let reason = reason.into();
		tracing::debug!(stream = self.id(), reason = %reason, "stream.cancel");
		self.shared.on_terminal(StreamState::Closed);

		let teardown = self.shared.source.borrow_mut().cancel(reason);
		let id = self.id();
		Ok(Box::pin(async move {
			teardown.await.map_err(|msg| {
				tracing::warn!(stream = id, error = %msg, "stream.cancel.failed");
				StreamError::Cancel(msg)
			})
		}))
	}
}

impl<T> ReadableStream<T> {
	/// Returns the process-unique stream id used in log events.
	pub fn id(&self) -> u64 {
		self.shared.id
	}

	/// Returns the stream's configuration.
	pub fn config(&self) -> &StreamConfig {
		&self.shared.config
	}

	/// Returns true while a reader holds the stream's lock.
	pub fn is_locked(stream: &Self) -> bool {
		stream.shared.inner.borrow().lock.holder().is_some()
	}

	fn ensure_direct(&self, op: &'static str) -> Result<()> {
		if self.shared.inner.borrow().lock.blocks_direct_access() {
			tracing::trace!(stream = self.shared.id, op, "stream.direct.rejected");
			return Err(StreamError::StreamLocked);
		}
		Ok(())
	}

	/// Returns the token of the current holder, suspended or not.
	pub(crate) fn holder_token(&self) -> Option<LockToken> {
		self.shared.inner.borrow().lock.holder().map(|holder| holder.token)
	}

	/// Suspends the lock held by `token` until the returned guard drops.
	pub(crate) fn suspend(&self, token: LockToken) -> Option<Suspension<'_, T>> {
		let suspended = self.shared.inner.borrow_mut().lock.suspend(token);
		suspended.then(|| Suspension { stream: self, token })
	}

	/// Clears the lock slot if `token` holds it.
	pub(crate) fn release(&self, token: LockToken) -> bool {
		self.shared.inner.borrow_mut().lock.release(token).is_some()
	}
}

/// Lets direct operations through on behalf of the holder; restores the lock
/// on drop, including on unwind.
pub(crate) struct Suspension<'a, T> {
	stream: &'a ReadableStream<T>,
	token: LockToken,
}

impl<T> Drop for Suspension<'_, T> {
	fn drop(&mut self) {
		let restored = self.stream.shared.inner.try_borrow_mut().map(|mut inner| inner.lock.restore(self.token));
		debug_assert!(restored.is_ok(), "lock slot borrowed while restoring {}", self.token);
	}
}

/// Producer handle for a [`ReadableStream`].
///
/// The controller is never subject to the reader lock.
pub struct StreamController<T> {
	shared: Rc<Shared<T>>,
}

impl<T> Clone for StreamController<T> {
	fn clone(&self) -> Self {
		Self {
			shared: Rc::clone(&self.shared),
		}
	}
}

impl<T> fmt::Debug for StreamController<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StreamController").field("stream", &self.shared.id).finish()
	}
}

impl<T: 'static> StreamController<T> {
	/// Queues a chunk. Fails once the stream is closing, closed or errored.
	pub fn enqueue(&self, chunk: T) -> Result<EnqueueOutcome> {
		let (outcome, queued) = {
			let mut inner = self.shared.inner.borrow_mut();
			inner.ensure_accepting()?;
			inner.queue.push_back(chunk);
			let queued = inner.queue.len();
			let outcome = if queued >= self.shared.config.high_water_mark() {
				EnqueueOutcome::Backpressure
			} else {
				EnqueueOutcome::Enqueued
			};
			(outcome, queued)
		};

		tracing::trace!(stream = self.shared.id, queued, "stream.enqueue");
		self.shared.changed.notify_waiters();
		Ok(outcome)
	}

	/// Requests closure. The stream closes once the remaining chunks are read.
	pub fn close(&self) -> Result<()> {
		let drained = {
			let mut inner = self.shared.inner.borrow_mut();
			inner.ensure_accepting()?;
			inner.close_requested = true;
			let drained = inner.queue.is_empty();
			if drained {
				inner.phase = Phase::Closed;
			}
			drained
		};

		tracing::debug!(stream = self.shared.id, drained, "stream.close_requested");
		if drained {
			self.shared.on_terminal(StreamState::Closed);
		}
		Ok(())
	}

	/// Errors the stream, discarding queued chunks. Later reads and the closed
	/// notification observe [`StreamError::Errored`] with `reason`.
	pub fn error(&self, reason: impl Into<String>) -> Result<()> {
		{
			let mut inner = self.shared.inner.borrow_mut();
			match &inner.phase {
				Phase::Errored(err) => return Err(err.clone()),
				Phase::Closed => return Err(StreamError::Closed),
				Phase::Open => {}
			}
			inner.queue.clear();
			inner.phase = Phase::Errored(StreamError::Errored(reason.into()));
		}

		self.shared.on_terminal(StreamState::Errored);
		Ok(())
	}

	/// Remaining queue room before the high-water mark. Negative when over it,
	/// zero once closed, `None` once errored.
	pub fn desired_size(&self) -> Option<isize> {
		let inner = self.shared.inner.borrow();
		match inner.phase {
			Phase::Errored(_) => None,
			Phase::Closed => Some(0),
			Phase::Open => {
				let mark = isize::try_from(self.shared.config.high_water_mark()).unwrap_or(isize::MAX);
				let queued = isize::try_from(inner.queue.len()).unwrap_or(isize::MAX);
				Some(mark.saturating_sub(queued))
			}
		}
	}
}
