//! Exclusive reader: the lock-holding capability of a [`ReadableStream`].

use std::cell::RefCell;
use std::fmt;

use crate::future::{Pending, rejected};
use crate::lock::{LockToken, ReleaseSignal};
use crate::stream::{ReadOutcome, ReadableStream, StreamState};
use crate::{Result, StreamError};

/// Single owner of a stream's lock.
///
/// Created by [`ReadableStream::acquire_reader`]. Every data operation checks
/// that the reader still holds the lock, suspends the lock for the duration
/// of the call and forwards to the stream's own operation, so results and
/// data errors are exactly what the unlocked stream would produce.
///
/// Once released (explicitly, through [`cancel`](Self::cancel), by dropping
/// the reader, or by the stream's `auto_release`), the reader is permanently
/// inert and every operation except [`is_active`](Self::is_active) and
/// [`release_lock`](Self::release_lock) fails with
/// [`StreamError::NotLocked`].
pub struct ExclusiveReader<T> {
	stream: RefCell<Option<ReadableStream<T>>>,
	token: LockToken,
	signal: ReleaseSignal,
}

impl<T> ExclusiveReader<T> {
	pub(crate) fn new(stream: ReadableStream<T>, token: LockToken, signal: ReleaseSignal) -> Self {
		Self {
			stream: RefCell::new(Some(stream)),
			token,
			signal,
		}
	}

	/// Returns the token identifying this acquisition.
	pub fn token(&self) -> LockToken {
		self.token
	}

	/// Returns true until the lock is released.
	pub fn is_active(&self) -> bool {
		self.stream.borrow().is_some() && !self.signal.is_released()
	}

	/// Returns a handle that observes the release of this reader's lock.
	pub fn release_signal(&self) -> ReleaseSignal {
		self.signal.clone()
	}

	/// Releases the lock. Calling this on a released reader is a no-op.
	pub fn release_lock(&self) {
		let Some(stream) = self.stream.borrow_mut().take() else {
			return;
		};
		let cleared = stream.release(self.token);
		tracing::debug!(stream = stream.id(), lock = %self.token, cleared, "reader.release");
		self.signal.fire();
	}

	/// Returns the bound stream if this reader still holds its lock.
	fn bound(&self) -> Result<ReadableStream<T>> {
		if self.signal.is_released() {
			self.stream.borrow_mut().take();
			return Err(StreamError::NotLocked);
		}
		let stream = self.stream.borrow().clone().ok_or(StreamError::NotLocked)?;

		let holder = stream.holder_token();
		debug_assert_eq!(holder, Some(self.token), "a bound reader must be its stream's lock holder");
		if holder != Some(self.token) {
			return Err(StreamError::NotLocked);
		}
		Ok(stream)
	}

	/// Runs `call` against the bound stream with the lock suspended.
	fn delegate<R>(&self, op: &'static str, call: impl FnOnce(&ReadableStream<T>) -> R) -> Result<R> {
		let stream = self.bound()?;
		tracing::trace!(stream = stream.id(), lock = %self.token, op, "reader.delegate");
		let _suspension = stream.suspend(self.token).ok_or(StreamError::NotLocked)?;
		Ok(call(&stream))
	}
}

impl<T: 'static> ExclusiveReader<T> {
	/// Reads the next chunk from the stream.
	pub fn read(&self) -> Result<ReadOutcome<T>> {
		self.delegate("read", ReadableStream::read)?
	}

	/// Returns the stream's state.
	pub fn state(&self) -> Result<StreamState> {
		self.delegate("state", ReadableStream::state)?
	}

	/// Readiness notification of the stream.
	pub fn ready(&self) -> Pending<StreamState> {
		self.delegate("ready", ReadableStream::ready).unwrap_or_else(rejected)
	}

	/// Closed notification of the stream.
	pub fn closed(&self) -> Pending<()> {
		self.delegate("closed", ReadableStream::closed).unwrap_or_else(rejected)
	}

	/// Releases the lock, then cancels the stream with `reason`.
	///
	/// The reader is inactive as soon as this returns, before the returned
	/// notification settles.
	pub fn cancel(&self, reason: impl Into<String>) -> Pending<()> {
		let stream = match self.bound() {
			Ok(stream) => stream,
			Err(err) => return rejected(err),
		};
		self.release_lock();
		stream.cancel(reason).unwrap_or_else(rejected)
	}
}

impl<T> Drop for ExclusiveReader<T> {
	fn drop(&mut self) {
		self.release_lock();
	}
}

impl<T> fmt::Debug for ExclusiveReader<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExclusiveReader")
			.field("token", &self.token)
			.field("active", &self.is_active())
			.finish()
	}
}

#[cfg(test)]
mod tests;
