//! Error taxonomy shared by streams and readers.

/// A convenient type alias for `Result` with `E` = [`enum@crate::StreamError`].
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Possible stream and lock errors.
///
/// The first three variants belong to the locking protocol; the rest are data
/// errors raised by the stream itself and pass through readers unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
	/// Acquisition attempted while another reader holds the lock.
	#[error("this stream has already been locked for exclusive reading by another reader")]
	AlreadyLocked,
	/// Direct stream operation attempted while a reader holds the lock.
	#[error("this stream is locked to a single exclusive reader and cannot be used directly")]
	StreamLocked,
	/// Reader operation attempted after the reader released its lock.
	#[error("this stream reader has released its lock on the stream and can no longer be used")]
	NotLocked,
	/// Read attempted while the queue is empty and the stream is still open.
	#[error("cannot read from a stream with an empty queue")]
	Empty,
	/// The stream is closed (or closing) and rejects the operation.
	#[error("stream is closed")]
	Closed,
	/// The stream was errored; carries the stored reason.
	#[error("stream errored: {0}")]
	Errored(String),
	/// The underlying source failed while being cancelled.
	#[error("underlying source failed to cancel: {0}")]
	Cancel(String),
}

impl StreamError {
	/// Returns true for errors raised by the locking protocol rather than by
	/// the stream's data path.
	pub const fn is_lock_error(&self) -> bool {
		matches!(self, Self::AlreadyLocked | Self::StreamLocked | Self::NotLocked)
	}
}
