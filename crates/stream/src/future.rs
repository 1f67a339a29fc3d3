use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::StreamError;

/// A pinned, boxed future that is not required to be Send.
pub type BoxFutureLocal<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Deferred result of an asynchronous-shaped stream or reader operation.
///
/// Locking errors surface as an already-settled `Err` rather than a
/// synchronous failure of the call that produced the future.
pub type Pending<T> = BoxFutureLocal<'static, Result<T, StreamError>>;

/// Returns a notification that is already fulfilled with `value`.
pub(crate) fn resolved<T: 'static>(value: T) -> Pending<T> {
	Box::pin(std::future::ready(Ok(value)))
}

/// Returns a notification that is already rejected with `err`.
pub(crate) fn rejected<T: 'static>(err: StreamError) -> Pending<T> {
	Box::pin(std::future::ready(Err(err)))
}

/// Polls a future once without registering for wakeups.
///
/// Only use this if you know the future is ready or
/// if you are intentionally performing a non-blocking check.
pub fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
	let mut cx = Context::from_waker(Waker::noop());
	match Pin::new(&mut fut).poll(&mut cx) {
		Poll::Ready(res) => Some(res),
		Poll::Pending => None,
	}
}
