use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::StreamConfig;
use crate::future::poll_once;
use crate::stream::{NoopSource, StreamController};

fn stream_with(chunks: &[&'static str]) -> (ReadableStream<&'static str>, StreamController<&'static str>) {
	let (stream, ctrl) = ReadableStream::new(NoopSource, StreamConfig::default());
	for chunk in chunks {
		ctrl.enqueue(*chunk).unwrap();
	}
	(stream, ctrl)
}

#[test]
fn second_acquire_fails_until_release() {
	let (stream, _ctrl) = stream_with(&[]);
	let reader = stream.acquire_reader().unwrap();
	assert!(ReadableStream::is_locked(&stream));
	assert_eq!(stream.acquire_reader().unwrap_err(), StreamError::AlreadyLocked);
	assert_eq!(stream.acquire_reader().unwrap_err(), StreamError::AlreadyLocked);

	reader.release_lock();
	assert!(!ReadableStream::is_locked(&stream));
	let next = stream.acquire_reader().unwrap();
	assert_ne!(next.token(), reader.token());
}

#[tokio::test]
async fn direct_operations_are_locked_out_while_held() {
	let (stream, _ctrl) = stream_with(&["a"]);
	let reader = stream.acquire_reader().unwrap();

	assert_eq!(stream.read(), Err(StreamError::StreamLocked));
	assert_eq!(stream.state(), Err(StreamError::StreamLocked));
	assert_eq!(stream.ready().await, Err(StreamError::StreamLocked));
	assert_eq!(stream.closed().await, Err(StreamError::StreamLocked));
	assert_eq!(stream.cancel("nope").err(), Some(StreamError::StreamLocked));

	// The rejected direct cancel did not cancel anything.
	assert_eq!(reader.state(), Ok(StreamState::Readable));

	reader.release_lock();
	assert_eq!(stream.state(), Ok(StreamState::Readable));
	assert_eq!(stream.ready().await, Ok(StreamState::Readable));
	assert_eq!(stream.read(), Ok(ReadOutcome::Chunk("a")));

	let mut closed = stream.closed();
	assert!(poll_once(&mut closed).is_none());
	assert_eq!(stream.cancel("done").unwrap().await, Ok(()));
	assert_eq!(closed.await, Ok(()));
	assert_eq!(stream.state(), Ok(StreamState::Closed));
}

#[test]
fn delegated_calls_restore_the_lock_afterwards() {
	let (stream, _ctrl) = stream_with(&["a"]);
	let reader = stream.acquire_reader().unwrap();

	assert_eq!(reader.read(), Ok(ReadOutcome::Chunk("a")));
	assert_eq!(stream.read(), Err(StreamError::StreamLocked));

	// A failing delegated call restores the lock as well.
	assert_eq!(reader.read(), Err(StreamError::Empty));
	assert_eq!(stream.state(), Err(StreamError::StreamLocked));
	assert!(ReadableStream::is_locked(&stream));
	assert!(reader.is_active());
}

#[tokio::test]
async fn reader_notifications_settle_like_the_stream() {
	let (stream, ctrl) = stream_with(&[]);
	let reader = stream.acquire_reader().unwrap();

	let mut ready = reader.ready();
	let mut closed = reader.closed();
	assert!(poll_once(&mut ready).is_none());
	assert!(poll_once(&mut closed).is_none());

	ctrl.enqueue("a").unwrap();
	assert_eq!(ready.await, Ok(StreamState::Readable));
	assert_eq!(reader.read(), Ok(ReadOutcome::Chunk("a")));

	ctrl.close().unwrap();
	assert_eq!(closed.await, Ok(()));
	assert_eq!(reader.state(), Ok(StreamState::Closed));
	assert_eq!(reader.read(), Ok(ReadOutcome::Done));
	assert!(reader.is_active());
}

#[tokio::test]
async fn reader_closed_rejects_with_stored_error() {
	let (stream, ctrl) = stream_with(&["a"]);
	let reader = stream.acquire_reader().unwrap();
	let closed = reader.closed();

	ctrl.error("disk on fire").unwrap();
	assert_eq!(closed.await, Err(StreamError::Errored("disk on fire".into())));
	assert_eq!(reader.read(), Err(StreamError::Errored("disk on fire".into())));
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(5)]
fn release_is_idempotent(#[case] times: usize) {
	let (stream, _ctrl) = stream_with(&[]);
	let reader = stream.acquire_reader().unwrap();
	let signal = reader.release_signal();

	for _ in 0..times {
		reader.release_lock();
		assert!(!reader.is_active());
		assert!(signal.is_released());
		assert!(!ReadableStream::is_locked(&stream));
	}

	// A later holder is unaffected by further releases of the old reader.
	let next = stream.acquire_reader().unwrap();
	reader.release_lock();
	assert!(next.is_active());
	assert!(ReadableStream::is_locked(&stream));
}

#[tokio::test]
async fn released_reader_is_inert() {
	let (stream, _ctrl) = stream_with(&["a"]);
	let reader = stream.acquire_reader().unwrap();
	reader.release_lock();

	assert_eq!(reader.read(), Err(StreamError::NotLocked));
	assert_eq!(reader.state(), Err(StreamError::NotLocked));
	assert_eq!(reader.ready().await, Err(StreamError::NotLocked));
	assert_eq!(reader.closed().await, Err(StreamError::NotLocked));
	assert_eq!(reader.cancel("late").await, Err(StreamError::NotLocked));

	// Re-locking the stream does not revive the old reader.
	let _next = stream.acquire_reader().unwrap();
	assert_eq!(reader.read(), Err(StreamError::NotLocked));
	assert!(!reader.is_active());
}

#[tokio::test]
async fn cancel_releases_before_the_notification_settles() {
	let seen = Rc::new(RefCell::new(Vec::new()));
	let sink = Rc::clone(&seen);
	let gate = Rc::new(tokio::sync::Notify::new());
	let opened = Rc::clone(&gate);
	let (stream, _ctrl) = ReadableStream::<u8>::new(
		move |reason: String| {
			sink.borrow_mut().push(reason);
			let opened = Rc::clone(&opened);
			async move {
				opened.notified().await;
				Ok::<(), String>(())
			}
		},
		StreamConfig::default(),
	);
	let reader = stream.acquire_reader().unwrap();
	let signal = reader.release_signal();

	let mut done = reader.cancel("client went away");
	assert!(!reader.is_active());
	assert!(signal.is_released());
	assert!(!ReadableStream::is_locked(&stream));
	assert_eq!(*seen.borrow(), vec!["client went away".to_string()]);
	assert!(poll_once(&mut done).is_none());

	gate.notify_one();
	assert_eq!(done.await, Ok(()));
	assert_eq!(reader.cancel("again").await, Err(StreamError::NotLocked));
	assert_eq!(stream.state(), Ok(StreamState::Closed));
}

#[tokio::test]
async fn cancel_releases_even_when_teardown_fails() {
	let (stream, _ctrl) = ReadableStream::<u8>::new(|_reason: String| async { Err::<(), _>("refused".to_string()) }, StreamConfig::default());
	let reader = stream.acquire_reader().unwrap();

	let done = reader.cancel("bye");
	assert!(!reader.is_active());
	assert_eq!(done.await, Err(StreamError::Cancel("refused".into())));
	assert!(!ReadableStream::is_locked(&stream));
}

#[test]
fn dropping_a_reader_releases_the_lock() {
	let (stream, _ctrl) = stream_with(&[]);
	let signal = {
		let reader = stream.acquire_reader().unwrap();
		reader.release_signal()
	};
	assert!(signal.is_released());
	assert!(!ReadableStream::is_locked(&stream));
	assert!(stream.acquire_reader().is_ok());
}

#[tokio::test]
async fn release_signal_resolves_for_other_observers() {
	let (stream, _ctrl) = stream_with(&[]);
	let reader = stream.acquire_reader().unwrap();
	let signal = reader.release_signal();

	let waiter = async move {
		signal.released().await;
		true
	};
	let release = async {
		tokio::task::yield_now().await;
		reader.release_lock();
	};
	let (released, ()) = tokio::join!(waiter, release);
	assert!(released);
}

#[test]
fn debug_output_shows_activity() {
	let (stream, _ctrl) = stream_with(&[]);
	let reader = stream.acquire_reader().unwrap();
	assert!(format!("{reader:?}").contains("active: true"));
	reader.release_lock();
	assert!(format!("{reader:?}").contains("active: false"));
}
