use std::cell::Cell;
use std::fmt;

use tokio_util::sync::CancellationToken;

/// Identity of one lock acquisition.
///
/// Tokens are minted per stream from a monotonic clock, so two acquisitions
/// of the same stream never share a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(u64);

impl LockToken {
	/// Returns the acquisition generation.
	pub const fn generation(self) -> u64 {
		self.0
	}
}

impl fmt::Display for LockToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "lock#{}", self.0)
	}
}

/// Monotonic generation clock for lock acquisitions.
#[derive(Debug, Default)]
pub(crate) struct LockClock {
	next: Cell<u64>,
}

impl LockClock {
	/// Returns the next token, starting at generation 1.
	pub fn next(&self) -> LockToken {
		let generation = self.next.get().wrapping_add(1);
		self.next.set(generation);
		LockToken(generation)
	}
}

/// One-shot notification fired when a reader's lock is released.
///
/// Clones observe the same signal. Firing is idempotent.
#[derive(Debug, Clone, Default)]
pub struct ReleaseSignal {
	fired: CancellationToken,
}

impl ReleaseSignal {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Returns true once the lock has been released.
	pub fn is_released(&self) -> bool {
		self.fired.is_cancelled()
	}

	/// Future resolving when the lock is released.
	pub async fn released(&self) {
		self.fired.cancelled().await;
	}

	pub(crate) fn fire(&self) {
		self.fired.cancel();
	}
}

/// The current holder of a stream's lock.
#[derive(Debug, Clone)]
pub(crate) struct Holder {
	pub token: LockToken,
	pub signal: ReleaseSignal,
}

/// The stream's lock slot.
///
/// `Suspended` is the slot while the holder is delegating a call: the
/// stream's direct-operation guard lets calls through, but acquisition still
/// sees the stream as locked.
#[derive(Debug, Default)]
pub(crate) enum LockSlot {
	#[default]
	Unlocked,
	Held(Holder),
	Suspended(Holder),
}

impl LockSlot {
	/// Returns the holder regardless of suspension.
	pub fn holder(&self) -> Option<&Holder> {
		match self {
			Self::Unlocked => None,
			Self::Held(holder) | Self::Suspended(holder) => Some(holder),
		}
	}

	/// Returns true when direct stream operations must be rejected.
	pub fn blocks_direct_access(&self) -> bool {
		matches!(self, Self::Held(_))
	}

	/// Moves `Held(token)` to `Suspended(token)`. Returns false if `token`
	/// does not hold the lock.
	pub fn suspend(&mut self, token: LockToken) -> bool {
		match std::mem::take(self) {
			Self::Held(holder) if holder.token == token => {
				*self = Self::Suspended(holder);
				true
			}
			other => {
				*self = other;
				false
			}
		}
	}

	/// Moves `Suspended(token)` back to `Held(token)`. A slot that was
	/// released in the meantime stays released.
	pub fn restore(&mut self, token: LockToken) {
		match std::mem::take(self) {
			Self::Suspended(holder) if holder.token == token => *self = Self::Held(holder),
			other => *self = other,
		}
	}

	/// Clears the slot if `token` holds it, returning the removed holder.
	pub fn release(&mut self, token: LockToken) -> Option<Holder> {
		if self.holder().is_some_and(|holder| holder.token == token) { self.release_any() } else { None }
	}

	/// Clears the slot unconditionally, returning the removed holder.
	pub fn release_any(&mut self) -> Option<Holder> {
		match std::mem::take(self) {
			Self::Unlocked => None,
			Self::Held(holder) | Self::Suspended(holder) => Some(holder),
		}
	}
}
