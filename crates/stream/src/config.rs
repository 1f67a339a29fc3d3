//! Stream configuration.

use serde::Deserialize;

/// Errors that can occur when loading a [`StreamConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The TOML source could not be parsed into a config.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A high-water mark of zero would report backpressure on every enqueue.
	#[error("high_water_mark must be > 0")]
	ZeroHighWaterMark,
}

/// What `acquire_reader` does when the stream already reached a terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAcquire {
	/// Closed and errored streams can still be locked.
	#[default]
	Allow,
	/// Errored streams rethrow their stored error; closed streams can be locked.
	RejectErrored,
	/// Errored streams rethrow their stored error; closed streams fail with
	/// [`StreamError::Closed`](crate::StreamError::Closed).
	RejectTerminal,
}

/// Per-stream configuration.
///
/// Built with [`StreamConfig::from_toml`] or the `with_*` setters, both of
/// which reject a zero high-water mark.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
	/// Queue length at which enqueue starts reporting backpressure.
	high_water_mark: usize,
	/// Acquisition policy for closed/errored streams.
	terminal_acquire: TerminalAcquire,
	/// Release the current reader automatically once the stream closes or errors.
	auto_release: bool,
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			high_water_mark: 1,
			terminal_acquire: TerminalAcquire::default(),
			auto_release: false,
		}
	}
}

impl StreamConfig {
	/// Parses a config from TOML. Missing keys take their defaults.
	pub fn from_toml(src: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(src)?;
		if config.high_water_mark == 0 {
			return Err(ConfigError::ZeroHighWaterMark);
		}
		Ok(config)
	}

	/// Queue length at which enqueue starts reporting backpressure. Never zero.
	pub fn high_water_mark(&self) -> usize {
		self.high_water_mark
	}

	/// Acquisition policy for closed/errored streams.
	pub fn terminal_acquire(&self) -> TerminalAcquire {
		self.terminal_acquire
	}

	/// Whether the reader is released automatically on terminal state.
	pub fn auto_release(&self) -> bool {
		self.auto_release
	}

	/// Sets the high-water mark.
	#[must_use]
	pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
		assert!(high_water_mark > 0, "high_water_mark must be > 0");
		self.high_water_mark = high_water_mark;
		self
	}

	/// Sets the terminal-acquire policy.
	#[must_use]
	pub fn with_terminal_acquire(mut self, policy: TerminalAcquire) -> Self {
		self.terminal_acquire = policy;
		self
	}

	/// Enables or disables automatic release on terminal state.
	#[must_use]
	pub fn with_auto_release(mut self, auto_release: bool) -> Self {
		self.auto_release = auto_release;
		self
	}
}
