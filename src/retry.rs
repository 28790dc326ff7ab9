//! Backoff schedules and the injectable sleep used between attempts.

// crates.io
use rand::Rng;
// self
use crate::_prelude::*;

/// Boxed future returned by [`Sleeper::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + 'a + Send>>;

/// Async delay source used by retry and reconnect loops.
///
/// Production code uses [`TokioSleeper`]; tests inject a sleeper that records delays and
/// returns immediately so backoff is simulated without wall-clock waits.
pub trait Sleeper
where
	Self: 'static + Send + Sync,
{
	/// Suspends the calling task for `delay`.
	fn sleep(&self, delay: Duration) -> SleepFuture<'_>;
}

/// Sleeper backed by the Tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;
impl Sleeper for TokioSleeper {
	fn sleep(&self, delay: Duration) -> SleepFuture<'_> {
		Box::pin(tokio::time::sleep(delay))
	}
}

/// Exponential schedule `base * 2^(n-1)` capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
	/// Delay after the first failure.
	pub base: Duration,
	/// Upper bound for any single delay.
	pub max: Duration,
}
impl Backoff {
	/// Delay after the `failures`-th consecutive failure (1-based).
	pub fn delay(&self, failures: u32) -> Duration {
		let multiplier = 2_u32.saturating_pow(failures.saturating_sub(1));

		self.base.saturating_mul(multiplier).min(self.max)
	}
}
impl Default for Backoff {
	fn default() -> Self {
		Self { base: Duration::from_secs(1), max: Duration::from_secs(30) }
	}
}

/// Attempt budget and backoff for one callback request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, including the first; never below 1.
	pub max_attempts: u32,
	/// Exponential schedule between attempts.
	pub backoff: Backoff,
	/// Draw each delay uniformly from `[0, backoff]` instead of using it verbatim.
	pub jitter: bool,
}
impl RetryPolicy {
	/// Whether another attempt is allowed after `attempt` attempts have been made.
	pub fn should_retry(&self, attempt: u32) -> bool {
		attempt < self.max_attempts.max(1)
	}

	/// Delay before the attempt following `attempt`, honoring a server `Retry-After` hint.
	///
	/// The hint can lengthen the delay but never past `backoff.max`.
	pub fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
		let mut delay = self.backoff.delay(attempt);

		if self.jitter && !delay.is_zero() {
			let millis = delay.as_millis().min(u64::MAX as u128) as u64;

			delay = Duration::from_millis(rand::rng().random_range(0..=millis));
		}

		match retry_after {
			Some(hint) => delay.max(hint).min(self.backoff.max),
			None => delay,
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_attempts: 3, backoff: Backoff::default(), jitter: false }
	}
}
