// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	obs::{CallbackStatus, RejectReason},
};

/// Counter of terminal callback verdicts, labeled by `status`.
pub const CALLBACK_TOTAL: &str = "callback_total";
/// Histogram of per-attempt latency, labeled by `target_url`.
pub const CALLBACK_DURATION_SECONDS: &str = "callback_duration_seconds";
/// Counter of payload encoding failures.
pub const HMAC_ERRORS_TOTAL: &str = "hmac_errors_total";
/// Counter of broker reconnect attempts.
pub const AMQP_RECONNECTS_TOTAL: &str = "amqp_reconnects_total";
/// Counter of messages rejected before dispatch, labeled by `reason`.
pub const CALLBACK_REJECTED_TOTAL: &str = "callback_rejected_total";

/// Distinct targets whose latency is aggregated in process; later targets only reach the
/// recorder and the global observation count.
pub const MAX_TRACKED_TARGETS: usize = 1_024;

/// Aggregated latency observations for one target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DurationStats {
	/// Number of observations.
	pub count: u64,
	/// Sum of observed durations.
	pub sum: Duration,
}

/// Process-scoped registry shared by the signer, dispatcher, and consumer.
///
/// Counters are atomics and the per-target latency map sits behind a short, synchronous
/// lock that is never held across an `.await`, so concurrent dispatch tasks can update it
/// freely. The map holds at most [`MAX_TRACKED_TARGETS`] entries. Each update is mirrored
/// to the global `metrics` recorder, which keeps the full `target_url` series.
#[derive(Debug, Default)]
pub struct CallbackMetrics {
	success: AtomicU64,
	error: AtomicU64,
	hmac_errors: AtomicU64,
	reconnects: AtomicU64,
	rejected: AtomicU64,
	observations: AtomicU64,
	durations: Mutex<HashMap<String, DurationStats>>,
}
impl CallbackMetrics {
	/// Returns the number of requests that ended with `status`.
	pub fn callbacks(&self, status: CallbackStatus) -> u64 {
		match status {
			CallbackStatus::Success => self.success.load(Ordering::Relaxed),
			CallbackStatus::Error => self.error.load(Ordering::Relaxed),
		}
	}

	/// Returns the number of payload encoding failures.
	pub fn hmac_errors(&self) -> u64 {
		self.hmac_errors.load(Ordering::Relaxed)
	}

	/// Returns the number of broker reconnect attempts.
	pub fn reconnects(&self) -> u64 {
		self.reconnects.load(Ordering::Relaxed)
	}

	/// Returns the number of messages rejected before dispatch.
	pub fn rejected(&self) -> u64 {
		self.rejected.load(Ordering::Relaxed)
	}

	/// Returns the latency observations recorded for `target_url`, if it is tracked.
	pub fn durations(&self, target_url: &str) -> DurationStats {
		self.durations.lock().get(target_url).copied().unwrap_or_default()
	}

	/// Returns the number of latency observations across all targets.
	pub fn duration_observations(&self) -> u64 {
		self.observations.load(Ordering::Relaxed)
	}

	pub(crate) fn record_callback(&self, status: CallbackStatus) {
		match status {
			CallbackStatus::Success => self.success.fetch_add(1, Ordering::Relaxed),
			CallbackStatus::Error => self.error.fetch_add(1, Ordering::Relaxed),
		};

		metrics::counter!(CALLBACK_TOTAL, "status" => status.as_str()).increment(1);
	}

	pub(crate) fn observe_duration(&self, target_url: &str, elapsed: Duration) {
		self.observations.fetch_add(1, Ordering::Relaxed);

		{
			let mut durations = self.durations.lock();

			if let Some(stats) = durations.get_mut(target_url) {
				stats.count += 1;
				stats.sum += elapsed;
			} else if durations.len() < MAX_TRACKED_TARGETS {
				durations.insert(target_url.to_owned(), DurationStats { count: 1, sum: elapsed });
			}
		}

		metrics::histogram!(CALLBACK_DURATION_SECONDS, "target_url" => target_url.to_owned())
			.record(elapsed.as_secs_f64());
	}

	pub(crate) fn record_hmac_error(&self) {
		self.hmac_errors.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(HMAC_ERRORS_TOTAL).increment(1);
	}

	pub(crate) fn record_reconnect(&self) {
		self.reconnects.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(AMQP_RECONNECTS_TOTAL).increment(1);
	}

	pub(crate) fn record_rejected(&self, reason: RejectReason) {
		self.rejected.fetch_add(1, Ordering::Relaxed);

		metrics::counter!(CALLBACK_REJECTED_TOTAL, "reason" => reason.as_str()).increment(1);
	}
}

/// Registers help text for every relay metric with the installed recorder.
pub fn describe_metrics() {
	metrics::describe_counter!(CALLBACK_TOTAL, "Total number of callbacks processed");
	metrics::describe_histogram!(
		CALLBACK_DURATION_SECONDS,
		metrics::Unit::Seconds,
		"Time spent on each callback attempt"
	);
	metrics::describe_counter!(HMAC_ERRORS_TOTAL, "Total number of HMAC signing errors");
	metrics::describe_counter!(
		AMQP_RECONNECTS_TOTAL,
		"Total number of AMQP reconnection attempts"
	);
	metrics::describe_counter!(
		CALLBACK_REJECTED_TOTAL,
		"Total number of queue messages rejected before dispatch"
	);
}
