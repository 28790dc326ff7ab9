//! Per-attempt classification and the record logged for each attempt.

// self
use crate::{_prelude::*, error::TransportError, http::CallbackResponse};

/// Classification of a single HTTP attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
	/// 2xx response.
	Success,
	/// Transport failure, 5xx, 408, or 429.
	Retryable,
	/// Any other status, or a request that could not be built.
	Fatal,
}
impl AttemptOutcome {
	/// Returns a stable label suitable for span or log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AttemptOutcome::Success => "success",
			AttemptOutcome::Retryable => "retryable",
			AttemptOutcome::Fatal => "fatal",
		}
	}
}
impl Display for AttemptOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Maps an HTTP status code onto an [`AttemptOutcome`].
pub fn classify_status(status: u16) -> AttemptOutcome {
	match status {
		200..=299 => AttemptOutcome::Success,
		408 | 429 | 500..=599 => AttemptOutcome::Retryable,
		_ => AttemptOutcome::Fatal,
	}
}

/// Record of one HTTP attempt; lives only for the duration of a dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryAttempt {
	/// 1-based attempt number.
	pub number: u32,
	/// Classification of the attempt.
	pub outcome: AttemptOutcome,
	/// Wall-clock time spent on the attempt.
	pub elapsed: Duration,
	/// Response status, when a response arrived.
	pub status: Option<u16>,
	/// `Retry-After` hint, when the response carried one.
	pub retry_after: Option<Duration>,
	/// Transport failure description, when no response arrived.
	pub error: Option<String>,
}
impl DeliveryAttempt {
	/// Builds the record for an attempt from its transport result.
	pub fn new(
		number: u32,
		elapsed: Duration,
		result: &Result<CallbackResponse, TransportError>,
	) -> Self {
		match result {
			Ok(response) => Self {
				number,
				outcome: classify_status(response.status),
				elapsed,
				status: Some(response.status),
				retry_after: response.retry_after,
				error: None,
			},
			Err(e) => Self {
				number,
				outcome: if e.is_retryable() {
					AttemptOutcome::Retryable
				} else {
					AttemptOutcome::Fatal
				},
				elapsed,
				status: None,
				retry_after: None,
				error: Some(error_chain(e)),
			},
		}
	}

	pub(crate) fn log(&self) {
		let elapsed_ms = self.elapsed.as_millis() as u64;

		match self.outcome {
			AttemptOutcome::Success => tracing::debug!(
				attempt = self.number,
				status = self.status,
				elapsed_ms,
				"callback attempt succeeded"
			),
			_ => tracing::warn!(
				attempt = self.number,
				outcome = self.outcome.as_str(),
				status = self.status,
				elapsed_ms,
				error = self.error.as_deref(),
				"callback attempt failed"
			),
		}
	}
}

fn error_chain(e: &dyn StdError) -> String {
	let mut message = e.to_string();
	let mut source = e.source();

	while let Some(inner) = source {
		message.push_str(": ");
		message.push_str(&inner.to_string());

		source = inner.source();
	}

	message
}
