//! Observability helpers: the injected metrics registry, dispatch spans, subscriber setup, and
//! the Prometheus exporter.
//!
//! Every counter update goes to two places: an in-process [`CallbackMetrics`] value that tests
//! and callers can read back, and the global `metrics` facade that the exporter renders.
//!
//! - `callback_total{status}` is incremented once per request that reaches a terminal verdict.
//! - `callback_duration_seconds{target_url}` receives one observation per HTTP attempt.
//! - `hmac_errors_total` counts payload encoding failures.
//! - `amqp_reconnects_total` counts broker reconnect attempts.
//! - `callback_rejected_total{reason}` counts messages rejected before dispatch.

pub mod exporter;

mod metrics;
mod tracing;

pub use exporter::*;
pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Terminal status labels for `callback_total`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackStatus {
	/// The partner answered with a 2xx status.
	Success,
	/// Retries were exhausted, the failure was fatal, or the payload could not be encoded.
	Error,
}
impl CallbackStatus {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallbackStatus::Success => "success",
			CallbackStatus::Error => "error",
		}
	}
}
impl Display for CallbackStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Why a queue message was rejected before reaching the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
	/// `content_type` was not `application/json`.
	ContentType,
	/// `type` was not `SendCallback`.
	MessageType,
	/// Body failed to decode or validate.
	Invalid,
}
impl RejectReason {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RejectReason::ContentType => "content_type",
			RejectReason::MessageType => "message_type",
			RejectReason::Invalid => "invalid",
		}
	}
}
impl Display for RejectReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
