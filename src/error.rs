//! Relay-level error types shared across decoding, signing, delivery, and the broker.

// self
use crate::_prelude::*;

/// Relay-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical relay error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Queue message could not be turned into a callback request.
	#[error(transparent)]
	Validation(#[from] crate::callback::ValidationError),
	/// Payload could not be encoded as canonical JSON.
	#[error(transparent)]
	Encoding(#[from] crate::signer::EncodingError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Broker connectivity or acknowledgement failure.
	#[error(transparent)]
	Broker(#[from] crate::broker::BrokerError),
}

/// Configuration and startup failures raised by the relay.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Environment variable holds a value that cannot be used.
	#[error("Configuration value `{key}`=`{value}` is invalid: {reason}.")]
	InvalidValue {
		/// Environment variable name.
		key: &'static str,
		/// Raw value as found in the environment.
		value: String,
		/// Human-readable parsing failure.
		reason: String,
	},
	/// Neither the consumer nor the metrics server was requested.
	#[error("No run mode selected; pass --consumer, --metrics, or both.")]
	NoRunMode,
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Prometheus recorder could not be built or installed.
	#[error("Metrics exporter could not be installed.")]
	MetricsExporter {
		/// Underlying exporter failure.
		#[source]
		source: BoxError,
	},
	/// Global tracing subscriber could not be installed.
	#[error("Tracing subscriber could not be installed.")]
	Subscriber {
		/// Underlying subscriber failure.
		#[source]
		source: BoxError,
	},
	/// Metrics listener could not bind its socket.
	#[error("Metrics server could not bind {addr}.")]
	Bind {
		/// Address the server attempted to bind.
		addr: String,
		/// Underlying socket failure.
		#[source]
		source: std::io::Error,
	},
	/// Metrics server stopped with an I/O failure.
	#[error("Metrics server failed while serving.")]
	Serve {
		/// Underlying socket failure.
		#[source]
		source: std::io::Error,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	/// Wraps an exporter failure inside [`ConfigError`].
	pub fn metrics_exporter(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::MetricsExporter { source: Box::new(src) }
	}

	pub(crate) fn invalid(
		key: &'static str,
		value: impl Into<String>,
		reason: impl Display,
	) -> Self {
		Self::InvalidValue { key, value: value.into(), reason: reason.to_string() }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures observed while calling a partner endpoint.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// The request did not complete within the configured timeout.
	#[error("Request timed out after {after:?}.")]
	Timeout {
		/// Configured timeout that elapsed.
		after: std::time::Duration,
	},
	/// Underlying HTTP client reported a network failure (refused, reset, DNS).
	#[error("Network error occurred while calling the callback target.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The request could not be built from the descriptor.
	#[error("Request to the callback target could not be built.")]
	Request {
		/// Transport-specific builder error.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Wraps a transport-specific builder error.
	pub fn request(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Request { source: Box::new(src) }
	}

	/// Whether another attempt could plausibly succeed.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::Request { .. })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn request_build_failures_are_not_retryable() {
		let io = std::io::Error::other("bad header");

		assert!(!TransportError::request(io).is_retryable());
		assert!(
			TransportError::Timeout { after: std::time::Duration::from_secs(1) }.is_retryable()
		);
		assert!(TransportError::network(std::io::Error::other("refused")).is_retryable());
	}

	#[test]
	fn invalid_value_names_key_and_value() {
		let err = ConfigError::invalid("RETRY_ATTEMPTS", "many", "expected an integer");

		assert_eq!(
			err.to_string(),
			"Configuration value `RETRY_ATTEMPTS`=`many` is invalid: expected an integer."
		);
	}

	#[test]
	fn transport_error_exposes_source() {
		let err: Error = TransportError::network(std::io::Error::other("refused")).into();
		let source = StdError::source(&err)
			.expect("Transport error should expose the underlying network failure.");

		assert_eq!(source.to_string(), "refused");
	}
}
