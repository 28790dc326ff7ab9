//! Callback request descriptors decoded from queue messages.
//!
//! A [`CallbackRequest`] is the validated, immutable form of a `SendCallback` message body.
//! Decoding enforces every structural rule up front so the dispatcher never starts a network
//! attempt for a descriptor that could not succeed: malformed JSON, missing fields, bad URLs,
//! empty secrets, and unknown verbs all surface as [`ValidationError`] and are never retried.

pub mod method;
pub mod secret;
pub mod target;

pub use method::*;
pub use secret::*;
pub use target::*;

// crates.io
use serde::Deserializer;
use serde_json::Value;
// self
use crate::_prelude::*;

/// Reasons a queue message body cannot become a [`CallbackRequest`].
#[derive(Debug, ThisError)]
pub enum ValidationError {
	/// Body is not JSON or a field has the wrong type.
	#[error("Message body is malformed at `{path}`.")]
	Malformed {
		/// JSON path of the offending value (`.` for the document root).
		path: String,
		/// Underlying JSON error.
		#[source]
		source: serde_json::Error,
	},
	/// Body is valid JSON but not an object.
	#[error("Message body must be a JSON object.")]
	NotAnObject,
	/// A required field is absent.
	#[error("Required field `{field}` is missing.")]
	MissingField {
		/// Field name.
		field: &'static str,
	},
	/// `target_url` is not an absolute URL.
	#[error("Target URL `{url}` cannot be parsed.")]
	InvalidUrl {
		/// Raw value from the message.
		url: String,
		/// Underlying parse failure.
		#[source]
		source: url::ParseError,
	},
	/// `target_url` does not use `http` or `https`.
	#[error("Target URL scheme `{scheme}` is not supported.")]
	UnsupportedScheme {
		/// Scheme found in the message.
		scheme: String,
	},
	/// `target_url` has no host component.
	#[error("Target URL has no host.")]
	MissingHost,
	/// `target_url` points at a loopback or private host.
	#[error("Target host `{host}` is not allowed.")]
	ForbiddenTarget {
		/// Host found in the message.
		host: String,
	},
	/// `hmac_secret` is empty.
	#[error("HMAC secret must not be empty.")]
	EmptySecret,
	/// `target_method` is not a supported HTTP verb.
	#[error("HTTP method `{method}` is not supported.")]
	UnsupportedMethod {
		/// Raw value from the message.
		method: String,
	},
}

/// Settings applied while decoding message bodies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeOptions {
	/// Verb used when `target_method` is absent or `null`.
	pub default_method: HttpMethod,
	/// Guard applied to `target_url`.
	pub target_policy: TargetPolicy,
}

/// Validated descriptor for one outbound callback.
///
/// Fields are private so a request stays exactly as decoded for its whole lifetime; the
/// dispatcher only reads it.
#[derive(Clone, Debug, PartialEq)]
pub struct CallbackRequest {
	target_url: TargetUrl,
	target_method: HttpMethod,
	hmac_secret: HmacSecret,
	payload: Value,
}
impl CallbackRequest {
	/// Creates a `POST` request from already validated parts.
	pub fn new(target_url: TargetUrl, hmac_secret: HmacSecret, payload: Value) -> Self {
		Self { target_url, target_method: HttpMethod::Post, hmac_secret, payload }
	}

	/// Overrides the HTTP verb.
	pub fn with_method(mut self, method: HttpMethod) -> Self {
		self.target_method = method;

		self
	}

	/// Decodes and validates a `SendCallback` message body.
	pub fn decode(body: &[u8], options: &DecodeOptions) -> Result<Self, ValidationError> {
		let document: Value = serde_json::from_slice(body)
			.map_err(|source| ValidationError::Malformed { path: ".".into(), source })?;

		if !document.is_object() {
			return Err(ValidationError::NotAnObject);
		}

		let raw: RawCallbackRequest = serde_path_to_error::deserialize(document).map_err(|e| {
			ValidationError::Malformed { path: e.path().to_string(), source: e.into_inner() }
		})?;
		let target_url =
			raw.target_url.ok_or(ValidationError::MissingField { field: "target_url" })?;
		let hmac_secret =
			raw.hmac_secret.ok_or(ValidationError::MissingField { field: "hmac_secret" })?;
		let payload = raw.payload.ok_or(ValidationError::MissingField { field: "payload" })?;
		let target_method = match raw.target_method {
			Some(method) => method.parse()?,
			None => options.default_method,
		};

		Ok(Self {
			target_url: options.target_policy.check(&target_url)?,
			target_method,
			hmac_secret: HmacSecret::new(hmac_secret)?,
			payload,
		})
	}

	/// Destination URL.
	pub fn target_url(&self) -> &TargetUrl {
		&self.target_url
	}

	/// HTTP verb.
	pub fn target_method(&self) -> HttpMethod {
		self.target_method
	}

	/// Signing secret.
	pub fn hmac_secret(&self) -> &HmacSecret {
		&self.hmac_secret
	}

	/// Payload to sign and send.
	pub fn payload(&self) -> &Value {
		&self.payload
	}
}

#[derive(Deserialize)]
struct RawCallbackRequest {
	#[serde(default)]
	target_url: Option<String>,
	#[serde(default)]
	target_method: Option<String>,
	#[serde(default)]
	hmac_secret: Option<String>,
	// `null` is a legitimate payload, so presence is tracked separately from the value.
	#[serde(default, deserialize_with = "present")]
	payload: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
	D: Deserializer<'de>,
{
	Value::deserialize(deserializer).map(Some)
}
