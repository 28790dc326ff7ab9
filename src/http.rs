//! Transport primitives for outbound callbacks.
//!
//! The dispatcher depends only on [`CallbackHttpClient`], so tests can script responses
//! without sockets. [`ReqwestHttpClient`] is the production implementation: it applies the
//! connect and request timeouts, never follows redirects (a 3xx is reported to the caller as
//! is), and extracts the `Retry-After` hint from every response.

// crates.io
use reqwest::{
	header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER, USER_AGENT},
	redirect::Policy,
};
use time::{OffsetDateTime, format_description::well_known::Rfc2822};
// self
use crate::{
	_prelude::*,
	callback::HttpMethod,
	config::HttpConfig,
	error::{ConfigError, TransportError},
	signer::SIGNATURE_HEADER,
};

/// `User-Agent` sent with every callback.
pub const RELAY_USER_AGENT: &str = concat!("callback-relay/", env!("CARGO_PKG_VERSION"));

/// Boxed future returned by [`CallbackHttpClient::send`].
pub type SendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a + Send>>;

/// One signed HTTP attempt, fully prepared by the dispatcher.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
	/// HTTP verb.
	pub method: HttpMethod,
	/// Destination URL.
	pub url: Url,
	/// Canonical JSON body.
	pub body: Vec<u8>,
	/// Lowercase hex signature for `X-Signature`.
	pub signature: String,
}

/// Status line data the dispatcher needs to classify an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallbackResponse {
	/// HTTP status code.
	pub status: u16,
	/// Parsed `Retry-After` hint, if present and in the future.
	pub retry_after: Option<Duration>,
}

/// Abstraction over HTTP transports able to deliver a signed callback.
///
/// Implementations must be `Send + Sync + 'static` so a single client can be shared by
/// every dispatch task behind an `Arc`. A response with any status is `Ok`; only failures to
/// obtain a response at all are [`TransportError`]s.
pub trait CallbackHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Sends one attempt and reports the response status.
	fn send<'a>(
		&'a self,
		request: &'a OutboundRequest,
	) -> SendFuture<'a, Result<CallbackResponse, TransportError>>;
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient {
	client: ReqwestClient,
	timeout: Duration,
}
impl ReqwestHttpClient {
	/// Wraps an existing client; `timeout` is only used to label timeout errors.
	pub fn with_client(client: ReqwestClient, timeout: Duration) -> Self {
		Self { client, timeout }
	}

	/// Builds a client with the configured timeouts and redirects disabled.
	pub fn from_config(config: &HttpConfig) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(config.timeout)
			.connect_timeout(config.connect_timeout)
			.redirect(Policy::none())
			.build()?;

		Ok(Self::with_client(client, config.timeout))
	}

	fn map_error(&self, e: ReqwestError) -> TransportError {
		if e.is_timeout() {
			TransportError::Timeout { after: self.timeout }
		} else if e.is_builder() {
			TransportError::request(e)
		} else {
			TransportError::network(e)
		}
	}
}
impl CallbackHttpClient for ReqwestHttpClient {
	fn send<'a>(
		&'a self,
		request: &'a OutboundRequest,
	) -> SendFuture<'a, Result<CallbackResponse, TransportError>> {
		Box::pin(async move {
			let response = self
				.client
				.request(request.method.into(), request.url.clone())
				.header(CONTENT_TYPE, "application/json")
				.header(USER_AGENT, RELAY_USER_AGENT)
				.header(SIGNATURE_HEADER, &request.signature)
				.body(request.body.clone())
				.send()
				.await
				.map_err(|e| self.map_error(e))?;

			Ok(CallbackResponse {
				status: response.status().as_u16(),
				retry_after: parse_retry_after(response.headers()),
			})
		})
	}
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Duration::try_from(delta).ok();
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	fn headers(value: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_str(value).expect("Header should be valid."));

		headers
	}

	#[test]
	fn retry_after_accepts_delta_seconds() {
		assert_eq!(parse_retry_after(&headers("120")), Some(Duration::from_secs(120)));
		assert_eq!(parse_retry_after(&headers(" 0 ")), Some(Duration::ZERO));
	}

	#[test]
	fn retry_after_accepts_future_http_dates_only() {
		let future = (OffsetDateTime::now_utc() + time::Duration::hours(1))
			.format(&Rfc2822)
			.expect("Timestamp should format.");
		let parsed = parse_retry_after(&headers(&future)).expect("Future date should parse.");

		assert!(parsed > Duration::from_secs(3_000) && parsed <= Duration::from_secs(3_600));
		assert_eq!(parse_retry_after(&headers("Wed, 21 Oct 2015 07:28:00 +0000")), None);
	}

	#[test]
	fn retry_after_ignores_garbage_and_absence() {
		assert_eq!(parse_retry_after(&headers("soon")), None);
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
	}
}
