//! Canonical JSON encoding and HMAC-SHA256 signing of callback payloads.
//!
//! Canonical form sorts object keys by code point at every depth and omits insignificant
//! whitespace, so the same payload always produces the same bytes. Those exact bytes become
//! the request body and the input of the signature.

// crates.io
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
// self
use crate::{_prelude::*, callback::HmacSecret, obs::CallbackMetrics};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the lowercase hex signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Payload could not be represented as canonical JSON.
#[derive(Debug, ThisError)]
pub enum EncodingError {
	/// Serialization into a JSON value failed.
	#[error("Payload cannot be encoded as canonical JSON.")]
	Serialize {
		/// Underlying serializer failure.
		#[source]
		source: serde_json::Error,
	},
}

/// Canonical payload bytes, ready to be sent and signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalPayload(Vec<u8>);
impl CanonicalPayload {
	/// Borrows the encoded bytes.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Consumes the wrapper and returns the encoded bytes.
	pub fn into_bytes(self) -> Vec<u8> {
		self.0
	}

	/// Computes the hex signature of these bytes under `secret`.
	pub fn signature(&self, secret: &HmacSecret) -> String {
		signature(&self.0, secret)
	}
}

/// Canonical encoder and signer that records encoding failures.
#[derive(Clone, Debug, Default)]
pub struct Signer {
	metrics: Arc<CallbackMetrics>,
}
impl Signer {
	/// Creates a signer reporting to `metrics`.
	pub fn new(metrics: Arc<CallbackMetrics>) -> Self {
		Self { metrics }
	}

	/// Encodes `payload` canonically, counting `hmac_errors_total` on failure.
	pub fn encode<T>(&self, payload: &T) -> Result<CanonicalPayload, EncodingError>
	where
		T: ?Sized + Serialize,
	{
		canonical_json(payload).map(CanonicalPayload).inspect_err(|e| {
			self.metrics.record_hmac_error();

			tracing::error!(error = %e, "payload encoding failed");
		})
	}

	/// Signs `payload` under `secret`, returning the lowercase hex digest.
	pub fn sign<T>(&self, payload: &T, secret: &HmacSecret) -> Result<String, EncodingError>
	where
		T: ?Sized + Serialize,
	{
		Ok(self.encode(payload)?.signature(secret))
	}
}

/// Serializes `payload` into canonical JSON bytes.
pub fn canonical_json<T>(payload: &T) -> Result<Vec<u8>, EncodingError>
where
	T: ?Sized + Serialize,
{
	let value =
		serde_json::to_value(payload).map_err(|source| EncodingError::Serialize { source })?;
	let mut out = Vec::new();

	write_canonical(&value, &mut out).map_err(|source| EncodingError::Serialize { source })?;

	Ok(out)
}

/// Lowercase hex HMAC-SHA256 of `bytes` under `secret`.
pub fn signature(bytes: &[u8], secret: &HmacSecret) -> String {
	hex::encode(mac(bytes, secret).finalize().into_bytes())
}

/// Checks `signature` against `bytes` in constant time.
///
/// Malformed hex never matches.
pub fn verify(bytes: &[u8], secret: &HmacSecret, signature: &str) -> bool {
	let Ok(expected) = hex::decode(signature) else {
		return false;
	};

	mac(bytes, secret).verify_slice(&expected).is_ok()
}

fn mac(bytes: &[u8], secret: &HmacSecret) -> HmacSha256 {
	let mut mac = match HmacSha256::new_from_slice(secret.expose()) {
		Ok(mac) => mac,
		Err(_) => unreachable!("HMAC accepts keys of any length"),
	};

	mac.update(bytes);

	mac
}

// serde_json's map ordering depends on crate features, so keys are sorted explicitly.
fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
	match value {
		Value::Array(items) => {
			out.push(b'[');

			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(b',');
				}

				write_canonical(item, out)?;
			}

			out.push(b']');
		},
		Value::Object(map) => {
			let mut entries = map.iter().collect::<Vec<_>>();

			entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
			out.push(b'{');

			for (i, (key, item)) in entries.into_iter().enumerate() {
				if i > 0 {
					out.push(b',');
				}

				serde_json::to_writer(&mut *out, key)?;
				out.push(b':');
				write_canonical(item, out)?;
			}

			out.push(b'}');
		},
		scalar => serde_json::to_writer(&mut *out, scalar)?,
	}

	Ok(())
}
