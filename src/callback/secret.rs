//! Redacted wrapper for per-message HMAC secrets.

// self
use crate::{_prelude::*, callback::ValidationError};

/// Shared secret used to sign a single callback; never logged or persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct HmacSecret(String);
impl HmacSecret {
	/// Wraps a secret string, rejecting empty values.
	pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
		let value = value.into();

		if value.is_empty() {
			return Err(ValidationError::EmptySecret);
		}

		Ok(Self(value))
	}

	/// Returns the raw key bytes. Callers must avoid logging them.
	pub fn expose(&self) -> &[u8] {
		self.0.as_bytes()
	}
}
impl Debug for HmacSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("HmacSecret").field(&"<redacted>").finish()
	}
}
impl Display for HmacSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
