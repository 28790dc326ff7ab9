//! HTTP verbs accepted in `target_method`.

// self
use crate::{_prelude::*, callback::ValidationError};

/// Standard HTTP verb used for an outbound callback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HttpMethod {
	/// `GET`
	Get,
	/// `HEAD`
	Head,
	/// `POST`, the default when a message omits `target_method`.
	#[default]
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
	/// `OPTIONS`
	Options,
}
impl HttpMethod {
	/// Every supported verb.
	pub const ALL: [Self; 7] =
		[Self::Get, Self::Head, Self::Post, Self::Put, Self::Patch, Self::Delete, Self::Options];

	/// Returns the canonical upper-case token.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Head => "HEAD",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Patch => "PATCH",
			Self::Delete => "DELETE",
			Self::Options => "OPTIONS",
		}
	}
}
impl FromStr for HttpMethod {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.trim();

		Self::ALL
			.into_iter()
			.find(|method| method.as_str().eq_ignore_ascii_case(trimmed))
			.ok_or_else(|| ValidationError::UnsupportedMethod { method: s.to_owned() })
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl From<HttpMethod> for reqwest::Method {
	fn from(method: HttpMethod) -> Self {
		match method {
			HttpMethod::Get => Self::GET,
			HttpMethod::Head => Self::HEAD,
			HttpMethod::Post => Self::POST,
			HttpMethod::Put => Self::PUT,
			HttpMethod::Patch => Self::PATCH,
			HttpMethod::Delete => Self::DELETE,
			HttpMethod::Options => Self::OPTIONS,
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn parsing_ignores_case_and_padding() {
		assert_eq!("post".parse::<HttpMethod>().ok(), Some(HttpMethod::Post));
		assert_eq!(" Patch ".parse::<HttpMethod>().ok(), Some(HttpMethod::Patch));
		assert_eq!("DELETE".parse::<HttpMethod>().ok(), Some(HttpMethod::Delete));
	}

	#[test]
	fn unknown_verbs_are_rejected() {
		let err = "TRACE".parse::<HttpMethod>().expect_err("TRACE should not be accepted.");

		assert!(matches!(err, ValidationError::UnsupportedMethod { method } if method == "TRACE"));
	}

	#[test]
	fn every_verb_maps_to_reqwest() {
		for method in HttpMethod::ALL {
			assert_eq!(reqwest::Method::from(method).as_str(), method.as_str());
		}
	}
}
