//! Target URL validation, including the private-network guard.

// std
use std::net::{Ipv4Addr, Ipv6Addr};
// crates.io
use url::Host;
// self
use crate::{_prelude::*, callback::ValidationError};

/// Decides which callback targets are acceptable.
///
/// Only absolute `http`/`https` URLs with a host are ever accepted. Unless
/// `allow_private` is set, hosts that resolve by name or literal to loopback, private,
/// link-local, or unspecified addresses are refused so queue producers cannot aim the relay
/// at internal services. Names are not resolved; the guard only inspects the URL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TargetPolicy {
	/// Permit loopback/private/link-local hosts (local development and tests).
	pub allow_private: bool,
}
impl TargetPolicy {
	/// Policy that accepts private and loopback hosts.
	pub const fn allow_private() -> Self {
		Self { allow_private: true }
	}

	/// Parses and validates `raw` as a callback target.
	pub fn check(&self, raw: &str) -> Result<TargetUrl, ValidationError> {
		let url = Url::parse(raw)
			.map_err(|source| ValidationError::InvalidUrl { url: raw.to_owned(), source })?;

		if !matches!(url.scheme(), "http" | "https") {
			return Err(ValidationError::UnsupportedScheme { scheme: url.scheme().to_owned() });
		}

		let host = url.host().ok_or(ValidationError::MissingHost)?;

		if !self.allow_private && is_forbidden_host(&host) {
			return Err(ValidationError::ForbiddenTarget { host: host.to_string() });
		}

		Ok(TargetUrl(url))
	}
}

/// Absolute HTTP(S) URL that passed a [`TargetPolicy`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TargetUrl(Url);
impl TargetUrl {
	/// Borrows the parsed URL.
	pub fn as_url(&self) -> &Url {
		&self.0
	}

	/// Returns the serialized URL.
	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}
}
impl AsRef<str> for TargetUrl {
	fn as_ref(&self) -> &str {
		self.as_str()
	}
}
impl Display for TargetUrl {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

fn is_forbidden_host(host: &Host<&str>) -> bool {
	match host {
		Host::Domain(name) => {
			let name = name.trim_end_matches('.');

			name.eq_ignore_ascii_case("localhost")
				|| name.to_ascii_lowercase().ends_with(".localhost")
		},
		Host::Ipv4(addr) => is_forbidden_v4(addr),
		Host::Ipv6(addr) => is_forbidden_v6(addr),
	}
}

fn is_forbidden_v4(addr: &Ipv4Addr) -> bool {
	let [a, b, ..] = addr.octets();
	// 100.64.0.0/10 carrier-grade NAT.
	let shared = a == 100 && (b & 0xc0) == 64;

	addr.is_private()
		|| addr.is_loopback()
		|| addr.is_link_local()
		|| addr.is_unspecified()
		|| addr.is_broadcast()
		|| addr.is_documentation()
		|| shared
}

fn is_forbidden_v6(addr: &Ipv6Addr) -> bool {
	if let Some(v4) = addr.to_ipv4_mapped() {
		return is_forbidden_v4(&v4);
	}

	let first = addr.segments()[0];
	let unique_local = (first & 0xfe00) == 0xfc00;
	let link_local = (first & 0xffc0) == 0xfe80;

	addr.is_loopback() || addr.is_unspecified() || unique_local || link_local
}
