//! Relay queued callback requests to partner webhooks: canonical-JSON HMAC signatures,
//! bounded retries with backoff, at-least-once acknowledgement, and Prometheus metrics.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod app;
pub mod broker;
pub mod callback;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod obs;
pub mod retry;
pub mod signer;
#[cfg(any(test, feature = "test"))]
pub mod _preludet;

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::{Duration, Instant},
	};

	pub use parking_lot::Mutex;
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use url::Url;

	pub use crate::error::Result;
}

pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
use color_eyre as _;
