// crates.io
use tracing::instrument::Instrumented;
use tracing_subscriber::EnvFilter;
// self
use crate::{
	_prelude::*,
	config::{LogConfig, LogFormat},
	error::ConfigError,
};

/// Span wrapper used around a single callback dispatch.
#[derive(Clone, Debug)]
pub struct DispatchSpan {
	span: tracing::Span,
}
impl DispatchSpan {
	/// Creates a span tagged with the callback target and verb.
	pub fn new(target_url: &str, method: &'static str) -> Self {
		let span = tracing::info_span!("callback_relay.dispatch", target_url, method);

		Self { span }
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> tracing::span::EnteredSpan {
		self.span.entered()
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `LOG_LEVEL` when both are set. Calling this twice fails because the
/// global default can only be set once per process.
pub fn init_subscriber(config: &LogConfig) -> Result<(), ConfigError> {
	let filter = match EnvFilter::try_from_default_env() {
		Ok(filter) => filter,
		Err(_) => EnvFilter::try_new(&config.level)
			.map_err(|e| ConfigError::invalid("LOG_LEVEL", config.level.as_str(), e))?,
	};
	let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
	let installed = match config.format {
		LogFormat::Json => builder.json().flatten_event(true).try_init(),
		LogFormat::Pretty => builder.pretty().try_init(),
	};

	installed.map_err(|source| ConfigError::Subscriber { source })
}
