//! Service wiring for the selected run mode.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	broker::AmqpBroker,
	config::RelayConfig,
	consumer::Consumer,
	dispatch::Dispatcher,
	http::ReqwestHttpClient,
	obs::{self, CallbackMetrics},
};

/// Services started by the process, resolved once from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
	/// Queue consumer only.
	Consumer,
	/// Metrics server only.
	Metrics,
	/// Both services in one process.
	All,
}
impl RunMode {
	/// Whether the queue consumer runs.
	pub const fn runs_consumer(self) -> bool {
		matches!(self, Self::Consumer | Self::All)
	}

	/// Whether the metrics server runs.
	pub const fn runs_metrics(self) -> bool {
		matches!(self, Self::Metrics | Self::All)
	}
}

/// Runs the selected services until `shutdown` is cancelled.
///
/// The metrics server binds before anything else starts and never waits for the broker.
/// If it fails while serving, `shutdown` is cancelled so the consumer drains and stops too.
pub async fn run(mode: RunMode, config: RelayConfig, shutdown: CancellationToken) -> Result<()> {
	let exporter = if mode.runs_metrics() {
		let handle = obs::install_recorder()?;
		let listener = obs::bind(config.metrics.addr()).await?;

		Some((listener, handle))
	} else {
		None
	};
	let consumer = if mode.runs_consumer() {
		let metrics = Arc::new(CallbackMetrics::default());
		let http_client = Arc::new(ReqwestHttpClient::from_config(&config.http)?);
		let dispatcher = Dispatcher::new(http_client, metrics).with_retry_policy(config.retry);

		Some(Consumer::new(
			Arc::new(AmqpBroker::new(config.amqp.clone())),
			Arc::new(dispatcher),
			config.consumer,
		))
	} else {
		None
	};
	let serving = async {
		let Some((listener, handle)) = exporter else {
			return Ok(());
		};
		let served = obs::serve(listener, handle, shutdown.clone()).await;

		if served.is_err() {
			shutdown.cancel();
		}

		served
	};
	let consuming = async {
		if let Some(consumer) = &consumer {
			consumer.run(shutdown.clone()).await;
		}
	};
	let (served, ()) = tokio::join!(serving, consuming);

	Ok(served?)
}
