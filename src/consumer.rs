//! Queue consumer: filters, decodes, dispatches, and settles messages.
//!
//! One loop pulls deliveries. A semaphore permit is taken before each receive, so at most
//! `max_in_flight` dispatch tasks exist at once regardless of broker prefetch. Each accepted
//! message runs on its own task and settles its own delivery:
//!
//! | Verdict | Settlement |
//! |---|---|
//! | wrong `content_type` / `type`, decode failure | reject, no requeue |
//! | `Delivered` | ack |
//! | `Failed` | ack, or reject without requeue per [`FailureDisposition`] |
//! | `Interrupted` | reject with requeue |
//!
//! Connection loss triggers a reconnect with backoff; tasks still running against the old
//! channel fail to settle, log it, and rely on broker redelivery.

// std
use std::panic::AssertUnwindSafe;
// crates.io
use async_lock::{Semaphore, SemaphoreGuardArc};
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	broker::{BrokerError, InboundMessage, MessageAcker, MessageBroker, MessageStream},
	callback::CallbackRequest,
	config::{ConsumerConfig, FailureDisposition},
	dispatch::{DeliveryOutcome, Dispatcher, FailureReason},
	http::{CallbackHttpClient, ReqwestHttpClient},
	obs::{CallbackMetrics, RejectReason},
	retry::{Sleeper, TokioSleeper},
};

/// Accepted `content_type` property.
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Accepted `type` property.
pub const SEND_CALLBACK_TYPE: &str = "SendCallback";

/// Long-running consumer bound to one broker and one dispatcher.
pub struct Consumer<B, C = ReqwestHttpClient>
where
	B: ?Sized + MessageBroker,
	C: ?Sized + CallbackHttpClient,
{
	broker: Arc<B>,
	dispatcher: Arc<Dispatcher<C>>,
	config: ConsumerConfig,
	sleeper: Arc<dyn Sleeper>,
}
impl<B, C> Consumer<B, C>
where
	B: ?Sized + MessageBroker,
	C: ?Sized + CallbackHttpClient,
{
	/// Creates a consumer; nothing connects until [`run`](Self::run).
	pub fn new(broker: Arc<B>, dispatcher: Arc<Dispatcher<C>>, config: ConsumerConfig) -> Self {
		Self { broker, dispatcher, config, sleeper: Arc::new(TokioSleeper) }
	}

	/// Overrides the sleep used between reconnect attempts.
	pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
		self.sleeper = sleeper;

		self
	}

	/// Consumes until `shutdown` is cancelled, reconnecting as needed.
	///
	/// On shutdown the loop stops receiving, waits up to `shutdown_grace` for in-flight
	/// dispatches to settle, then closes the connection.
	pub async fn run(&self, shutdown: CancellationToken) {
		tracing::info!(
			max_in_flight = self.config.max_in_flight,
			failure_disposition = self.config.failure_disposition.as_str(),
			"consumer starting"
		);

		let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
		let mut tasks = JoinSet::new();
		let mut failures = 0_u32;
		let mut session: Option<Box<dyn MessageStream>> = None;

		while !shutdown.is_cancelled() {
			if failures > 0 {
				self.metrics().record_reconnect();

				let delay = self.config.reconnect.delay(failures);

				tracing::warn!(
					reconnects = self.metrics().reconnects(),
					delay_ms = delay.as_millis() as u64,
					"reconnecting to broker"
				);

				tokio::select! {
					biased;
					_ = shutdown.cancelled() => break,
					_ = self.sleeper.sleep(delay) => {},
				}
			}

			let connected = tokio::select! {
				biased;
				_ = shutdown.cancelled() => break,
				connected = self.broker.connect() => connected,
			};
			let mut stream = match connected {
				Ok(stream) => stream,
				Err(e) => {
					tracing::error!(error = %e, "broker connection failed");

					failures += 1;

					continue;
				},
			};

			match self.consume(&mut *stream, &permits, &mut tasks, &shutdown).await {
				Ok(()) => {
					session = Some(stream);

					break;
				},
				Err(e) => {
					tracing::error!(error = %e, "broker session lost");

					failures = 1;

					// The connection is already unusable; closing only releases resources.
					let _ = stream.close().await;
				},
			}
		}

		self.drain(&mut tasks).await;

		if let Some(stream) = session
			&& let Err(e) = stream.close().await
		{
			tracing::warn!(error = %e, "broker connection did not close cleanly");
		}

		tracing::info!("consumer stopped");
	}

	fn metrics(&self) -> &CallbackMetrics {
		self.dispatcher.metrics()
	}

	async fn consume(
		&self,
		stream: &mut dyn MessageStream,
		permits: &Arc<Semaphore>,
		tasks: &mut JoinSet<()>,
		shutdown: &CancellationToken,
	) -> Result<(), BrokerError> {
		loop {
			let permit = tokio::select! {
				biased;
				_ = shutdown.cancelled() => return Ok(()),
				permit = permits.acquire_arc() => permit,
			};
			let message = tokio::select! {
				biased;
				_ = shutdown.cancelled() => return Ok(()),
				message = stream.next_message() => message?,
			};
			let Some(message) = message else {
				return Err(BrokerError::StreamClosed);
			};

			self.accept(message, permit, tasks, shutdown).await;

			while let Some(joined) = tasks.try_join_next() {
				log_join(joined);
			}
		}
	}

	async fn accept(
		&self,
		message: InboundMessage,
		permit: SemaphoreGuardArc,
		tasks: &mut JoinSet<()>,
		shutdown: &CancellationToken,
	) {
		let InboundMessage { content_type, kind, body, redelivered, acker } = message;

		if content_type.as_deref() != Some(JSON_CONTENT_TYPE) {
			tracing::warn!(content_type = content_type.as_deref(), "unsupported content type");

			return self.reject(&*acker, RejectReason::ContentType).await;
		}
		if kind.as_deref() != Some(SEND_CALLBACK_TYPE) {
			tracing::warn!(kind = kind.as_deref(), "unsupported message type");

			return self.reject(&*acker, RejectReason::MessageType).await;
		}

		let request = match CallbackRequest::decode(&body, &self.config.decode) {
			Ok(request) => request,
			Err(e) => {
				tracing::warn!(error = %e, redelivered, "invalid callback message");

				return self.reject(&*acker, RejectReason::Invalid).await;
			},
		};
		let dispatcher = self.dispatcher.clone();
		let shutdown = shutdown.clone();
		let disposition = self.config.failure_disposition;

		tasks.spawn(async move {
			let _permit = permit;
			let dispatched = AssertUnwindSafe(dispatcher.dispatch_until(&request, &shutdown))
				.catch_unwind()
				.await;
			let outcome = match dispatched {
				Ok(outcome) => outcome,
				Err(panic) => {
					tracing::error!(
						target_url = request.target_url().as_str(),
						panic = panic_message(&*panic),
						"dispatch panicked"
					);

					let outcome =
						DeliveryOutcome::Failed { attempts: 0, reason: FailureReason::Internal };

					dispatcher.record_outcome(&request, outcome);

					outcome
				},
			};

			settle(&*acker, outcome, disposition).await;
		});
	}

	async fn reject(&self, acker: &dyn MessageAcker, reason: RejectReason) {
		self.metrics().record_rejected(reason);

		if let Err(e) = acker.reject(false).await {
			tracing::warn!(error = %e, reason = reason.as_str(), "message rejection failed");
		}
	}

	async fn drain(&self, tasks: &mut JoinSet<()>) {
		if tasks.is_empty() {
			return;
		}

		tracing::info!(in_flight = tasks.len(), "waiting for in-flight callbacks");

		let drained = tokio::time::timeout(self.config.shutdown_grace, async {
			while let Some(joined) = tasks.join_next().await {
				log_join(joined);
			}
		})
		.await;

		if drained.is_err() {
			tracing::warn!(remaining = tasks.len(), "shutdown grace elapsed; aborting callbacks");

			tasks.abort_all();

			while tasks.join_next().await.is_some() {}
		}
	}
}
impl<B, C> Debug for Consumer<B, C>
where
	B: ?Sized + MessageBroker,
	C: ?Sized + CallbackHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Consumer").field("config", &self.config).finish_non_exhaustive()
	}
}

async fn settle(
	acker: &dyn MessageAcker,
	outcome: DeliveryOutcome,
	disposition: FailureDisposition,
) {
	let settled = match (outcome, disposition) {
		(DeliveryOutcome::Delivered { .. }, _)
		| (DeliveryOutcome::Failed { .. }, FailureDisposition::Ack) => acker.ack().await,
		(DeliveryOutcome::Failed { .. }, FailureDisposition::Reject) => acker.reject(false).await,
		(DeliveryOutcome::Interrupted { .. }, _) => acker.reject(true).await,
	};

	if let Err(e) = settled {
		tracing::warn!(
			error = %e,
			outcome = outcome.as_str(),
			"settlement failed; relying on broker redelivery"
		);
	}
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
	if let Err(e) = joined
		&& !e.is_cancelled()
	{
		tracing::error!(error = %e, "callback task failed");
	}
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
	panic
		.downcast_ref::<&str>()
		.copied()
		.or_else(|| panic.downcast_ref::<String>().map(String::as_str))
		.unwrap_or("non-string panic payload")
}
