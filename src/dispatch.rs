//! Signed delivery of one callback request with bounded retries.
//!
//! [`Dispatcher::dispatch`] never returns an error: every path ends in a [`DeliveryOutcome`]
//! that the consumer maps onto an acknowledgement. Attempts for one request run strictly in
//! sequence; backoff sleeps suspend only the owning task.

pub mod attempt;

pub use attempt::*;

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	callback::CallbackRequest,
	http::{CallbackHttpClient, OutboundRequest, ReqwestHttpClient},
	obs::{CallbackMetrics, CallbackStatus, DispatchSpan},
	retry::{RetryPolicy, Sleeper, TokioSleeper},
	signer::{self, Signer},
};

/// Why a request ended without delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
	/// Payload could not be encoded; no attempt was made.
	Encoding,
	/// A non-retryable response or request error ended the loop.
	Fatal {
		/// Status of the final response, if one arrived.
		status: Option<u16>,
	},
	/// Every allowed attempt was retryable and failed.
	Exhausted {
		/// Status of the final response, if one arrived.
		last_status: Option<u16>,
	},
	/// The dispatch task panicked.
	Internal,
}
impl FailureReason {
	/// Returns a stable label suitable for span or log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FailureReason::Encoding => "encoding",
			FailureReason::Fatal { .. } => "fatal",
			FailureReason::Exhausted { .. } => "exhausted",
			FailureReason::Internal => "internal",
		}
	}
}

/// Terminal verdict for one callback request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
	/// A 2xx response was received.
	Delivered {
		/// Attempts made, including the successful one.
		attempts: u32,
		/// Success status.
		status: u16,
	},
	/// Delivery is abandoned.
	Failed {
		/// Attempts made.
		attempts: u32,
		/// Why delivery stopped.
		reason: FailureReason,
	},
	/// Shutdown was observed while waiting to retry; the outcome is undetermined.
	Interrupted {
		/// Attempts made before shutdown.
		attempts: u32,
	},
}
impl DeliveryOutcome {
	/// Number of HTTP attempts made.
	pub fn attempts(&self) -> u32 {
		match *self {
			Self::Delivered { attempts, .. }
			| Self::Failed { attempts, .. }
			| Self::Interrupted { attempts } => attempts,
		}
	}

	/// Metric status for terminal verdicts; `None` when interrupted.
	pub fn status(&self) -> Option<CallbackStatus> {
		match self {
			Self::Delivered { .. } => Some(CallbackStatus::Success),
			Self::Failed { .. } => Some(CallbackStatus::Error),
			Self::Interrupted { .. } => None,
		}
	}

	/// Returns a stable label suitable for span or log fields.
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Delivered { .. } => "delivered",
			Self::Failed { .. } => "failed",
			Self::Interrupted { .. } => "interrupted",
		}
	}
}

/// Owns the sign-send-classify-retry loop for callback requests.
///
/// The dispatcher is shared by every task behind an `Arc` and keeps no per-request state.
pub struct Dispatcher<C = ReqwestHttpClient>
where
	C: ?Sized + CallbackHttpClient,
{
	http_client: Arc<C>,
	signer: Signer,
	retry: RetryPolicy,
	sleeper: Arc<dyn Sleeper>,
	metrics: Arc<CallbackMetrics>,
}
impl<C> Dispatcher<C>
where
	C: ?Sized + CallbackHttpClient,
{
	/// Creates a dispatcher with the default retry policy and the Tokio timer.
	pub fn new(http_client: Arc<C>, metrics: Arc<CallbackMetrics>) -> Self {
		Self {
			http_client,
			signer: Signer::new(metrics.clone()),
			retry: RetryPolicy::default(),
			sleeper: Arc::new(TokioSleeper),
			metrics,
		}
	}

	/// Overrides the attempt budget and backoff.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the sleep used between attempts.
	pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
		self.sleeper = sleeper;

		self
	}

	/// Shared metrics registry.
	pub fn metrics(&self) -> &Arc<CallbackMetrics> {
		&self.metrics
	}

	/// Active retry policy.
	pub fn retry_policy(&self) -> &RetryPolicy {
		&self.retry
	}

	/// Delivers `request`, retrying until success, a fatal response, or exhaustion.
	pub async fn dispatch(&self, request: &CallbackRequest) -> DeliveryOutcome {
		self.dispatch_until(request, &CancellationToken::new()).await
	}

	/// Like [`dispatch`](Self::dispatch), but stops retrying once `shutdown` is cancelled.
	///
	/// An attempt already in flight always completes; cancellation is only observed while
	/// waiting between attempts, in which case the result is
	/// [`DeliveryOutcome::Interrupted`].
	pub async fn dispatch_until(
		&self,
		request: &CallbackRequest,
		shutdown: &CancellationToken,
	) -> DeliveryOutcome {
		let span =
			DispatchSpan::new(request.target_url().as_str(), request.target_method().as_str());

		span.instrument(self.run(request, shutdown)).await
	}

	/// Counts and logs a verdict produced outside the attempt loop, such as a panic.
	pub fn record_outcome(&self, request: &CallbackRequest, outcome: DeliveryOutcome) {
		let _entered =
			DispatchSpan::new(request.target_url().as_str(), request.target_method().as_str())
				.entered();

		self.finish(outcome);
	}

	async fn run(
		&self,
		request: &CallbackRequest,
		shutdown: &CancellationToken,
	) -> DeliveryOutcome {
		let target = request.target_url().as_str();
		let Ok(payload) = self.signer.encode(request.payload()) else {
			return self.finish(DeliveryOutcome::Failed {
				attempts: 0,
				reason: FailureReason::Encoding,
			});
		};
		let mut outbound = OutboundRequest {
			method: request.target_method(),
			url: request.target_url().as_url().clone(),
			body: payload.into_bytes(),
			signature: String::new(),
		};
		let mut number = 0;

		loop {
			number += 1;
			outbound.signature = signer::signature(&outbound.body, request.hmac_secret());

			let started = Instant::now();
			let result = self.http_client.send(&outbound).await;
			let elapsed = started.elapsed();

			self.metrics.observe_duration(target, elapsed);

			let attempt = DeliveryAttempt::new(number, elapsed, &result);

			attempt.log();

			match attempt.outcome {
				AttemptOutcome::Success =>
					return self.finish(DeliveryOutcome::Delivered {
						attempts: number,
						status: attempt.status.unwrap_or_default(),
					}),
				AttemptOutcome::Fatal =>
					return self.finish(DeliveryOutcome::Failed {
						attempts: number,
						reason: FailureReason::Fatal { status: attempt.status },
					}),
				AttemptOutcome::Retryable if !self.retry.should_retry(number) =>
					return self.finish(DeliveryOutcome::Failed {
						attempts: number,
						reason: FailureReason::Exhausted { last_status: attempt.status },
					}),
				AttemptOutcome::Retryable => {
					let delay = self.retry.next_delay(number, attempt.retry_after);

					tracing::debug!(
						attempt = number,
						delay_ms = delay.as_millis() as u64,
						"retrying callback"
					);

					tokio::select! {
						biased;
						_ = shutdown.cancelled() => {
							return self.finish(DeliveryOutcome::Interrupted { attempts: number });
						},
						_ = self.sleeper.sleep(delay) => {},
					}
				},
			}
		}
	}

	fn finish(&self, outcome: DeliveryOutcome) -> DeliveryOutcome {
		if let Some(status) = outcome.status() {
			self.metrics.record_callback(status);
		}

		match outcome {
			DeliveryOutcome::Delivered { attempts, status } => {
				tracing::info!(outcome = outcome.as_str(), attempts, status, "callback delivered")
			},
			DeliveryOutcome::Failed { attempts, reason } => tracing::error!(
				outcome = outcome.as_str(),
				attempts,
				reason = reason.as_str(),
				"callback failed"
			),
			DeliveryOutcome::Interrupted { attempts } => tracing::warn!(
				outcome = outcome.as_str(),
				attempts,
				"callback interrupted by shutdown"
			),
		}

		outcome
	}
}
impl<C> Debug for Dispatcher<C>
where
	C: ?Sized + CallbackHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Dispatcher").field("retry", &self.retry).finish_non_exhaustive()
	}
}
