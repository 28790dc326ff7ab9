// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use serde_json::json;
use tokio_util::sync::CancellationToken;
// self
use callback_relay::{
	_preludet::*,
	config::{ConsumerConfig, FailureDisposition},
	consumer::Consumer,
	dispatch::Dispatcher,
	error::TransportError,
	http::{CallbackHttpClient, CallbackResponse, OutboundRequest, SendFuture},
	obs::{CallbackMetrics, CallbackStatus},
	retry::{Backoff, RetryPolicy},
};

const TARGET: &str = "https://partner.example.com/hook";

struct Harness {
	broker: Arc<FakeBroker>,
	client: Arc<ScriptedHttpClient>,
	metrics: Arc<CallbackMetrics>,
	consumer: Arc<Consumer<FakeBroker, ScriptedHttpClient>>,
	sleeper: Arc<InstantSleeper>,
}
impl Harness {
	fn new(
		sessions: Vec<Session>,
		client: Arc<ScriptedHttpClient>,
		disposition: FailureDisposition,
	) -> Self {
		let broker = FakeBroker::new(sessions);
		let metrics = Arc::new(CallbackMetrics::default());
		let sleeper = Arc::new(InstantSleeper::default());
		let dispatcher = Dispatcher::new(client.clone(), metrics.clone())
			.with_retry_policy(RetryPolicy::default())
			.with_sleeper(sleeper.clone());
		let config = ConsumerConfig {
			max_in_flight: 4,
			shutdown_grace: Duration::from_secs(5),
			failure_disposition: disposition,
			..Default::default()
		};
		let consumer = Consumer::new(broker.clone(), Arc::new(dispatcher), config)
			.with_sleeper(sleeper.clone());

		Self { broker, client, metrics, consumer: Arc::new(consumer), sleeper }
	}

	/// Runs the consumer until `settled` deliveries are settled, then shuts it down.
	async fn run_until(&self, settled: usize) {
		let shutdown = CancellationToken::new();
		let consumer = self.consumer.clone();
		let running = tokio::spawn({
			let shutdown = shutdown.clone();

			async move { consumer.run(shutdown).await }
		});

		self.broker.wait_for_settlements(settled).await;
		shutdown.cancel();
		tokio::time::timeout(Duration::from_secs(5), running)
			.await
			.expect("Consumer should stop after shutdown.")
			.expect("Consumer task should not panic.");
	}
}

fn callback(id: usize) -> FakeMessage {
	FakeMessage::send_callback(
		id,
		json!({"target_url": TARGET, "hmac_secret": "your-secret-key", "payload": {"id": id}}),
	)
}

#[tokio::test]
async fn delivered_messages_are_acked() {
	let harness = Harness::new(
		vec![Session::Hold(vec![callback(1), callback(2), callback(3)])],
		ScriptedHttpClient::with_statuses(&[200, 200, 200]),
		FailureDisposition::Ack,
	);

	harness.run_until(3).await;

	assert_eq!(
		harness.broker.settlements(),
		[(1, Settlement::Ack), (2, Settlement::Ack), (3, Settlement::Ack)]
	);
	assert_eq!(harness.metrics.callbacks(CallbackStatus::Success), 3);
	assert_eq!(harness.client.seen().len(), 3);
	assert_eq!(harness.broker.closed(), 1);
}

#[tokio::test]
async fn invalid_messages_are_rejected_without_dispatch() {
	let mut wrong_type = callback(2);
	let mut wrong_content = callback(3);

	wrong_type.kind = Some("SomethingElse".into());
	wrong_content.content_type = Some("text/plain".into());

	let messages = vec![
		FakeMessage::send_callback(1, json!({"target_url": TARGET, "payload": {}})),
		wrong_type,
		wrong_content,
		FakeMessage { body: b"{not json".to_vec(), ..callback(4) },
		FakeMessage::send_callback(
			5,
			json!({"target_url": "http://127.0.0.1/hook", "hmac_secret": "k", "payload": {}}),
		),
	];
	let harness = Harness::new(
		vec![Session::Hold(messages)],
		Arc::new(ScriptedHttpClient::default()),
		FailureDisposition::Ack,
	);

	harness.run_until(5).await;

	assert!(
		harness
			.broker
			.settlements()
			.iter()
			.all(|(_, settlement)| *settlement == Settlement::Reject { requeue: false })
	);
	assert!(harness.client.seen().is_empty());
	assert_eq!(harness.metrics.rejected(), 5);
	assert_eq!(harness.metrics.callbacks(CallbackStatus::Success), 0);
	assert_eq!(harness.metrics.callbacks(CallbackStatus::Error), 0);
}

#[tokio::test]
async fn failed_deliveries_are_acked_by_default() {
	let harness = Harness::new(
		vec![Session::Hold(vec![callback(1), callback(2)])],
		ScriptedHttpClient::with_statuses(&[404, 422]),
		FailureDisposition::Ack,
	);

	harness.run_until(2).await;

	assert_eq!(harness.broker.settlements(), [(1, Settlement::Ack), (2, Settlement::Ack)]);
	assert_eq!(harness.metrics.callbacks(CallbackStatus::Error), 2);
	assert_eq!(harness.client.seen().len(), 2);
}

#[tokio::test]
async fn failed_deliveries_can_be_dead_lettered() {
	let harness = Harness::new(
		vec![Session::Hold(vec![callback(1), callback(2)])],
		ScriptedHttpClient::with_statuses(&[200, 410]),
		FailureDisposition::Reject,
	);

	harness.run_until(2).await;

	let settlements = harness.broker.settlements();

	let acked = settlements.iter().filter(|(_, s)| *s == Settlement::Ack).count();
	let dead_lettered =
		settlements.iter().filter(|(_, s)| *s == Settlement::Reject { requeue: false }).count();

	assert_eq!((acked, dead_lettered), (1, 1));
	assert_eq!(harness.metrics.callbacks(CallbackStatus::Success), 1);
	assert_eq!(harness.metrics.callbacks(CallbackStatus::Error), 1);
}

#[tokio::test]
async fn consumption_resumes_after_connection_loss() {
	let harness = Harness::new(
		vec![
			Session::Drop(vec![callback(1)]),
			Session::Refuse,
			Session::Hold(vec![callback(2)]),
		],
		Arc::new(ScriptedHttpClient::default()),
		FailureDisposition::Ack,
	);

	harness.run_until(2).await;

	assert_eq!(harness.broker.settlements(), [(1, Settlement::Ack), (2, Settlement::Ack)]);
	assert_eq!(harness.broker.connects(), 3);
	assert_eq!(harness.metrics.reconnects(), 2);
	assert_eq!(harness.sleeper.delays(), [Duration::from_secs(1), Duration::from_secs(2)]);
}

#[tokio::test]
async fn shutdown_requeues_callbacks_waiting_to_retry() {
	let broker = FakeBroker::new([Session::Hold(vec![callback(1)])]);
	let client = ScriptedHttpClient::with_statuses(&[503]);
	let metrics = Arc::new(CallbackMetrics::default());
	// Real timer with a long delay so the dispatch is parked in backoff at shutdown.
	let retry = RetryPolicy {
		backoff: Backoff { base: Duration::from_secs(3_600), max: Duration::from_secs(3_600) },
		..Default::default()
	};
	let dispatcher = Dispatcher::new(client.clone(), metrics.clone()).with_retry_policy(retry);
	let consumer =
		Arc::new(Consumer::new(broker.clone(), Arc::new(dispatcher), ConsumerConfig::default()));
	let shutdown = CancellationToken::new();
	let running = tokio::spawn({
		let consumer = consumer.clone();
		let shutdown = shutdown.clone();

		async move { consumer.run(shutdown).await }
	});
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

	while client.seen().is_empty() {
		assert!(tokio::time::Instant::now() < deadline, "First attempt should be made.");

		tokio::time::sleep(Duration::from_millis(5)).await;
	}

	shutdown.cancel();
	tokio::time::timeout(Duration::from_secs(5), running)
		.await
		.expect("Consumer should stop within the grace period.")
		.expect("Consumer task should not panic.");

	assert_eq!(broker.settlements(), [(1, Settlement::Reject { requeue: true })]);
	assert_eq!(metrics.callbacks(CallbackStatus::Success), 0);
	assert_eq!(metrics.callbacks(CallbackStatus::Error), 0);
	assert_eq!(client.seen().len(), 1);
}

/// Client that holds each request briefly and records peak concurrency.
#[derive(Debug, Default)]
struct SlowHttpClient {
	current: AtomicUsize,
	peak: AtomicUsize,
}
impl CallbackHttpClient for SlowHttpClient {
	fn send<'a>(
		&'a self,
		_: &'a OutboundRequest,
	) -> SendFuture<'a, Result<CallbackResponse, TransportError>> {
		Box::pin(async move {
			let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;

			self.peak.fetch_max(now, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(20)).await;
			self.current.fetch_sub(1, Ordering::SeqCst);

			Ok(CallbackResponse { status: 200, retry_after: None })
		})
	}
}

#[tokio::test]
async fn in_flight_dispatches_are_bounded() {
	let broker = FakeBroker::new([Session::Hold((1..=8).map(callback).collect())]);
	let client = Arc::new(SlowHttpClient::default());
	let metrics = Arc::new(CallbackMetrics::default());
	let dispatcher = Dispatcher::new(client.clone(), metrics.clone());
	let config = ConsumerConfig { max_in_flight: 2, ..Default::default() };
	let consumer = Arc::new(Consumer::new(broker.clone(), Arc::new(dispatcher), config));
	let shutdown = CancellationToken::new();
	let running = tokio::spawn({
		let consumer = consumer.clone();
		let shutdown = shutdown.clone();

		async move { consumer.run(shutdown).await }
	});

	broker.wait_for_settlements(8).await;
	shutdown.cancel();
	running.await.expect("Consumer task should not panic.");

	assert_eq!(client.peak.load(Ordering::SeqCst), 2);
	assert_eq!(broker.settlements().len(), 8);
	assert_eq!(metrics.callbacks(CallbackStatus::Success), 8);
	assert_eq!(metrics.duration_observations(), 8);
}

#[tokio::test]
async fn settlements_on_a_dead_channel_do_not_stop_consumption() {
	let broker =
		FakeBroker::new([Session::Stale(vec![callback(1)]), Session::Hold(vec![callback(2)])]);
	let client = Arc::new(SlowHttpClient::default());
	let metrics = Arc::new(CallbackMetrics::default());
	let dispatcher = Dispatcher::new(client.clone(), metrics.clone());
	let config = ConsumerConfig {
		reconnect: Backoff { base: Duration::from_millis(1), max: Duration::from_millis(1) },
		..Default::default()
	};
	let consumer = Arc::new(Consumer::new(broker.clone(), Arc::new(dispatcher), config));
	let shutdown = CancellationToken::new();
	let running = tokio::spawn({
		let consumer = consumer.clone();
		let shutdown = shutdown.clone();

		async move { consumer.run(shutdown).await }
	});

	broker.wait_for_settlements(2).await;
	shutdown.cancel();
	tokio::time::timeout(Duration::from_secs(5), running)
		.await
		.expect("Consumer should stop after shutdown.")
		.expect("Consumer task should not panic.");

	// Message 1 was still in flight when its channel died; the broker will redeliver it.
	assert_eq!(broker.settlements(), [(1, Settlement::Lost), (2, Settlement::Ack)]);
	assert_eq!(broker.connects(), 2);
	assert_eq!(metrics.reconnects(), 1);
	assert_eq!(metrics.callbacks(CallbackStatus::Success), 2);
}
