// std
use std::collections::BTreeMap;
// crates.io
use serde_json::json;
// self
use callback_relay::{
	_preludet::*,
	dispatch::{DeliveryOutcome, Dispatcher},
	error::TransportError,
	http::CallbackResponse,
	obs::{CallbackMetrics, CallbackStatus},
	retry::{Backoff, RetryPolicy},
	signer::{Signer, verify},
};

const TARGET: &str = "https://partner.example.com/callbacks";

fn build(
	client: Arc<ScriptedHttpClient>,
	retry: RetryPolicy,
) -> (Dispatcher<ScriptedHttpClient>, Arc<InstantSleeper>) {
	let sleeper = Arc::new(InstantSleeper::default());
	let dispatcher = Dispatcher::new(client, Arc::new(CallbackMetrics::default()))
		.with_retry_policy(retry)
		.with_sleeper(sleeper.clone());

	(dispatcher, sleeper)
}

#[tokio::test]
async fn transient_failure_then_success_takes_two_attempts() {
	let client = ScriptedHttpClient::with_statuses(&[503, 200]);
	let (dispatcher, sleeper) = build(client.clone(), RetryPolicy::default());
	let outcome = dispatcher.dispatch(&callback_request(TARGET, json!({"id": 7}))).await;

	assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 2, status: 200 });
	assert_eq!(client.seen().len(), 2);
	assert_eq!(sleeper.delays(), [Duration::from_secs(1)]);
	assert_eq!(dispatcher.metrics().callbacks(CallbackStatus::Success), 1);
	assert_eq!(dispatcher.metrics().callbacks(CallbackStatus::Error), 0);
	assert_eq!(dispatcher.metrics().durations(TARGET).count, 2);
}

#[tokio::test]
async fn rate_limits_and_timeouts_are_retried() {
	let client = Arc::new(ScriptedHttpClient::default());

	client.push(Ok(CallbackResponse { status: 429, retry_after: None }));
	client.push(Err(TransportError::Timeout { after: Duration::from_secs(10) }));
	client.push(Ok(CallbackResponse { status: 408, retry_after: None }));
	client.push(Ok(CallbackResponse { status: 201, retry_after: None }));

	let (dispatcher, sleeper) =
		build(client.clone(), RetryPolicy { max_attempts: 5, ..Default::default() });
	let outcome = dispatcher.dispatch(&callback_request(TARGET, json!([]))).await;

	assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 4, status: 201 });
	assert_eq!(
		sleeper.delays(),
		[Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
	);
}

#[tokio::test]
async fn backoff_is_capped_by_max_delay() {
	let client = ScriptedHttpClient::with_statuses(&[500, 500, 500, 500, 500]);
	let retry = RetryPolicy {
		max_attempts: 5,
		backoff: Backoff { base: Duration::from_millis(300), max: Duration::from_millis(1_000) },
		jitter: false,
	};
	let (dispatcher, sleeper) = build(client, retry);
	let outcome = dispatcher.dispatch(&callback_request(TARGET, json!({}))).await;

	assert_eq!(outcome.attempts(), 5);
	assert_eq!(
		sleeper.delays(),
		[
			Duration::from_millis(300),
			Duration::from_millis(600),
			Duration::from_millis(1_000),
			Duration::from_millis(1_000),
		]
	);
}

#[tokio::test]
async fn retry_after_hint_is_honoured_up_to_the_cap() {
	let client = Arc::new(ScriptedHttpClient::default());

	client.push(Ok(CallbackResponse { status: 503, retry_after: Some(Duration::from_secs(12)) }));
	client.push(Ok(CallbackResponse { status: 503, retry_after: Some(Duration::from_secs(900)) }));

	let (dispatcher, sleeper) = build(client, RetryPolicy::default());
	let outcome = dispatcher.dispatch(&callback_request(TARGET, json!({}))).await;

	assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3, status: 200 });
	assert_eq!(sleeper.delays(), [Duration::from_secs(12), Duration::from_secs(30)]);
}

#[tokio::test]
async fn signatures_verify_against_the_sent_body() {
	let client = ScriptedHttpClient::with_statuses(&[500, 200]);
	let (dispatcher, _) = build(client.clone(), RetryPolicy::default());
	let request = callback_request(TARGET, json!({"z": 1, "a": {"d": [3, 2], "c": "é"}}));

	dispatcher.dispatch(&request).await;

	for sent in client.seen() {
		assert_eq!(sent.body, r#"{"a":{"c":"é","d":[3,2]},"z":1}"#.as_bytes());
		assert!(verify(&sent.body, request.hmac_secret(), &sent.signature));
		assert_eq!(sent.url.as_str(), TARGET);
	}
}

#[tokio::test]
async fn empty_payload_is_still_signed_and_sent() {
	let client = ScriptedHttpClient::with_statuses(&[200]);
	let (dispatcher, _) = build(client.clone(), RetryPolicy::default());
	let outcome = dispatcher.dispatch(&callback_request(TARGET, json!({}))).await;

	assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1, status: 200 });

	let sent = client.seen();

	assert_eq!(sent[0].body, b"{}");
	assert_eq!(
		sent[0].signature,
		"86695d3e3d226e30a3ed77233bd69f655406747f93b251d287cd7e2094e9e32e"
	);
}

#[test]
fn encoding_failures_are_counted_without_a_signature() {
	let metrics = Arc::new(CallbackMetrics::default());
	let signer = Signer::new(metrics.clone());
	let payload = BTreeMap::from([(vec![1_u8], "non-string key")]);
	let request = callback_request(TARGET, json!({}));

	assert!(signer.sign(&payload, request.hmac_secret()).is_err());
	assert_eq!(metrics.hmac_errors(), 1);
	assert_eq!(metrics.callbacks(CallbackStatus::Error), 0);
}
