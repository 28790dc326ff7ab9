//! Convenience re-exports and in-process fakes for integration tests; enabled via `cfg(test)`
//! or the `test` crate feature.

pub use crate::_prelude::*;

// std
use std::{
	collections::VecDeque,
	sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
// crates.io
use serde_json::Value;
// self
use crate::{
	broker::{
		BrokerError, BrokerFuture, InboundMessage, MessageAcker, MessageBroker, MessageStream,
	},
	callback::{CallbackRequest, HmacSecret, TargetPolicy},
	error::TransportError,
	http::{CallbackHttpClient, CallbackResponse, OutboundRequest, SendFuture},
	retry::{SleepFuture, Sleeper},
};

/// Secret used by test requests.
pub const SECRET: &str = "your-secret-key";

/// Builds a request for `url`, accepting loopback targets.
pub fn callback_request(url: &str, payload: Value) -> CallbackRequest {
	let target = TargetPolicy::allow_private().check(url).expect("Test target should be valid.");
	let secret = HmacSecret::new(SECRET).expect("Test secret should be valid.");

	CallbackRequest::new(target, secret, payload)
}

/// Sleeper that records each delay and returns immediately.
#[derive(Debug, Default)]
pub struct InstantSleeper {
	delays: Mutex<Vec<Duration>>,
}
impl InstantSleeper {
	/// Delays requested so far, in order.
	pub fn delays(&self) -> Vec<Duration> {
		self.delays.lock().clone()
	}
}
impl Sleeper for InstantSleeper {
	fn sleep(&self, delay: Duration) -> SleepFuture<'_> {
		self.delays.lock().push(delay);

		Box::pin(async {
			tokio::task::yield_now().await;
		})
	}
}

/// HTTP client answering from a script; replies `200` once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
	replies: Mutex<VecDeque<Result<CallbackResponse, TransportError>>>,
	seen: Mutex<Vec<OutboundRequest>>,
}
impl ScriptedHttpClient {
	/// Scripts one bare response per status.
	pub fn with_statuses(statuses: &[u16]) -> Arc<Self> {
		let client = Self::default();

		for &status in statuses {
			client.push(Ok(CallbackResponse { status, retry_after: None }));
		}

		Arc::new(client)
	}

	/// Appends a reply to the script.
	pub fn push(&self, reply: Result<CallbackResponse, TransportError>) {
		self.replies.lock().push_back(reply);
	}

	/// Requests sent so far, in order.
	pub fn seen(&self) -> Vec<OutboundRequest> {
		self.seen.lock().clone()
	}
}
impl CallbackHttpClient for ScriptedHttpClient {
	fn send<'a>(
		&'a self,
		request: &'a OutboundRequest,
	) -> SendFuture<'a, Result<CallbackResponse, TransportError>> {
		self.seen.lock().push(request.clone());

		let reply = self
			.replies
			.lock()
			.pop_front()
			.unwrap_or(Ok(CallbackResponse { status: 200, retry_after: None }));

		Box::pin(async move { reply })
	}
}

/// How a delivery was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
	/// Acknowledged.
	Ack,
	/// Rejected.
	Reject {
		/// Whether the broker was asked to requeue.
		requeue: bool,
	},
	/// Settlement was attempted after the owning channel had closed.
	Lost,
}

/// Message queued on a [`FakeBroker`] session.
#[derive(Clone, Debug)]
pub struct FakeMessage {
	/// Identifier recorded with the settlement.
	pub id: usize,
	/// `content_type` property.
	pub content_type: Option<String>,
	/// `type` property.
	pub kind: Option<String>,
	/// Raw body.
	pub body: Vec<u8>,
}
impl FakeMessage {
	/// A well-formed `SendCallback` message carrying `body`.
	pub fn send_callback(id: usize, body: Value) -> Self {
		Self {
			id,
			content_type: Some("application/json".into()),
			kind: Some("SendCallback".into()),
			body: serde_json::to_vec(&body).expect("Test body should serialize."),
		}
	}
}

/// Behavior of one `connect` call on a [`FakeBroker`].
#[derive(Clone, Debug)]
pub enum Session {
	/// Connection is refused.
	Refuse,
	/// Messages are delivered, then the broker drops the connection.
	Drop(Vec<FakeMessage>),
	/// Like [`Session::Drop`], but the channel dies with the connection, so later
	/// settlements of its deliveries fail.
	Stale(Vec<FakeMessage>),
	/// Messages are delivered, then the session idles until closed.
	Hold(Vec<FakeMessage>),
}

/// Scripted broker recording connects and settlements.
#[derive(Debug, Default)]
pub struct FakeBroker {
	sessions: Mutex<VecDeque<Session>>,
	connects: AtomicUsize,
	settlements: Arc<Mutex<Vec<(usize, Settlement)>>>,
	closed: Arc<AtomicUsize>,
}
impl FakeBroker {
	/// Broker that plays `sessions` in order, then holds empty sessions.
	pub fn new(sessions: impl IntoIterator<Item = Session>) -> Arc<Self> {
		Arc::new(Self { sessions: Mutex::new(sessions.into_iter().collect()), ..Default::default() })
	}

	/// Number of `connect` calls.
	pub fn connects(&self) -> usize {
		self.connects.load(Ordering::SeqCst)
	}

	/// Number of sessions closed by the consumer.
	pub fn closed(&self) -> usize {
		self.closed.load(Ordering::SeqCst)
	}

	/// Settlements sorted by message id.
	pub fn settlements(&self) -> Vec<(usize, Settlement)> {
		let mut settlements = self.settlements.lock().clone();

		settlements.sort_by_key(|(id, _)| *id);

		settlements
	}

	/// Polls until `count` settlements are recorded or five seconds pass.
	pub async fn wait_for_settlements(&self, count: usize) {
		let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

		while self.settlements.lock().len() < count {
			assert!(
				tokio::time::Instant::now() < deadline,
				"Timed out waiting for {count} settlements; saw {:?}.",
				self.settlements()
			);

			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	}
}
impl MessageBroker for FakeBroker {
	fn connect(&self) -> BrokerFuture<'_, Box<dyn MessageStream>> {
		self.connects.fetch_add(1, Ordering::SeqCst);

		let session = self.sessions.lock().pop_front().unwrap_or(Session::Hold(Vec::new()));
		let settlements = self.settlements.clone();
		let closed = self.closed.clone();

		Box::pin(async move {
			let (messages, end) = match session {
				Session::Refuse =>
					return Err(BrokerError::connect(std::io::Error::other("connection refused"))),
				Session::Drop(messages) => (messages, SessionEnd::Drop),
				Session::Stale(messages) => (messages, SessionEnd::Stale),
				Session::Hold(messages) => (messages, SessionEnd::Hold),
			};

			Ok(Box::new(FakeStream {
				messages: messages.into(),
				end,
				channel_open: Arc::new(AtomicBool::new(true)),
				settlements,
				closed,
			}) as Box<dyn MessageStream>)
		})
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
	Drop,
	Stale,
	Hold,
}

struct FakeStream {
	messages: VecDeque<FakeMessage>,
	end: SessionEnd,
	channel_open: Arc<AtomicBool>,
	settlements: Arc<Mutex<Vec<(usize, Settlement)>>>,
	closed: Arc<AtomicUsize>,
}
impl MessageStream for FakeStream {
	fn next_message(&mut self) -> BrokerFuture<'_, Option<InboundMessage>> {
		let next = self.messages.pop_front();

		Box::pin(async move {
			let Some(message) = next else {
				match self.end {
					SessionEnd::Hold => futures::future::pending::<()>().await,
					SessionEnd::Stale => self.channel_open.store(false, Ordering::SeqCst),
					SessionEnd::Drop => {},
				}

				return Ok(None);
			};

			Ok(Some(InboundMessage {
				content_type: message.content_type,
				kind: message.kind,
				body: message.body,
				redelivered: false,
				acker: Box::new(FakeAcker {
					id: message.id,
					channel_open: self.channel_open.clone(),
					settlements: self.settlements.clone(),
				}),
			}))
		})
	}

	fn close(self: Box<Self>) -> BrokerFuture<'static, ()> {
		self.closed.fetch_add(1, Ordering::SeqCst);

		Box::pin(async { Ok(()) })
	}
}

struct FakeAcker {
	id: usize,
	channel_open: Arc<AtomicBool>,
	settlements: Arc<Mutex<Vec<(usize, Settlement)>>>,
}
impl FakeAcker {
	fn settle(&self, settlement: Settlement) -> BrokerFuture<'_, ()> {
		let open = self.channel_open.load(Ordering::SeqCst);

		self.settlements.lock().push((self.id, if open { settlement } else { Settlement::Lost }));

		Box::pin(async move {
			if open {
				Ok(())
			} else {
				Err(BrokerError::acknowledge(std::io::Error::other("channel closed")))
			}
		})
	}
}
impl MessageAcker for FakeAcker {
	fn ack(&self) -> BrokerFuture<'_, ()> {
		self.settle(Settlement::Ack)
	}

	fn reject(&self, requeue: bool) -> BrokerFuture<'_, ()> {
		self.settle(Settlement::Reject { requeue })
	}
}
