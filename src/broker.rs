//! Queue broker seam.
//!
//! The consumer talks to the broker only through [`MessageBroker`], [`MessageStream`], and
//! [`MessageAcker`], so the reconnect and acknowledgement logic can be exercised against an
//! in-process fake. [`amqp`] provides the production AMQP 0-9-1 implementation.

pub mod amqp;

pub use amqp::AmqpBroker;

// self
use crate::{_prelude::*, error::BoxError};

/// Boxed future returned by broker operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + 'a + Send>>;

/// Broker connectivity and acknowledgement failures.
#[derive(Debug, ThisError)]
pub enum BrokerError {
	/// Connection could not be established.
	#[error("Broker connection failed.")]
	Connect {
		/// Underlying client failure.
		#[source]
		source: BoxError,
	},
	/// Channel setup (open, declare, QoS) failed.
	#[error("Broker channel setup failed.")]
	Channel {
		/// Underlying client failure.
		#[source]
		source: BoxError,
	},
	/// Consuming from the queue failed.
	#[error("Consuming from the queue failed.")]
	Consume {
		/// Underlying client failure.
		#[source]
		source: BoxError,
	},
	/// The delivery stream ended without a shutdown request.
	#[error("Delivery stream closed by the broker.")]
	StreamClosed,
	/// Ack or reject could not be sent.
	#[error("Message acknowledgement failed.")]
	Acknowledge {
		/// Underlying client failure.
		#[source]
		source: BoxError,
	},
}
impl BrokerError {
	/// Wraps a connection failure.
	pub fn connect(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Connect { source: Box::new(src) }
	}

	/// Wraps a channel setup failure.
	pub fn channel(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Channel { source: Box::new(src) }
	}

	/// Wraps a consume failure.
	pub fn consume(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Consume { source: Box::new(src) }
	}

	/// Wraps an acknowledgement failure.
	pub fn acknowledge(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Acknowledge { source: Box::new(src) }
	}
}

/// Factory for consuming sessions.
pub trait MessageBroker
where
	Self: 'static + Send + Sync,
{
	/// Connects, declares the queue, applies QoS, and starts consuming.
	///
	/// The returned stream is ready to deliver; nothing is dispatched before this resolves.
	fn connect(&self) -> BrokerFuture<'_, Box<dyn MessageStream>>;
}

/// One live consuming session.
pub trait MessageStream
where
	Self: Send,
{
	/// Waits for the next delivery; `Ok(None)` means the session ended.
	fn next_message(&mut self) -> BrokerFuture<'_, Option<InboundMessage>>;

	/// Closes the underlying connection.
	fn close(self: Box<Self>) -> BrokerFuture<'static, ()>;
}

/// Settles a single delivery.
pub trait MessageAcker
where
	Self: 'static + Send + Sync,
{
	/// Acknowledges the delivery.
	fn ack(&self) -> BrokerFuture<'_, ()>;

	/// Rejects the delivery, optionally asking the broker to requeue it.
	fn reject(&self, requeue: bool) -> BrokerFuture<'_, ()>;
}

/// Delivery handed to the consumer.
pub struct InboundMessage {
	/// `content_type` property.
	pub content_type: Option<String>,
	/// `type` property.
	pub kind: Option<String>,
	/// Raw body.
	pub body: Vec<u8>,
	/// Whether the broker has delivered this message before.
	pub redelivered: bool,
	/// Settlement handle bound to the channel that delivered the message.
	pub acker: Box<dyn MessageAcker>,
}
impl Debug for InboundMessage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		// The body carries the HMAC secret, so only its size is shown.
		f.debug_struct("InboundMessage")
			.field("content_type", &self.content_type)
			.field("kind", &self.kind)
			.field("body_len", &self.body.len())
			.field("redelivered", &self.redelivered)
			.finish_non_exhaustive()
	}
}
