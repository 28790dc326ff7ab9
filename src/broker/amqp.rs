//! AMQP 0-9-1 broker backed by `lapin`.

// crates.io
use futures::StreamExt;
use lapin::{
	Channel, Connection, ConnectionProperties, Consumer,
	acker::Acker,
	message::Delivery,
	options::{
		BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
		QueueBindOptions, QueueDeclareOptions,
	},
	types::FieldTable,
};
// self
use crate::{
	broker::{BrokerError, BrokerFuture, InboundMessage, MessageAcker, MessageBroker, MessageStream},
	config::AmqpConfig,
};

const CONSUMER_TAG: &str = "callback-relay";

/// Broker that opens a fresh connection and channel per consuming session.
#[derive(Clone, Debug)]
pub struct AmqpBroker {
	config: AmqpConfig,
}
impl AmqpBroker {
	/// Creates a broker for `config`; no connection is made until [`MessageBroker::connect`].
	pub fn new(config: AmqpConfig) -> Self {
		Self { config }
	}
}
impl MessageBroker for AmqpBroker {
	fn connect(&self) -> BrokerFuture<'_, Box<dyn MessageStream>> {
		Box::pin(async move {
			let config = &self.config;
			let connection = Connection::connect(&config.url, ConnectionProperties::default())
				.await
				.map_err(BrokerError::connect)?;
			let channel = connection.create_channel().await.map_err(BrokerError::channel)?;

			channel
				.queue_declare(
					&config.queue,
					QueueDeclareOptions { durable: true, ..Default::default() },
					FieldTable::default(),
				)
				.await
				.map_err(BrokerError::channel)?;

			// The default exchange routes by queue name and cannot be bound explicitly.
			if !config.exchange.is_empty() {
				channel
					.queue_bind(
						&config.queue,
						&config.exchange,
						&config.routing_key,
						QueueBindOptions::default(),
						FieldTable::default(),
					)
					.await
					.map_err(BrokerError::channel)?;
			}

			channel
				.basic_qos(config.prefetch, BasicQosOptions::default())
				.await
				.map_err(BrokerError::channel)?;

			let consumer = channel
				.basic_consume(
					&config.queue,
					CONSUMER_TAG,
					BasicConsumeOptions::default(),
					FieldTable::default(),
				)
				.await
				.map_err(BrokerError::consume)?;

			tracing::info!(
				queue = config.queue.as_str(),
				prefetch = config.prefetch,
				"started consuming"
			);

			Ok(Box::new(AmqpStream { connection, _channel: channel, consumer })
				as Box<dyn MessageStream>)
		})
	}
}

struct AmqpStream {
	connection: Connection,
	_channel: Channel,
	consumer: Consumer,
}
impl MessageStream for AmqpStream {
	fn next_message(&mut self) -> BrokerFuture<'_, Option<InboundMessage>> {
		Box::pin(async move {
			match self.consumer.next().await {
				Some(Ok(delivery)) => Ok(Some(inbound(delivery))),
				Some(Err(e)) => Err(BrokerError::consume(e)),
				None => Ok(None),
			}
		})
	}

	fn close(self: Box<Self>) -> BrokerFuture<'static, ()> {
		Box::pin(async move {
			self.connection.close(200, "shutdown").await.map_err(BrokerError::connect)
		})
	}
}

struct AmqpAcker(Acker);
impl MessageAcker for AmqpAcker {
	fn ack(&self) -> BrokerFuture<'_, ()> {
		Box::pin(async move {
			self.0
				.ack(BasicAckOptions::default())
				.await
				.map(|_| ())
				.map_err(BrokerError::acknowledge)
		})
	}

	fn reject(&self, requeue: bool) -> BrokerFuture<'_, ()> {
		Box::pin(async move {
			self.0
				.reject(BasicRejectOptions { requeue })
				.await
				.map(|_| ())
				.map_err(BrokerError::acknowledge)
		})
	}
}

fn inbound(delivery: Delivery) -> InboundMessage {
	let Delivery { data, properties, redelivered, acker, .. } = delivery;

	InboundMessage {
		content_type: properties.content_type().as_ref().map(|s| s.as_str().to_owned()),
		kind: properties.kind().as_ref().map(|s| s.as_str().to_owned()),
		body: data,
		redelivered,
		acker: Box::new(AmqpAcker(acker)),
	}
}
