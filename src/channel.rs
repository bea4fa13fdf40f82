// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Transport
//!
//! Implementation of the broker boundary on top of `lapin`. Every channel is
//! opened in confirm mode so a publish only succeeds once the broker accepted
//! the message. Dead peers are detected through the AMQP heartbeat, which is
//! on by default. The TCP keep-alive flag of the options is not applied: the
//! `lapin` sockets keep the operating system defaults.

use crate::{
    broker::{BrokerChannel, Delivery, DeliveryStream, MessageProperties, Session, Transport},
    config::ConnectionOptions,
    errors::AmqpError,
    exchange::Exchange,
    queue::{
        QueueOptions, AMQP_HEADERS_DEAD_LETTER_EXCHANGE, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY,
        AMQP_HEADERS_EXPIRES, AMQP_HEADERS_MAX_LENGTH, AMQP_HEADERS_MAX_LENGTH_BYTES,
        AMQP_HEADERS_MAX_PRIORITY, AMQP_HEADERS_MESSAGE_TTL,
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortShortUInt, ShortString},
    uri::AMQPUri,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, error};

/// Heartbeat used when neither the options nor the URL set one.
pub const DEFAULT_HEARTBEAT_IN_SECONDS: u16 = 60;

/// Opens `lapin` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinTransport;

/// Heartbeat to negotiate: an explicit option wins, then one already present
/// in the URL, then [`DEFAULT_HEARTBEAT_IN_SECONDS`]. Zero disables heartbeats,
/// and with them the detection of silent peers.
///
/// `keep_alive` is a socket concern and never changes the heartbeat.
fn heartbeat_for(options: &ConnectionOptions, from_url: Option<u16>) -> u16 {
    options
        .heartbeat
        .or(from_url)
        .unwrap_or(DEFAULT_HEARTBEAT_IN_SECONDS)
}

#[async_trait]
impl Transport for LapinTransport {
    async fn connect(&self, url: &str, options: &ConnectionOptions) -> Result<Arc<dyn Session>, AmqpError> {
        debug!("creating amqp connection...");

        let mut uri = url.parse::<AMQPUri>().map_err(|err| {
            error!(error = err.to_string(), "failure to parse the amqp url");
            AmqpError::ConnectionError(err)
        })?;
        uri.query.heartbeat = Some(heartbeat_for(options, uri.query.heartbeat));

        let mut properties = ConnectionProperties::default();
        if let Some(name) = &options.connection_name {
            properties = properties.with_connection_name(LongString::from(name.clone()));
        }

        let connection = match Connection::connect_uri(uri, properties).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;
        debug!("amqp connected");

        let (lost_tx, lost_rx) = watch::channel(None::<String>);
        connection.on_error(move |err| {
            let _ = lost_tx.send(Some(err.to_string()));
        });

        Ok(Arc::new(LapinSession {
            connection,
            lost: lost_rx,
        }))
    }
}

/// An open `lapin` connection.
pub struct LapinSession {
    connection: Connection,
    lost: watch::Receiver<Option<String>>,
}

#[async_trait]
impl Session for LapinSession {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");
        let channel = match self.connection.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }?;

        if let Err(err) = channel.confirm_select(ConfirmSelectOptions::default()).await {
            error!(error = err.to_string(), "error to enable publisher confirms");
            return Err(AmqpError::ChannelError(err.to_string()));
        }

        debug!(id = channel.id(), "channel created");
        Ok(Arc::new(LapinChannel { channel }))
    }

    async fn closed(&self) -> String {
        let mut lost = self.lost.clone();
        let reason = match lost.wait_for(|reason| reason.is_some()).await {
            Ok(reason) => reason.as_ref().cloned().unwrap_or_default(),
            Err(_) => "connection dropped".to_owned(),
        };
        reason
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.connection.status().connected() {
            return Ok(());
        }

        self.connection.close(0, "closing").await.map_err(|err| {
            error!(error = err.to_string(), "failure to close the connection");
            AmqpError::ConnectionError(err.to_string())
        })
    }
}

/// An open `lapin` channel in confirm mode.
pub struct LapinChannel {
    channel: Channel,
}

/// Translates queue options into `x-` declaration arguments.
pub(crate) fn queue_arguments(options: &QueueOptions) -> FieldTable {
    let mut args = BTreeMap::new();

    let numeric = [
        (AMQP_HEADERS_MESSAGE_TTL, options.message_ttl),
        (AMQP_HEADERS_EXPIRES, options.expires),
        (AMQP_HEADERS_MAX_LENGTH, options.max_length),
        (AMQP_HEADERS_MAX_LENGTH_BYTES, options.max_length_bytes),
    ];
    for (key, value) in numeric {
        if let Some(value) = value {
            args.insert(
                ShortString::from(key),
                AMQPValue::LongLongInt(LongLongInt::from(value)),
            );
        }
    }

    if let Some(priority) = options.max_priority {
        args.insert(
            ShortString::from(AMQP_HEADERS_MAX_PRIORITY),
            AMQPValue::ShortShortUInt(ShortShortUInt::from(priority)),
        );
    }

    if let Some(exchange) = &options.dead_letter_exchange {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(exchange.clone())),
        );
    }

    if let Some(key) = &options.dead_letter_routing_key {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(key.clone())),
        );
    }

    FieldTable::from(args)
}

fn string_table(values: &BTreeMap<String, String>) -> FieldTable {
    let mut table = BTreeMap::new();
    for (key, value) in values {
        table.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }
    FieldTable::from(table)
}

/// Reads a header value as text. Nested tables and arrays are skipped.
fn header_text(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes()).ok().map(str::to_owned),
        AMQPValue::ShortString(v) => Some(v.to_string()),
        AMQPValue::Boolean(v) => Some(v.to_string()),
        AMQPValue::ShortInt(v) => Some(v.to_string()),
        AMQPValue::LongInt(v) => Some(v.to_string()),
        AMQPValue::LongUInt(v) => Some(v.to_string()),
        AMQPValue::LongLongInt(v) => Some(v.to_string()),
        _ => None,
    }
}

pub(crate) fn properties_from(props: &AMQPProperties) -> MessageProperties {
    let headers = match props.headers() {
        Some(table) => table
            .inner()
            .iter()
            .filter_map(|(key, value)| header_text(value).map(|v| (key.to_string(), v)))
            .collect(),
        None => BTreeMap::default(),
    };

    MessageProperties {
        content_type: props.content_type().as_ref().map(|v| v.to_string()),
        message_id: props.message_id().as_ref().map(|v| v.to_string()),
        kind: props.kind().as_ref().map(|v| v.to_string()),
        headers,
    }
}

pub(crate) fn properties_into(props: MessageProperties) -> BasicProperties {
    let mut basic = BasicProperties::default().with_headers(string_table(&props.headers));

    if let Some(content_type) = props.content_type {
        basic = basic.with_content_type(ShortString::from(content_type));
    }
    if let Some(message_id) = props.message_id {
        basic = basic.with_message_id(ShortString::from(message_id));
    }
    if let Some(kind) = props.kind {
        basic = basic.with_type(ShortString::from(kind));
    }

    basic
}

fn delivery_from(delivery: lapin::message::Delivery) -> Delivery {
    Delivery {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.to_string(),
        routing_key: delivery.routing_key.to_string(),
        redelivered: delivery.redelivered,
        properties: properties_from(&delivery.properties),
        data: delivery.data,
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn assert_queue(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError> {
        debug!("creating queue: {}", name);

        match self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    nowait: false,
                },
                queue_arguments(options),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = %name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            _ => {
                debug!("queue: {} was created", name);
                Ok(())
            }
        }
    }

    async fn assert_exchange(&self, exchange: &Exchange) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", exchange.name);

        match self
            .channel
            .exchange_declare(
                &exchange.name,
                exchange.kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: exchange.options.durable,
                    auto_delete: exchange.options.auto_delete,
                    internal: exchange.options.internal,
                    nowait: false,
                },
                string_table(&exchange.options.arguments),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = %exchange.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(exchange.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", exchange.name);
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, binding: &str) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, binding
        );

        match self
            .channel
            .queue_bind(
                queue,
                exchange,
                binding,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn prefetch(&self, count: u16) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_qos(count, BasicQosOptions { global: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to configure qos");
                Err(AmqpError::QoSDeclarationError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        let consumer = match self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let deliveries = consumer.filter_map(|result| async move {
            match result {
                Ok(delivery) => Some(delivery_from(delivery)),
                Err(err) => {
                    error!(error = err.to_string(), "errors consume msg");
                    None
                }
            }
        });

        Ok(deliveries.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), AmqpError> {
        let confirm = match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &body,
                properties_into(properties),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            Ok(confirm) => Ok(confirm),
        }?;

        match confirm.await {
            Err(err) => {
                error!(error = err.to_string(), "error waiting for the publish confirmation");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            Ok(confirmation) if confirmation.is_nack() => {
                error!(exchange = %exchange, "broker refused the message");
                Err(AmqpError::PublishingError("message was nacked by the broker".to_owned()))
            }
            _ => Ok(()),
        }
    }
}
