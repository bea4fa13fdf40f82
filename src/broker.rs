// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Boundary
//!
//! The protocol engine is an external collaborator. These traits are the
//! primitives the rest of the crate needs from it: open a session, open
//! channels on it, and the per-channel AMQP operations. [`crate::channel`]
//! implements them on top of `lapin`; tests implement them in memory.

use crate::{config::ConnectionOptions, errors::AmqpError, exchange::Exchange, queue::QueueOptions};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::{collections::BTreeMap, sync::Arc};

/// Content type of every message body produced by this crate.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Deliveries of one consumer. The stream ends when the broker cancels the
/// consumer or the channel goes away.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Message metadata carried next to the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub kind: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// A message delivered to a consumer.
///
/// `delivery_tag` is scoped to the channel that delivered the message; it is
/// the only handle used to settle it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub data: Vec<u8>,
}

/// AMQP operations on a single open channel.
///
/// Assertions and bindings are idempotent on the broker side, so setup code
/// may call them again after every reconnect.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn assert_queue(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError>;

    async fn assert_exchange(&self, exchange: &Exchange) -> Result<(), AmqpError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, binding: &str) -> Result<(), AmqpError>;

    async fn prefetch(&self, count: u16) -> Result<(), AmqpError>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<(), AmqpError>;

    /// Publishes a body and resolves once the broker confirmed it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), AmqpError>;
}

/// An established connection to one broker.
#[async_trait]
pub trait Session: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    /// Resolves with a reason once the connection is lost.
    async fn closed(&self) -> String;

    /// Gracefully closes the connection.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Opens sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str, options: &ConnectionOptions) -> Result<Arc<dyn Session>, AmqpError>;
}
