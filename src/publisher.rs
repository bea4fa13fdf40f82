// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Publishes schema-checked messages on a queue channel. A message that fails
//! validation never reaches the broker. Publication waits for the broker
//! confirmation, and every outcome is reported through the returned
//! `Result`.

use crate::{
    broker::{MessageProperties, JSON_CONTENT_TYPE},
    errors::PublishError,
    exchange::Route,
    otel,
    schema::{self, MessageSchema},
    topology::QueueChannel,
};
use opentelemetry::Context;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// What to publish, and where.
#[derive(Debug)]
pub struct PublishOptions<'a, T> {
    pub message: &'a T,
    /// Channel the message is published on
    pub queue: &'a QueueChannel,
    /// Target exchange and routing key
    pub route: &'a Route,
    pub headers: Option<BTreeMap<String, String>>,
    /// AMQP `type` property
    pub kind: Option<String>,
}

impl<'a, T> PublishOptions<'a, T> {
    /// Options without headers or message type.
    pub fn new(message: &'a T, queue: &'a QueueChannel, route: &'a Route) -> Self {
        PublishOptions {
            message,
            queue,
            route,
            headers: None,
            kind: None,
        }
    }

    /// Adds a header, replacing any previous value for `key`.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_owned());
        self
    }
}

/// Validates, encodes and publishes a message.
///
/// The body is JSON with content type `application/json`, a fresh v4 UUID as
/// message id, the caller headers plus the current trace context as headers.
/// It is published to the route's exchange with the route's binding as
/// routing key.
///
/// # Parameters
/// * `opts` - Message, queue channel, route and extra headers
///
/// # Returns
/// Ok(()) once the broker confirmed the message.
/// `PublishError::Validation` when the message breaks its rules, in which
/// case nothing is sent. `PublishError::Transport` when there is no live
/// channel or the broker refused the message.
pub async fn publish<T: MessageSchema>(opts: PublishOptions<'_, T>) -> Result<(), PublishError> {
    let body = match schema::encode(opts.message) {
        Ok(body) => body,
        Err(err) => {
            warn!(error = err.to_string(), "refusing to publish an invalid message");
            return Err(err.into());
        }
    };

    let mut headers = opts.headers.unwrap_or_default();
    otel::inject_context(&Context::current(), &mut headers);

    let properties = MessageProperties {
        content_type: Some(JSON_CONTENT_TYPE.to_owned()),
        message_id: Some(Uuid::new_v4().to_string()),
        kind: opts.kind,
        headers,
    };

    let exchange = opts.route.exchange.name.as_str();
    let routing_key = opts.route.binding.as_str();

    match opts
        .queue
        .channel()
        .publish(exchange, routing_key, body, properties)
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                exchange = %exchange,
                routing_key = %routing_key,
                "error publishing message"
            );
            Err(err.into())
        }
        _ => {
            debug!(exchange = %exchange, routing_key = %routing_key, "message published");
            Ok(())
        }
    }
}
