// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumer
//!
//! [`consume`] subscribes a handler to a queue channel. Every delivery goes
//! through the same steps:
//!
//! 1. The body is decoded and validated against the handler's message type.
//!    A body that fails is rejected without requeue: it would never parse,
//!    so requeuing it would loop forever.
//! 2. The handler runs on its own task, so slow handlers do not hold back
//!    reception. Concurrency is bounded by the queue prefetch.
//! 3. A handler success acknowledges the message, a handler failure (error or
//!    panic) rejects it with requeue. Whether that loops is up to the handler.
//!
//! The subscription is a setup action, so it is restored after reconnects.

use crate::{
    broker::{BrokerChannel, Delivery, DeliveryStream},
    errors::{AmqpError, HandlerError},
    otel,
    schema::{self, MessageSchema},
    topology::QueueChannel,
};
use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use opentelemetry::{
    global,
    trace::{Span, Status},
    Context,
};
use std::{borrow::Cow, panic::AssertUnwindSafe, sync::Arc};
use tracing::{debug, error, warn};

/// User logic invoked for every valid message.
#[async_trait]
pub trait ConsumerHandler<T>: Send + Sync {
    /// Handles one message. `ctx` carries the trace context of the publisher.
    async fn exec(&self, ctx: &Context, msg: T, raw: &Delivery) -> Result<(), HandlerError>;
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled successfully and acknowledged
    Acked,
    /// Handler failed; rejected with requeue
    Requeued,
    /// Refused by the schema; rejected without requeue
    Rejected,
}

#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    /// Consumer tag. The broker picks one when unset.
    pub consumer_tag: Option<String>,
}

/// Consumes `queue` with `handler`.
///
/// Registers the subscription as a setup action of the queue channel, which
/// starts it now if connected and again after every reconnect.
///
/// # Parameters
/// * `queue` - Queue channel to consume from
/// * `handler` - Logic invoked for every valid message
/// * `options` - Consumer settings
///
/// # Returns
/// Ok(()) once registered. When connected, the error of the first
/// subscription attempt is returned; the subscription is retried on
/// reconnect either way.
pub async fn consume<T, H>(queue: &QueueChannel, handler: H, options: ConsumeOptions) -> Result<(), AmqpError>
where
    T: MessageSchema,
    H: ConsumerHandler<T> + 'static,
{
    let handler = Arc::new(handler);
    let name = queue.name().to_owned();
    let tag = options.consumer_tag.unwrap_or_default();

    queue
        .channel()
        .add_setup(move |channel: Arc<dyn BrokerChannel>| {
            let handler = handler.clone();
            let name = name.clone();
            let tag = tag.clone();

            async move {
                let deliveries = channel.consume(&name, &tag).await?;
                debug!(queue = %name, "consumer started");

                tokio::spawn(drain::<T, H>(channel, name, deliveries, handler));
                Ok(())
            }
        })
        .await
}

/// Spawns the handling of every delivery until the stream ends.
async fn drain<T, H>(
    channel: Arc<dyn BrokerChannel>,
    queue: String,
    mut deliveries: DeliveryStream,
    handler: Arc<H>,
) where
    T: MessageSchema,
    H: ConsumerHandler<T> + 'static,
{
    while let Some(delivery) = deliveries.next().await {
        let channel = channel.clone();
        let handler = handler.clone();

        tokio::spawn(async move {
            handle_delivery::<T, H>(channel.as_ref(), handler.as_ref(), &delivery).await;
        });
    }

    warn!(queue = %queue, "consumer cancelled by the server");
}

/// Validates, handles and settles a single delivery.
pub(crate) async fn handle_delivery<T, H>(channel: &dyn BrokerChannel, handler: &H, delivery: &Delivery) -> Outcome
where
    T: MessageSchema,
    H: ConsumerHandler<T>,
{
    let tracer = global::tracer("amqp consumer");
    let (ctx, mut span) = otel::new_span(&delivery.properties, &tracer, &delivery.routing_key);
    let tag = delivery.delivery_tag;

    debug!(
        tag = tag,
        exchange = %delivery.exchange,
        routing_key = %delivery.routing_key,
        "handling new message"
    );

    let message = match schema::decode::<T>(&delivery.data) {
        Ok(message) => message,
        Err(err) => {
            error!(error = err.to_string(), tag = tag, "error on parsing message, rejecting it");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("invalid message"),
            });

            if let Err(e) = channel.nack(tag, false, false).await {
                error!(error = e.to_string(), "error whiling nack msg");
                span.record_error(&e);
            }
            return Outcome::Rejected;
        }
    };

    let result = AssertUnwindSafe(handler.exec(&ctx, message, delivery))
        .catch_unwind()
        .await;

    let failure = match result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(_) => Some(HandlerError::new("handler panicked")),
    };

    match failure {
        None => {
            debug!(tag = tag, "message successfully processed");
            match channel.ack(tag).await {
                Err(e) => {
                    error!(error = e.to_string(), "error whiling ack msg");
                    span.record_error(&e);
                    span.set_status(Status::Error {
                        description: Cow::from("error to ack msg"),
                    });
                }
                _ => span.set_status(Status::Ok),
            }
            Outcome::Acked
        }
        Some(err) => {
            warn!(error = err.to_string(), tag = tag, "error whiling handling msg, requeuing for latter");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("handler failure"),
            });

            if let Err(e) = channel.nack(tag, false, true).await {
                error!(error = e.to_string(), "error whiling requeuing");
                span.record_error(&e);
            }
            Outcome::Requeued
        }
    }
}
