// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Topology
//!
//! A [`QueueTopology`] describes a queue, the routes bound to it and the
//! options it is asserted with. It is plain data: the builder in
//! [`crate::topology`] turns it into setup actions replayed on every
//! (re)connect.

use crate::exchange::Route;

/// Header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Header field used to specify how long an unused queue lives
pub const AMQP_HEADERS_EXPIRES: &str = "x-expires";
/// Header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";
/// Header field used to specify the number of priority levels
pub const AMQP_HEADERS_MAX_PRIORITY: &str = "x-max-priority";

/// Options a queue is asserted with, plus the channel prefetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub message_ttl: Option<u32>,
    pub expires: Option<u32>,
    pub max_length: Option<u32>,
    pub max_length_bytes: Option<u32>,
    pub max_priority: Option<u8>,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    /// Number of messages processed at one time on the queue channel.
    /// Zero means unset.
    pub prefetch: Option<u16>,
}

impl QueueOptions {
    /// Prefetch to apply, if any. Only positive values count.
    pub fn effective_prefetch(&self) -> Option<u16> {
        self.prefetch.filter(|p| *p > 0)
    }
}

/// Definition of a queue and its routes.
///
/// Built with chained setters; starts non-durable, non-exclusive and without routes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueTopology {
    pub(crate) name: String,
    pub(crate) routes: Vec<Route>,
    pub(crate) options: QueueOptions,
}

impl QueueTopology {
    /// Creates a new queue definition with the given name.
    pub fn new(name: &str) -> QueueTopology {
        QueueTopology {
            name: name.to_owned(),
            routes: vec![],
            options: QueueOptions::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Appends a route to the queue.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.options.durable = true;
        self
    }

    /// Sets the queue to auto-delete when its last consumer goes away.
    pub fn delete(mut self) -> Self {
        self.options.auto_delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes, and asserted
    /// again on the next reconnect.
    pub fn exclusive(mut self) -> Self {
        self.options.exclusive = true;
        self
    }

    /// Sets the message Time-To-Live (TTL) in milliseconds.
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.options.message_ttl = Some(ttl);
        self
    }

    pub fn max_length(mut self, max: u32) -> Self {
        self.options.max_length = Some(max);
        self
    }

    pub fn max_length_bytes(mut self, max_bytes: u32) -> Self {
        self.options.max_length_bytes = Some(max_bytes);
        self
    }

    /// Routes rejected and expired messages to `exchange` with the optional routing key.
    pub fn dead_letter(mut self, exchange: &str, routing_key: Option<&str>) -> Self {
        self.options.dead_letter_exchange = Some(exchange.to_owned());
        self.options.dead_letter_routing_key = routing_key.map(str::to_owned);
        self
    }

    /// Sets the number of unacknowledged messages the channel may hold.
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.options.prefetch = Some(prefetch);
        self
    }
}
