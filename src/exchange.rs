// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchanges and Routes
//!
//! An exchange is declared, not owned: many queues may reference the same
//! exchange through their routes, and asserting it again is harmless. A
//! [`Route`] pairs an exchange with the binding key a queue is bound with.

use std::collections::BTreeMap;

/// Represents the types of exchanges a route can target.
///
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Broker directives used when asserting an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub arguments: BTreeMap<String, String>,
}

/// Definition of an exchange.
///
/// Built with chained setters, starting from a direct, non-durable exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) options: ExchangeOptions,
}

impl Exchange {
    /// Creates a new direct exchange definition with the given name.
    pub fn new(name: &str) -> Exchange {
        Exchange {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            options: ExchangeOptions::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn options(&self) -> &ExchangeOptions {
        &self.options
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(mut self) -> Self {
        self.kind = ExchangeKind::Direct;
        self
    }

    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.options.durable = true;
        self
    }

    /// Sets the exchange to auto-delete when the last queue is unbound.
    pub fn delete(mut self) -> Self {
        self.options.auto_delete = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.options.internal = true;
        self
    }

    /// Adds a single declaration argument to the exchange.
    pub fn argument(mut self, key: &str, value: &str) -> Self {
        self.options.arguments.insert(key.to_owned(), value.to_owned());
        self
    }
}

/// A binding from an exchange to a queue.
///
/// The binding key is used as the routing key when publishing through the route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub(crate) exchange: Exchange,
    pub(crate) binding: String,
}

impl Route {
    pub fn new(exchange: Exchange, binding: &str) -> Route {
        Route {
            exchange,
            binding: binding.to_owned(),
        }
    }

    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }
}
