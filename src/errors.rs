// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! `AmqpError` covers everything that can go wrong while talking to the broker:
//! connecting, opening channels, declaring topology, publishing and settling
//! deliveries. `ValidationError` is produced by the schema layer, and
//! `PublishError` is the error slot of a publish result.

use thiserror::Error;

/// Represents errors that can occur during AMQP operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Configuration could not be read or was malformed
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    /// A queue or exchange was described with an empty name
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Error establishing a connection to the broker
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// The operation needs a live channel and there is none right now
    #[error("not connected")]
    NotConnected,

    /// The connection manager was closed
    #[error("connection closed")]
    Closed,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("failure to declare consumer on queue `{0}`")]
    ConsumerDeclarationError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,
}

/// Why a payload was refused by the schema layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The body is not UTF-8 text
    #[error("payload is not valid utf-8: {0}")]
    Encoding(String),

    /// The body is not JSON at all
    #[error("payload is not valid json: {0}")]
    Malformed(String),

    /// The body is JSON but does not have the expected shape
    #[error("payload does not match the message type: {0}")]
    Mismatch(String),

    /// The body has the expected shape but breaks a validation rule
    #[error("payload failed validation: {0}")]
    Invalid(String),
}

/// Error slot of [`crate::publisher::publish`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] AmqpError),
}

/// Error returned by a consumer handler. Any handler error requeues the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler failure: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        HandlerError(msg.into())
    }
}
