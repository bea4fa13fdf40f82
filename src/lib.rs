// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Typed AMQP 0-9-1 messaging on top of `lapin`.
//!
//! A [`connection::ConnectionManager`] keeps a session alive and replays the
//! setup of every channel after a reconnect. [`topology::create_queue_channel`]
//! declares a queue with its routes on such a channel, and the queue channel
//! is then used to [`consumer::consume`] and [`publisher::publish`] messages
//! whose bodies are checked against a [`schema::MessageSchema`].

mod otel;

pub mod broker;
pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod queue;
pub mod schema;
pub mod topology;
