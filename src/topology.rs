// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Channels
//!
//! Most services use one channel per queue, so a [`QueueChannel`] is a queue
//! topology paired with the channel it is asserted on. Building one registers
//! a setup action on the connection manager, which means the queue, its
//! exchanges, bindings and prefetch are asserted again after every reconnect.
//! Even non-durable or exclusive queues come back once the broker does.

use crate::{
    broker::BrokerChannel,
    connection::{ChannelHandle, ConnectionManager},
    errors::AmqpError,
    exchange::Route,
    queue::{QueueOptions, QueueTopology},
};
use futures_util::future::{try_join, try_join3, try_join_all};
use std::sync::Arc;
use tracing::{debug, warn};

/// A queue topology bound to a live channel.
///
/// Values are immutable: [`add_routes`] returns a new `QueueChannel`.
#[derive(Debug, Clone)]
pub struct QueueChannel {
    topology: QueueTopology,
    channel: ChannelHandle,
}

impl QueueChannel {
    pub fn name(&self) -> &str {
        &self.topology.name
    }

    pub fn routes(&self) -> &[Route] {
        &self.topology.routes
    }

    pub fn options(&self) -> &QueueOptions {
        &self.topology.options
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    /// Handle of the channel the queue is asserted on.
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }
}

fn check_routes(routes: &[Route]) -> Result<(), AmqpError> {
    match routes.iter().find(|r| r.exchange.name.is_empty()) {
        Some(route) => Err(AmqpError::InvalidTopology(format!(
            "route `{}` has an exchange without a name",
            route.binding
        ))),
        None => Ok(()),
    }
}

/// Asserts the exchange of every route and binds `queue` to it.
///
/// All routes are issued at once; the future completes when every broker
/// call did.
pub(crate) async fn assert_routes(
    channel: &dyn BrokerChannel,
    queue: &str,
    routes: &[Route],
) -> Result<(), AmqpError> {
    try_join_all(routes.iter().map(|route| async move {
        try_join(
            channel.assert_exchange(&route.exchange),
            channel.bind_queue(queue, &route.exchange.name, &route.binding),
        )
        .await
        .map(|_| ())
    }))
    .await
    .map(|_| ())
}

/// Asserts the queue, its routes and the channel prefetch.
pub(crate) async fn assert_topology(
    channel: &dyn BrokerChannel,
    topology: &QueueTopology,
) -> Result<(), AmqpError> {
    debug!(queue = %topology.name, routes = topology.routes.len(), "asserting queue topology");

    let prefetch = async {
        match topology.options.effective_prefetch() {
            Some(count) => channel.prefetch(count).await,
            None => Ok(()),
        }
    };

    try_join3(
        channel.assert_queue(&topology.name, &topology.options),
        assert_routes(channel, &topology.name, &topology.routes),
        prefetch,
    )
    .await
    .map(|_| ())
}

/// Creates a queue channel.
///
/// Opens a new channel on `manager` and registers one setup action that
/// asserts the queue, asserts and binds every route and applies the prefetch.
/// The action runs right away when the manager is connected, and again after
/// every reconnect.
///
/// # Parameters
/// * `manager` - Connection manager owning the channel
/// * `topology` - Queue, routes and options to assert
///
/// # Returns
/// The queue channel, or `InvalidTopology` when a queue or exchange name is
/// empty. A broker refusal of the first assertion is logged and does not
/// fail the call: the channel already belongs to the manager and the
/// assertion is retried on the next reconnect.
pub async fn create_queue_channel(
    manager: &ConnectionManager,
    topology: QueueTopology,
) -> Result<QueueChannel, AmqpError> {
    if topology.name.is_empty() {
        return Err(AmqpError::InvalidTopology("queue name is empty".to_owned()));
    }
    check_routes(&topology.routes)?;

    let channel = manager.create_channel().await?;

    let setup = Arc::new(topology.clone());
    let asserted = channel
        .add_setup(move |broker: Arc<dyn BrokerChannel>| {
            let topology = setup.clone();
            async move { assert_topology(broker.as_ref(), &topology).await }
        })
        .await;

    if let Err(err) = asserted {
        warn!(
            error = err.to_string(),
            queue = %topology.name,
            "failure to assert the queue topology, retrying on reconnect"
        );
    }

    Ok(QueueChannel { topology, channel })
}

/// Adds routes to a queue channel.
///
/// Registers a setup action scoped to `routes` only, so the original topology
/// is not asserted a second time on reconnect. Routes already present are not
/// filtered out.
///
/// # Parameters
/// * `queue` - Queue channel to extend; left untouched
/// * `routes` - Routes to assert and bind
///
/// # Returns
/// A new queue channel whose routes are the previous ones followed by
/// `routes`. As with [`create_queue_channel`], a broker refusal is logged and
/// retried on reconnect.
pub async fn add_routes(queue: &QueueChannel, routes: Vec<Route>) -> Result<QueueChannel, AmqpError> {
    check_routes(&routes)?;

    let name = queue.topology.name.clone();
    let added = Arc::new(routes.clone());
    let bound = queue
        .channel
        .add_setup(move |broker: Arc<dyn BrokerChannel>| {
            let name = name.clone();
            let routes = added.clone();
            async move { assert_routes(broker.as_ref(), &name, &routes).await }
        })
        .await;

    if let Err(err) = bound {
        warn!(
            error = err.to_string(),
            queue = %queue.topology.name,
            "failure to bind the new routes, retrying on reconnect"
        );
    }

    let mut topology = queue.topology.clone();
    topology.routes.extend(routes);

    Ok(QueueChannel {
        topology,
        channel: queue.channel.clone(),
    })
}
