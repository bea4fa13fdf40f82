// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod support;

use amqp_kit::{
    broker::{BrokerChannel, MessageProperties},
    connection::{ConnectionEvent, ConnectionManager},
    errors::AmqpError,
    exchange::{Exchange, Route},
    queue::QueueTopology,
    topology::{add_routes, create_queue_channel},
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use support::{Call, FakeBroker, DOWN_URL, UP_URL};

fn count(calls: &[Call], wanted: &Call) -> usize {
    calls.iter().filter(|call| *call == wanted).count()
}

#[tokio::test(start_paused = true)]
async fn replays_setup_in_registration_order() {
    support::init_logs();
    let broker = FakeBroker::new();
    let manager = ConnectionManager::connect(support::options(vec![UP_URL]), broker.transport());
    let mut events = manager.subscribe();
    support::connected(&mut events).await;

    let handle = manager.create_channel().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let order = order.clone();
        handle
            .add_setup(move |_channel: Arc<dyn BrokerChannel>| {
                order.lock().unwrap().push(name);
                async { Ok(()) }
            })
            .await
            .unwrap();
    }

    broker.drop_connection("connection reset by peer");
    let dropped = support::next_event(&mut events, support::disconnected).await;
    assert_eq!(
        dropped,
        ConnectionEvent::Disconnected {
            reason: "connection reset by peer".to_owned()
        }
    );
    support::connected(&mut events).await;

    assert_eq!(
        *order.lock().unwrap(),
        vec!["first", "second", "third", "first", "second", "third"]
    );
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn reasserts_topology_on_every_reconnect() {
    let broker = FakeBroker::new();
    let manager = ConnectionManager::connect(support::options(vec![UP_URL]), broker.transport());
    let mut events = manager.subscribe();
    support::connected(&mut events).await;

    let topology = QueueTopology::new("orders")
        .durable()
        .prefetch(10)
        .route(Route::new(Exchange::new("sales").topic(), "order.created"));
    create_queue_channel(&manager, topology).await.unwrap();

    for _ in 0..2 {
        broker.drop_connection("broker restarted");
        support::next_event(&mut events, support::disconnected).await;
        support::connected(&mut events).await;
    }

    let calls = broker.calls();
    assert_eq!(count(&calls, &Call::AssertQueue("orders".to_owned())), 3);
    assert_eq!(count(&calls, &Call::AssertExchange("sales".to_owned())), 3);
    assert_eq!(count(&calls, &Call::Prefetch(10)), 3);
    assert_eq!(
        count(
            &calls,
            &Call::Bind {
                queue: "orders".to_owned(),
                exchange: "sales".to_owned(),
                binding: "order.created".to_owned(),
            }
        ),
        3
    );
    assert_eq!(broker.connects(), 3);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn add_routes_leaves_the_original_untouched() {
    let broker = FakeBroker::new();
    let manager = ConnectionManager::connect(support::options(vec![UP_URL]), broker.transport());
    let mut events = manager.subscribe();
    support::connected(&mut events).await;

    let audit = Route::new(Exchange::new("audit").fanout(), "");
    let queue = create_queue_channel(&manager, QueueTopology::new("ledger"))
        .await
        .unwrap();
    let once = add_routes(&queue, vec![audit.clone()]).await.unwrap();
    let twice = add_routes(&once, vec![audit.clone()]).await.unwrap();

    assert!(queue.routes().is_empty());
    assert_eq!(once.routes(), &[audit.clone()]);
    assert_eq!(twice.routes(), &[audit.clone(), audit.clone()]);
    assert_eq!(twice.channel().setup_count().await, 3);

    broker.clear_calls();
    broker.drop_connection("broker restarted");
    support::next_event(&mut events, support::disconnected).await;
    support::connected(&mut events).await;

    let bind = Call::Bind {
        queue: "ledger".to_owned(),
        exchange: "audit".to_owned(),
        binding: String::new(),
    };
    let calls = broker.calls();
    assert_eq!(count(&calls, &bind), 2);
    assert_eq!(count(&calls, &Call::AssertQueue("ledger".to_owned())), 1);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn add_setup_runs_right_away_when_connected() {
    let broker = FakeBroker::new();
    let manager = ConnectionManager::connect(support::options(vec![UP_URL]), broker.transport());
    let mut events = manager.subscribe();
    support::connected(&mut events).await;

    let handle = manager.create_channel().await.unwrap();
    assert!(handle.is_connected().await);

    let result = handle
        .add_setup(|_channel: Arc<dyn BrokerChannel>| async { Err(AmqpError::InternalError) })
        .await;

    assert_eq!(result, Err(AmqpError::InternalError));
    assert_eq!(handle.setup_count().await, 1);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn falls_back_to_the_next_url() {
    let broker = FakeBroker::new();
    broker.refuse(DOWN_URL);
    let manager = ConnectionManager::connect(support::options(vec![DOWN_URL, UP_URL]), broker.transport());
    let mut events = manager.subscribe();

    let failed = support::next_event(&mut events, |e| matches!(e, ConnectionEvent::ConnectFailed { .. })).await;
    assert!(matches!(failed, ConnectionEvent::ConnectFailed { url, .. } if url == DOWN_URL));

    let up = support::connected(&mut events).await;
    assert_eq!(up, ConnectionEvent::Connected { url: UP_URL.to_owned() });
    assert!(manager.is_connected());
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn channels_created_offline_open_on_connect() {
    let broker = FakeBroker::new();
    broker.refuse(UP_URL);
    let manager = ConnectionManager::connect(support::options_with_interval(vec![UP_URL], 1), broker.transport());
    let mut events = manager.subscribe();
    support::next_event(&mut events, |e| matches!(e, ConnectionEvent::ConnectFailed { .. })).await;

    let queue = create_queue_channel(&manager, QueueTopology::new("later"))
        .await
        .unwrap();
    assert!(!queue.channel().is_connected().await);
    assert_eq!(
        queue
            .channel()
            .publish("", "later", b"{}".to_vec(), MessageProperties::default())
            .await,
        Err(AmqpError::NotConnected)
    );
    assert!(broker.calls().is_empty());

    broker.accept(UP_URL);
    support::connected(&mut events).await;

    assert!(queue.channel().is_connected().await);
    assert_eq!(broker.calls(), vec![Call::AssertQueue("later".to_owned())]);
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_stops_reconnecting() {
    let broker = FakeBroker::new();
    let manager = ConnectionManager::connect(support::options(vec![UP_URL]), broker.transport());
    let mut events = manager.subscribe();
    support::connected(&mut events).await;
    let handle = manager.create_channel().await.unwrap();

    manager.close().await;
    manager.close().await;

    let closed = support::next_event(&mut events, support::disconnected).await;
    assert_eq!(
        closed,
        ConnectionEvent::Disconnected {
            reason: "closed by the client".to_owned()
        }
    );
    assert!(!manager.is_connected());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(broker.closed_sessions(), 1);
    assert_eq!(broker.connects(), 1);
    assert!(matches!(manager.create_channel().await, Err(AmqpError::Closed)));
    assert_eq!(handle.ack(1).await, Err(AmqpError::Closed));
}

#[tokio::test(start_paused = true)]
async fn refuses_queues_without_a_name() {
    let broker = FakeBroker::new();
    let manager = ConnectionManager::connect(support::options(vec![UP_URL]), broker.transport());

    let result = create_queue_channel(&manager, QueueTopology::new("")).await;

    assert!(matches!(result, Err(AmqpError::InvalidTopology(_))));
    manager.close().await;
}

#[tokio::test(start_paused = true)]
async fn refused_queues_are_retried_on_reconnect() {
    let broker = FakeBroker::new();
    broker.break_queue("broken", true);
    let manager = ConnectionManager::connect(support::options(vec![UP_URL]), broker.transport());
    let mut events = manager.subscribe();
    support::connected(&mut events).await;

    let queue = create_queue_channel(&manager, QueueTopology::new("broken"))
        .await
        .unwrap();
    assert_eq!(queue.name(), "broken");
    assert_eq!(queue.channel().setup_count().await, 1);
    assert!(queue.channel().is_connected().await);

    broker.break_queue("broken", false);
    broker.clear_calls();
    broker.drop_connection("broker restarted");
    support::next_event(&mut events, support::disconnected).await;
    support::connected(&mut events).await;

    assert_eq!(broker.calls(), vec![Call::AssertQueue("broken".to_owned())]);
    queue
        .channel()
        .publish("", "broken", b"{}".to_vec(), MessageProperties::default())
        .await
        .unwrap();
    manager.close().await;
}
