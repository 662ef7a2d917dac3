// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

// Allow expect/unwrap in tests - they provide clear panic messages on failure
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Broker pool behaviour against the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker_ha::identity::identity;
use broker_ha::memory::{MemoryBroker, MemoryConnector};
use async_trait::async_trait;
use broker_ha::{
    BrokerAddress, BrokerChannel, BrokerConnector, BrokerPool, BrokerStatus, ConnectOptions,
    ConnectionStatus, Delivery, ExchangeSpec, Inbound, LinkState, PoolError, PublishOptions,
    QueueSpec, ReconnectPolicy, SubscribeOptions, TransportError,
};
use bytes::Bytes;
use fleet_packets::{JsonSerializer, Packet, PacketKind, Request, ResultPacket, Serializer};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};

// ============================================================================
// Test Infrastructure
// ============================================================================

const BASE_PORT: u16 = 6001;

struct Fixture {
    pool: BrokerPool,
    brokers: Vec<MemoryBroker>,
    ids: Vec<String>,
}

/// Pool over `count` in-memory brokers. Brokers whose index is listed in
/// `unreachable` refuse the initial connect.
async fn fixture_with(count: usize, unreachable: &[usize], options: ConnectOptions) -> Fixture {
    let connector = Arc::new(MemoryConnector::new());
    let ports: Vec<u16> = (0..count as u16).map(|i| BASE_PORT + i).collect();
    let brokers: Vec<MemoryBroker> = ports
        .iter()
        .map(|port| connector.add("localhost", *port))
        .collect();
    for idx in unreachable {
        brokers[*idx].refuse_connects(true);
    }

    let port_list = ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let options = ConnectOptions {
        host: Some("localhost".to_string()),
        port: Some(port_list),
        ..options
    };
    let pool = BrokerPool::connect(Some(Arc::new(JsonSerializer)), connector, options)
        .await
        .expect("failed to build pool");

    Fixture {
        pool,
        brokers,
        ids: ports.iter().map(|p| identity("localhost", *p)).collect(),
    }
}

async fn fixture(count: usize) -> Fixture {
    fixture_with(count, &[], ConnectOptions::default()).await
}

/// Poll `cond` until it holds, failing the test after about a second.
async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn request_packet(message_type: &str) -> Packet {
    Packet::from(Request::new(message_type, json!({"n": 1}), "agent-1"))
}

fn encoded(packet: &Packet) -> Bytes {
    JsonSerializer.dump(packet).unwrap()
}

fn fanout() -> PublishOptions {
    PublishOptions {
        fanout: true,
        ..Default::default()
    }
}

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn connect_marks_every_reachable_broker_connected() {
    let f = fixture(3).await;
    assert_eq!(f.pool.connected(), f.ids);
    assert_eq!(f.pool.identities(), f.ids);

    let aliases: Vec<String> = f.pool.brokers().into_iter().map(|b| b.alias).collect();
    assert_eq!(aliases, vec!["b0", "b1", "b2"]);
}

#[tokio::test]
async fn unreachable_broker_is_left_uninitialized() {
    let f = fixture_with(3, &[1], ConnectOptions::default()).await;
    assert_eq!(f.pool.status(&f.ids[1]), Some(BrokerStatus::Uninitialized));
    assert_eq!(f.pool.connected(), vec![f.ids[0].clone(), f.ids[2].clone()]);
}

#[tokio::test]
async fn malformed_lists_fail_construction() {
    let connector = Arc::new(MemoryConnector::new());
    let result = BrokerPool::connect(
        None,
        connector,
        ConnectOptions::new("a,b", "6001,6002,6003"),
    )
    .await;
    assert!(matches!(result, Err(PoolError::Config(_))));
}

// ============================================================================
// Publish
// ============================================================================

#[tokio::test]
async fn fanout_publishes_to_every_connected_broker() {
    let f = fixture(3).await;
    let ids = f
        .pool
        .publish(&ExchangeSpec::fanout("registration"), request_packet("/register"), &fanout())
        .await
        .unwrap();

    assert_eq!(ids, f.ids);
    for broker in &f.brokers {
        assert_eq!(broker.published().len(), 1);
        assert_eq!(broker.published()[0].exchange, "registration");
    }
}

#[tokio::test]
async fn fanout_skips_failing_brokers() {
    let f = fixture(3).await;
    f.brokers[1].fail_publish(true);

    let ids = f
        .pool
        .publish(&ExchangeSpec::fanout("registration"), request_packet("/register"), &fanout())
        .await
        .unwrap();

    assert_eq!(ids, vec![f.ids[0].clone(), f.ids[2].clone()]);
    assert!(f.brokers[1].published().is_empty());
}

#[tokio::test]
async fn publish_with_no_accepting_broker_fails() {
    let f = fixture(3).await;
    for broker in &f.brokers {
        broker.fail_publish(true);
    }

    let err = f
        .pool
        .publish(&ExchangeSpec::fanout("registration"), request_packet("/register"), &fanout())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PoolError::NoUsableBroker {
            allowed: false,
            count: 3
        }
    ));
    assert_eq!(err.to_string(), "None of 3 broker connections are usable");
}

#[tokio::test]
async fn non_fanout_stops_at_first_success() {
    let f = fixture(3).await;
    let exchange = ExchangeSpec::direct("request").no_declare();

    let ids = f
        .pool
        .publish(&exchange, request_packet("/state/get"), &PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(ids, vec![f.ids[0].clone()]);
    assert!(f.brokers[1].published().is_empty());
    assert!(f.brokers[2].published().is_empty());

    f.brokers[0].fail_publish(true);
    let ids = f
        .pool
        .publish(&exchange, request_packet("/state/get"), &PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(ids, vec![f.ids[1].clone()]);
    assert!(f.brokers[2].published().is_empty());
}

#[tokio::test]
async fn publish_honours_broker_allow_list() {
    let f = fixture(3).await;
    let exchange = ExchangeSpec::direct("request");

    let options = PublishOptions {
        brokers: vec![f.ids[2].clone()],
        persistent: true,
        ..Default::default()
    };
    let ids = f
        .pool
        .publish(&exchange, request_packet("/mapper/ping"), &options)
        .await
        .unwrap();
    assert_eq!(ids, vec![f.ids[2].clone()]);
    assert!(f.brokers[2].published()[0].persistent);

    f.brokers[2].fail_publish(true);
    let err = f
        .pool
        .publish(&exchange, request_packet("/mapper/ping"), &options)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "None of the allowed 1 broker connections are usable"
    );
}

#[tokio::test]
async fn publish_raw_bytes_passes_through() {
    let f = fixture(1).await;
    f.pool
        .publish(
            &ExchangeSpec::direct("raw"),
            Bytes::from_static(b"opaque"),
            &PublishOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        f.brokers[0].published()[0].body,
        Bytes::from_static(b"opaque")
    );
}

#[tokio::test]
async fn publish_packet_without_serializer_fails() {
    let connector = Arc::new(MemoryConnector::new());
    connector.add("localhost", BASE_PORT);
    let pool = BrokerPool::connect(
        None,
        connector,
        ConnectOptions::new("localhost", BASE_PORT.to_string()),
    )
    .await
    .unwrap();

    let err = pool
        .publish(
            &ExchangeSpec::direct("request"),
            request_packet("/x"),
            &PublishOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::NotSerializable(_)));
}

// ============================================================================
// Connection status
// ============================================================================

#[tokio::test]
async fn observer_fires_only_on_zero_edges() {
    let f = fixture(2).await;
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        f.pool
            .on_connection_status(move |status| events.lock().unwrap().push(status));
    }
    let status = |idx: usize| f.pool.status(&f.ids[idx]);

    f.brokers[0].set_down();
    eventually("b0 down", || status(0) == Some(BrokerStatus::Disconnected)).await;
    assert!(events.lock().unwrap().is_empty());

    f.brokers[1].set_down();
    eventually("b1 down", || status(1) == Some(BrokerStatus::Disconnected)).await;
    assert_eq!(*events.lock().unwrap(), vec![ConnectionStatus::Disconnected]);

    f.brokers[0].set_up();
    eventually("b0 up", || status(0) == Some(BrokerStatus::Connected)).await;
    f.brokers[1].set_up();
    eventually("b1 up", || status(1) == Some(BrokerStatus::Connected)).await;
    assert_eq!(
        *events.lock().unwrap(),
        vec![ConnectionStatus::Disconnected, ConnectionStatus::Connected]
    );
}

#[tokio::test]
async fn disconnected_broker_is_skipped_by_publish() {
    let f = fixture(2).await;
    f.brokers[0].set_down();
    eventually("b0 down", || {
        f.pool.status(&f.ids[0]) == Some(BrokerStatus::Disconnected)
    })
    .await;

    let ids = f
        .pool
        .publish(
            &ExchangeSpec::direct("request"),
            request_packet("/x"),
            &PublishOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(ids, vec![f.ids[1].clone()]);
}

// ============================================================================
// Subscribe / receive
// ============================================================================

#[tokio::test]
async fn subscribe_acks_before_callback() {
    let f = fixture(2).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let b0 = f.brokers[0].clone();

    let ids = f
        .pool
        .subscribe(
            &QueueSpec::new("agent-1"),
            &ExchangeSpec::direct("agent"),
            SubscribeOptions {
                ack: true,
                ..Default::default()
            },
            move |inbound| {
                let _ = tx.send((b0.acked(), inbound));
            },
        )
        .await;
    assert_eq!(ids, f.ids);

    let packet = Packet::from(ResultPacket::new("t1", "mapper", json!({})));
    f.brokers[0].deliver("agent-1", encoded(&packet));

    let (acked, inbound) = rx.recv().await.unwrap();
    assert_eq!(acked, vec![1]);
    assert_eq!(
        inbound,
        Inbound::Packet {
            broker: f.ids[0].clone(),
            packet
        }
    );
}

#[tokio::test]
async fn subscribe_drops_unaccepted_packet_kinds() {
    let f = fixture(1).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    f.pool
        .subscribe(
            &QueueSpec::new("agent-1"),
            &ExchangeSpec::direct("agent"),
            SubscribeOptions {
                accept: vec![PacketKind::Result],
                category: Some("response".to_string()),
                ..Default::default()
            },
            move |inbound| {
                let _ = tx.send(inbound);
            },
        )
        .await;

    let result = Packet::from(ResultPacket::new("t2", "mapper", json!({})));
    f.brokers[0].deliver("agent-1", encoded(&request_packet("/x")));
    f.brokers[0].deliver("agent-1", Bytes::from_static(b"garbage"));
    f.brokers[0].deliver("agent-1", encoded(&result));

    match rx.recv().await.unwrap() {
        Inbound::Packet { packet, .. } => assert_eq!(packet, result),
        other => panic!("unexpected delivery {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn subscribe_without_decoding_hands_over_bytes() {
    let f = fixture(1).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    f.pool
        .subscribe(
            &QueueSpec::new("raw"),
            &ExchangeSpec::fanout("raw"),
            SubscribeOptions {
                no_unserialize: true,
                ..Default::default()
            },
            move |inbound| {
                let _ = tx.send(inbound);
            },
        )
        .await;

    f.pool
        .publish(
            &ExchangeSpec::fanout("raw"),
            Bytes::from_static(b"\x00\x01"),
            &PublishOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        rx.recv().await.unwrap(),
        Inbound::Raw {
            broker: f.ids[0].clone(),
            body: Bytes::from_static(b"\x00\x01"),
        }
    );
    assert!(f.brokers[0].acked().is_empty());
}

#[tokio::test]
async fn subscribe_skips_disconnected_brokers() {
    let f = fixture(3).await;
    f.brokers[1].set_down();
    eventually("b1 down", || {
        f.pool.status(&f.ids[1]) == Some(BrokerStatus::Disconnected)
    })
    .await;

    let ids = f
        .pool
        .subscribe(
            &QueueSpec::new("q"),
            &ExchangeSpec::direct("x"),
            SubscribeOptions::default(),
            |_| {},
        )
        .await;
    assert_eq!(ids, vec![f.ids[0].clone(), f.ids[2].clone()]);
}

#[tokio::test]
async fn receive_filters_and_reports_decode_errors() {
    let f = fixture(1).await;
    let options = SubscribeOptions {
        accept: vec![PacketKind::Request],
        ..Default::default()
    };

    let packet = request_packet("/x");
    assert_eq!(
        f.pool.receive(&f.ids[0], &encoded(&packet), &options).unwrap(),
        Some(packet)
    );

    let result = Packet::from(ResultPacket::new("t", "m", json!(null)));
    assert_eq!(
        f.pool.receive(&f.ids[0], &encoded(&result), &options).unwrap(),
        None
    );

    assert!(matches!(
        f.pool.receive(&f.ids[0], b"{", &options),
        Err(PoolError::Serialization(_))
    ));
}

// ============================================================================
// Queue management
// ============================================================================

#[tokio::test]
async fn delete_and_prefetch_apply_to_usable_brokers() {
    let f = fixture_with(2, &[1], ConnectOptions::default()).await;

    assert_eq!(f.pool.delete("stale").await, vec![f.ids[0].clone()]);
    assert_eq!(f.brokers[0].deleted_queues(), vec!["stale"]);
    assert!(f.brokers[1].deleted_queues().is_empty());

    assert!(f.pool.prefetch(1).await);
    assert_eq!(f.brokers[0].prefetch_value(), Some(1));
    assert_eq!(f.brokers[1].prefetch_value(), None);
}

#[tokio::test]
async fn deleted_queue_is_not_resubscribed_on_reconnect() {
    let f = fixture(1).await;
    let delivered = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    {
        let delivered = delivered.clone();
        f.pool
            .subscribe(
                &QueueSpec::new("stale"),
                &ExchangeSpec::direct("x"),
                SubscribeOptions::default(),
                move |_| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;
    }
    f.pool
        .subscribe(
            &QueueSpec::new("kept"),
            &ExchangeSpec::direct("y"),
            SubscribeOptions::default(),
            move |inbound| {
                let _ = tx.send(inbound);
            },
        )
        .await;

    assert_eq!(f.pool.delete("stale").await, f.ids);
    f.pool.reconnect(&f.ids[0]).await.unwrap();

    f.pool
        .publish(
            &ExchangeSpec::direct("x"),
            request_packet("/x"),
            &PublishOptions::default(),
        )
        .await
        .unwrap();
    f.pool
        .publish(
            &ExchangeSpec::direct("y"),
            request_packet("/y"),
            &PublishOptions::default(),
        )
        .await
        .unwrap();

    // The surviving subscription was re-applied
    assert!(matches!(rx.recv().await.unwrap(), Inbound::Packet { .. }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn close_completes_once_after_every_broker() {
    let f = fixture_with(3, &[1], ConnectOptions::default()).await;
    f.brokers[2].fail_close(true);

    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let observed = observed.clone();
        f.pool
            .on_connection_status(move |status| observed.lock().unwrap().push(status));
    }

    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    {
        let fired = fired.clone();
        f.pool.close(move || {
            fired.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        });
    }
    rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    for id in &f.ids {
        assert_eq!(f.pool.status(id), Some(BrokerStatus::Closed));
    }
    assert_eq!(f.brokers[0].close_count(), 1);
    assert_eq!(f.brokers[1].close_count(), 0);
    assert_eq!(f.brokers[2].close_count(), 1);
    assert!(observed.lock().unwrap().is_empty());
    assert!(f.pool.connected().is_empty());
}

#[tokio::test]
async fn closing_a_closed_pool_completes_immediately() {
    let f = fixture(2).await;
    f.pool.shutdown().await;

    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        f.pool.close(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(f.brokers[0].close_count(), 1);
}

#[tokio::test]
async fn closed_broker_ignores_link_changes() {
    let f = fixture(1).await;
    f.pool.shutdown().await;

    f.brokers[0].set_down();
    f.brokers[0].set_up();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(f.pool.status(&f.ids[0]), Some(BrokerStatus::Closed));
}

// ============================================================================
// Reconnect
// ============================================================================

fn quick_reconnect(attempts: u32) -> ConnectOptions {
    ConnectOptions {
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(5)),
        reconnect_attempts: attempts,
        ..Default::default()
    }
}

#[tokio::test]
async fn reconnect_restores_broker_and_subscriptions() {
    let f = fixture_with(1, &[0], quick_reconnect(10)).await;
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        f.pool
            .on_connection_status(move |status| events.lock().unwrap().push(status));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let ids = f
        .pool
        .subscribe(
            &QueueSpec::new("agent-1"),
            &ExchangeSpec::direct("agent"),
            SubscribeOptions::default(),
            move |inbound| {
                let _ = tx.send(inbound);
            },
        )
        .await;
    assert!(ids.is_empty());

    f.brokers[0].refuse_connects(false);
    f.pool.reconnect(&f.ids[0]).await.unwrap();
    assert_eq!(f.pool.status(&f.ids[0]), Some(BrokerStatus::Connected));
    assert_eq!(*events.lock().unwrap(), vec![ConnectionStatus::Connected]);

    let packet = Packet::from(ResultPacket::new("t3", "mapper", json!({})));
    f.brokers[0].deliver("agent-1", encoded(&packet));
    assert!(matches!(rx.recv().await.unwrap(), Inbound::Packet { .. }));
}

#[tokio::test]
async fn reconnect_retries_until_the_broker_accepts() {
    let f = fixture_with(1, &[0], quick_reconnect(100)).await;
    let broker = f.brokers[0].clone();

    let reconnect = {
        let pool = f.pool.clone();
        let id = f.ids[0].clone();
        tokio::spawn(async move { pool.reconnect(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(f.pool.status(&f.ids[0]), Some(BrokerStatus::Uninitialized));

    broker.refuse_connects(false);
    reconnect.await.unwrap().unwrap();
    assert_eq!(f.pool.connected(), f.ids);
    assert_eq!(broker.connect_count(), 1);
}

#[tokio::test]
async fn reconnect_gives_up_after_configured_attempts() {
    let f = fixture_with(1, &[0], quick_reconnect(3)).await;
    let err = f.pool.reconnect(&f.ids[0]).await.unwrap_err();
    assert!(matches!(err, PoolError::Transport { .. }));
    assert_eq!(f.pool.status(&f.ids[0]), Some(BrokerStatus::Uninitialized));
}

#[tokio::test]
async fn reconnect_rejects_unknown_and_closed_brokers() {
    let f = fixture(1).await;
    assert!(matches!(
        f.pool.reconnect("fleet-broker-1-nowhere").await,
        Err(PoolError::UnknownBroker(_))
    ));

    f.pool.shutdown().await;
    assert!(matches!(
        f.pool.reconnect(&f.ids[0]).await,
        Err(PoolError::BrokerClosed(_))
    ));
}

/// Channel with a controllable link whose close takes a while
struct SlowCloseChannel {
    link: watch::Sender<LinkState>,
    close_delay: Duration,
}

impl SlowCloseChannel {
    fn new(close_delay: Duration) -> Arc<Self> {
        let (link, _) = watch::channel(LinkState::Up);
        Arc::new(SlowCloseChannel { link, close_delay })
    }
}

#[async_trait]
impl BrokerChannel for SlowCloseChannel {
    async fn consume(
        &self,
        _queue: &QueueSpec,
        _exchange: &ExchangeSpec,
        _ack: bool,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>, TransportError> {
        let (_, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }

    async fn ack(&self, _tag: u64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn publish(
        &self,
        _exchange: &ExchangeSpec,
        _body: Bytes,
        _persistent: bool,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn delete_queue(&self, _name: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn prefetch(&self, _count: u16) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        tokio::time::sleep(self.close_delay).await;
        Ok(())
    }

    fn link(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }
}

/// Hands out prepared channels in order
struct ScriptedConnector {
    channels: Mutex<Vec<Arc<SlowCloseChannel>>>,
}

#[async_trait]
impl BrokerConnector for ScriptedConnector {
    async fn connect(
        &self,
        address: &BrokerAddress,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let mut channels = self.channels.lock().unwrap();
        if channels.is_empty() {
            return Err(TransportError::ConnectionRefused(address.to_string()));
        }
        Ok(channels.remove(0))
    }
}

#[tokio::test]
async fn link_drop_during_reconnect_is_not_overwritten() {
    let first = SlowCloseChannel::new(Duration::from_millis(50));
    let second = SlowCloseChannel::new(Duration::ZERO);
    let connector = Arc::new(ScriptedConnector {
        channels: Mutex::new(vec![first, second.clone()]),
    });
    let pool = BrokerPool::connect(
        None,
        connector,
        ConnectOptions::new("localhost", BASE_PORT.to_string()),
    )
    .await
    .unwrap();
    let id = identity("localhost", BASE_PORT);
    assert_eq!(pool.status(&id), Some(BrokerStatus::Connected));

    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        pool.on_connection_status(move |status| events.lock().unwrap().push(status));
    }

    let reconnect = {
        let pool = pool.clone();
        let id = id.clone();
        tokio::spawn(async move { pool.reconnect(&id).await })
    };
    // The first channel is still closing
    tokio::time::sleep(Duration::from_millis(10)).await;
    second.link.send_replace(LinkState::Down);
    eventually("link drop to be recorded", || {
        pool.status(&id) == Some(BrokerStatus::Disconnected)
    })
    .await;

    reconnect.await.unwrap().unwrap();
    assert_eq!(pool.status(&id), Some(BrokerStatus::Disconnected));
    assert!(pool.connected().is_empty());
    assert_eq!(*events.lock().unwrap(), vec![ConnectionStatus::Disconnected]);
}
