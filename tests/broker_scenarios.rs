//! End-to-end scenarios over real TCP connections: a broker with its
//! server, exercised through the client library and raw protocol frames.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fanout::protocol::{self, Command, CommandKind};
use fanout::{Broker, BrokerConfig, ClientConfig, Consumer, Producer, Server, ServerConfig};

fn start_broker(config: BrokerConfig) -> (Arc<Broker>, Server, String) {
    let broker = Arc::new(Broker::new(config));
    broker.start();
    let server = Server::bind(
        "127.0.0.1:0",
        Arc::clone(&broker),
        ServerConfig::default(),
    )
    .expect("bind server");
    server.start().expect("start server");
    let addr = server.local_addr().to_string();
    (broker, server, addr)
}

fn client_config() -> ClientConfig {
    ClientConfig {
        retry_max: 3,
        retry_interval: Duration::from_millis(50),
        conn_timeout: Duration::from_secs(2),
    }
}

/// Raw PING over a fresh socket; returns the round-trip time.
fn ping(addr: &str) -> Duration {
    let mut stream = std::net::TcpStream::connect(addr).expect("connect for ping");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("read timeout");
    let start = Instant::now();
    protocol::write_command(&mut stream, &Command::ping()).expect("send ping");
    let reply = protocol::read_command(&mut stream).expect("read pong");
    assert_eq!(reply.kind, CommandKind::Pong);
    start.elapsed()
}

#[test]
fn single_consumer_receives_published_message() {
    let (broker, server, addr) = start_broker(BrokerConfig::default());

    let consumer = Consumer::new(client_config());
    consumer.connect(&addr).expect("consumer connect");
    let (tx, rx) = mpsc::channel();
    consumer
        .subscribe("orders", move |cmd| {
            let _ = tx.send(cmd.payload.clone());
        })
        .expect("subscribe");

    let producer = Producer::new(client_config());
    producer.connect(&addr).expect("producer connect");
    producer
        .publish("orders", b"A".to_vec())
        .expect("publish with ack");

    let payload = rx.recv_timeout(Duration::from_secs(5)).expect("push");
    assert_eq!(payload, b"A");

    producer.disconnect();
    consumer.disconnect();
    server.stop();
    broker.stop();
}

#[test]
fn fan_out_delivers_to_every_subscriber_in_order() {
    let (broker, server, addr) = start_broker(BrokerConfig::default());

    let mut consumers = Vec::new();
    let mut inboxes = Vec::new();
    for _ in 0..2 {
        let consumer = Consumer::new(client_config());
        consumer.connect(&addr).expect("consumer connect");
        let (tx, rx) = mpsc::channel();
        consumer
            .subscribe("events", move |cmd| {
                let _ = tx.send(String::from_utf8_lossy(&cmd.payload).into_owned());
            })
            .expect("subscribe");
        consumers.push(consumer);
        inboxes.push(rx);
    }

    let producer = Producer::new(client_config());
    producer.connect(&addr).expect("producer connect");
    for payload in ["x", "y", "z"] {
        producer
            .publish("events", payload.as_bytes().to_vec())
            .expect("publish");
    }

    for rx in &inboxes {
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(rx.recv_timeout(Duration::from_secs(5)).expect("push"));
        }
        assert_eq!(got, vec!["x", "y", "z"]);
    }

    producer.disconnect();
    for consumer in &consumers {
        consumer.disconnect();
    }
    server.stop();
    broker.stop();
}

#[test]
fn slow_subscriber_is_isolated_and_broker_stays_responsive() {
    let (broker, server, addr) = start_broker(BrokerConfig::default());

    // The slow subscriber is attached directly at the broker and its
    // buffer is never drained.
    let slow = broker.subscribe("firehose", "slow-client").expect("slow subscribe");

    let fast = Consumer::new(client_config());
    fast.connect(&addr).expect("fast connect");
    let (tx, rx) = mpsc::channel();
    fast.subscribe("firehose", move |cmd| {
        let _ = tx.send(String::from_utf8_lossy(&cmd.payload).into_owned());
    })
    .expect("fast subscribe");

    let producer = Producer::new(client_config());
    producer.connect(&addr).expect("producer connect");
    for i in 0..200 {
        producer
            .publish("firehose", format!("m{i:03}").into_bytes())
            .expect("publish");
    }

    // The fast subscriber gets all 200 in publish order even while every
    // message past the slow buffer burns the per-subscriber deadline.
    let mut got = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    while got.len() < 200 && Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(payload) => got.push(payload),
            Err(_) => break,
        }
    }
    assert_eq!(got.len(), 200);
    assert_eq!(got[0], "m000");
    assert_eq!(got[199], "m199");
    assert!(got.windows(2).all(|w| w[0] < w[1]), "out of order delivery");

    // The slow buffer holds exactly its capacity; everything else was
    // dropped for that subscriber only.
    assert_eq!(slow.buffered(), 100);

    // And the broker still answers a PING promptly.
    assert!(ping(&addr) < Duration::from_secs(1));

    producer.disconnect();
    fast.disconnect();
    server.stop();
    broker.stop();
}

#[test]
fn ttl_sweep_empties_the_topic_queue() {
    let (broker, server, addr) = start_broker(BrokerConfig {
        message_ttl: Duration::from_millis(100),
        cleanup_interval: Duration::from_millis(50),
        ..BrokerConfig::default()
    });

    let producer = Producer::new(client_config());
    producer.connect(&addr).expect("producer connect");
    producer.publish("stale", b"m".to_vec()).expect("publish");

    // No subscribers: the message sits in the queue until the sweep.
    assert_eq!(broker.get_topic("stale").expect("topic").queue().len(), 1);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(broker.get_topic("stale").expect("topic").queue().len(), 0);

    producer.disconnect();
    server.stop();
    broker.stop();
}

#[test]
fn queue_full_is_reported_in_the_ack() {
    let (broker, server, addr) = start_broker(BrokerConfig {
        max_queue_size: 2,
        ..BrokerConfig::default()
    });

    let producer = Producer::new(client_config());
    producer.connect(&addr).expect("producer connect");

    producer.publish("bounded", b"1".to_vec()).expect("first publish");
    producer.publish("bounded", b"2".to_vec()).expect("second publish");

    let err = producer.publish("bounded", b"3".to_vec()).unwrap_err();
    assert!(err.to_string().contains("queue is full"), "got: {err}");

    producer.disconnect();
    server.stop();
    broker.stop();
}

#[test]
fn ping_pong_within_a_second() {
    let (broker, server, addr) = start_broker(BrokerConfig::default());
    assert!(ping(&addr) < Duration::from_secs(1));
    server.stop();
    broker.stop();
}

#[test]
fn unsubscribe_stops_delivery() {
    let (broker, server, addr) = start_broker(BrokerConfig::default());

    let consumer = Consumer::new(client_config());
    consumer.connect(&addr).expect("consumer connect");
    let (tx, rx) = mpsc::channel();
    consumer
        .subscribe("orders", move |cmd| {
            let _ = tx.send(cmd.payload.clone());
        })
        .expect("subscribe");

    let producer = Producer::new(client_config());
    producer.connect(&addr).expect("producer connect");
    producer.publish("orders", b"before".to_vec()).expect("publish");
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).expect("push"),
        b"before"
    );

    consumer.unsubscribe("orders").expect("unsubscribe");
    // Give the broker a moment to detach the subscription.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(
        broker
            .get_topic("orders")
            .expect("topic")
            .subscriber_count(),
        0
    );

    producer.publish("orders", b"after".to_vec()).expect("publish");
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());

    producer.disconnect();
    consumer.disconnect();
    server.stop();
    broker.stop();
}

#[test]
fn disconnect_tears_down_the_subscriptions() {
    let (broker, server, addr) = start_broker(BrokerConfig::default());

    let consumer = Consumer::new(client_config());
    consumer.connect(&addr).expect("consumer connect");
    consumer.subscribe("orders", |_| {}).expect("subscribe");

    assert_eq!(
        broker.get_topic("orders").expect("topic").subscriber_count(),
        1
    );

    consumer.disconnect();
    // The reader thread notices the close and unsubscribes everything the
    // connection owned.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let count = broker
            .get_topic("orders")
            .expect("topic")
            .subscriber_count();
        if count == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "subscription never torn down");
        std::thread::sleep(Duration::from_millis(50));
    }

    server.stop();
    broker.stop();
}
