// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 roslink contributors

//! End-to-end pub/sub over real loopback sockets: two nodes, one
//! in-process master, full handshake and framing.

mod common;

use common::{wait_until, Blob};
use parking_lot::Mutex;
use roslink::{Node, NodeConfig, StaticMaster};
use std::sync::Arc;
use std::time::Duration;

fn master() -> Arc<StaticMaster> {
    Arc::new(StaticMaster::new())
}

#[test]
fn test_odom_three_messages_in_order_with_exact_byte_count() {
    let master = master();

    // Publisher serves "odom" from a fixed port, schema checksum "abc123"
    let talker = Node::builder("/talker")
        .master(master.clone())
        .config(NodeConfig {
            bind_addr: "127.0.0.1:9000".to_string(),
            ..NodeConfig::default()
        })
        .build()
        .unwrap();
    let publisher = talker.advertise::<Blob>("odom", 50, false).unwrap();

    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let listener = Node::builder("/listener").master(master).build().unwrap();
    let subscriber = listener
        .subscribe::<Blob, _>("odom", 50, move |blob| sink.lock().push(blob.0))
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || publisher.subscriber_count() == 1),
        "subscriber link never connected"
    );

    let first = vec![0xAAu8; 64];
    let second = vec![0xBBu8; 128];
    let third = vec![0xCCu8; 64];
    publisher.publish(&Blob(first.clone())).unwrap();
    publisher.publish(&Blob(second.clone())).unwrap();
    publisher.publish(&Blob(third.clone())).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || received.lock().len() == 3),
        "expected 3 messages, got {}",
        received.lock().len()
    );
    assert_eq!(*received.lock(), vec![first, second, third]);

    // Byte counter covers payload bytes only: 64 + 128 + 64
    let stats = subscriber.link_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].bytes_received, 256);
    assert_eq!(stats[0].messages_received, 3);

    listener.shutdown();
    talker.shutdown();
}

#[test]
fn test_schema_mismatch_never_connects() {
    // Same topic name, different checksum on the subscriber side
    #[derive(Clone, Debug)]
    struct OtherBlob(Vec<u8>);
    impl roslink::Message for OtherBlob {
        fn data_type() -> String {
            "test_msgs/Blob".to_string()
        }
        fn md5sum() -> String {
            "zzz999".to_string()
        }
        fn serialize(&self, buf: &mut Vec<u8>) {
            buf.extend_from_slice(&self.0);
        }
        fn deserialize(bytes: &[u8]) -> roslink::Result<Self> {
            Ok(Self(bytes.to_vec()))
        }
    }

    let master = master();
    let talker = Node::builder("/talker").master(master.clone()).build().unwrap();
    let publisher = talker.advertise::<Blob>("/scan", 50, false).unwrap();

    let listener = Node::builder("/listener").master(master).build().unwrap();
    let subscriber = listener
        .subscribe::<OtherBlob, _>("/scan", 50, |_| {})
        .unwrap();

    // The handshake is refused with an error header and never retried, so
    // the link settles disconnected and the publisher sees no subscriber.
    std::thread::sleep(Duration::from_millis(400));
    assert!(!subscriber.is_connected());
    assert_eq!(publisher.subscriber_count(), 0);

    listener.shutdown();
    talker.shutdown();
}

#[test]
fn test_late_publisher_found_on_refresh() {
    let master = master();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    // Subscriber first: nothing to link to yet
    let listener = Node::builder("/listener").master(master.clone()).build().unwrap();
    let subscriber = listener
        .subscribe::<Blob, _>("/pose", 50, move |blob| sink.lock().push(blob.0))
        .unwrap();
    assert!(!subscriber.is_connected());

    // Publisher appears afterwards
    let talker = Node::builder("/talker").master(master).build().unwrap();
    let publisher = talker.advertise::<Blob>("/pose", 50, false).unwrap();

    assert_eq!(subscriber.refresh().unwrap(), 1);
    assert!(
        wait_until(Duration::from_secs(5), || publisher.subscriber_count() == 1),
        "link never established after refresh"
    );

    publisher.publish(&Blob(vec![7, 7, 7])).unwrap();
    assert!(wait_until(Duration::from_secs(5), || !received.lock().is_empty()));
    assert_eq!(received.lock()[0], vec![7, 7, 7]);

    listener.shutdown();
    talker.shutdown();
}

#[test]
fn test_latched_topic_replays_to_late_subscriber() {
    let master = master();

    let talker = Node::builder("/talker").master(master.clone()).build().unwrap();
    let publisher = talker.advertise::<Blob>("/map", 50, true).unwrap();

    // Published before any subscriber exists
    publisher.publish(&Blob(vec![1, 2, 3, 4])).unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let listener = Node::builder("/listener").master(master).build().unwrap();
    let _subscriber = listener
        .subscribe::<Blob, _>("/map", 50, move |blob| sink.lock().push(blob.0))
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || !received.lock().is_empty()),
        "latched message never replayed"
    );
    assert_eq!(received.lock()[0], vec![1, 2, 3, 4]);

    listener.shutdown();
    talker.shutdown();
}

#[test]
fn test_two_independent_node_pairs_coexist() {
    // Two masters, two disjoint buses in one process: no hidden globals
    let master_a = master();
    let master_b = master();

    let talker_a = Node::builder("/talker").master(master_a.clone()).build().unwrap();
    let talker_b = Node::builder("/talker").master(master_b.clone()).build().unwrap();
    let pub_a = talker_a.advertise::<Blob>("/chat", 50, false).unwrap();
    let pub_b = talker_b.advertise::<Blob>("/chat", 50, false).unwrap();

    let got_a = Arc::new(Mutex::new(Vec::new()));
    let got_b = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&got_a);
    let listener_a = Node::builder("/listener").master(master_a).build().unwrap();
    let _sub_a = listener_a
        .subscribe::<Blob, _>("/chat", 50, move |blob| sink.lock().push(blob.0))
        .unwrap();

    let sink = Arc::clone(&got_b);
    let listener_b = Node::builder("/listener").master(master_b).build().unwrap();
    let _sub_b = listener_b
        .subscribe::<Blob, _>("/chat", 50, move |blob| sink.lock().push(blob.0))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        pub_a.subscriber_count() == 1 && pub_b.subscriber_count() == 1
    }));

    pub_a.publish(&Blob(vec![0xA])).unwrap();
    pub_b.publish(&Blob(vec![0xB])).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !got_a.lock().is_empty() && !got_b.lock().is_empty()
    }));

    // Each bus saw only its own traffic
    assert_eq!(*got_a.lock(), vec![vec![0xA]]);
    assert_eq!(*got_b.lock(), vec![vec![0xB]]);
}
