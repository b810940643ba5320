//! TCP links and the node registry

mod common;

use common::{Recorder, arena, fast_policy, signal, wait_until};
use ndb_common::consts::MIN_CHANNEL_CAPACITY;
use ndb_common::prelude::*;
use ndb_malloc::PageArena;
use ndb_transporter::{
    LinkState, Priority, SendStatus, TransportError, Transporter, TransporterRegistry,
};
use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

fn free_addr() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

fn link(local: u16, remote: u16, addr: SocketAddr, callback: &Arc<Recorder>) -> Transporter {
    let config = TransporterConfig::socket(NodeId::new(local), NodeId::new(remote), addr)
        .with_capacity(MIN_CHANNEL_CAPACITY)
        .with_features(LinkFeatures::CHECKSUM | LinkFeatures::SIGNAL_ID);
    Transporter::new(config, &arena(), callback.clone()).unwrap()
}

fn connected_pair(addr: SocketAddr) -> (Transporter, Transporter, Arc<Recorder>, Arc<Recorder>) {
    let (ra, rb) = (Recorder::new(), Recorder::new());
    let mut a = link(1, 2, addr, &ra);
    let mut b = link(2, 1, addr, &rb);
    let dialer = std::thread::spawn(move || {
        let result = b.connect(&fast_policy());
        (b, result)
    });
    a.connect(&fast_policy()).unwrap();
    let (b, result) = dialer.join().unwrap();
    result.unwrap();
    (a, b, ra, rb)
}

/// Pump both directions until `done` or five seconds pass.
fn pump(a: &mut Transporter, b: &mut Transporter, mut done: impl FnMut() -> bool) -> bool {
    wait_until(Duration::from_secs(5), || {
        a.perform_send().unwrap();
        b.perform_send().unwrap();
        a.poll_receive().unwrap();
        b.poll_receive().unwrap();
        done()
    })
}

#[test]
fn test_signals_cross_in_both_directions() {
    let (mut a, mut b, ra, rb) = connected_pair(free_addr());
    assert_eq!(*ra.connects.lock(), vec![NodeId::new(2)]);
    assert_eq!(*rb.connects.lock(), vec![NodeId::new(1)]);

    let total = 2000u32;
    let (mut to_b, mut to_a) = (0u32, 0u32);
    while to_b < total || to_a < total {
        if to_b < total {
            let s = signal(20, 1, 2, &[to_b, 1, 2, 3]).with_priority(Priority::High);
            match a.send(&s) {
                SendStatus::Ok => to_b += 1,
                SendStatus::Full => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        if to_a < total {
            let s = signal(21, 2, 1, &[to_a])
                .with_section(vec![0xAB; 40])
                .unwrap();
            match b.send(&s) {
                SendStatus::Ok => to_a += 1,
                SendStatus::Full => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        a.perform_send().unwrap();
        b.perform_send().unwrap();
        a.poll_receive().unwrap();
        b.poll_receive().unwrap();
    }
    assert!(pump(&mut a, &mut b, || {
        ra.delivered_count() == total as usize && rb.delivered_count() == total as usize
    }));

    for (i, d) in rb.delivered.lock().iter().enumerate() {
        assert_eq!(d.gsn, 20);
        assert_eq!(d.priority, Priority::High);
        assert_eq!(d.body, vec![i as u32, 1, 2, 3]);
        assert_eq!(d.signal_id, Some(i as u32));
    }
    for (i, d) in ra.delivered.lock().iter().enumerate() {
        assert_eq!(d.body, vec![i as u32]);
        assert_eq!(d.sections, vec![vec![0xAB; 40]]);
    }
    assert_eq!(ra.sent.lock().0, total);
    assert_eq!(rb.received.lock().0, total);
}

#[test]
fn test_peer_drop_disconnects() {
    let (a, mut b, _ra, rb) = connected_pair(free_addr());
    drop(a);

    assert!(wait_until(Duration::from_secs(5), || {
        let _ = b.poll_receive();
        b.state() == LinkState::Disconnected
    }));
    assert_eq!(
        rb.disconnect_reasons(),
        vec![TransporterError::PeerDisconnected]
    );
    assert_eq!(b.send(&signal(1, 2, 1, &[])), SendStatus::Disconnected);
}

#[test]
fn test_unexpected_peer_rejected() {
    let addr = free_addr();
    let ra = Recorder::new();
    let mut a = link(1, 2, addr, &ra);

    // something that is not node 2 connects and speaks garbage
    let intruder = std::thread::spawn(move || {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if let Ok(mut stream) = std::net::TcpStream::connect(addr) {
                let _ = stream.write_all(b"HTTP/1.1");
                std::thread::sleep(Duration::from_millis(200));
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    });

    let err = a.connect(&fast_policy()).unwrap_err();
    intruder.join().unwrap();
    assert_eq!(err.kind(), Some(TransporterError::UnexpectedPeer));
    assert_eq!(a.state(), LinkState::Disconnected);
    assert_eq!(ra.disconnect_reasons(), vec![TransporterError::UnexpectedPeer]);
}

#[test]
fn test_dial_failure_reported_once() {
    let rb = Recorder::new();
    let mut b = link(2, 1, free_addr(), &rb);
    assert!(wait_until(Duration::from_secs(5), || {
        assert!(!b.poll_connect().unwrap());
        !rb.errors.lock().is_empty()
    }));
    // later dials fail the same way without another report
    for _ in 0..20 {
        assert!(!b.poll_connect().unwrap());
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(
        *rb.errors.lock(),
        vec![(NodeId::new(1), TransporterError::CouldNotConnect)]
    );
    assert_eq!(b.state(), LinkState::MediumAcquiring);
}

#[test]
fn test_default_arena_grows_for_several_links() {
    let hub_arena = PageArena::new(&ArenaConfig::default()).unwrap();
    let initial = hub_arena.stats().allocated;
    let hub_recorder = Recorder::new();
    let mut hub = TransporterRegistry::new(NodeId::new(1), hub_arena.clone(), hub_recorder.clone());

    let mut peers = Vec::new();
    for node in 2..=4u16 {
        let addr = free_addr();
        hub.register(TransporterConfig::socket(NodeId::new(1), NodeId::new(node), addr))
            .unwrap();
        let mut peer = TransporterRegistry::new(
            NodeId::new(node),
            PageArena::new(&ArenaConfig::default()).unwrap(),
            Recorder::new(),
        );
        peer.register(TransporterConfig::socket(NodeId::new(node), NodeId::new(1), addr))
            .unwrap();
        peers.push(peer);
    }

    let policy = fast_policy();
    let hub_dog = hub.connect_all(policy).unwrap();
    let peer_dogs: Vec<_> = peers.iter().map(|p| p.connect_all(policy).unwrap()).collect();
    assert!(wait_until(Duration::from_secs(10), || hub.connected_count() == 3));
    assert!(hub_recorder.errors.lock().is_empty());
    assert!(hub_arena.stats().allocated > initial);

    hub_dog.shutdown();
    for dog in peer_dogs {
        dog.shutdown();
    }
    hub.disconnect_all();
}

fn node_config(
    dir: &tempfile::TempDir,
    node: u16,
    peer: u16,
    addr: SocketAddr,
) -> NodeTransportConfig {
    let path = dir.path().join(format!("node{node}.toml"));
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"
node_id = {node}

[shared]
service_name = "ndbd-{node}"

[arena]
page_size = 4096
initial_pages = 128
max_pages = 512

[connect]
poll_interval_ms = 2
connect_timeout_ms = 10000

[[links]]
local_node = {node}
remote_node = {peer}
capacity = {MIN_CHANNEL_CAPACITY}
medium = {{ type = "socket", address = "{addr}" }}
features = {{ checksum = true }}
"#
    )
    .unwrap();
    NodeTransportConfig::load_validated(&path).unwrap()
}

#[test]
fn test_registries_connect_and_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let addr = free_addr();
    let (c1, c2) = (node_config(&dir, 1, 2, addr), node_config(&dir, 2, 1, addr));
    let (r1, r2) = (Recorder::new(), Recorder::new());
    let node1 = TransporterRegistry::from_config(&c1, r1.clone()).unwrap();
    let node2 = TransporterRegistry::from_config(&c2, r2.clone()).unwrap();
    assert_eq!(node1.nodes(), vec![NodeId::new(2)]);

    let dog1 = node1.connect_all(c1.connect).unwrap();
    let dog2 = node2.connect_all(c2.connect).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        node1.connected_count() == 1 && node2.connected_count() == 1
    }));

    for i in 0..10 {
        let status = node1.send(NodeId::new(2), &signal(30, 1, 2, &[i])).unwrap();
        assert_eq!(status, SendStatus::Ok);
    }
    assert!(node1.perform_send().is_empty());
    assert!(wait_until(Duration::from_secs(5), || {
        node2.perform_receive();
        r2.delivered_count() == 10
    }));

    let err = node1.send(NodeId::new(9), &signal(30, 1, 9, &[])).unwrap_err();
    assert!(matches!(err, TransportError::NotRegistered { .. }));

    dog1.shutdown();
    dog2.shutdown();
    node1.disconnect_all();
    assert_eq!(node1.connected_count(), 0);
    assert!(r1.disconnect_reasons().contains(&TransporterError::DisconnectRequested));
}

#[test]
fn test_registry_rejects_duplicates() {
    let local = NodeId::new(1);
    let mut registry = TransporterRegistry::new(local, arena(), Recorder::new());
    let config = TransporterConfig::socket(local, NodeId::new(2), free_addr())
        .with_capacity(MIN_CHANNEL_CAPACITY);

    registry.register(config.clone()).unwrap();
    let err = registry.register(config).unwrap_err();
    assert!(matches!(err, TransportError::AlreadyRegistered { .. }));

    let foreign = TransporterConfig::socket(NodeId::new(3), NodeId::new(2), free_addr());
    assert!(matches!(
        registry.register(foreign),
        Err(TransportError::Config { .. })
    ));

    registry.remove(NodeId::new(2)).unwrap();
    assert!(registry.get(NodeId::new(2)).is_none());
    assert!(matches!(
        registry.remove(NodeId::new(2)),
        Err(TransportError::NotRegistered { .. })
    ));
}
