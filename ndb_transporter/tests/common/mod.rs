//! Helpers shared by the transporter integration tests

#![allow(dead_code)]

use ndb_common::prelude::*;
use ndb_malloc::PageArena;
use ndb_transporter::{Priority, Signal, SignalHeader, TransportCallback};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// One delivered signal, copied out of the receive channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub gsn: u16,
    pub priority: Priority,
    pub signal_id: Option<u32>,
    pub body: Vec<u32>,
    pub sections: Vec<Vec<u32>>,
}

/// Callback recording everything the transporter reports.
#[derive(Default)]
pub struct Recorder {
    pub delivered: Mutex<Vec<Delivered>>,
    pub connects: Mutex<Vec<NodeId>>,
    pub disconnects: Mutex<Vec<(NodeId, TransporterError)>>,
    pub errors: Mutex<Vec<(NodeId, TransporterError)>>,
    pub sent: Mutex<(u32, u64)>,
    pub received: Mutex<(u32, u64)>,
    pub busy: AtomicBool,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn disconnect_reasons(&self) -> Vec<TransporterError> {
        self.disconnects.lock().iter().map(|(_, e)| *e).collect()
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Relaxed);
    }
}

impl TransportCallback for Recorder {
    fn deliver(&self, header: &SignalHeader, priority: Priority, body: &[u32], sections: &[&[u32]]) {
        self.delivered.lock().push(Delivered {
            gsn: header.gsn,
            priority,
            signal_id: header.signal_id,
            body: body.to_vec(),
            sections: sections.iter().map(|s| s.to_vec()).collect(),
        });
    }

    fn report_send_volume(&self, _node: NodeId, signals: u32, bytes: u64) {
        let mut sent = self.sent.lock();
        sent.0 += signals;
        sent.1 += bytes;
    }

    fn report_receive_volume(&self, _node: NodeId, signals: u32, bytes: u64) {
        let mut received = self.received.lock();
        received.0 += signals;
        received.1 += bytes;
    }

    fn report_connect(&self, node: NodeId) {
        self.connects.lock().push(node);
    }

    fn report_disconnect(&self, node: NodeId, error: TransporterError) {
        self.disconnects.lock().push((node, error));
    }

    fn report_error(&self, node: NodeId, error: TransporterError) {
        self.errors.lock().push((node, error));
    }

    fn has_pending_work(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }
}

pub fn arena() -> Arc<PageArena> {
    PageArena::new(&ArenaConfig::with_pages(4096, 256, 1024)).unwrap()
}

/// Signal from block 248 on `from` to block 248 on `to` carrying `body`.
pub fn signal(gsn: u16, from: u16, to: u16, body: &[u32]) -> Signal {
    Signal::new(
        gsn,
        BlockRef::new(NodeId::new(from), 248),
        BlockRef::new(NodeId::new(to), 248),
    )
    .with_body(body)
    .unwrap()
}

/// IPC key unique to this test process.
pub fn shm_key(salt: i32) -> i32 {
    0x4E45_0000 | ((std::process::id() as i32 & 0xFFF) << 4) | (salt & 0xF)
}

pub fn fast_policy() -> ConnectPolicy {
    ConnectPolicy::new(Duration::from_millis(2), Duration::from_secs(10))
}

/// Poll `f` until it returns true or `timeout` passes.
pub fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    f()
}

#[derive(Clone, Default)]
struct LogSink(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber writing to memory; returns what was logged.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let sink = LogSink::default();
    let writer = sink.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = sink.0.lock().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
