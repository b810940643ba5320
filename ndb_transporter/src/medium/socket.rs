//! TCP stream medium
//!
//! The lower node id listens, the other dials. Dialing runs on a short-lived
//! thread so a setup step never blocks its caller. Once the stream exists both
//! sides allocate page-backed send and receive rings and exchange a hello
//! (magic, node id). Outgoing envelopes queue in the send ring until
//! `flush`; incoming bytes land in the receive ring, where partial
//! envelopes wait for the rest of their bytes.

use super::{LinkMedium, MediumResult};
use crate::ring::RingChannel;
use ndb_common::error::TransporterError;
use ndb_common::ids::NodeId;
use ndb_common::link::{LinkRole, TransporterConfig};
use ndb_malloc::PageArena;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;
use tracing::{debug, warn};

/// First word of the hello exchanged after connect: `"NDBT"`.
pub const HELLO_MAGIC: u32 = u32::from_le_bytes(*b"NDBT");
const HELLO_LEN: usize = 8;
const DIAL_TIMEOUT: Duration = Duration::from_millis(100);

/// Page-backed rings of an established socket link.
struct Rings {
    /// Transporter's producer view of the send ring.
    send: RingChannel,
    /// Flush side of the send ring.
    drain: RingChannel,
    /// Fill side of the receive ring.
    fill: RingChannel,
    /// Transporter's consumer view of the receive ring.
    recv: RingChannel,
}

/// Socket link state.
pub struct SocketLink {
    local: NodeId,
    remote: NodeId,
    role: LinkRole,
    address: SocketAddr,
    capacity: u32,
    slack: u32,
    arena: Arc<PageArena>,
    listener: Option<TcpListener>,
    dialing: Option<Receiver<std::io::Result<TcpStream>>>,
    stream: Option<TcpStream>,
    rings: Option<Rings>,
    hello_out: usize,
    hello_in: heapless::Vec<u8, HELLO_LEN>,
}

impl SocketLink {
    /// Link to `config.remote_node` over `address`.
    pub fn new(config: &TransporterConfig, address: SocketAddr, arena: Arc<PageArena>) -> Self {
        Self {
            local: config.local_node,
            remote: config.remote_node,
            role: config.role(),
            address,
            capacity: config.capacity,
            slack: config.slack(),
            arena,
            listener: None,
            dialing: None,
            stream: None,
            rings: None,
            hello_out: 0,
            hello_in: heapless::Vec::new(),
        }
    }

    /// Listen / dial address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    fn hello(&self) -> [u8; HELLO_LEN] {
        let mut out = [0u8; HELLO_LEN];
        out[..4].copy_from_slice(&HELLO_MAGIC.to_le_bytes());
        out[4..].copy_from_slice(&(self.local.get() as u32).to_le_bytes());
        out
    }

    fn accept(&mut self) -> MediumResult<Option<TcpStream>> {
        if self.listener.is_none() {
            let listener = TcpListener::bind(self.address).map_err(|e| {
                warn!("bind {} failed: {}", self.address, e);
                TransporterError::CouldNotBindSocket
            })?;
            listener.set_nonblocking(true).map_err(|e| {
                warn!("listener setup on {} failed: {}", self.address, e);
                TransporterError::ListenFailed
            })?;
            debug!("Listening for {} on {}", self.remote, self.address);
            self.listener = Some(listener);
        }
        let Some(listener) = &self.listener else {
            return Ok(None);
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Accepted {} from {}", self.remote, peer);
                Ok(Some(stream))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                warn!("accept on {} failed: {}", self.address, e);
                Err(TransporterError::AcceptReturnError)
            }
        }
    }

    /// Start a dial, or collect the one in flight.
    fn dial(&mut self) -> MediumResult<Option<TcpStream>> {
        let Some(dialing) = &self.dialing else {
            let (tx, rx) = mpsc::sync_channel(1);
            let address = self.address;
            std::thread::Builder::new()
                .name("ndb-dial".to_string())
                .spawn(move || {
                    let _ = tx.send(TcpStream::connect_timeout(&address, DIAL_TIMEOUT));
                })
                .map_err(|e| {
                    warn!("dial thread for {} failed: {}", self.address, e);
                    TransporterError::CouldNotCreateSocket
                })?;
            self.dialing = Some(rx);
            return Ok(None);
        };
        let outcome = match dialing.try_recv() {
            Err(TryRecvError::Empty) => return Ok(None),
            Ok(outcome) => outcome,
            Err(TryRecvError::Disconnected) => Err(std::io::Error::other("dial thread exited")),
        };
        self.dialing = None;
        outcome.map(Some).map_err(|e| {
            debug!("connect to {} failed: {}", self.address, e);
            TransporterError::CouldNotConnect
        })
    }

    fn stream(&self) -> MediumResult<&TcpStream> {
        self.stream.as_ref().ok_or(TransporterError::PeerDisconnected)
    }

    fn send_hello(&mut self) -> MediumResult<()> {
        let hello = self.hello();
        while self.hello_out < HELLO_LEN {
            let mut stream = self.stream()?;
            match stream.write(&hello[self.hello_out..]) {
                Ok(0) => return Err(TransporterError::PeerDisconnected),
                Ok(n) => self.hello_out += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => return Err(TransporterError::PeerDisconnected),
            }
        }
        Ok(())
    }

    fn receive_hello(&mut self) -> MediumResult<()> {
        let mut buf = [0u8; HELLO_LEN];
        while !self.hello_in.is_full() {
            let want = HELLO_LEN - self.hello_in.len();
            let mut stream = self.stream()?;
            match stream.read(&mut buf[..want]) {
                Ok(0) => return Err(TransporterError::PeerDisconnected),
                Ok(n) => {
                    let _ = self.hello_in.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => return Err(TransporterError::PeerDisconnected),
            }
        }

        let word = |i: usize| {
            u32::from_le_bytes([
                self.hello_in[i],
                self.hello_in[i + 1],
                self.hello_in[i + 2],
                self.hello_in[i + 3],
            ])
        };
        if word(0) != HELLO_MAGIC || word(4) != self.remote.get() as u32 {
            warn!(
                "Unexpected hello on link to {}: magic={:#x} node={}",
                self.remote,
                word(0),
                word(4)
            );
            return Err(TransporterError::UnexpectedPeer);
        }
        Ok(())
    }

    fn ring_pair(&self) -> MediumResult<(RingChannel, RingChannel)> {
        let pages = self
            .arena
            .alloc_bytes_or_grow(RingChannel::region_size(self.capacity, self.slack))
            .map_err(|e| {
                warn!("no pages for socket ring to {}: {}", self.remote, e);
                TransporterError::CouldNotCreateSocket
            })?;
        let mut producer = RingChannel::over_pages(Arc::new(pages), self.capacity, self.slack)
            .map_err(|_| TransporterError::CouldNotCreateSocket)?;
        producer.clear();
        let consumer = producer.view();
        Ok((producer, consumer))
    }
}

impl LinkMedium for SocketLink {
    fn acquire(&mut self) -> MediumResult<bool> {
        if self.stream.is_some() {
            return Ok(true);
        }
        let stream = match self.role {
            LinkRole::Creator => self.accept()?,
            LinkRole::Attacher => self.dial()?,
        };
        let Some(stream) = stream else {
            return Ok(false);
        };

        stream
            .set_nonblocking(true)
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| {
                warn!("stream setup to {} failed: {}", self.remote, e);
                TransporterError::CouldNotCreateSocket
            })?;
        self.listener = None;
        self.stream = Some(stream);
        Ok(true)
    }

    fn peer_count(&self) -> MediumResult<u32> {
        Ok(if self.stream.is_some() { 2 } else { 1 })
    }

    fn setup_buffers(&mut self) -> MediumResult<()> {
        let (send, drain) = self.ring_pair()?;
        let (fill, recv) = self.ring_pair()?;
        send.set_ready(true);
        self.rings = Some(Rings {
            send,
            drain,
            fill,
            recv,
        });
        self.hello_out = 0;
        self.hello_in.clear();
        self.send_hello()
    }

    fn peer_ready(&mut self) -> MediumResult<bool> {
        self.send_hello()?;
        self.receive_hello()?;
        Ok(self.hello_out == HELLO_LEN && self.hello_in.is_full())
    }

    fn channels(&mut self) -> Option<(&mut RingChannel, &mut RingChannel)> {
        self.rings
            .as_mut()
            .map(|rings| (&mut rings.send, &mut rings.recv))
    }

    fn flush(&mut self) -> MediumResult<usize> {
        let (Some(rings), Some(stream)) = (self.rings.as_mut(), self.stream.as_mut()) else {
            return Ok(0);
        };
        let mut written = 0;
        loop {
            let available = rings.drain.available();
            if available == 0 {
                break;
            }
            let Some((head, _)) = rings.drain.peek(available) else {
                break;
            };
            match stream.write(head) {
                Ok(0) => return Err(TransporterError::PeerDisconnected),
                Ok(n) => {
                    rings.drain.consume(n);
                    written += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("write to {} failed: {}", self.remote, e);
                    return Err(TransporterError::PeerDisconnected);
                }
            }
        }
        Ok(written)
    }

    fn fill(&mut self) -> MediumResult<usize> {
        let (Some(rings), Some(stream)) = (self.rings.as_mut(), self.stream.as_mut()) else {
            return Ok(0);
        };
        let mut read = 0;
        loop {
            let room = rings.fill.free_space() as usize;
            if room == 0 {
                break;
            }
            let Some(mut slot) = rings.fill.reserve(room) else {
                break;
            };
            match stream.read(slot.as_mut_slice()) {
                Ok(0) => return Err(TransporterError::PeerDisconnected),
                Ok(n) => {
                    slot.publish_prefix(n);
                    read += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!("read from {} failed: {}", self.remote, e);
                    return Err(TransporterError::PeerDisconnected);
                }
            }
        }
        Ok(read)
    }

    fn check_alive(&self) -> MediumResult<()> {
        match self.stream()?.take_error() {
            Ok(None) => Ok(()),
            _ => Err(TransporterError::PeerDisconnected),
        }
    }

    fn release(&mut self) -> MediumResult<()> {
        self.listener = None;
        self.dialing = None;
        self.rings = None;
        self.hello_out = 0;
        self.hello_in.clear();
        let mut result = Ok(());
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                if e.kind() != ErrorKind::NotConnected {
                    warn!("closing socket to {} failed: {}", self.remote, e);
                    result = Err(TransporterError::ErrorClosingSocket);
                }
            }
        }
        result
    }
}
