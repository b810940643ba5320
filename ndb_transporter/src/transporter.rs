//! One point-to-point link: state machine, send path, receive path

use crate::callback::TransportCallback;
use crate::error::{TransportError, TransportResult};
use crate::medium::{LinkMedium, Medium};
use crate::packer::{self, HEADER_BYTES};
use crate::signal::Signal;
use crate::state::LinkState;
use crate::watchdog::CancelToken;
use ndb_common::consts::MAX_MESSAGE_SIZE;
use ndb_common::error::{ErrorClass, TransporterError};
use ndb_common::ids::NodeId;
use ndb_common::link::{ConnectPolicy, LinkFeatures, TransporterConfig};
use ndb_malloc::PageArena;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of [`Transporter::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendStatus {
    /// Published; will be delivered in order.
    Ok,
    /// No room right now; retry later.
    Full,
    /// Link not connected; nothing written.
    Disconnected,
    /// Envelope above the maximum message size; never written.
    TooLarge,
}

/// Requests a disconnect from another thread.
///
/// Observed at the next `poll_connect`, `send` or `poll_receive`.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    token: CancelToken,
}

impl DisconnectHandle {
    /// Request the disconnect and wake a blocked `connect`.
    pub fn request(&self) {
        self.token.cancel();
    }
}

/// Signals and bytes not yet reported upward.
#[derive(Debug, Default, Clone, Copy)]
struct Volume {
    signals: u32,
    bytes: u64,
}

impl Volume {
    fn add(&mut self, bytes: usize) {
        self.signals += 1;
        self.bytes += bytes as u64;
    }

    fn take(&mut self) -> Option<Self> {
        (self.signals > 0).then(|| std::mem::take(self))
    }
}

/// The transport object for one peer.
pub struct Transporter {
    config: TransporterConfig,
    features: LinkFeatures,
    state: LinkState,
    medium: Medium,
    callback: Arc<dyn TransportCallback>,
    cancel: CancelToken,
    setup_error_reported: bool,
    full_since: Option<Instant>,
    receive_full_reported: bool,
    next_signal_id: u32,
    expected_signal_id: u32,
    unreported_send: Volume,
    frame_bytes: Vec<u8>,
    frame_words: Vec<u32>,
}

impl Transporter {
    /// Link described by `config`; socket rings draw pages from `arena`.
    pub fn new(
        config: TransporterConfig,
        arena: &Arc<PageArena>,
        callback: Arc<dyn TransportCallback>,
    ) -> TransportResult<Self> {
        config.validate()?;
        let medium = Medium::from_config(&config, arena);
        debug!(
            "Transporter {} -> {} over {} ({:?})",
            config.local_node,
            config.remote_node,
            medium.kind(),
            config.role()
        );
        Ok(Self {
            features: config.feature_flags(),
            config,
            state: LinkState::Idle,
            medium,
            callback,
            cancel: CancelToken::new(),
            setup_error_reported: false,
            full_since: None,
            receive_full_reported: false,
            next_signal_id: 0,
            expected_signal_id: 0,
            unreported_send: Volume::default(),
            frame_bytes: Vec::with_capacity(MAX_MESSAGE_SIZE),
            frame_words: Vec::with_capacity(MAX_MESSAGE_SIZE / 4),
        })
    }

    /// Peer node.
    pub fn remote_node(&self) -> NodeId {
        self.config.remote_node
    }

    /// Link configuration.
    pub fn config(&self) -> &TransporterConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether signals flow.
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Handle for requesting a disconnect from another thread.
    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            token: self.cancel.clone(),
        }
    }

    fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            debug!(
                "Link to {}: {} -> {}",
                self.config.remote_node, self.state, next
            );
            self.state = next;
        }
    }

    fn take_disconnect_request(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            self.cancel.reset();
            self.disconnect_with(TransporterError::DisconnectRequested);
            true
        } else {
            false
        }
    }

    /// One non-blocking setup step; true once connected.
    ///
    /// Setup errors are reported once and retried on the next call.
    /// Peer-count anomalies tear the link down and are returned.
    pub fn poll_connect(&mut self) -> TransportResult<bool> {
        let node = self.config.remote_node;
        if self.take_disconnect_request() {
            return Err(TransportError::link(
                node,
                TransporterError::DisconnectRequested,
            ));
        }

        loop {
            let before = self.state;
            let step = match self.state {
                LinkState::Disconnected | LinkState::Idle => {
                    self.set_state(LinkState::MediumAcquiring);
                    Ok(())
                }
                LinkState::MediumAcquiring => match self.medium.acquire() {
                    Ok(true) => {
                        self.set_state(LinkState::MediumAttached);
                        Ok(())
                    }
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                },
                LinkState::MediumAttached => match self.medium.peer_count() {
                    Ok(2) => self
                        .medium
                        .setup_buffers()
                        .map(|_| self.set_state(LinkState::BuffersReady)),
                    Ok(n) if n > 2 => {
                        warn!("Link to {}: {} parties attached", node, n);
                        Err(TransporterError::PeerCountAnomaly)
                    }
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                },
                LinkState::BuffersReady => match self.medium.peer_count() {
                    Ok(n) if n > 2 => {
                        warn!("Link to {}: {} parties attached", node, n);
                        Err(TransporterError::PeerCountAnomaly)
                    }
                    Ok(_) => match self.medium.peer_ready() {
                        Ok(true) => {
                            self.on_connected();
                            Ok(())
                        }
                        Ok(false) => Ok(()),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                },
                LinkState::Connected => return Ok(true),
            };

            if let Err(e) = step {
                return self.setup_failed(e);
            }
            if self.state == before {
                return Ok(false);
            }
        }
    }

    fn on_connected(&mut self) {
        self.set_state(LinkState::Connected);
        self.setup_error_reported = false;
        self.full_since = None;
        self.receive_full_reported = false;
        self.next_signal_id = 0;
        self.expected_signal_id = 0;
        info!(
            "Link {} <-> {} connected over {}",
            self.config.local_node,
            self.config.remote_node,
            self.medium.kind()
        );
        self.callback.report_connect(self.config.remote_node);
    }

    fn setup_failed(&mut self, e: TransporterError) -> TransportResult<bool> {
        let node = self.config.remote_node;
        match e.class() {
            ErrorClass::Setup | ErrorClass::Warning | ErrorClass::Backpressure => {
                if !self.setup_error_reported {
                    warn!("Link to {} setup: {}", node, e);
                    self.callback.report_error(node, e);
                    self.setup_error_reported = true;
                }
                Ok(false)
            }
            ErrorClass::PeerCount | ErrorClass::Protocol | ErrorClass::SignalLoss => {
                self.disconnect_with(e);
                Err(TransportError::link(node, e))
            }
        }
    }

    /// Drive setup until connected, `policy.timeout()` elapses or a
    /// disconnect is requested through a [`DisconnectHandle`].
    pub fn connect(&mut self, policy: &ConnectPolicy) -> TransportResult<()> {
        let deadline = Instant::now() + policy.timeout();
        loop {
            if self.poll_connect()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.disconnect_with(TransporterError::ConnectTimeout);
                return Err(TransportError::link(
                    self.config.remote_node,
                    TransporterError::ConnectTimeout,
                ));
            }
            self.cancel.wait_for(policy.interval());
        }
    }

    /// Local disconnect.
    pub fn disconnect(&mut self) {
        self.disconnect_with(TransporterError::DisconnectRequested);
    }

    /// Tear down because of `reason` and report it.
    ///
    /// Releases the medium (the shared-memory creator also destroys the
    /// segment) and resets setup so a later connect starts from scratch.
    pub fn disconnect_with(&mut self, reason: TransporterError) {
        if matches!(self.state, LinkState::Disconnected | LinkState::Idle) {
            return;
        }
        let node = self.config.remote_node;
        let was_connected = self.is_connected();

        if let Err(cleanup) = self.medium.release() {
            warn!("Link to {} teardown: {}", node, cleanup);
            self.callback.report_error(node, cleanup);
        }
        self.set_state(LinkState::Disconnected);
        self.setup_error_reported = false;
        self.full_since = None;
        self.receive_full_reported = false;
        self.unreported_send = Volume::default();

        match reason.class() {
            ErrorClass::SignalLoss => error!("Link to {} lost a signal: {}", node, reason),
            _ if reason.is_fatal() => error!("Link to {} failed: {}", node, reason),
            _ => info!(
                "Link to {} disconnected ({}, was connected: {})",
                node, reason, was_connected
            ),
        }
        self.callback.report_disconnect(node, reason);
    }

    /// Periodic liveness check of an established link.
    ///
    /// On shared memory an attach count below two means the peer left,
    /// above two a third party attached; both tear the link down.
    pub fn check_connected(&mut self) -> TransportResult<()> {
        let node = self.config.remote_node;
        if !self.is_connected() {
            return Err(TransportError::InvalidState {
                node,
                state: self.state.as_str(),
                expected: LinkState::Connected.as_str(),
            });
        }
        if let Err(e) = self.medium.check_alive() {
            self.disconnect_with(e);
            return Err(TransportError::link(node, e));
        }
        Ok(())
    }

    /// Serialize `signal` into the send channel.
    ///
    /// `Full` is routine while the channel drains. Once it has lasted
    /// longer than the link's `send_full_timeout`, the signal is declared
    /// lost and the link torn down. A send that succeeds after a `Full`
    /// spell reports `SendBufferFull`.
    pub fn send(&mut self, signal: &Signal) -> SendStatus {
        if self.take_disconnect_request() || !self.is_connected() {
            return SendStatus::Disconnected;
        }

        let len = packer::encoded_len(signal, self.features);
        if len > MAX_MESSAGE_SIZE {
            warn!(
                "Signal {} to {} is {} bytes, above {}",
                signal.header.gsn, self.config.remote_node, len, MAX_MESSAGE_SIZE
            );
            return SendStatus::TooLarge;
        }

        let signal_id = self
            .features
            .contains(LinkFeatures::SIGNAL_ID)
            .then_some(self.next_signal_id);
        let features = self.features;
        let Some((send, _)) = self.medium.channels() else {
            return SendStatus::Disconnected;
        };

        match send.reserve(len) {
            Some(mut slot) => {
                packer::encode(signal, features, signal_id, slot.as_mut_slice());
                slot.publish();
            }
            None => {
                let since = *self.full_since.get_or_insert_with(Instant::now);
                if since.elapsed() > self.config.send_full_timeout() {
                    self.disconnect_with(TransporterError::SignalLostSendBufferFull);
                    return SendStatus::Disconnected;
                }
                return SendStatus::Full;
            }
        }

        if let Some(since) = self.full_since.take() {
            let node = self.config.remote_node;
            debug!("Send channel to {} was full for {:?}", node, since.elapsed());
            self.callback
                .report_error(node, TransporterError::SendBufferFull);
        }
        self.next_signal_id = self.next_signal_id.wrapping_add(1);
        self.unreported_send.add(len);
        SendStatus::Ok
    }

    /// Flush queued bytes to the medium and report send volume.
    pub fn perform_send(&mut self) -> TransportResult<()> {
        if self.take_disconnect_request() || !self.is_connected() {
            return Ok(());
        }
        let node = self.config.remote_node;
        if let Err(e) = self.medium.flush() {
            self.disconnect_with(e);
            return Err(TransportError::link(node, e));
        }
        if let Some(volume) = self.unreported_send.take() {
            self.callback
                .report_send_volume(node, volume.signals, volume.bytes);
        }
        Ok(())
    }

    /// Deliver every complete envelope waiting in the receive channel.
    ///
    /// Stops early when the scheduler reports pending work. Length,
    /// checksum and sequence violations tear the link down. Returns the
    /// number of delivered signals.
    pub fn poll_receive(&mut self) -> TransportResult<usize> {
        if self.take_disconnect_request() || !self.is_connected() {
            return Ok(0);
        }
        let node = self.config.remote_node;
        if let Err(e) = self.medium.fill() {
            self.disconnect_with(e);
            return Err(TransportError::link(node, e));
        }

        let mut received = Volume::default();
        let result = self.drain_frames(&mut received);
        let delivered = received.signals as usize;
        if let Some(volume) = received.take() {
            self.callback
                .report_receive_volume(node, volume.signals, volume.bytes);
        }
        match result {
            Ok(()) => {
                self.note_receive_backlog();
                Ok(delivered)
            }
            Err(e) => {
                self.disconnect_with(e);
                Err(TransportError::link(node, e))
            }
        }
    }

    /// Report once when delivery is held back while the receive channel
    /// has no room left.
    fn note_receive_backlog(&mut self) {
        let backed_up = self
            .medium
            .channels()
            .is_some_and(|(_, recv)| recv.free_space() == 0);
        if !backed_up {
            self.receive_full_reported = false;
        } else if !self.receive_full_reported {
            let node = self.config.remote_node;
            warn!("Receive channel from {} is full", node);
            self.callback
                .report_error(node, TransporterError::ReceiveBufferFull);
            self.receive_full_reported = true;
        }
    }

    fn drain_frames(&mut self, received: &mut Volume) -> Result<(), TransporterError> {
        let Self {
            medium,
            callback,
            features,
            expected_signal_id,
            frame_bytes,
            frame_words,
            ..
        } = self;
        let Some((_, recv)) = medium.channels() else {
            return Ok(());
        };

        while !callback.has_pending_work() {
            let available = recv.available();
            if available < HEADER_BYTES {
                break;
            }
            let mut first = [0u8; 4];
            recv.copy_out(&mut first);
            let len = packer::message_len(u32::from_le_bytes(first));
            if !(HEADER_BYTES..=MAX_MESSAGE_SIZE).contains(&len) {
                return Err(TransporterError::InvalidMessageLength);
            }
            if available < len {
                break;
            }

            frame_bytes.resize(len, 0);
            recv.copy_out(frame_bytes);
            frame_words.clear();
            frame_words.extend(
                frame_bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            );

            let frame = packer::decode(frame_words)?;
            if features.contains(LinkFeatures::SIGNAL_ID) {
                match frame.header.signal_id {
                    Some(id) if id == *expected_signal_id => {
                        *expected_signal_id = id.wrapping_add(1);
                    }
                    other => {
                        warn!(
                            "Signal id {:?}, expected {}",
                            other, *expected_signal_id
                        );
                        return Err(TransporterError::SignalLost);
                    }
                }
            }

            callback.deliver(&frame.header, frame.priority, frame.body, &frame.sections);
            recv.consume(len);
            received.add(len);
        }
        Ok(())
    }
}

impl Drop for Transporter {
    fn drop(&mut self) {
        if self.state.holds_medium() {
            if let Err(e) = self.medium.release() {
                warn!(
                    "Dropping link to {} left cleanup undone: {}",
                    self.config.remote_node, e
                );
            }
        }
    }
}

impl std::fmt::Debug for Transporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transporter")
            .field("local", &self.config.local_node)
            .field("remote", &self.config.remote_node)
            .field("medium", &self.medium.kind())
            .field("state", &self.state)
            .finish()
    }
}
