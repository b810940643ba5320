//! Transporter error taxonomy.
//!
//! A closed set of link-level error kinds passed to `report_error` and
//! `report_disconnect`. Numeric codes follow the cluster wire convention:
//! codes with bit `0x8000` set recommend tearing the link down.

use thiserror::Error;

/// Coarse classification driving how the transporter reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Medium create/attach/bind/listen/connect failure. Retried by the
    /// setup poll loop, reported once.
    Setup,
    /// Peer presence anomaly (attach count, EOF, wrong peer). Fatal.
    PeerCount,
    /// Framing violation on receive. Fatal.
    Protocol,
    /// Send buffer pressure. Never fatal.
    Backpressure,
    /// An accepted signal was not delivered. Fatal, reported distinctly.
    SignalLoss,
    /// Informational; nothing to do beyond logging.
    Warning,
}

/// Link-level error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[repr(u32)]
pub enum TransporterError {
    /// Error while closing a socket.
    #[error("error closing socket")]
    ErrorClosingSocket = 0x0001,
    /// Envelope length outside the valid range or beyond available bytes.
    #[error("invalid message length")]
    InvalidMessageLength = 0x8003,
    /// Envelope checksum mismatch.
    #[error("invalid checksum")]
    InvalidChecksum = 0x8004,
    /// Socket creation failed.
    #[error("could not create socket")]
    CouldNotCreateSocket = 0x8005,
    /// Binding the listening socket failed.
    #[error("could not bind socket")]
    CouldNotBindSocket = 0x8006,
    /// Listening on the bound socket failed.
    #[error("listen failed")]
    ListenFailed = 0x8007,
    /// Accept returned an error.
    #[error("accept returned error")]
    AcceptReturnError = 0x8008,
    /// Dialing the peer failed.
    #[error("could not connect to peer")]
    CouldNotConnect = 0x8009,
    /// Stream reached EOF or failed after it was established.
    #[error("peer disconnected")]
    PeerDisconnected = 0x800a,
    /// Remote node detached from the shared segment.
    #[error("shared memory peer disconnected")]
    ShmDisconnect = 0x800b,
    /// `IPC_STAT` on the shared segment failed.
    #[error("unable to stat shared memory segment")]
    ShmIpcStat = 0x800c,
    /// Creating the shared segment failed.
    #[error("unable to create shared memory segment")]
    ShmUnableToCreateSegment = 0x800d,
    /// Attaching the shared segment failed.
    #[error("unable to attach shared memory segment")]
    ShmUnableToAttachSegment = 0x800e,
    /// Removing the shared segment failed.
    #[error("unable to remove shared memory segment")]
    ShmUnableToRemoveSegment = 0x800f,
    /// More than two processes are attached to the link medium.
    #[error("peer count anomaly on link medium")]
    PeerCountAnomaly = 0x8010,
    /// The peer identified itself as a different node.
    #[error("unexpected peer node")]
    UnexpectedPeer = 0x8011,
    /// Receive ring stayed full while delivery was held back.
    #[error("receive buffer full")]
    ReceiveBufferFull = 0x8013,
    /// Send buffer stayed full past the configured limit; a signal was dropped.
    #[error("signal lost: send buffer full")]
    SignalLostSendBufferFull = 0x8014,
    /// A gap in the signal sequence was observed; a signal was dropped.
    #[error("signal lost")]
    SignalLost = 0x8015,
    /// Send buffer was full for a while; a later send got through.
    #[error("send buffer full")]
    SendBufferFull = 0x0016,
    /// Envelope larger than the maximum message size was rejected.
    #[error("message too large")]
    MessageTooLarge = 0x0017,
    /// Setup did not reach the connected state within the poll timeout.
    #[error("connect timed out")]
    ConnectTimeout = 0x8018,
    /// Disconnect requested by the local kernel.
    #[error("disconnect requested")]
    DisconnectRequested = 0x0019,
}

impl TransporterError {
    /// Numeric wire code.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Whether the code recommends disconnecting the link.
    #[inline]
    pub const fn recommends_disconnect(self) -> bool {
        self.code() & 0x8000 != 0
    }

    /// Classify the error.
    pub const fn class(self) -> ErrorClass {
        use TransporterError::*;
        match self {
            CouldNotCreateSocket | CouldNotBindSocket | ListenFailed | AcceptReturnError
            | CouldNotConnect | ShmIpcStat
            | ShmUnableToCreateSegment | ShmUnableToAttachSegment | ConnectTimeout => {
                ErrorClass::Setup
            }
            PeerDisconnected | ShmDisconnect | PeerCountAnomaly | UnexpectedPeer => {
                ErrorClass::PeerCount
            }
            InvalidMessageLength | InvalidChecksum => ErrorClass::Protocol,
            SendBufferFull | ReceiveBufferFull | MessageTooLarge => ErrorClass::Backpressure,
            SignalLostSendBufferFull | SignalLost => ErrorClass::SignalLoss,
            ErrorClosingSocket | ShmUnableToRemoveSegment | DisconnectRequested => {
                ErrorClass::Warning
            }
        }
    }

    /// Whether observing this error on an established link tears it down.
    #[inline]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self.class(),
            ErrorClass::PeerCount | ErrorClass::Protocol | ErrorClass::SignalLoss
        )
    }

    /// Look up an error by its wire code.
    pub const fn from_code(code: u32) -> Option<Self> {
        use TransporterError::*;
        Some(match code {
            0x0001 => ErrorClosingSocket,
            0x8003 => InvalidMessageLength,
            0x8004 => InvalidChecksum,
            0x8005 => CouldNotCreateSocket,
            0x8006 => CouldNotBindSocket,
            0x8007 => ListenFailed,
            0x8008 => AcceptReturnError,
            0x8009 => CouldNotConnect,
            0x800a => PeerDisconnected,
            0x800b => ShmDisconnect,
            0x800c => ShmIpcStat,
            0x800d => ShmUnableToCreateSegment,
            0x800e => ShmUnableToAttachSegment,
            0x800f => ShmUnableToRemoveSegment,
            0x8010 => PeerCountAnomaly,
            0x8011 => UnexpectedPeer,
            0x8013 => ReceiveBufferFull,
            0x8014 => SignalLostSendBufferFull,
            0x8015 => SignalLost,
            0x0016 => SendBufferFull,
            0x0017 => MessageTooLarge,
            0x8018 => ConnectTimeout,
            0x0019 => DisconnectRequested,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for code in 0..0x9000u32 {
            if let Some(e) = TransporterError::from_code(code) {
                assert_eq!(e.code(), code);
            }
        }
        assert!(TransporterError::from_code(0x1234).is_none());
        // accept polls the listener directly; no select error exists
        assert!(TransporterError::from_code(0x0002).is_none());
    }

    #[test]
    fn test_protocol_errors_are_fatal() {
        assert!(TransporterError::InvalidChecksum.is_fatal());
        assert!(TransporterError::InvalidMessageLength.is_fatal());
        assert!(TransporterError::PeerCountAnomaly.is_fatal());
    }

    #[test]
    fn test_setup_and_backpressure_are_not_fatal() {
        assert!(!TransporterError::ShmUnableToCreateSegment.is_fatal());
        assert!(!TransporterError::CouldNotConnect.is_fatal());
        assert!(!TransporterError::SendBufferFull.is_fatal());
        assert_eq!(TransporterError::SendBufferFull.class(), ErrorClass::Backpressure);
        assert!(!TransporterError::ReceiveBufferFull.is_fatal());
    }

    #[test]
    fn test_signal_loss_is_distinct() {
        assert_eq!(TransporterError::SignalLost.class(), ErrorClass::SignalLoss);
        assert_eq!(
            TransporterError::SignalLostSendBufferFull.class(),
            ErrorClass::SignalLoss
        );
        assert_ne!(
            TransporterError::SignalLost.class(),
            TransporterError::PeerDisconnected.class()
        );
    }

    #[test]
    fn test_recommends_disconnect_bit() {
        assert!(TransporterError::ShmDisconnect.recommends_disconnect());
        assert!(!TransporterError::ErrorClosingSocket.recommends_disconnect());
    }
}
