//! Signal envelope types

use heapless::Vec as FixedVec;
use ndb_common::consts::{MAX_SECTIONS, MAX_SIGNAL_BODY_WORDS};
use ndb_common::error::TransporterError;
use ndb_common::ids::BlockRef;

/// Delivery priority. Priority `High` signals are executed before `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Job buffer A
    High = 0,
    /// Job buffer B
    #[default]
    Normal = 1,
}

impl Priority {
    /// Decode the two priority bits.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::High),
            1 => Some(Self::Normal),
            _ => None,
        }
    }
}

/// Routing and identification fields of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalHeader {
    /// Global signal number.
    pub gsn: u16,
    /// Trace level.
    pub trace: u8,
    /// Sending block.
    pub sender: BlockRef,
    /// Receiving block.
    pub receiver: BlockRef,
    /// Per-link sequence number, set by the transporter when enabled.
    pub signal_id: Option<u32>,
}

/// One signal as handed to `Transporter::send`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signal {
    /// Header fields.
    pub header: SignalHeader,
    /// Delivery priority.
    pub priority: Priority,
    /// Fixed part.
    pub body: FixedVec<u32, MAX_SIGNAL_BODY_WORDS>,
    /// Variable-length sections.
    pub sections: FixedVec<Vec<u32>, MAX_SECTIONS>,
}

impl Signal {
    /// Empty signal from `sender` to `receiver`.
    pub fn new(gsn: u16, sender: BlockRef, receiver: BlockRef) -> Self {
        Self {
            header: SignalHeader {
                gsn,
                sender,
                receiver,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the trace level.
    pub fn with_trace(mut self, trace: u8) -> Self {
        self.header.trace = trace;
        self
    }

    /// Replace the body; more than 25 words is `MessageTooLarge`.
    pub fn with_body(mut self, words: &[u32]) -> Result<Self, TransporterError> {
        self.body.clear();
        self.body
            .extend_from_slice(words)
            .map_err(|_| TransporterError::MessageTooLarge)?;
        Ok(self)
    }

    /// Append a section; a fourth section is `MessageTooLarge`.
    pub fn with_section(mut self, words: Vec<u32>) -> Result<Self, TransporterError> {
        self.sections
            .push(words)
            .map_err(|_| TransporterError::MessageTooLarge)?;
        Ok(self)
    }

    /// Words across all sections.
    pub fn section_words(&self) -> usize {
        self.sections.iter().map(Vec::len).sum()
    }
}
