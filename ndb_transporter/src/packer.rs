//! Word-oriented envelope framing
//!
//! ## Wire Format
//!
//! All words are little-endian `u32`.
//!
//! ```text
//! word 0   bit 0      checksum trailer present
//!          bit 1      signal id word present
//!          bit 2      compressed
//!          bits 3-4   priority
//!          bits 5-6   section count
//!          bits 8-31  message length in words
//! word 1   gsn (bits 0-15) | trace (16-23) | body words (24-31)
//! word 2   sender block ref
//! word 3   receiver block ref
//! [signal id]
//! body words
//! section length words
//! section data
//! [checksum = XOR of every preceding word]
//! ```

use crate::signal::{Priority, Signal, SignalHeader};
use heapless::Vec as FixedVec;
use ndb_common::consts::{MAX_MESSAGE_SIZE, MAX_SECTIONS, MAX_SIGNAL_BODY_WORDS};
use ndb_common::error::TransporterError;
use ndb_common::ids::BlockRef;
use ndb_common::link::LinkFeatures;

/// Fixed header words.
pub const HEADER_WORDS: usize = 4;
/// Fixed header bytes.
pub const HEADER_BYTES: usize = HEADER_WORDS * 4;

const CHECKSUM_BIT: u32 = 1 << 0;
const SIGNAL_ID_BIT: u32 = 1 << 1;
const COMPRESSED_BIT: u32 = 1 << 2;
const PRIO_SHIFT: u32 = 3;
const SECTIONS_SHIFT: u32 = 5;
const LENGTH_SHIFT: u32 = 8;

/// A decoded envelope borrowing the received words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Header fields.
    pub header: SignalHeader,
    /// Delivery priority.
    pub priority: Priority,
    /// Compression flag as sent.
    pub compressed: bool,
    /// Fixed part.
    pub body: &'a [u32],
    /// Variable-length sections.
    pub sections: FixedVec<&'a [u32], MAX_SECTIONS>,
}

/// Serialized size in bytes of `signal` with `features`.
pub fn encoded_len(signal: &Signal, features: LinkFeatures) -> usize {
    let mut words = HEADER_WORDS + signal.body.len() + signal.sections.len();
    words += signal.section_words();
    if features.contains(LinkFeatures::SIGNAL_ID) {
        words += 1;
    }
    if features.contains(LinkFeatures::CHECKSUM) {
        words += 1;
    }
    words * 4
}

/// Message length in bytes announced by the first word.
#[inline]
pub const fn message_len(word0: u32) -> usize {
    ((word0 >> LENGTH_SHIFT) as usize) * 4
}

/// XOR of `words`.
#[inline]
pub fn checksum(words: impl IntoIterator<Item = u32>) -> u32 {
    words.into_iter().fold(0, |acc, w| acc ^ w)
}

/// Serialize into `out`, which must be exactly `encoded_len` bytes.
pub fn encode(signal: &Signal, features: LinkFeatures, signal_id: Option<u32>, out: &mut [u8]) {
    debug_assert_eq!(out.len(), encoded_len(signal, features));
    let words = out.len() / 4;

    let mut w0 = ((words as u32) << LENGTH_SHIFT)
        | ((signal.priority as u32) << PRIO_SHIFT)
        | ((signal.sections.len() as u32) << SECTIONS_SHIFT);
    if features.contains(LinkFeatures::CHECKSUM) {
        w0 |= CHECKSUM_BIT;
    }
    if features.contains(LinkFeatures::COMPRESSION) {
        w0 |= COMPRESSED_BIT;
    }
    let signal_id = if features.contains(LinkFeatures::SIGNAL_ID) {
        w0 |= SIGNAL_ID_BIT;
        Some(signal_id.unwrap_or_default())
    } else {
        None
    };

    let h = &signal.header;
    let w1 = h.gsn as u32 | (h.trace as u32) << 16 | (signal.body.len() as u32) << 24;

    let mut writer = WordWriter::new(out);
    writer.put(w0);
    writer.put(w1);
    writer.put(h.sender.raw());
    writer.put(h.receiver.raw());
    if let Some(id) = signal_id {
        writer.put(id);
    }
    writer.put_all(&signal.body);
    for section in &signal.sections {
        writer.put(section.len() as u32);
    }
    for section in &signal.sections {
        writer.put_all(section);
    }
    if features.contains(LinkFeatures::CHECKSUM) {
        let sum = writer.sum;
        writer.put(sum);
    }
}

/// Parse one complete envelope.
///
/// `words` must hold exactly the message announced by its first word.
/// Length inconsistencies are `InvalidMessageLength`, a trailer mismatch is
/// `InvalidChecksum`.
pub fn decode(words: &[u32]) -> Result<Frame<'_>, TransporterError> {
    use TransporterError::InvalidMessageLength;

    let (&w0, _) = words.split_first().ok_or(InvalidMessageLength)?;
    let total = message_len(w0) / 4;
    if total < HEADER_WORDS || total * 4 > MAX_MESSAGE_SIZE || total != words.len() {
        return Err(InvalidMessageLength);
    }

    let has_checksum = w0 & CHECKSUM_BIT != 0;
    let has_signal_id = w0 & SIGNAL_ID_BIT != 0;
    let priority = Priority::from_bits((w0 >> PRIO_SHIFT) & 0b11).ok_or(InvalidMessageLength)?;
    let section_count = ((w0 >> SECTIONS_SHIFT) & 0b11) as usize;

    let (content, trailer) = if has_checksum {
        words.split_at(total - 1)
    } else {
        (words, &[][..])
    };
    if content.len() < HEADER_WORDS {
        return Err(InvalidMessageLength);
    }
    if let Some(&sum) = trailer.first() {
        if checksum(content.iter().copied()) != sum {
            return Err(TransporterError::InvalidChecksum);
        }
    }

    let w1 = content[1];
    let body_len = (w1 >> 24) as usize;
    if body_len > MAX_SIGNAL_BODY_WORDS || section_count > MAX_SECTIONS {
        return Err(InvalidMessageLength);
    }

    let mut pos = HEADER_WORDS;
    let signal_id = if has_signal_id {
        let id = *content.get(pos).ok_or(InvalidMessageLength)?;
        pos += 1;
        Some(id)
    } else {
        None
    };

    let body = content.get(pos..pos + body_len).ok_or(InvalidMessageLength)?;
    pos += body_len;
    let lengths = content
        .get(pos..pos + section_count)
        .ok_or(InvalidMessageLength)?;
    pos += section_count;

    let mut sections = FixedVec::new();
    for &len in lengths {
        let len = len as usize;
        let data = content.get(pos..pos + len).ok_or(InvalidMessageLength)?;
        pos += len;
        sections.push(data).map_err(|_| InvalidMessageLength)?;
    }
    if pos != content.len() {
        return Err(InvalidMessageLength);
    }

    Ok(Frame {
        header: SignalHeader {
            gsn: (w1 & 0xFFFF) as u16,
            trace: ((w1 >> 16) & 0xFF) as u8,
            sender: BlockRef::from_raw(content[2]),
            receiver: BlockRef::from_raw(content[3]),
            signal_id,
        },
        priority,
        compressed: w0 & COMPRESSED_BIT != 0,
        body,
        sections,
    })
}

struct WordWriter<'a> {
    out: &'a mut [u8],
    pos: usize,
    sum: u32,
}

impl<'a> WordWriter<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        Self { out, pos: 0, sum: 0 }
    }

    #[inline]
    fn put(&mut self, word: u32) {
        self.out[self.pos..self.pos + 4].copy_from_slice(&word.to_le_bytes());
        self.pos += 4;
        self.sum ^= word;
    }

    fn put_all(&mut self, words: &[u32]) {
        for &w in words {
            self.put(w);
        }
    }
}
