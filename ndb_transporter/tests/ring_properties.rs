//! Ring channel ordering, fullness and envelope round trips

use ndb_common::prelude::*;
use ndb_malloc::{PageArena, PageBuffer};
use ndb_transporter::packer;
use ndb_transporter::{RingChannel, Signal};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;

fn ring(capacity: u32, slack: u32) -> (RingChannel, RingChannel, Arc<PageBuffer>) {
    let arena = PageArena::new(&ArenaConfig::with_pages(4096, 64, 64)).unwrap();
    let pages = Arc::new(
        arena
            .alloc_bytes(RingChannel::region_size(capacity, slack))
            .unwrap(),
    );
    let mut producer = RingChannel::over_pages(Arc::clone(&pages), capacity, slack).unwrap();
    producer.clear();
    let consumer = producer.view();
    (producer, consumer, pages)
}

/// Raw `(write, read)` cursor words at the start of the region.
fn cursors(pages: &PageBuffer) -> (u32, u32) {
    let base = pages.as_mut_ptr() as *const u32;
    // SAFETY: the header is the first 64 bytes of the buffer.
    unsafe { (base.read_volatile(), base.add(1).read_volatile()) }
}

#[derive(Debug, Clone)]
enum Op {
    Push(usize),
    Pop(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..=600).prop_map(Op::Push),
        1 => (1usize..=8).prop_map(Op::Pop),
    ]
}

const CAPACITY: u32 = 4096;
const SLACK: u32 = 512;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn messages_come_out_in_order(ops in prop::collection::vec(op(), 1..300)) {
        let (mut tx, mut rx, _pages) = ring(CAPACITY, SLACK);
        let mut in_flight: VecDeque<Vec<u8>> = VecDeque::new();
        let mut seq = 0u8;

        for op in ops {
            match op {
                Op::Push(len) => {
                    let msg = vec![seq; len];
                    if tx.push(&msg) {
                        in_flight.push_back(msg);
                        seq = seq.wrapping_add(1);
                    }
                }
                Op::Pop(n) => {
                    for _ in 0..n {
                        let Some(expected) = in_flight.pop_front() else { break };
                        let mut got = vec![0u8; expected.len()];
                        prop_assert!(rx.copy_out(&mut got));
                        prop_assert_eq!(&got, &expected);
                        rx.consume(got.len());
                    }
                }
            }
        }

        while let Some(expected) = in_flight.pop_front() {
            let mut got = vec![0u8; expected.len()];
            prop_assert!(rx.copy_out(&mut got));
            prop_assert_eq!(&got, &expected);
            rx.consume(got.len());
        }
        prop_assert_eq!(rx.available(), 0);
    }

    #[test]
    fn full_exactly_when_no_room(ops in prop::collection::vec(op(), 1..300)) {
        let (mut tx, mut rx, pages) = ring(CAPACITY, SLACK);
        let mut lens: VecDeque<usize> = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(len) => {
                    let used = tx.used();
                    let fits = len as u32 <= SLACK && len as u32 <= CAPACITY - SLACK - used;
                    let before = cursors(&pages);
                    let pushed = tx.push(&vec![0xA5; len]);
                    prop_assert_eq!(pushed, fits);
                    if pushed {
                        lens.push_back(len);
                    } else {
                        prop_assert_eq!(cursors(&pages), before);
                        prop_assert_eq!(tx.used(), used);
                    }
                }
                Op::Pop(n) => {
                    for _ in 0..n {
                        let Some(len) = lens.pop_front() else { break };
                        rx.consume(len);
                    }
                }
            }
            let (write, read) = cursors(&pages);
            prop_assert!(write < CAPACITY && read < CAPACITY);
            prop_assert_eq!(tx.used() as usize, lens.iter().sum::<usize>());
        }
    }
}

#[test]
fn hundred_byte_envelope_round_trip() {
    let (mut tx, mut rx, pages) = ring(64 * 1024, 1024);
    let body: Vec<u32> = (100..121).collect();
    let signal = Signal::new(
        44,
        BlockRef::new(NodeId::new(1), 247),
        BlockRef::new(NodeId::new(2), 247),
    )
    .with_body(&body)
    .unwrap();

    let len = packer::encoded_len(&signal, LinkFeatures::empty());
    assert_eq!(len, 100);

    let (_, read_before) = cursors(&pages);
    let mut slot = tx.reserve(len).unwrap();
    packer::encode(&signal, LinkFeatures::empty(), None, slot.as_mut_slice());
    slot.publish();
    assert_eq!(rx.available(), 100);

    let mut bytes = [0u8; 100];
    assert!(rx.copy_out(&mut bytes));
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let frame = packer::decode(&words).unwrap();
    assert_eq!(frame.header.gsn, 44);
    assert_eq!(frame.body, &body[..]);
    assert!(frame.sections.is_empty());

    rx.consume(len);
    let (_, read_after) = cursors(&pages);
    assert_eq!(read_after - read_before, 100);
    assert_eq!(tx.used(), 0);
}

#[test]
fn envelope_split_across_wrap_decodes() {
    let capacity = 64 * 1024;
    let (mut tx, mut rx, pages) = ring(capacity, 1024);

    // park both cursors 40 bytes before the end
    let filler = vec![0u8; 1000];
    let mut moved = 0usize;
    while moved + 1000 <= capacity as usize - 40 {
        assert!(tx.push(&filler));
        rx.consume(1000);
        moved += 1000;
    }
    let rest = capacity as usize - 40 - moved;
    assert!(tx.push(&vec![0u8; rest]));
    rx.consume(rest);
    assert_eq!(cursors(&pages), (capacity - 40, capacity - 40));

    let signal = Signal::new(9, BlockRef::default(), BlockRef::default())
        .with_body(&[0xDEAD_BEEF; 21])
        .unwrap();
    let features = LinkFeatures::CHECKSUM;
    let len = packer::encoded_len(&signal, features);
    let mut slot = tx.reserve(len).unwrap();
    packer::encode(&signal, features, None, slot.as_mut_slice());
    slot.publish();

    let (head, tail) = rx.peek(len).unwrap();
    assert_eq!(head.len(), 40);
    assert_eq!(tail.len(), len - 40);

    let mut bytes = vec![0u8; len];
    assert!(rx.copy_out(&mut bytes));
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let frame = packer::decode(&words).unwrap();
    assert_eq!(frame.body, &[0xDEAD_BEEF; 21]);
    rx.consume(len);
    assert_eq!(cursors(&pages), ((len - 40) as u32, (len - 40) as u32));
}
