//! Property 1 (spec.md §8): for any chunking of the same byte sequence, the
//! Framing Buffer + AVL codec produce the same decoded frame.

use teltonika_gateway::codec::avl::{self, AvlResult};
use teltonika_gateway::codec::framing::FramingBuffer;
use teltonika_gateway::model::Codec;

fn push_width(out: &mut Vec<u8>, codec: Codec, value: u16) {
    match codec {
        Codec::C8 => out.push(value as u8),
        Codec::C8Ext => out.extend_from_slice(&value.to_be_bytes()),
    }
}

fn one_record(ts_ms: i64) -> Vec<u8> {
    let mut r = Vec::new();
    r.extend_from_slice(&ts_ms.to_be_bytes());
    r.push(0x01);
    r.extend_from_slice(&40_000_000u32.to_be_bytes());
    r.extend_from_slice(&29_000_000u32.to_be_bytes());
    r.extend_from_slice(&0i16.to_be_bytes());
    r.extend_from_slice(&0u16.to_be_bytes());
    r.push(5);
    r.extend_from_slice(&12u16.to_be_bytes());
    push_width(&mut r, Codec::C8, 1);
    push_width(&mut r, Codec::C8, 1);
    push_width(&mut r, Codec::C8, 1);
    push_width(&mut r, Codec::C8, 1);
    r.push(0x2A);
    push_width(&mut r, Codec::C8, 0);
    push_width(&mut r, Codec::C8, 0);
    push_width(&mut r, Codec::C8, 0);
    r
}

fn full_frame() -> Vec<u8> {
    let mut body = Vec::new();
    body.push(0x08);
    body.push(1);
    body.extend_from_slice(&one_record(1_700_000_000_000));
    body.push(1);

    let crc = avl::crc16(&body);
    let mut frame = Vec::new();
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&(crc as u32).to_be_bytes());
    frame
}

fn decode_with_split(frame: &[u8], split_at: usize) -> avl::AvlResult {
    let mut buf = FramingBuffer::new();
    let (first, rest) = frame.split_at(split_at.min(frame.len()));
    buf.append(first).unwrap();
    if matches!(avl::try_parse_avl(&buf, false), AvlResult::Frame { .. }) {
        panic!("a partial frame must never report itself as complete");
    }
    buf.append(rest).unwrap();
    avl::try_parse_avl(&buf, false)
}

#[test]
fn one_shot_delivery_decodes_the_frame() {
    let frame = full_frame();
    let mut buf = FramingBuffer::new();
    buf.append(&frame).unwrap();
    match avl::try_parse_avl(&buf, false) {
        AvlResult::Frame { consumed, frame: f, .. } => {
            assert_eq!(consumed, frame.len());
            assert_eq!(f.records.len(), 1);
        }
        _ => panic!("expected a decoded frame"),
    }
}

#[test]
fn every_split_offset_decodes_identically_to_one_shot() {
    let frame = full_frame();
    for split_at in 1..frame.len() {
        let result = decode_with_split(&frame, split_at);
        match result {
            AvlResult::Frame { consumed, frame: f, .. } => {
                assert_eq!(consumed, frame.len(), "split at {split_at}");
                assert_eq!(f.records.len(), 1, "split at {split_at}");
                assert_eq!(f.records[0].timestamp_ms, 1_700_000_000_000, "split at {split_at}");
            }
            _ => panic!("split at {split_at} failed to decode a frame that decodes whole"),
        }
    }
}
