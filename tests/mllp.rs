//! MLLP framing over byte streams, and parsing what comes out of a frame.

use hl7er7::mllp::{self, MllpDecoder, MllpReader, END_BLOCK, START_BLOCK};
use hl7er7::{parse_message, Config, Hl7Error};
use std::io::Cursor;

const ACK: &str = "MSH|^~\\&|A|B|C|D|20240101000000||ACK^A01^ACK|1|P|2.5\rMSA|AA|1";
const ADT: &str = "MSH|^~\\&|A|B|C|D|20240101000000||ADT^A01^ADT_A01|2|P|2.5\r\
EVN||20240101000000\r\
PID|1||123^^^HOSP^MR||DOE^JOHN\r\
PV1|1|I";

#[test]
fn test_write_then_read() {
    let mut wire = Vec::new();
    mllp::write_message(&mut wire, ACK).expect("write");
    mllp::write_message(&mut wire, ADT).expect("write");
    assert_eq!(wire[0], START_BLOCK);

    let mut reader = Cursor::new(wire.clone());
    let first = mllp::read_message(&mut reader).expect("read").expect("first");
    assert_eq!(first, ACK);
    // Nothing past the first envelope was consumed.
    let second = mllp::read_message(&mut reader).expect("read").expect("second");
    assert_eq!(second, ADT);
    assert!(mllp::read_message(&mut reader).expect("eof").is_none());

    let messages: Vec<String> = MllpReader::new(Cursor::new(wire))
        .collect::<Result<_, _>>()
        .expect("read all");
    assert_eq!(messages, [ACK, ADT]);
}

#[test]
fn test_read_single_frame_per_connection() {
    let mut wire = Vec::new();
    mllp::write_message(&mut wire, ADT).expect("write");
    let mut reader = Cursor::new(wire);
    let text = mllp::read_message(&mut reader).expect("read").expect("message");
    let msg = parse_message(&text, &Config::new().expect("config")).expect("parse");
    assert_eq!(msg.name().as_deref(), Some("ADT_A01"));
    assert_eq!(msg.to_er7(), ADT);
    assert!(mllp::read_message(&mut reader).expect("eof").is_none());
}

#[test]
fn test_truncated_stream() {
    let framed = mllp::wrap(ACK);
    let cut = &framed.as_bytes()[..framed.len() - 2];
    let mut reader = Cursor::new(cut.to_vec());
    assert!(mllp::read_message(&mut reader).expect("read").is_none());
    assert!(matches!(
        mllp::unwrap(cut),
        Err(Hl7Error::Parser(_))
    ));
}

#[test]
fn test_decoder_handles_back_to_back_frames() {
    let mut bytes = b"\r\n".to_vec();
    bytes.extend_from_slice(mllp::wrap(ACK).as_bytes());
    bytes.extend_from_slice(mllp::wrap(ADT).as_bytes());
    let mut decoder = MllpDecoder::new();
    for chunk in bytes.chunks(7) {
        decoder.push(chunk);
    }
    let first = decoder.next_message().expect("first").expect("utf8");
    let second = decoder.next_message().expect("second").expect("utf8");
    assert_eq!(first, ACK);
    assert_eq!(second, ADT);
    assert!(decoder.next_message().is_none());
    assert_eq!(decoder.pending(), 0);
}

#[test]
fn test_end_block_without_carriage_return_waits() {
    let mut decoder = MllpDecoder::new();
    decoder.push(&[START_BLOCK]);
    decoder.push(ACK.as_bytes());
    decoder.push(&[END_BLOCK]);
    assert!(decoder.next_message().is_none());
    decoder.push(b"\r");
    assert_eq!(decoder.next_message().expect("frame").expect("utf8"), ACK);
}

#[test]
fn test_message_to_mllp_round_trip() {
    let cfg = Config::new().expect("config");
    let msg = parse_message(ADT, &cfg).expect("parse");
    let framed = msg.to_mllp();
    let text = mllp::unwrap(framed.as_bytes()).expect("unwrap");
    let back = parse_message(&text, &cfg).expect("reparse");
    assert_eq!(back.to_er7(), msg.to_er7());
}

#[test]
fn test_oversized_frame_is_dropped() {
    let mut decoder = MllpDecoder::with_max_frame_size(32);
    decoder.push(&[START_BLOCK]);
    decoder.push(&[b'x'; 40]);
    assert!(matches!(
        decoder.next_message(),
        Some(Err(Hl7Error::Parser(_)))
    ));
    assert_eq!(decoder.pending(), 0);

    // Tail of the dropped frame, then a frame that fits.
    decoder.push(b"yyy\r\x1c\r");
    decoder.push(mllp::wrap("MSH|^~\\&").as_bytes());
    assert_eq!(
        decoder.next_message().expect("frame").expect("utf8"),
        "MSH|^~\\&"
    );
    assert!(decoder.next_message().is_none());
}
