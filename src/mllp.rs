//! MLLP framing: `0x0B` + ER7 + `0x0D` + `0x1C` + `0x0D`.
//!
//! Only the envelope is handled here; sockets, threads and timeouts belong to the
//! caller, which feeds received bytes to an [`MllpDecoder`] (or calls
//! [`read_message`] / [`MllpReader`] on a blocking stream) and parses each extracted message.

use crate::error::{Hl7Error, Result};
use std::io::{Read, Write};
use tracing::{debug, trace};

/// Start block.
pub const START_BLOCK: u8 = 0x0B;
/// End block, followed by a carriage return.
pub const END_BLOCK: u8 = 0x1C;
pub const CARRIAGE_RETURN: u8 = 0x0D;
/// Largest envelope [`MllpDecoder::new`] accepts, markers included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame an ER7 message.
pub fn wrap(er7: &str) -> String {
    let mut out = String::with_capacity(er7.len() + 4);
    out.push(START_BLOCK as char);
    out.push_str(er7);
    out.push(CARRIAGE_RETURN as char);
    out.push(END_BLOCK as char);
    out.push(CARRIAGE_RETURN as char);
    out
}

/// Interior of one complete envelope, without the segment terminator added by [`wrap`].
pub fn unwrap(frame: &[u8]) -> Result<String> {
    let mut decoder = MllpDecoder::new();
    decoder.push(frame);
    match decoder.next_message() {
        Some(message) => message,
        None => Err(Hl7Error::Parser("incomplete MLLP frame".to_string())),
    }
}

/// Streaming envelope extractor.
#[derive(Debug)]
pub struct MllpDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl Default for MllpDecoder {
    fn default() -> Self {
        MllpDecoder {
            buffer: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl MllpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that drops any envelope longer than `max` bytes.
    pub fn with_max_frame_size(max: usize) -> Self {
        MllpDecoder {
            buffer: Vec::new(),
            max_frame_size: max,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete envelope.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete message, `None` until one is available. Bytes before a start
    /// block are discarded; a message that is not UTF-8 is consumed and reported as
    /// [`Hl7Error::Parser`], as is an envelope over the maximum frame size (its bytes
    /// are dropped, and the rest of it is skipped up to the next start block).
    pub fn next_message(&mut self) -> Option<Result<String>> {
        let start = match self.buffer.iter().position(|&b| b == START_BLOCK) {
            Some(pos) => pos,
            None => {
                if !self.buffer.is_empty() {
                    trace!(discarded = self.buffer.len(), "bytes outside MLLP frame");
                    self.buffer.clear();
                }
                return None;
            }
        };
        if start > 0 {
            trace!(discarded = start, "bytes before MLLP start block");
            self.buffer.drain(..start);
        }
        let end = self
            .buffer
            .windows(2)
            .position(|w| w[0] == END_BLOCK && w[1] == CARRIAGE_RETURN);
        let size = end.map_or(self.buffer.len(), |e| e + 2);
        if size > self.max_frame_size {
            let dropped = match end {
                Some(e) => self.buffer.drain(..e + 2).count(),
                None => self.buffer.drain(..).count(),
            };
            debug!(dropped, max = self.max_frame_size, "oversized MLLP frame dropped");
            return Some(Err(Hl7Error::Parser(format!(
                "MLLP frame exceeds {} bytes",
                self.max_frame_size
            ))));
        }
        let end = end?;
        let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
        let mut body = &frame[1..end];
        if body.last() == Some(&CARRIAGE_RETURN) {
            body = &body[..body.len() - 1];
        }
        debug!(bytes = body.len(), "MLLP frame received");
        Some(
            String::from_utf8(body.to_vec())
                .map_err(|e| Hl7Error::Parser(format!("MLLP payload is not UTF-8: {}", e))),
        )
    }
}

/// Read from `reader` until one message is complete, consuming nothing past its
/// envelope. `Ok(None)` on end of stream before a complete envelope. Reads one byte
/// at a time: wrap unbuffered streams in a `BufReader`, or use [`MllpReader`].
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<String>> {
    let mut decoder = MllpDecoder::new();
    let mut byte = [0u8; 1];
    loop {
        if let Some(message) = decoder.next_message() {
            return message.map(Some);
        }
        if reader.read(&mut byte)? == 0 {
            return Ok(None);
        }
        decoder.push(&byte);
    }
}

/// Message reader over a stream carrying several envelopes.
#[derive(Debug)]
pub struct MllpReader<R> {
    inner: R,
    decoder: MllpDecoder,
}

impl<R: Read> MllpReader<R> {
    pub fn new(inner: R) -> Self {
        MllpReader {
            inner,
            decoder: MllpDecoder::new(),
        }
    }

    /// Next message; `Ok(None)` once the stream ends.
    pub fn read_message(&mut self) -> Result<Option<String>> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(message) = self.decoder.next_message() {
                return message.map(Some);
            }
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.push(&chunk[..n]);
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for MllpReader<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_message().transpose()
    }
}

/// Write `er7` framed.
pub fn write_message<W: Write>(writer: &mut W, er7: &str) -> Result<()> {
    writer.write_all(wrap(er7).as_bytes())?;
    writer.flush()?;
    Ok(())
}
