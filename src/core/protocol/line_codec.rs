// src/core/protocol/line_codec.rs

//! Implements the newline-delimited wire framing: request lines in, JSON
//! envelopes out.

use super::envelope::ResponseEnvelope;
use crate::core::BridgeError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// A `tokio_util::codec` implementation that decodes one request line per
/// `\n` and encodes one `ResponseEnvelope` per line.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    /// Offset already scanned for a newline, so partial reads are not rescanned.
    next_index: usize,
}

impl LineCodec {
    /// Creates a codec that rejects lines longer than `max_length` bytes
    /// (terminator excluded).
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    fn take_line(&mut self, src: &mut BytesMut, end: usize) -> String {
        let line = src.split_to(end);
        self.next_index = 0;
        let mut bytes: &[u8] = &line;
        if let [rest @ .., b'\r'] = bytes {
            bytes = rest;
        }
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline = src[self.next_index..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| self.next_index + offset);

        match newline {
            Some(idx) if content_len(src, idx) > self.max_length => {
                src.clear();
                self.next_index = 0;
                Err(BridgeError::LineTooLong(self.max_length))
            }
            Some(idx) => {
                let line = self.take_line(src, idx);
                // Drop the terminator itself.
                src.advance(1);
                Ok(Some(line))
            }
            None if src.len() > self.max_length + 1 => {
                src.clear();
                self.next_index = 0;
                Err(BridgeError::LineTooLong(self.max_length))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    /// A client may close its write half without a trailing newline; the
    /// leftover bytes are treated as a final line.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None if content_len(src, src.len()) > self.max_length => {
                src.clear();
                self.next_index = 0;
                Err(BridgeError::LineTooLong(self.max_length))
            }
            None => {
                let end = src.len();
                Ok(Some(self.take_line(src, end)))
            }
        }
    }
}

/// Length of the line ending at `newline`, not counting a trailing `\r`.
fn content_len(src: &BytesMut, newline: usize) -> usize {
    if newline > 0 && src[newline - 1] == b'\r' {
        newline - 1
    } else {
        newline
    }
}

impl Encoder<ResponseEnvelope> for LineCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: ResponseEnvelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        dst.reserve(body.len() + 1);
        dst.extend_from_slice(&body);
        dst.put_u8(b'\n');
        Ok(())
    }
}
