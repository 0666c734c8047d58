//! Newline-delimited JSON framing for the controller link.
//!
//! Decoding is tolerant by construction: a read may contain several complete
//! records, a record may arrive split across reads (the tail stays in the
//! buffer until its `\n` shows up), and a record that fails to parse surfaces
//! as [`Decoded::Invalid`] without disturbing the records after it.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{Command, Reply};

/// Hard cap on a single record; a controller that streams an unterminated
/// line forever must not grow the inbound buffer without bound.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;

/// One decoded inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Command(Command),
    /// The record was not a well-formed command. The connection stays up;
    /// the session answers with a single `error` reply.
    Invalid { error: String },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record exceeds {MAX_RECORD_BYTES} bytes")]
    RecordTooLong,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Codec for both directions of the link: decodes [`Command`] records,
/// encodes [`Reply`] records, one JSON object per line.
#[derive(Debug, Default)]
pub struct RecordCodec {
    // Scan resume point, so a long unterminated line is not rescanned
    // from the start on every read.
    scanned: usize,
}

impl RecordCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RecordCodec {
    type Item = Decoded;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>, CodecError> {
        // Iterative on purpose: a flood of blank keepalive lines must cost a
        // loop turn each, not a stack frame each.
        loop {
            let newline = src[self.scanned..].iter().position(|&b| b == b'\n');
            let Some(offset) = newline else {
                if src.len() > MAX_RECORD_BYTES {
                    return Err(CodecError::RecordTooLong);
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.scanned + offset);
            src.advance(1); // the delimiter itself
            self.scanned = 0;

            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim_end_matches('\r');
            if trimmed.trim().is_empty() {
                // Blank keepalive lines are not records.
                continue;
            }
            return match serde_json::from_str::<Command>(trimmed) {
                Ok(cmd) => Ok(Some(Decoded::Command(cmd))),
                Err(e) => Ok(Some(Decoded::Invalid {
                    error: format!("invalid command record: {e}"),
                })),
            };
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>, CodecError> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                // End of stream: a partial record has no terminator coming.
                // Drop it so the session sees a clean EOF.
                src.clear();
                self.scanned = 0;
                Ok(None)
            }
        }
    }
}

impl Encoder<Reply> for RecordCodec {
    type Error = CodecError;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<(), CodecError> {
        let json = serde_json::to_string(&reply)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(json.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
