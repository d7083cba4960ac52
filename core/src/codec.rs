//! Line framing for the server connection
//!
//! Inbound bytes are split on `\n` (a preceding `\r` is stripped) and handed
//! out as text lines; parsing happens later so that a malformed line never
//! surfaces as a stream error. Outbound commands are written one per line
//! with a `\r\n` terminator.

use crate::Command;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Maximum accepted line length including tags
pub const MAX_LINE_LENGTH: usize = 8191;

/// Codec framing IRC lines
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Set while discarding the tail of an oversized line
    skipping: bool,
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    warn!(bytes = src.len(), "discarding oversized partial line");
                    src.clear();
                    self.skipping = true;
                }
                return Ok(None);
            };

            let line = src.split_to(pos);
            src.advance(1);

            if self.skipping {
                self.skipping = false;
                continue;
            }
            if line.len() > MAX_LINE_LENGTH {
                warn!(bytes = line.len(), "skipped oversized line");
                continue;
            }

            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line.to_string()));
        }
    }
}

impl Encoder<Command> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_string();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
