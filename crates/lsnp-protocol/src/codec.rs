//! Line codec for LSNP datagrams.
//!
//! Wire format: `KEY:VALUE` lines in insertion order, message terminated by
//! an empty line. Lines are split on the first colon; lines without one are
//! dropped. No escaping.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Frame;
use crate::{ProtocolError, MAX_DATAGRAM_BYTES};

const TERMINATOR: &[u8] = b"\n\n";

/// Render a frame as datagram bytes.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut out = String::new();
    for (key, value) in frame.fields() {
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    out.into_bytes()
}

/// Parse one datagram. A missing TYPE is not an error here; the typed
/// conversion rejects it.
pub fn decode(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    if bytes.len() > MAX_DATAGRAM_BYTES {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_DATAGRAM_BYTES,
        });
    }
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
    let mut frame = Frame::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        match line.split_once(':') {
            Some((key, value)) if !key.is_empty() => frame.set(key, value),
            _ => {
                if !line.is_empty() {
                    tracing::trace!(line, "discarding malformed line");
                }
            }
        }
    }
    Ok(frame)
}

/// Codec for framing LSNP messages in a byte buffer.
///
/// One datagram normally holds exactly one message; `decode_eof` accepts a
/// final message that lacks its terminating blank line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LsnpCodec;

impl Decoder for LsnpCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Skip blank lines between messages
        let leading = src
            .iter()
            .take_while(|b| matches!(b, b'\n' | b'\r'))
            .count();
        src.advance(leading);

        let Some(end) = src.windows(TERMINATOR.len()).position(|w| w == TERMINATOR) else {
            if src.len() > MAX_DATAGRAM_BYTES {
                let size = src.len();
                src.clear();
                return Err(ProtocolError::MessageTooLarge {
                    size,
                    max: MAX_DATAGRAM_BYTES,
                });
            }
            return Ok(None);
        };

        let body = src.split_to(end);
        src.advance(TERMINATOR.len());
        decode(&body).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        let body = src.split();
        decode(&body).map(Some)
    }
}

impl Encoder<Frame> for LsnpCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode(&item);
        if payload.len() > MAX_DATAGRAM_BYTES {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_BYTES,
            });
        }
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
