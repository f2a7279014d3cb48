//! Control-plane framing.
//!
//! Messages are JSON documents separated by a blank line, i.e. the
//! four bytes `\r\n\r\n`. Malformed JSON inside a frame is a decode
//! error the client layer reports as `invalid_message`.

use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

/// Separator between messages.
pub const FRAME_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Upper bound on one frame, separator included.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Codec for `\r\n\r\n`-separated JSON documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Decoder for JsonCodec {
    type Item = Value;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, Self::Error> {
        let separator = src
            .windows(FRAME_SEPARATOR.len())
            .position(|window| window == FRAME_SEPARATOR);

        let Some(pos) = separator else {
            if src.len() > MAX_FRAME_LEN {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "frame too large",
                ));
            }
            return Ok(None);
        };

        let frame = src.split_to(pos + FRAME_SEPARATOR.len());
        let document = &frame[..pos];

        serde_json::from_slice(document).map(Some).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("bad json: {}", e))
        })
    }
}

impl Encoder<Value> for JsonCodec {
    type Error = std::io::Error;

    fn encode(&mut self, value: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let document = serde_json::to_vec(&value)?;

        dst.reserve(document.len() + FRAME_SEPARATOR.len());
        dst.put_slice(&document);
        dst.put_slice(FRAME_SEPARATOR);
        Ok(())
    }
}
