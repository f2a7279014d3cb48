//! Line framing for the IRC connection.
//!
//! Frames end at `\r\n` (a bare `\n` is tolerated on the way in). The
//! decoded payload never contains `\r` or `\n`; outgoing lines get the
//! terminator appended. A line with no terminator within
//! [`MAX_LINE_LEN`] bytes is a connection-fatal error.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum accepted line length, terminator included.
pub const MAX_LINE_LEN: usize = 8191;

/// Codec turning a raw byte stream into IRC lines and back.
#[derive(Clone, Copy, Debug, Default)]
pub struct IrcCodec;

impl Decoder for IrcCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        let newline = src.iter().position(|&b| b == b'\n');

        let Some(pos) = newline else {
            if src.len() > MAX_LINE_LEN {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("line exceeds {} bytes", MAX_LINE_LEN),
                ));
            }
            return Ok(None);
        };

        if pos + 1 > MAX_LINE_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", MAX_LINE_LEN),
            ));
        }

        let mut line = src.split_to(pos + 1);
        // Drop the LF and any CR before it.
        line.truncate(pos);
        while line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

impl Encoder<String> for IrcCodec {
    type Error = std::io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if line.contains('\r') || line.contains('\n') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "line contains CR or LF",
            ));
        }

        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut IrcCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(Some(line)) = codec.decode(buf) {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_decode_crlf() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"PING :a\r\nPING :b\r\n"[..]);

        assert_eq!(decode_all(&mut codec, &mut buf), vec!["PING :a", "PING :b"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_bare_lf() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"PING :a\n"[..]);

        assert_eq!(decode_all(&mut codec, &mut buf), vec!["PING :a"]);
    }

    #[test]
    fn test_decode_partial() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(&b"PING :par"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"tial\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("PING :partial"));
    }

    #[test]
    fn test_decode_oversize_is_fatal() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LEN + 1].as_slice());

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_appends_crlf() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();

        codec.encode("PONG :irc.example".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PONG :irc.example\r\n");
    }

    #[test]
    fn test_encode_rejects_injection() {
        let mut codec = IrcCodec;
        let mut buf = BytesMut::new();

        assert!(codec.encode("PRIVMSG #c :a\r\nQUIT".to_string(), &mut buf).is_err());
    }
}
