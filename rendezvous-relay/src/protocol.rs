//! Line framing for the signaling protocol.
//!
//! Every frame is a run of bytes terminated by a single `\n`. The first line
//! a client sends is its identity; every later line is
//! `DESTINATION SP PAYLOAD`. The relay answers only with forwarded lines of
//! the shape `SENDER SP PAYLOAD`.

use std::{borrow::Cow, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_TERMINATOR: u8 = b'\n';
const SEPARATOR: u8 = b' ';

/// A routing request read from a registered client.
///
/// Identities are raw bytes: two identities are the same only if their
/// bytes are, whatever their encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDirective {
    pub destination: Vec<u8>,
    pub payload: Vec<u8>,
}

impl RoutingDirective {
    /// Splits a raw line on its first space.
    ///
    /// Returns `None` when the line has no space at all. The destination is
    /// trimmed; the payload keeps everything after the space except the line
    /// terminator.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let split = line.iter().position(|byte| *byte == SEPARATOR)?;
        let destination = line[..split].trim_ascii().to_vec();
        let payload = strip_terminator(&line[split + 1..]).to_vec();
        Some(Self {
            destination,
            payload,
        })
    }
}

/// A forwarded message as seen by the receiving client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    pub sender: String,
    pub payload: String,
}

impl RoutedMessage {
    pub fn parse(line: &[u8]) -> Option<Self> {
        let line = strip_terminator(line);
        let split = line.iter().position(|byte| *byte == SEPARATOR)?;
        Some(Self {
            sender: String::from_utf8_lossy(&line[..split]).into_owned(),
            payload: String::from_utf8_lossy(&line[split + 1..]).into_owned(),
        })
    }
}

/// Reads the next `\n`-terminated line into `buf`, replacing its contents.
///
/// Returns `Ok(false)` once the stream is exhausted. Bytes left over at EOF
/// without a terminator are not a line and are dropped.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let bytes = reader.read_until(LINE_TERMINATOR, buf).await?;
    if bytes == 0 || buf.last() != Some(&LINE_TERMINATOR) {
        return Ok(false);
    }
    Ok(true)
}

/// Extracts the identity from the registration line. Empty identities are
/// passed through.
pub fn parse_identity(line: &[u8]) -> Vec<u8> {
    line.trim_ascii().to_vec()
}

/// Renders an identity for log fields only.
pub fn lossy(identity: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(identity)
}

/// Builds the line delivered to a destination, terminated exactly once.
pub fn encode_forward(sender: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(sender.len() + payload.len() + 2);
    encoded.extend_from_slice(sender);
    encoded.push(SEPARATOR);
    encoded.extend_from_slice(payload);
    encoded.push(LINE_TERMINATOR);
    encoded
}

/// Builds a `DESTINATION SP PAYLOAD` request line for the client side.
pub fn encode_directive(destination: &str, payload: &str) -> Vec<u8> {
    encode_forward(destination.as_bytes(), payload.as_bytes())
}

pub async fn write_line<W>(writer: &mut W, line: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(line).await?;
    writer.flush().await
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    line.strip_suffix(&[LINE_TERMINATOR]).unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_splits_on_first_space_only() {
        let directive = RoutingDirective::parse(b"bob hello there  friend\n").expect("directive");
        assert_eq!(directive.destination, b"bob");
        assert_eq!(directive.payload, b"hello there  friend");
    }

    #[test]
    fn directive_without_space_is_malformed() {
        assert_eq!(RoutingDirective::parse(b"garbage\n"), None);
    }

    #[test]
    fn directive_keeps_carriage_return_in_payload() {
        let directive = RoutingDirective::parse(b"\tbob ping\r\n").expect("directive");
        assert_eq!(directive.destination, b"bob");
        assert_eq!(directive.payload, b"ping\r");
    }

    #[test]
    fn directive_allows_empty_payload() {
        let directive = RoutingDirective::parse(b"bob \n").expect("directive");
        assert_eq!(directive.destination, b"bob");
        assert!(directive.payload.is_empty());
    }

    #[test]
    fn identity_is_trimmed_but_not_validated() {
        assert_eq!(parse_identity(b"  alice\r\n"), b"alice");
        assert!(parse_identity(b"\n").is_empty());
    }

    #[test]
    fn identities_keep_non_utf8_bytes() {
        assert_eq!(parse_identity(b"\xff\n"), b"\xff");
        assert_ne!(parse_identity(b"\xff\n"), parse_identity(b"\xfe\n"));

        let directive = RoutingDirective::parse(b"\xfe hi\n").expect("directive");
        assert_eq!(directive.destination, b"\xfe");
        assert_eq!(encode_forward(b"\xff", &directive.payload), b"\xff hi\n");
    }

    #[test]
    fn forward_is_terminated_once() {
        assert_eq!(encode_forward(b"alice", b"ping"), b"alice ping\n");
    }

    #[test]
    fn routed_message_drops_terminator() {
        let message = RoutedMessage::parse(b"alice hello world\n").expect("message");
        assert_eq!(message.sender, "alice");
        assert_eq!(message.payload, "hello world");
    }

    #[tokio::test]
    async fn read_line_discards_unterminated_tail() {
        let mut reader: &[u8] = b"alice\nbob ping";
        let mut buf = Vec::new();

        assert!(read_line(&mut reader, &mut buf).await.expect("first read"));
        assert_eq!(buf, b"alice\n");
        assert!(!read_line(&mut reader, &mut buf).await.expect("second read"));
        assert!(!read_line(&mut reader, &mut buf).await.expect("third read"));
    }
}
