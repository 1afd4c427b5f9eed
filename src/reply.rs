// https://redis.io/docs/reference/protocol-spec

use std::fmt;
use std::io::Cursor;

use bytes::{Buf, Bytes};
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Largest bulk payload the decoder will accept, in bytes.
pub const MAX_BULK_LEN: usize = 64000;
/// Largest element count the decoder will accept in a multi-bulk reply.
pub const MAX_MULTI_BULK: usize = 64;
/// Longest line (up to but excluding its CRLF terminator) the decoder will scan.
pub const MAX_LINE_LEN: usize = 4096;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire reply")]
    Incomplete,
    #[error("invalid reply type tag: {0}")]
    InvalidTag(u8),
    #[error("format error: {0}")]
    Format(&'static str),
    #[error("size out of bounds: {0}")]
    Size(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for framing violations and for bound violations, both of which
    /// leave the stream position unreliable. The connection should be closed
    /// and redialed rather than read again.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidTag(_) | Error::Format(_) | Error::Size(_)
        )
    }
}

/// Defensive ceilings applied while decoding. These are not protocol limits,
/// they bound what the client is willing to buffer for a single reply from a
/// misbehaving or hostile peer.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_bulk_len: usize,
    pub max_multi_bulk: usize,
    pub max_line_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_bulk_len: MAX_BULK_LEN,
            max_multi_bulk: MAX_MULTI_BULK,
            max_line_len: MAX_LINE_LEN,
        }
    }
}

impl Limits {
    /// Upper bound on the buffered size of any single well-formed reply:
    /// a multi-bulk header line plus, per element, a length line, the payload
    /// ceiling and its terminator.
    pub(crate) fn max_reply_len(&self) -> usize {
        let per_element = self.max_line_len + self.max_bulk_len + CRLF.len();
        self.max_line_len + self.max_multi_bulk.max(1) * per_element
    }
}

/// The five reply kinds a server may send. Multi-bulk elements are restricted
/// to bulk strings; nested arrays are rejected at decode time.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    MultiBulk(Vec<Bytes>),
}

impl Reply {
    /// Decodes exactly one reply from `src`, dispatching on the tag byte.
    ///
    /// Returns `Error::Incomplete` when the buffer does not yet hold a whole
    /// reply; the cursor position is meaningless in that case and the caller
    /// is expected to retry with more data. Every declared length is checked
    /// against `limits` before any payload is consumed.
    pub fn parse(src: &mut Cursor<&[u8]>, limits: &Limits) -> Result<Self, Error> {
        // The first byte always identifies the reply kind. Subsequent bytes
        // constitute the reply's contents.
        let tag = Tag::try_from(get_byte(src)?)?;

        match tag {
            Tag::Status => {
                let line = get_line(src, limits.max_line_len)?;
                Ok(Reply::Status(line_to_string(line)?))
            }
            Tag::Error => {
                let line = get_line(src, limits.max_line_len)?;
                Ok(Reply::Error(line_to_string(line)?))
            }
            Tag::Integer => {
                let line = get_line(src, limits.max_line_len)?;
                Ok(Reply::Integer(parse_int(line)?))
            }
            // $<length>\r\n<data>\r\n
            Tag::Bulk => Ok(Reply::Bulk(parse_bulk_body(src, limits)?)),
            // *<number-of-elements>\r\n<element-1>...<element-n>
            Tag::MultiBulk => {
                let line = get_line(src, limits.max_line_len)?;
                let count = parse_int(line)?;
                if count < 0 || count as usize > limits.max_multi_bulk {
                    return Err(Error::Size("multi-bulk count out of bounds"));
                }

                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    match Tag::try_from(get_byte(src)?)? {
                        Tag::Bulk => elements.push(parse_bulk_body(src, limits)?),
                        _ => {
                            return Err(Error::Format(
                                "multi-bulk elements must be bulk strings",
                            ))
                        }
                    }
                }

                Ok(Reply::MultiBulk(elements))
            }
        }
    }
}

// Mirrors the original ResponseString formatting. Informational only, never
// used for correctness; binary payloads are rendered lossily.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "Status={}", s),
            Reply::Error(s) => write!(f, "Error={}", s),
            Reply::Integer(i) => write!(f, "Integer={}", i),
            Reply::Bulk(bytes) => write!(f, "Bulk: {}", String::from_utf8_lossy(bytes)),
            Reply::MultiBulk(elements) => {
                write!(f, "MultiBulk:")?;
                for bytes in elements {
                    write!(f, " {}", String::from_utf8_lossy(bytes))?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
enum Tag {
    Status,    // '+'
    Error,     // '-'
    Integer,   // ':'
    Bulk,      // '$'
    MultiBulk, // '*'
}

impl TryFrom<u8> for Tag {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Error> {
        match byte {
            b'+' => Ok(Self::Status),
            b'-' => Ok(Self::Error),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::Bulk),
            b'*' => Ok(Self::MultiBulk),
            _ => Err(Error::InvalidTag(byte)),
        }
    }
}

/// Reads a bulk string body, the `$` tag having already been consumed: a
/// length line, then exactly that many payload bytes, then CRLF.
///
/// A negative declared length is a size error, not a nil value. The original
/// client rejected `$-1` the same way, and this implementation keeps that
/// behavior rather than growing a null reply case.
fn parse_bulk_body(src: &mut Cursor<&[u8]>, limits: &Limits) -> Result<Bytes, Error> {
    let line = get_line(src, limits.max_line_len)?;
    let declared = parse_int(line)?;
    if declared < 0 || declared as usize > limits.max_bulk_len {
        return Err(Error::Size("bulk length out of bounds"));
    }
    let len = declared as usize;

    let start = src.position() as usize;
    let buf = src.get_ref();
    if buf.len() - start < len + CRLF.len() {
        return Err(Error::Incomplete);
    }
    if &buf[start + len..start + len + CRLF.len()] != CRLF {
        return Err(Error::Format("bulk payload is missing its CRLF terminator"));
    }

    let data = Bytes::copy_from_slice(&buf[start..start + len]);
    src.set_position((start + len + CRLF.len()) as u64);

    Ok(data)
}

/// Returns the next line, up to but excluding its CRLF terminator, advancing
/// the cursor past the terminator. A line that runs past `max_len` before its
/// terminator appears is rejected rather than buffered indefinitely.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>, max_len: usize) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = src.get_ref();
    let scan_end = buf.len().min(start + max_len + CRLF.len());

    let terminator = buf[start..scan_end]
        .windows(CRLF.len())
        .position(|window| window == CRLF);

    match terminator {
        Some(index) => {
            src.set_position((start + index + CRLF.len()) as u64);
            Ok(&buf[start..start + index])
        }
        None if buf.len() - start >= max_len + CRLF.len() => {
            Err(Error::Size("line exceeds maximum scan length"))
        }
        None => Err(Error::Incomplete),
    }
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

fn line_to_string(line: &[u8]) -> Result<String, Error> {
    String::from_utf8(line.to_vec()).map_err(|_| Error::Format("line is not valid UTF-8"))
}

fn parse_int(line: &[u8]) -> Result<i64, Error> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(Error::Format("expected a base-10 integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Reply, Error> {
        let mut cursor = Cursor::new(data);
        Reply::parse(&mut cursor, &Limits::default())
    }

    #[test]
    fn parse_status_reply() {
        let reply = parse(b"+OK\r\n");

        assert!(matches!(reply, Ok(Reply::Status(ref s)) if s == "OK"));
    }

    #[test]
    fn parse_error_reply() {
        let reply = parse(b"-ERR bad\r\n");

        assert!(matches!(reply, Ok(Reply::Error(ref s)) if s == "ERR bad"));
    }

    fn parse_integer_reply(data: &[u8], expected: i64) {
        let reply = parse(data);

        assert!(matches!(reply, Ok(Reply::Integer(i)) if i == expected));
    }

    #[test]
    fn parse_integer_reply_positive() {
        parse_integer_reply(b":42\r\n", 42);
    }

    #[test]
    fn parse_integer_reply_negative() {
        parse_integer_reply(b":-1000\r\n", -1000);
    }

    #[test]
    fn parse_integer_reply_zero() {
        parse_integer_reply(b":0\r\n", 0);
    }

    #[test]
    fn parse_integer_reply_positive_signed() {
        parse_integer_reply(b":+1000\r\n", 1000);
    }

    #[test]
    fn parse_integer_reply_not_a_number() {
        let reply = parse(b":fortytwo\r\n");

        assert!(matches!(reply, Err(Error::Format(_))));
    }

    #[test]
    fn parse_bulk_reply() {
        let reply = parse(b"$3\r\nfoo\r\n");

        assert!(matches!(reply, Ok(Reply::Bulk(ref b)) if b == &Bytes::from("foo")));
    }

    #[test]
    fn parse_bulk_reply_empty() {
        let reply = parse(b"$0\r\n\r\n");

        assert!(matches!(reply, Ok(Reply::Bulk(ref b)) if b.is_empty()));
    }

    #[test]
    fn parse_bulk_reply_binary_safe() {
        let reply = parse(b"$6\r\na\r\nb\x00c\r\n");

        assert!(matches!(
            reply,
            Ok(Reply::Bulk(ref b)) if b == &Bytes::from_static(b"a\r\nb\x00c")
        ));
    }

    #[test]
    fn parse_bulk_reply_negative_length() {
        // A nil bulk on the wire; rejected as a bound violation by design.
        let reply = parse(b"$-1\r\n");

        assert!(matches!(reply, Err(Error::Size(_))));
    }

    #[test]
    fn parse_bulk_reply_oversized() {
        // The declared length alone trips the ceiling; no payload follows.
        let reply = parse(b"$70000\r\n");

        assert!(matches!(reply, Err(Error::Size(_))));
    }

    #[test]
    fn parse_bulk_reply_corrupt_terminator() {
        let reply = parse(b"$3\r\nfooXY");

        assert!(matches!(reply, Err(Error::Format(_))));
    }

    #[test]
    fn parse_bulk_reply_truncated_payload() {
        let reply = parse(b"$10\r\nfoo");

        assert!(matches!(reply, Err(Error::Incomplete)));
    }

    #[test]
    fn parse_multi_bulk_reply() {
        let reply = parse(b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");

        assert!(matches!(
            reply,
            Ok(Reply::MultiBulk(ref a))
                if a == &[Bytes::from("foo"), Bytes::from("bar")]
        ));
    }

    #[test]
    fn parse_multi_bulk_reply_empty() {
        let reply = parse(b"*0\r\n");

        assert!(matches!(reply, Ok(Reply::MultiBulk(ref a)) if a.is_empty()));
    }

    #[test]
    fn parse_multi_bulk_reply_oversized_count() {
        // The declared count alone trips the ceiling; no elements follow.
        let reply = parse(b"*100\r\n");

        assert!(matches!(reply, Err(Error::Size(_))));
    }

    #[test]
    fn parse_multi_bulk_reply_negative_count() {
        let reply = parse(b"*-1\r\n");

        assert!(matches!(reply, Err(Error::Size(_))));
    }

    #[test]
    fn parse_multi_bulk_reply_rejects_non_bulk_element() {
        let reply = parse(b"*2\r\n:1\r\n:2\r\n");

        assert!(matches!(reply, Err(Error::Format(_))));
    }

    #[test]
    fn parse_multi_bulk_reply_rejects_nested_array() {
        let reply = parse(b"*1\r\n*1\r\n$1\r\na\r\n");

        assert!(matches!(reply, Err(Error::Format(_))));
    }

    #[test]
    fn parse_unknown_tag() {
        let reply = parse(b"!x\r\n");

        assert!(matches!(reply, Err(Error::InvalidTag(b'!'))));
    }

    #[test]
    fn parse_empty_buffer() {
        let reply = parse(b"");

        assert!(matches!(reply, Err(Error::Incomplete)));
    }

    #[test]
    fn parse_line_exceeding_scan_length() {
        let mut data = vec![b'+'];
        data.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN + 10));

        let reply = parse(&data);

        assert!(matches!(reply, Err(Error::Size(_))));
    }

    #[test]
    fn parse_respects_custom_limits() {
        let limits = Limits {
            max_bulk_len: 4,
            max_multi_bulk: 1,
            max_line_len: 64,
        };

        let mut cursor = Cursor::new(&b"$5\r\nhello\r\n"[..]);
        let reply = Reply::parse(&mut cursor, &limits);
        assert!(matches!(reply, Err(Error::Size(_))));

        let mut cursor = Cursor::new(&b"*2\r\n$1\r\na\r\n$1\r\nb\r\n"[..]);
        let reply = Reply::parse(&mut cursor, &limits);
        assert!(matches!(reply, Err(Error::Size(_))));
    }

    #[test]
    fn parse_advances_cursor_past_the_reply() {
        let data = b"+OK\r\n:7\r\n";
        let mut cursor = Cursor::new(&data[..]);
        let limits = Limits::default();

        let first = Reply::parse(&mut cursor, &limits);
        let second = Reply::parse(&mut cursor, &limits);

        assert!(matches!(first, Ok(Reply::Status(ref s)) if s == "OK"));
        assert!(matches!(second, Ok(Reply::Integer(7))));
        assert_eq!(cursor.position() as usize, data.len());
    }

    #[test]
    fn display_reply_kinds() {
        assert_eq!(Reply::Status("OK".into()).to_string(), "Status=OK");
        assert_eq!(Reply::Error("ERR bad".into()).to_string(), "Error=ERR bad");
        assert_eq!(Reply::Integer(42).to_string(), "Integer=42");
        assert_eq!(Reply::Bulk(Bytes::from("foo")).to_string(), "Bulk: foo");
        assert_eq!(
            Reply::MultiBulk(vec![Bytes::from("foo"), Bytes::from("bar")]).to_string(),
            "MultiBulk: foo bar"
        );
    }
}
