use std::convert::TryInto;
use std::io::Cursor;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::reply::{self, Limits, Reply};

/// Frames one reply at a time out of the read buffer and serializes outgoing
/// commands, applying the configured decode ceilings.
pub struct ReplyCodec {
    limits: Limits,
}

impl ReplyCodec {
    pub fn new(limits: Limits) -> Self {
        ReplyCodec { limits }
    }
}

impl Decoder for ReplyCodec {
    type Item = Reply;
    type Error = reply::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // A peer that keeps a reply open forever must not grow the buffer
        // without bound. Any single well-formed reply fits under this cap.
        if src.len() > self.limits.max_reply_len() {
            return Err(reply::Error::Size("reply exceeds maximum buffered size"));
        }

        let mut cursor = Cursor::new(&src[..]);
        let reply = match Reply::parse(&mut cursor, &self.limits) {
            Ok(reply) => reply,
            // Not enough data to parse a reply yet.
            Err(reply::Error::Incomplete) => return Ok(None),
            Err(err) => return Err(err),
        };

        let position: usize = cursor
            .position()
            .try_into()
            .expect("cursor position fits in usize");

        // Remove the parsed reply from the buffer.
        src.advance(position);

        Ok(Some(reply))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(reply) => Ok(Some(reply)),
            None if src.is_empty() => Ok(None),
            // The stream ended where more reply bytes were expected.
            None => Err(reply::Error::Format("unexpected end of stream")),
        }
    }
}

impl Encoder<Command> for ReplyCodec {
    type Error = reply::Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&command.serialize());
        Ok(())
    }
}
