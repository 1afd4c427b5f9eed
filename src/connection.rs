use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error as ThisError;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time;
use tokio_util::codec::Framed;
use tracing::debug;
use uuid::Uuid;

use crate::codec::ReplyCodec;
use crate::command::Command;
use crate::reply::{self, Limits, Reply};

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("failed to establish connection: {0}")]
    Dial(#[source] std::io::Error),
    #[error("connection attempt timed out after {0:?}")]
    DialTimeout(Duration),
    #[error(transparent)]
    Io(std::io::Error),
    #[error(transparent)]
    Reply(reply::Error),
    #[error("connection is closed")]
    Closed,
    #[error("non-OK response ({0})")]
    NonOk(String),
}

// I/O failures on an established stream are reported apart from decode
// failures, so callers can tell a dropped peer from a garbled one.
impl From<reply::Error> for Error {
    fn from(err: reply::Error) -> Self {
        match err {
            reply::Error::Io(err) => Error::Io(err),
            err => Error::Reply(err),
        }
    }
}

/// A client connection to a single server.
///
/// Requests and replies strictly alternate on the one underlying stream: the
/// reply read by [`read_reply`](Connection::read_reply) always corresponds to
/// the most recently sent command. There is no pipelining and no internal
/// locking; every operation takes `&mut self`, so concurrent use requires
/// external mutual exclusion.
///
/// After a `Format` or `Size` decode error the stream position is unreliable.
/// Close the connection and dial again rather than reading further.
pub struct Connection {
    pub id: Uuid,
    framed: Framed<TcpStream, ReplyCodec>,
    closed: bool,
}

impl Connection {
    /// Opens a TCP connection to `addr`, failing if the peer is unreachable
    /// within `timeout`. This is the only timeout in the client: reads and
    /// writes on the established stream block until the peer responds or the
    /// transport fails.
    pub async fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self, Error> {
        Self::connect_with_limits(addr, timeout, Limits::default()).await
    }

    pub async fn connect_with_limits<A: ToSocketAddrs>(
        addr: A,
        timeout: Duration,
        limits: Limits,
    ) -> Result<Self, Error> {
        let stream = time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::DialTimeout(timeout))?
            .map_err(Error::Dial)?;

        let id = Uuid::new_v4();
        debug!(connection_id = %id, peer_address = ?stream.peer_addr().ok(), "connected");

        Ok(Connection {
            id,
            framed: Framed::new(stream, ReplyCodec::new(limits)),
            closed: false,
        })
    }

    /// Serializes `command` and writes it to the stream. The write is
    /// all-or-nothing per call; if it fails partway the connection state is
    /// undefined and the caller should close and redial.
    pub async fn send_command(&mut self, command: Command) -> Result<(), Error> {
        self.guard_open()?;
        debug!(connection_id = %self.id, argc = command.args().len(), "sending command");
        self.framed.send(command).await?;
        Ok(())
    }

    /// Reads exactly one reply. A well-formed error reply from the server is
    /// data, not a client fault: it is returned as `Ok(Reply::Error(_))`.
    pub async fn read_reply(&mut self) -> Result<Reply, Error> {
        self.guard_open()?;
        match self.framed.next().await {
            Some(Ok(reply)) => {
                debug!(connection_id = %self.id, %reply, "received reply");
                Ok(reply)
            }
            Some(Err(err)) => Err(err.into()),
            // The peer closed the stream where a reply was expected.
            None => Err(Error::Reply(reply::Error::Format(
                "unexpected end of stream",
            ))),
        }
    }

    /// Reads one reply and succeeds only if it is exactly `Status("OK")`.
    /// Any other reply, including a different status line or a server error,
    /// is reported with its stringified form.
    pub async fn read_status_ok(&mut self) -> Result<(), Error> {
        match self.read_reply().await? {
            Reply::Status(status) if status == "OK" => Ok(()),
            reply => Err(Error::NonOk(reply.to_string())),
        }
    }

    /// Shuts the transport down. Every later operation, including a second
    /// `close`, fails with [`Error::Closed`].
    pub async fn close(&mut self) -> Result<(), Error> {
        self.guard_open()?;
        self.closed = true;
        debug!(connection_id = %self.id, "closing connection");
        self.framed.get_mut().shutdown().await.map_err(Error::Io)?;
        Ok(())
    }

    fn guard_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }
}
