use std::{future::Future, io, net::SocketAddrV4, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::{
    config::Timeouts,
    messages::{
        payloads::{RequestPiecePayload, ResponsePiecePayload},
        Frame, MessageFramer, MessageId, PeerMessage,
    },
    torrent::InfoHash,
    PeerId,
};

pub mod error;
pub mod handshake;

pub use error::{HandshakeError, PeerError};
pub use handshake::Handshake;

/// Opens the transport a session runs on.
pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&self, addr: SocketAddrV4) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain tcp connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, addr: SocketAddrV4) -> impl Future<Output = io::Result<TcpStream>> + Send {
        TcpStream::connect(addr)
    }
}

/// Where a session is in the protocol. Transitions only move forward, except for
/// `Unchoked` and `Choked` which follow the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// the handshake is done, nothing else was exchanged
    Connected,
    /// we declared interest and wait for the peer to unchoke us
    Interested,
    Unchoked,
    /// the peer choked us after unchoking
    Choked,
    Closed,
}

/// One connection to one peer after a successful handshake.
pub struct PeerSession<T> {
    addr: SocketAddrV4,
    peer_id: PeerId,
    state: SessionState,
    framed: Framed<T, MessageFramer>,
    read_timeout: Duration,
    released: bool,
}

impl<T> std::fmt::Debug for PeerSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("addr", &self.addr)
            .field("peer_id", &hex::encode(self.peer_id))
            .field("state", &self.state)
            .finish()
    }
}

impl<T> PeerSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Opens a transport through `connector` and shakes hands on it.
    pub async fn connect<C>(
        connector: &C,
        addr: SocketAddrV4,
        info_hash: &InfoHash,
        client_id: PeerId,
        timeouts: &Timeouts,
    ) -> Result<Self, PeerError>
    where
        C: Connector<Stream = T>,
    {
        let stream = match timeout(timeouts.connect, connector.connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                return Err(PeerError::HandshakeFailed {
                    addr,
                    source: HandshakeError::Connect(error),
                })
            }
            Err(_) => {
                return Err(PeerError::HandshakeFailed {
                    addr,
                    source: HandshakeError::Timeout(timeouts.connect),
                })
            }
        };
        Self::handshake(stream, addr, info_hash, client_id, timeouts).await
    }

    /// Runs the handshake on an already open transport.
    pub async fn handshake(
        mut stream: T,
        addr: SocketAddrV4,
        info_hash: &InfoHash,
        client_id: PeerId,
        timeouts: &Timeouts,
    ) -> Result<Self, PeerError> {
        let exchange = Handshake::new(*info_hash.as_bytes(), client_id).shake_hands(&mut stream);
        let reply = match timeout(timeouts.read, exchange).await {
            Ok(reply) => reply,
            Err(_) => Err(HandshakeError::Timeout(timeouts.read)),
        }
        .map_err(|source| PeerError::HandshakeFailed { addr, source })?;

        if reply.info_hash != *info_hash.as_bytes() {
            warn!(
                %addr,
                expected = %info_hash,
                got = %hex::encode(reply.info_hash),
                "peer answered the handshake with a different info hash"
            );
        }
        debug!(%addr, peer_id = %hex::encode(reply.peer_id), "handshake complete");

        Ok(Self {
            addr,
            peer_id: reply.peer_id,
            state: SessionState::Connected,
            framed: Framed::new(stream, MessageFramer),
            read_timeout: timeouts.read,
            released: false,
        })
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    /// the id the remote peer sent in its handshake
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sends one framed message.
    pub async fn send(&mut self, id: MessageId, payload: impl Into<Bytes>) -> Result<(), PeerError> {
        self.ensure_open("send to")?;
        trace!(addr = %self.addr, %id, "send");
        if let Err(error) = self.framed.send(PeerMessage::new(id, payload)).await {
            return Err(self.io_error("send to", error));
        }
        Ok(())
    }

    /// Waits for the next message, which has to carry the id `expected`. Keep-alives are skipped.
    pub async fn recv_expect(&mut self, expected: MessageId) -> Result<PeerMessage, PeerError> {
        self.ensure_open("receive from")?;
        let message = loop {
            let frame = match timeout(self.read_timeout, self.framed.next()).await {
                Err(_) => {
                    let reason = format!("no message within {:?}", self.read_timeout);
                    return Err(self.connection_closed(reason));
                }
                Ok(None) => return Err(self.connection_closed("end of stream".to_string())),
                Ok(Some(Err(error))) => return Err(self.io_error("receive from", error)),
                Ok(Some(Ok(frame))) => frame,
            };
            match frame {
                Frame::KeepAlive => trace!(addr = %self.addr, "keep-alive"),
                Frame::Message(message) => break message,
            }
        };

        // the choke state follows the peer even when the message was not expected
        match message.message_id() {
            Some(MessageId::Unchoke) => self.state = SessionState::Unchoked,
            Some(MessageId::Choke) if self.state == SessionState::Unchoked => {
                self.state = SessionState::Choked
            }
            _ => {}
        }

        if message.id != expected as u8 {
            return Err(PeerError::UnexpectedMessage {
                addr: self.addr,
                expected,
                got: message.id,
            });
        }
        Ok(message)
    }

    /// bitfield, interested, unchoke
    pub async fn prepare_download(&mut self) -> Result<(), PeerError> {
        if self.state != SessionState::Connected {
            return Err(self.invalid_state("prepare a download with"));
        }
        // the bitfield is not used for piece selection
        self.recv_expect(MessageId::Bitfield).await?;
        self.send(MessageId::Interested, Bytes::new()).await?;
        self.state = SessionState::Interested;
        self.recv_expect(MessageId::Unchoke).await?;
        debug!(addr = %self.addr, "unchoked");
        Ok(())
    }

    pub async fn request_block(&mut self, request: RequestPiecePayload) -> Result<(), PeerError> {
        if self.state != SessionState::Unchoked {
            return Err(self.invalid_state("request a block from"));
        }
        self.send(MessageId::Request, request.to_be_bytes()).await
    }

    pub async fn recv_block(&mut self) -> Result<ResponsePiecePayload, PeerError> {
        if self.state != SessionState::Unchoked {
            return Err(self.invalid_state("receive a block from"));
        }
        let message = self.recv_expect(MessageId::Piece).await?;
        ResponsePiecePayload::from_be_bytes(message.data).ok_or(PeerError::MalformedMessage {
            addr: self.addr,
            what: MessageId::Piece,
        })
    }

    /// Shuts the transport down. Calling it again does nothing.
    pub async fn close(&mut self) {
        self.state = SessionState::Closed;
        if self.released {
            return;
        }
        self.released = true;
        if let Err(error) = self.framed.get_mut().shutdown().await {
            debug!(addr = %self.addr, %error, "shutdown failed");
        }
    }

    fn ensure_open(&self, action: &'static str) -> Result<(), PeerError> {
        if self.state == SessionState::Closed {
            return Err(self.invalid_state(action));
        }
        Ok(())
    }

    fn invalid_state(&self, action: &'static str) -> PeerError {
        PeerError::InvalidState {
            addr: self.addr,
            action,
            state: self.state,
        }
    }

    fn connection_closed(&mut self, reason: String) -> PeerError {
        self.state = SessionState::Closed;
        PeerError::ConnectionClosed {
            addr: self.addr,
            reason,
        }
    }

    fn io_error(&mut self, action: &'static str, error: io::Error) -> PeerError {
        use io::ErrorKind::*;
        match error.kind() {
            UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe | NotConnected => {
                self.connection_closed(error.to_string())
            }
            _ => PeerError::Io {
                addr: self.addr,
                action,
                error,
            },
        }
    }
}
