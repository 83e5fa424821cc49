use std::{io, net::SocketAddrV4, time::Duration};

use thiserror::Error;

use crate::{messages::MessageId, peer::SessionState};

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Failed to establish a tcp connection with error: `{0}`")]
    Connect(io::Error),
    #[error("The peer did not complete the handshake within {0:?}")]
    Timeout(Duration),
    #[error("Failed to exchange the handshake bytes with error: `{0}`")]
    Io(io::Error),
    #[error("The peer closed the connection before sending 68 handshake bytes")]
    ShortReply,
    #[error("Failed to encode the handshake with error: `{0}`")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Failed to decode the handshake received from the peer with error: `{0}`")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("The handshake announced a protocol string of length {0}, expected 19")]
    ProtocolLength(u8),
    #[error("The handshake announced the protocol `{0}`")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("The handshake with the peer `{addr}` failed: {source}")]
    HandshakeFailed {
        addr: SocketAddrV4,
        #[source]
        source: HandshakeError,
    },
    #[error("The peer `{addr}` sent the message id {got} while we waited for {expected}")]
    UnexpectedMessage {
        addr: SocketAddrV4,
        expected: MessageId,
        got: u8,
    },
    #[error("The connection to the peer `{addr}` closed: {reason}")]
    ConnectionClosed { addr: SocketAddrV4, reason: String },
    #[error("Failed with error `{error}` to {action} the peer `{addr}`")]
    Io {
        addr: SocketAddrV4,
        action: &'static str,
        error: io::Error,
    },
    #[error(
        "The peer `{addr}` answered with {length} bytes at offset {begin} of piece {index}, which was not requested"
    )]
    UnexpectedBlock {
        addr: SocketAddrV4,
        index: u32,
        begin: u32,
        length: usize,
    },
    #[error("The peer `{addr}` sent a malformed {what} message")]
    MalformedMessage { addr: SocketAddrV4, what: MessageId },
    #[error("Can't {action} the peer `{addr}` while the session is {state:?}")]
    InvalidState {
        addr: SocketAddrV4,
        action: &'static str,
        state: SessionState,
    },
}

impl PeerError {
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, PeerError::ConnectionClosed { .. })
    }
}
