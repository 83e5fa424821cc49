use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{peer::error::HandshakeError, PeerId};

pub const HANDSHAKE_LEN: usize = 68;
const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// `[19]["BitTorrent protocol"][8 reserved bytes][info hash][peer id]`
#[derive(Debug, Copy, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Handshake {
    length: u8,
    protocol: [u8; 19],
    reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: PeerId,
}

fn config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<HANDSHAKE_LEN>()
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: PeerId) -> Self {
        Self {
            length: PROTOCOL.len() as u8,
            protocol: *PROTOCOL,
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn to_bytes(&self) -> Result<[u8; HANDSHAKE_LEN], HandshakeError> {
        let mut bytes = [0u8; HANDSHAKE_LEN];
        let len = bincode::encode_into_slice(self, &mut bytes, config())?;
        debug_assert_eq!(len, HANDSHAKE_LEN);
        Ok(bytes)
    }

    /// decodes a reply, the fixed header has to match
    pub fn from_bytes(bytes: &[u8; HANDSHAKE_LEN]) -> Result<Self, HandshakeError> {
        let (handshake, _len) = bincode::decode_from_slice::<Handshake, _>(bytes, config())?;
        if handshake.length as usize != PROTOCOL.len() {
            return Err(HandshakeError::ProtocolLength(handshake.length));
        }
        if handshake.protocol != *PROTOCOL {
            return Err(HandshakeError::Protocol(
                String::from_utf8_lossy(&handshake.protocol).into_owned(),
            ));
        }
        // the reserved bytes announce extensions, peers are free to set them
        Ok(handshake)
    }

    /// Writes our handshake to the stream and returns the handshake received from it.
    pub async fn shake_hands<T>(self, stream: &mut T) -> Result<Self, HandshakeError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        stream
            .write_all(&self.to_bytes()?)
            .await
            .map_err(HandshakeError::Io)?;
        stream.flush().await.map_err(HandshakeError::Io)?;

        let mut reply = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut reply).await.map_err(|error| {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                HandshakeError::ShortReply
            } else {
                HandshakeError::Io(error)
            }
        })?;
        Self::from_bytes(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_HASH: [u8; 20] = [7; 20];

    #[test]
    fn layout_is_68_bytes() {
        let bytes = Handshake::new(INFO_HASH, *b"00112233445566778899")
            .to_bytes()
            .unwrap();
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0; 8]);
        assert_eq!(&bytes[28..48], &INFO_HASH);
        assert_eq!(&bytes[48..68], b"00112233445566778899");
    }

    #[test]
    fn rejects_a_wrong_header() {
        let mut bytes = Handshake::new(INFO_HASH, [1; 20]).to_bytes().unwrap();
        bytes[0] = 18;
        assert!(matches!(
            Handshake::from_bytes(&bytes),
            Err(HandshakeError::ProtocolLength(18))
        ));

        let mut bytes = Handshake::new(INFO_HASH, [1; 20]).to_bytes().unwrap();
        bytes[1] = b'b';
        assert!(matches!(
            Handshake::from_bytes(&bytes),
            Err(HandshakeError::Protocol(p)) if p == "bitTorrent protocol"
        ));
    }

    #[tokio::test]
    async fn exchanges_handshakes_and_learns_the_peer_id() {
        let (mut client, mut remote) = tokio::io::duplex(256);
        let peer = tokio::spawn(async move {
            let mut received = [0u8; HANDSHAKE_LEN];
            remote.read_exact(&mut received).await.unwrap();
            let mut reply = received;
            reply[20..28].copy_from_slice(&[0, 0, 0, 0, 0, 0x10, 0, 4]);
            reply[48..].copy_from_slice(b"-XX0001-remotepeerid");
            remote.write_all(&reply).await.unwrap();
            received
        });

        let reply = Handshake::new(INFO_HASH, *b"00112233445566778899")
            .shake_hands(&mut client)
            .await
            .unwrap();
        assert_eq!(&reply.peer_id, b"-XX0001-remotepeerid");
        assert_eq!(reply.info_hash, INFO_HASH);
        assert_eq!(&peer.await.unwrap()[48..], b"00112233445566778899");
    }

    #[tokio::test]
    async fn a_short_reply_fails() {
        let (mut client, mut remote) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut received = [0u8; HANDSHAKE_LEN];
            remote.read_exact(&mut received).await.unwrap();
            remote.write_all(&received[..40]).await.unwrap();
        });
        let err = Handshake::new(INFO_HASH, [0; 20])
            .shake_hands(&mut client)
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::ShortReply));
    }
}
