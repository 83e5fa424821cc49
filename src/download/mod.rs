use std::net::SocketAddrV4;

use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::Timeouts,
    messages::payloads::RequestPiecePayload,
    peer::{Connector, PeerError, PeerSession},
    torrent::Torrent,
    PeerId, BLOCK_MAX,
};

mod cursor;
mod error;

pub use cursor::{next_peer, PeerCursor};
pub use error::DownloadError;

/// The requests for one piece, in order, each at most `BLOCK_MAX` long.
pub fn block_requests(index: u32, piece_size: u32) -> Vec<RequestPiecePayload> {
    (0..piece_size)
        .step_by(BLOCK_MAX as usize)
        .map(|begin| RequestPiecePayload::new(index, begin, BLOCK_MAX.min(piece_size - begin)))
        .collect()
}

/// Downloads and verifies pieces of one torrent, one peer session at a time.
pub struct PieceDownloader<'a, C> {
    torrent: &'a Torrent,
    client_id: PeerId,
    connector: &'a C,
    timeouts: Timeouts,
}

impl<'a, C: Connector> PieceDownloader<'a, C> {
    pub fn new(torrent: &'a Torrent, client_id: PeerId, connector: &'a C, timeouts: Timeouts) -> Self {
        Self {
            torrent,
            client_id,
            connector,
            timeouts,
        }
    }

    /// Downloads the piece `index` trying `peers` in order.
    ///
    /// A peer that drops the connection is replaced by the next one and the blocks
    /// received so far are kept. A piece that fails the hash check is downloaded again
    /// from the next peer, starting with an empty buffer.
    #[instrument(skip(self, peers), fields(peers = peers.len()))]
    pub async fn download_piece(
        &self,
        peers: &[SocketAddrV4],
        index: u32,
    ) -> Result<Bytes, DownloadError> {
        let (Some(size), Some(&expected)) =
            (self.torrent.piece_size(index), self.torrent.piece_hash(index))
        else {
            return Err(DownloadError::InvalidPieceIndex {
                index,
                num_pieces: self.torrent.num_pieces(),
            });
        };
        if peers.is_empty() {
            return Err(DownloadError::NoPeersAvailable { index, tried: 0 });
        }

        let requests = block_requests(index, size);
        let mut cursor = PeerCursor::default();

        loop {
            let Some(mut session) = self.open_next_session(peers, &mut cursor).await else {
                return Err(DownloadError::PieceDownloadFailed {
                    index,
                    attempts: cursor.tried(),
                });
            };
            let mut piece = BytesMut::with_capacity(size as usize);

            let mut next = 0;
            while let Some(&request) = requests.get(next) {
                match self.fetch_block(&mut session, request).await {
                    Ok(block) => {
                        piece.extend_from_slice(&block);
                        next += 1;
                    }
                    Err(error) => {
                        warn!(
                            addr = %session.addr(),
                            begin = request.begin,
                            %error,
                            "lost the peer while waiting for a block"
                        );
                        session.close().await;
                        session = match self.open_next_session(peers, &mut cursor).await {
                            Some(session) => session,
                            None => {
                                return Err(DownloadError::NoPeersAvailable {
                                    index,
                                    tried: cursor.tried(),
                                })
                            }
                        };
                    }
                }
            }
            session.close().await;
            debug_assert_eq!(piece.len(), size as usize);

            let found: [u8; 20] = Sha1::digest(&piece).into();
            if found == expected {
                info!(addr = %session.addr(), size, "piece verified");
                return Ok(piece.freeze());
            }
            let mismatch = DownloadError::ChecksumMismatch {
                index,
                addr: session.addr(),
                expected: hex::encode(expected),
                found: hex::encode(found),
            };
            warn!(error = %mismatch, "discarding the piece");
        }
    }

    /// Downloads every piece in order and returns the whole content.
    pub async fn download_all(&self, peers: &[SocketAddrV4]) -> Result<Bytes, DownloadError> {
        let mut content = BytesMut::new();
        let num_pieces = self.torrent.num_pieces() as u32;
        for index in 0..num_pieces {
            let piece = self.download_piece(peers, index).await?;
            content.extend_from_slice(&piece);
            info!(piece = index + 1, of = num_pieces, "progress");
        }
        Ok(content.freeze())
    }

    /// Opens a session to the next peer that completes the handshake and unchokes us.
    async fn open_next_session(
        &self,
        peers: &[SocketAddrV4],
        cursor: &mut PeerCursor,
    ) -> Option<PeerSession<C::Stream>> {
        while let Some((addr, next)) = next_peer(peers, *cursor) {
            *cursor = next;
            match self.open_session(addr).await {
                Ok(session) => return Some(session),
                Err(error) => warn!(%addr, %error, "skipping peer"),
            }
        }
        None
    }

    async fn open_session(&self, addr: SocketAddrV4) -> Result<PeerSession<C::Stream>, PeerError> {
        let info_hash = self.torrent.info_hash();
        let mut session =
            PeerSession::connect(self.connector, addr, &info_hash, self.client_id, &self.timeouts)
                .await?;
        if let Err(error) = session.prepare_download().await {
            session.close().await;
            return Err(error);
        }
        Ok(session)
    }

    /// Requests one block. Errors other than a closed connection get one more try on
    /// the same session.
    ///
    /// The retry leaves the first request outstanding. If the peer answers it late, that
    /// duplicate arrives while the next block is awaited and `request_once` drops it.
    async fn fetch_block(
        &self,
        session: &mut PeerSession<C::Stream>,
        request: RequestPiecePayload,
    ) -> Result<Bytes, PeerError> {
        let mut retried = false;
        loop {
            match request_once(session, request).await {
                Ok(block) => return Ok(block),
                Err(error) if retried || error.is_connection_closed() => return Err(error),
                Err(error) => {
                    debug!(
                        addr = %session.addr(),
                        begin = request.begin,
                        %error,
                        "requesting the block again"
                    );
                    retried = true;
                }
            }
        }
    }
}

async fn request_once<T>(
    session: &mut PeerSession<T>,
    request: RequestPiecePayload,
) -> Result<Bytes, PeerError>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    session.request_block(request).await?;
    let mut response = session.recv_block().await?;
    if response.index == request.index && response.begin < request.begin {
        // an earlier block of this piece, it is already in the buffer
        debug!(begin = response.begin, "dropping a duplicate block");
        response = session.recv_block().await?;
    }
    if response.index != request.index
        || response.begin != request.begin
        || response.block.len() != request.length as usize
    {
        return Err(PeerError::UnexpectedBlock {
            addr: session.addr(),
            index: response.index,
            begin: response.begin,
            length: response.block.len(),
        });
    }
    debug!(begin = request.begin, length = request.length, "block");
    Ok(response.block)
}
