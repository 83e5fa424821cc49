use std::net::SocketAddrV4;

/// Position in the ordered peer list. It only moves forward, so every peer is tried at most once.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PeerCursor(usize);

impl PeerCursor {
    /// how many peers were handed out so far
    pub fn tried(&self) -> usize {
        self.0
    }
}

/// The peer at `cursor` and the cursor pointing past it, None once the list is exhausted.
pub fn next_peer(peers: &[SocketAddrV4], cursor: PeerCursor) -> Option<(SocketAddrV4, PeerCursor)> {
    peers
        .get(cursor.0)
        .map(|&peer| (peer, PeerCursor(cursor.0 + 1)))
}
