pub mod bencode;
pub mod config;
pub mod download;
pub mod messages;
pub mod peer;
pub mod torrent;
pub mod tracing_init;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ClientConfig, Timeouts};
pub use download::{DownloadError, PieceDownloader};
pub use peer::{Connector, PeerError, PeerSession, TcpConnector};
pub use torrent::{InfoHash, Torrent, TorrentError};
pub use tracker::{TrackerRequest, TrackerRequestError, TrackerResponse};

/// The 20 byte id a peer identifies itself with.
pub type PeerId = [u8; 20];

/// The largest block requested from a peer.
pub(crate) const BLOCK_MAX: u32 = 1 << 14;
