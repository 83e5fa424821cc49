use std::net::SocketAddrV4;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DownloadError {
    #[error("The piece {index} does not exist, the torrent has {num_pieces} pieces")]
    InvalidPieceIndex { index: u32, num_pieces: usize },
    #[error("No peer left to download the piece {index} from after trying {tried}")]
    NoPeersAvailable { index: u32, tried: usize },
    #[error(
        "The piece {index} from the peer `{addr}` has the hash {found} instead of {expected}"
    )]
    ChecksumMismatch {
        index: u32,
        addr: SocketAddrV4,
        expected: String,
        found: String,
    },
    #[error("Failed to download the piece {index} after {attempts} attempts")]
    PieceDownloadFailed { index: u32, attempts: usize },
}
