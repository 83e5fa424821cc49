use std::{net::SocketAddrV4, path::PathBuf};

use anyhow::Context;
use bittorrent_piece::{
    bencode,
    config::{ClientConfig, ConfigArgs},
    tracing_init::init_tracing,
    PeerSession, PieceDownloader, TcpConnector, Torrent, TrackerRequest,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Downloads verified pieces of a torrent")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints a bencoded value as json
    Decode { value: String },
    /// Prints the metadata of a torrent file
    Info { torrent: PathBuf },
    /// Prints the peers the tracker knows for a torrent
    Peers { torrent: PathBuf },
    /// Shakes hands with one peer and prints its id
    Handshake { torrent: PathBuf, peer: SocketAddrV4 },
    /// Downloads and verifies one piece
    #[command(name = "download_piece")]
    DownloadPiece {
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
        piece: u32,
    },
    /// Downloads every piece in order into one file
    Download {
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::from_args(&cli.config).context("reading the configuration")?;
    init_tracing(&config.logging);

    match cli.command {
        Command::Decode { value } => {
            let (decoded, _rest) =
                bencode::decode_prefix(value.as_bytes()).context("decoding the value")?;
            println!("{}", serde_json::to_string(&decoded)?);
        }
        Command::Info { torrent } => {
            let torrent = read_torrent(&torrent)?;
            println!("Tracker URL: {}", torrent.announce());
            println!("Length: {}", torrent.length());
            println!("Info Hash: {}", torrent.info_hash());
            println!("Piece Length: {}", torrent.piece_length());
            println!("Piece Hashes:");
            for hash in torrent.piece_hashes().iter() {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let torrent = read_torrent(&torrent)?;
            let peers = discover_peers(&torrent, &config).await?;
            print!("{peers}");
        }
        Command::Handshake { torrent, peer } => {
            let torrent = read_torrent(&torrent)?;
            let mut session = PeerSession::connect(
                &TcpConnector,
                peer,
                &torrent.info_hash(),
                config.peer_id,
                &config.timeouts,
            )
            .await
            .context("shaking hands with the peer")?;
            println!("Peer ID: {}", hex::encode(session.peer_id()));
            session.close().await;
        }
        Command::DownloadPiece {
            output,
            torrent,
            piece,
        } => {
            let torrent = read_torrent(&torrent)?;
            let peers = discover_peers(&torrent, &config).await?;
            let downloader =
                PieceDownloader::new(&torrent, config.peer_id, &TcpConnector, config.timeouts);
            let bytes = downloader
                .download_piece(&peers.0, piece)
                .await
                .with_context(|| format!("downloading piece {piece}"))?;
            write_output(&output, &bytes).await?;
            info!(piece, output = %output.display(), "piece written");
        }
        Command::Download { output, torrent } => {
            let torrent = read_torrent(&torrent)?;
            let peers = discover_peers(&torrent, &config).await?;
            let downloader =
                PieceDownloader::new(&torrent, config.peer_id, &TcpConnector, config.timeouts);
            let bytes = downloader
                .download_all(&peers.0)
                .await
                .with_context(|| format!("downloading {}", torrent.name()))?;
            write_output(&output, &bytes).await?;
            info!(output = %output.display(), "download complete");
        }
    }
    Ok(())
}

fn read_torrent(path: &PathBuf) -> anyhow::Result<Torrent> {
    Torrent::read_from_file(path).with_context(|| format!("reading the torrent {}", path.display()))
}

async fn discover_peers(
    torrent: &Torrent,
    config: &ClientConfig,
) -> anyhow::Result<bittorrent_piece::tracker::PeerConnections> {
    let info_hash = torrent.info_hash();
    let response = TrackerRequest::new(&info_hash, &config.peer_id, config.port, torrent.length())
        .get_response(torrent.announce(), config.tracker_timeout)
        .await
        .context("announcing to the tracker")?;
    if response.peers.is_empty() {
        warn!("the tracker knows no peers for this torrent");
    } else {
        info!(peers = response.peers.0.len(), interval = ?response.interval, "tracker answered");
    }
    Ok(response.peers)
}

async fn write_output(path: &PathBuf, bytes: &[u8]) -> anyhow::Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
