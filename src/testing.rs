//! Scripted in-memory peers for the session and download tests.

use std::{
    collections::HashMap,
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddrV4},
    sync::Mutex,
};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use sha1::{Digest, Sha1};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream},
    task::JoinHandle,
};
use tokio_util::codec::Framed;

use crate::{
    bencode::{self, Dict, Value},
    messages::{
        payloads::{RequestPiecePayload, ResponsePiecePayload},
        Frame, MessageFramer, MessageId, PeerMessage,
    },
    peer::{handshake::HANDSHAKE_LEN, Connector},
    torrent::Torrent,
    PeerId,
};

pub(crate) fn addr(n: u8) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, n), 6881)
}

pub(crate) fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A torrent whose piece hashes match `content`.
pub(crate) fn torrent_for(content: &[u8], piece_length: u32) -> Torrent {
    let pieces: Vec<u8> = content
        .chunks(piece_length as usize)
        .flat_map(|piece| <[u8; 20]>::from(Sha1::digest(piece)))
        .collect();
    let mut info = Dict::new();
    info.insert("length", content.len() as i64);
    info.insert("name", "sample.bin");
    info.insert("piece length", i64::from(piece_length));
    info.insert("pieces", pieces);
    let mut root = Dict::new();
    root.insert("announce", "http://127.0.0.1:1/announce");
    root.insert("info", info);
    Torrent::from_bytes(&bencode::encode(&Value::Dict(root))).unwrap()
}

/// How a fake peer behaves on one connection.
#[derive(Debug, Clone)]
pub(crate) struct PeerScript {
    pub peer_id: PeerId,
    pub content: Vec<u8>,
    pub piece_length: u32,
    /// answer the handshake with a wrong protocol length
    pub bad_handshake: bool,
    /// hang up on the request that follows this many served blocks
    pub close_after_blocks: Option<usize>,
    /// flip a byte in every block
    pub corrupt: bool,
    /// answer this many requests with a `have` before the block
    pub interject: usize,
    /// send the block after the `have` too, the way a peer with a slow disk would
    pub late_reply: bool,
    /// echo a wrong `begin` for the first block
    pub wrong_begin_once: bool,
}

impl PeerScript {
    pub fn honest(content: &[u8], piece_length: u32) -> Self {
        Self {
            peer_id: *b"-FK0001-fakefakefake",
            content: content.to_vec(),
            piece_length,
            bad_handshake: false,
            close_after_blocks: None,
            corrupt: false,
            interject: 0,
            late_reply: false,
            wrong_begin_once: false,
        }
    }
}

/// What a fake peer saw and sent.
#[derive(Debug, Default)]
pub(crate) struct PeerLog {
    pub requests: Vec<RequestPiecePayload>,
    pub bytes_served: usize,
}

impl PeerLog {
    fn merge(&mut self, other: PeerLog) {
        self.requests.extend(other.requests);
        self.bytes_served += other.bytes_served;
    }
}

/// Plays the remote side of one connection until the client hangs up.
pub(crate) async fn serve<S>(mut stream: S, script: PeerScript) -> PeerLog
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut log = PeerLog::default();

    let mut handshake = [0u8; HANDSHAKE_LEN];
    if stream.read_exact(&mut handshake).await.is_err() {
        return log;
    }
    handshake[48..].copy_from_slice(&script.peer_id);
    if script.bad_handshake {
        handshake[0] = 18;
    }
    if stream.write_all(&handshake).await.is_err() || script.bad_handshake {
        return log;
    }

    let mut framed = Framed::new(stream, MessageFramer);
    let num_pieces = script.content.len().div_ceil(script.piece_length as usize);
    let bitfield = vec![0xffu8; num_pieces.div_ceil(8)];
    if framed
        .send(PeerMessage::new(MessageId::Bitfield, bitfield))
        .await
        .is_err()
    {
        return log;
    }

    let mut blocks_served = 0;
    let mut interjected = 0;
    let mut wrong_begin_sent = false;
    while let Some(Ok(frame)) = framed.next().await {
        let Frame::Message(message) = frame else {
            continue;
        };
        let mut replies = Vec::new();
        match message.message_id() {
            Some(MessageId::Interested) => {
                replies.push(PeerMessage::new(MessageId::Unchoke, Bytes::new()))
            }
            Some(MessageId::Request) => {
                let Some(request) = RequestPiecePayload::from_be_bytes(&message.data) else {
                    return log;
                };
                log.requests.push(request);
                if script.close_after_blocks == Some(blocks_served) {
                    return log;
                }
                let interjecting = interjected < script.interject;
                if interjecting {
                    interjected += 1;
                    replies.push(PeerMessage::new(
                        MessageId::Have,
                        request.index.to_be_bytes().to_vec(),
                    ));
                }
                if !interjecting || script.late_reply {
                    let start = request.index as usize * script.piece_length as usize
                        + request.begin as usize;
                    let mut block = script.content[start..start + request.length as usize].to_vec();
                    if script.corrupt {
                        block[0] ^= 0xff;
                    }
                    let mut begin = request.begin;
                    if script.wrong_begin_once && !wrong_begin_sent {
                        wrong_begin_sent = true;
                        begin += 1;
                    }
                    blocks_served += 1;
                    log.bytes_served += block.len();
                    let piece = ResponsePiecePayload {
                        index: request.index,
                        begin,
                        block: block.into(),
                    };
                    replies.push(PeerMessage::new(MessageId::Piece, piece.to_be_bytes()));
                }
            }
            _ => continue,
        }
        for reply in replies {
            if framed.send(reply).await.is_err() {
                return log;
            }
        }
    }
    log
}

/// Hands out in-memory connections to scripted peers. Addresses without a script refuse.
#[derive(Default)]
pub(crate) struct FakeConnector {
    scripts: HashMap<SocketAddrV4, PeerScript>,
    served: Mutex<Vec<(SocketAddrV4, JoinHandle<PeerLog>)>>,
}

impl FakeConnector {
    pub fn new(scripts: impl IntoIterator<Item = (SocketAddrV4, PeerScript)>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
            served: Mutex::default(),
        }
    }

    /// Waits for every connection so far to end and merges the logs per address.
    pub async fn logs(&self) -> HashMap<SocketAddrV4, PeerLog> {
        let served = std::mem::take(&mut *self.served.lock().unwrap());
        let mut logs: HashMap<SocketAddrV4, PeerLog> = HashMap::new();
        for (addr, handle) in served {
            logs.entry(addr).or_default().merge(handle.await.unwrap());
        }
        logs
    }
}

impl Connector for FakeConnector {
    type Stream = DuplexStream;

    fn connect(&self, addr: SocketAddrV4) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let result = match self.scripts.get(&addr) {
            Some(script) => {
                let (client, remote) = tokio::io::duplex(1 << 16);
                let handle = tokio::spawn(serve(remote, script.clone()));
                self.served.lock().unwrap().push((addr, handle));
                Ok(client)
            }
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("nobody listens on {addr}"),
            )),
        };
        async move { result }
    }
}
