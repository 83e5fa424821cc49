use std::{
    fmt,
    net::{Ipv4Addr, SocketAddrV4},
    time::Duration,
};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    bencode::{self, BencodeError},
    torrent::InfoHash,
    PeerId,
};

/// The size of one peer in the compact peer list.
const COMPACT_PEER_LEN: usize = 6;

#[derive(Debug, Clone, Serialize)]
pub struct TrackerRequest<'a> {
    /// the info hash of the torrent
    #[serde(skip)]
    info_hash: &'a InfoHash,
    /// a unique identifier for your client
    #[serde(skip)]
    peer_id: &'a PeerId,
    /// the port your client is listening on
    port: u16,
    /// the total amount uploaded so far
    uploaded: u64,
    /// the total amount downloaded so far
    downloaded: u64,
    /// the number of bytes left to download
    left: u64,
    /// whether the peer list should use the compact representation
    /// only the compact representation is understood by this client
    compact: u8,
}

impl<'a> TrackerRequest<'a> {
    pub fn new(info_hash: &'a InfoHash, peer_id: &'a PeerId, port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            compact: 1,
        }
    }

    /// the query string, the binary fields are escaped byte by byte
    pub fn to_url_encoded(&self) -> Result<String, TrackerRequestError> {
        let rest = serde_urlencoded::to_string(self)
            .map_err(|error| TrackerRequestError::Encode(error.to_string()))?;
        Ok(format!(
            "info_hash={}&peer_id={}&{rest}",
            escape_bytes_url(&self.info_hash.0),
            escape_bytes_url(self.peer_id)
        ))
    }

    /// Announces to the tracker once, there is no retry.
    pub async fn get_response(
        &self,
        announce: &str,
        timeout: Duration,
    ) -> Result<TrackerResponse, TrackerRequestError> {
        let mut url =
            reqwest::Url::parse(announce).map_err(|error| TrackerRequestError::InvalidUrl {
                url: announce.to_string(),
                reason: error.to_string(),
            })?;
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => {
                format!("{existing}&{}", self.to_url_encoded()?)
            }
            _ => self.to_url_encoded()?,
        };
        url.set_query(Some(&query));

        let unreachable = |error| TrackerRequestError::Unreachable {
            url: announce.to_string(),
            error,
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(unreachable)?;
        debug!(%url, "announcing to tracker");
        let response = client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(unreachable)?;
        let response_bytes = response.bytes().await.map_err(unreachable)?;

        TrackerResponse::from_bytes(response_bytes)
    }
}

fn escape_bytes_url(bytes: &[u8; 20]) -> String {
    bytes
        .iter()
        .map(|b| {
            if b.is_ascii_alphanumeric() {
                (*b as char).to_string()
            } else {
                format!("%{}", hex::encode([*b]))
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// An integer, indicating how often your client should make a request to the tracker, in seconds.
    pub interval: Option<u64>,
    /// The peers in the order the tracker sent them.
    pub peers: PeerConnections,
}

impl TrackerResponse {
    pub fn from_bytes(response: Bytes) -> Result<Self, TrackerRequestError> {
        let value = bencode::decode(&response).map_err(|error| {
            TrackerRequestError::InvalidResponse {
                error,
                response: response.clone(),
            }
        })?;
        let dict = value
            .as_dict()
            .ok_or(TrackerRequestError::UnsupportedFormat {
                field: "<root>",
                found: value.kind(),
            })?;

        if let Some(reason) = dict.get(b"failure reason") {
            let reason = reason
                .as_bytes()
                .map(|r| String::from_utf8_lossy(r).into_owned())
                .unwrap_or_default();
            return Err(TrackerRequestError::Failure(reason));
        }

        let interval = dict
            .get(b"interval")
            .and_then(|v| v.as_int())
            .and_then(|n| u64::try_from(n).ok());

        let peers = match dict.get(b"peers") {
            None => PeerConnections::default(),
            Some(peers) => {
                let compact = peers
                    .as_bytes()
                    .ok_or(TrackerRequestError::UnsupportedFormat {
                        field: "peers",
                        found: peers.kind(),
                    })?;
                PeerConnections::from_compact(compact)
            }
        };

        Ok(Self { interval, peers })
    }
}

/// A list of peers, each one is represented using 6 bytes in the response.
/// The first 4 bytes are the peer's IP address and the last 2 bytes are the peer's port number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConnections(pub Vec<SocketAddrV4>);

impl PeerConnections {
    /// a trailing incomplete entry is ignored
    pub fn from_compact(v: &[u8]) -> Self {
        if v.len() % COMPACT_PEER_LEN != 0 {
            warn!(
                len = v.len(),
                "compact peer list is not a multiple of 6 bytes, ignoring the rest"
            );
        }
        PeerConnections(
            v.chunks_exact(COMPACT_PEER_LEN)
                .map(|chunk| {
                    SocketAddrV4::new(
                        Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                        u16::from_be_bytes([chunk[4], chunk[5]]),
                    )
                })
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for peer in &self.0 {
            writeln!(f, "{peer}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum TrackerRequestError {
    #[error("Failed to parse announce url `{url}`: `{reason}`")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to url-encode the tracker request: `{0}`")]
    Encode(String),
    #[error("The tracker at `{url}` is unreachable: `{error}`")]
    Unreachable { url: String, error: reqwest::Error },
    #[error("Failed with error: `{error}` to decode tracker response: `{response:?}`")]
    InvalidResponse {
        error: BencodeError,
        response: Bytes,
    },
    #[error("The tracker response field `{field}` has the unsupported form of a {found}")]
    UnsupportedFormat {
        field: &'static str,
        found: &'static str,
    },
    #[error("The tracker refused the announce: `{0}`")]
    Failure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_compact_peers() {
        let peers = PeerConnections::from_compact(&[127, 0, 0, 1, 0x1A, 0xE1]);
        assert_eq!(peers.0.len(), 1);
        assert_eq!(peers.0[0].to_string(), "127.0.0.1:6881");
    }

    #[test]
    fn trailing_partial_peer_is_ignored() {
        let peers =
            PeerConnections::from_compact(&[10, 0, 0, 1, 0, 80, 10, 0, 0, 2, 0, 81, 9, 9]);
        assert_eq!(
            peers.0,
            vec![
                "10.0.0.1:80".parse::<SocketAddrV4>().unwrap(),
                "10.0.0.2:81".parse().unwrap()
            ]
        );
    }

    #[test]
    fn url_encodes_binary_fields() {
        let info_hash = InfoHash([
            0xd6, 0x9f, 0x91, 0xe6, 0xb2, 0xae, 0x4c, 0x54, 0x24, 0x68, 0xd1, 0x07, 0x3a, 0x71,
            0xd4, 0xea, 0x13, 0x87, 0x9a, 0x7f,
        ]);
        let peer_id = *b"00112233445566778899";
        let request = TrackerRequest::new(&info_hash, &peer_id, 6881, 92063);
        assert_eq!(
            request.to_url_encoded().unwrap(),
            "info_hash=%d6%9f%91%e6%b2%aeLT%24h%d1%07%3aq%d4%ea%13%87%9a%7f\
             &peer_id=00112233445566778899\
             &port=6881&uploaded=0&downloaded=0&left=92063&compact=1"
        );
    }

    #[test]
    fn parses_a_compact_response() {
        let body = Bytes::from_static(b"d8:intervali60e5:peers12:\x7f\x00\x00\x01\x1a\xe1\xc0\xa8\x00\x02\x1a\xe2e");
        let response = TrackerResponse::from_bytes(body).unwrap();
        assert_eq!(response.interval, Some(60));
        assert_eq!(
            response.peers.to_string(),
            "127.0.0.1:6881\n192.168.0.2:6882\n"
        );
    }

    #[test]
    fn missing_peers_is_an_empty_list() {
        let response = TrackerResponse::from_bytes(Bytes::from_static(b"d8:intervali60ee")).unwrap();
        assert!(response.peers.is_empty());
    }

    #[test]
    fn non_compact_peers_are_unsupported() {
        let body = Bytes::from_static(b"d5:peersld2:ip9:127.0.0.14:porti6881eeee");
        let err = TrackerResponse::from_bytes(body).unwrap_err();
        assert!(matches!(
            err,
            TrackerRequestError::UnsupportedFormat {
                field: "peers",
                found: "list"
            }
        ));
    }

    #[test]
    fn failure_reason_and_garbage_are_errors() {
        let body = Bytes::from_static(b"d14:failure reason12:unregisterede");
        let err = TrackerResponse::from_bytes(body).unwrap_err();
        assert!(matches!(err, TrackerRequestError::Failure(reason) if reason == "unregistered"));

        let err = TrackerResponse::from_bytes(Bytes::from_static(b"<html>")).unwrap_err();
        assert!(matches!(err, TrackerRequestError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn invalid_announce_url_is_reported() {
        let info_hash = InfoHash([0; 20]);
        let peer_id = [b'a'; 20];
        let err = TrackerRequest::new(&info_hash, &peer_id, 6881, 1)
            .get_response("not a url", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerRequestError::InvalidUrl { .. }));
    }
}
