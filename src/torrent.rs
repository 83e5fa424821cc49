use std::{fmt, path::PathBuf};

use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::bencode::{self, BencodeError, Dict, Value};

pub const SHA1_LEN: usize = 20;

/// SHA-1 digest of the canonically encoded info dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; SHA1_LEN]);

impl InfoHash {
    pub fn as_bytes(&self) -> &[u8; SHA1_LEN] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// The hashes of all pieces, the index is the piece index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hashes(pub Vec<[u8; SHA1_LEN]>);

impl Hashes {
    /// splits the `pieces` byte string into 20 byte hashes
    fn from_pieces(v: &[u8]) -> Result<Self, TorrentError> {
        if v.len() % SHA1_LEN != 0 {
            return Err(TorrentError::InvalidPieces(v.len()));
        }
        Ok(Hashes(
            v.chunks_exact(SHA1_LEN)
                .map(|chunk| {
                    let mut hash = [0u8; SHA1_LEN];
                    hash.copy_from_slice(chunk);
                    hash
                })
                .collect(),
        ))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[u8; SHA1_LEN]> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8; SHA1_LEN]> {
        self.0.iter()
    }
}

/// A parsed metainfo file. It is built once from the file and never changes.
#[derive(Debug, Clone)]
pub struct Torrent {
    announce: String,
    name: String,
    length: u64,
    piece_length: u32,
    info_hash: InfoHash,
    piece_hashes: Hashes,
}

impl Torrent {
    pub fn read_from_file(path: &PathBuf) -> Result<Self, TorrentError> {
        let bytes = std::fs::read(path).map_err(|error| TorrentError::IOReadError {
            error,
            path: path.clone(),
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TorrentError> {
        let value = bencode::decode(bytes)?;
        let root = value.as_dict().ok_or(TorrentError::WrongType {
            field: "<root>",
            expected: "dictionary",
            found: value.kind(),
        })?;

        let announce = get_str(root, "announce")?.to_string();
        let info = get_field(root, "info")?;
        let info_dict = info.as_dict().ok_or(TorrentError::WrongType {
            field: "info",
            expected: "dictionary",
            found: info.kind(),
        })?;

        let name = get_str(info_dict, "name")?.to_string();
        let piece_length = get_int(info_dict, "piece length")?;
        let piece_length = u32::try_from(piece_length)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(TorrentError::OutOfRange {
                field: "piece length",
                value: piece_length,
            })?;
        let length = content_length(info_dict)?;

        let pieces = get_field(info_dict, "pieces")?;
        let pieces = pieces.as_bytes().ok_or(TorrentError::WrongType {
            field: "pieces",
            expected: "byte string",
            found: pieces.kind(),
        })?;
        let piece_hashes = Hashes::from_pieces(pieces)?;

        let expected = length.div_ceil(u64::from(piece_length));
        if piece_hashes.len() as u64 != expected {
            return Err(TorrentError::PieceCountMismatch {
                expected,
                found: piece_hashes.len(),
            });
        }

        let info_hash = InfoHash(Sha1::digest(bencode::encode(info)).into());

        Ok(Self {
            announce,
            name,
            length,
            piece_length,
            info_hash,
            piece_hashes,
        })
    }

    /// The url of the tracker.
    pub fn announce(&self) -> &str {
        &self.announce
    }

    /// In the single file case this is the name of the file, otherwise of the directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// the total length of the content in bytes
    pub fn length(&self) -> u64 {
        self.length
    }

    /// the number of bytes in each piece, only the last piece may be shorter
    pub fn piece_length(&self) -> u32 {
        self.piece_length
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn piece_hashes(&self) -> &Hashes {
        &self.piece_hashes
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn piece_hash(&self, index: u32) -> Option<&[u8; SHA1_LEN]> {
        self.piece_hashes.get(index as usize)
    }

    /// the real size of the piece, None if the index is out of range
    pub fn piece_size(&self, index: u32) -> Option<u32> {
        let n = self.num_pieces() as u64;
        let index = u64::from(index);
        if index >= n {
            return None;
        }
        if index == n - 1 {
            let last = self.length - u64::from(self.piece_length) * (n - 1);
            // the piece count invariant keeps the last piece within piece_length
            Some(last as u32)
        } else {
            Some(self.piece_length)
        }
    }
}

/// `length` for a single file, otherwise the sum of the lengths in `files`
fn content_length(info: &Dict) -> Result<u64, TorrentError> {
    if let Some(length) = info.get(b"length") {
        return to_length("length", length);
    }
    let Some(files) = info.get(b"files") else {
        return Err(TorrentError::MissingField("length"));
    };
    let files = files.as_list().ok_or(TorrentError::WrongType {
        field: "files",
        expected: "list",
        found: files.kind(),
    })?;
    files.iter().try_fold(0u64, |total, file| {
        let file = file.as_dict().ok_or(TorrentError::WrongType {
            field: "files",
            expected: "list of dictionaries",
            found: file.kind(),
        })?;
        let length = to_length("files.length", get_field(file, "length")?)?;
        total.checked_add(length).ok_or(TorrentError::OutOfRange {
            field: "files.length",
            value: i64::try_from(length).unwrap_or(i64::MAX),
        })
    })
}

fn to_length(field: &'static str, value: &Value) -> Result<u64, TorrentError> {
    let n = value.as_int().ok_or(TorrentError::WrongType {
        field,
        expected: "integer",
        found: value.kind(),
    })?;
    u64::try_from(n).map_err(|_| TorrentError::OutOfRange { field, value: n })
}

fn get_field<'a>(dict: &'a Dict, field: &'static str) -> Result<&'a Value, TorrentError> {
    dict.get(field.as_bytes())
        .ok_or(TorrentError::MissingField(field))
}

fn get_str<'a>(dict: &'a Dict, field: &'static str) -> Result<&'a str, TorrentError> {
    let value = get_field(dict, field)?;
    value.as_str().ok_or(TorrentError::WrongType {
        field,
        expected: "UTF-8 string",
        found: value.kind(),
    })
}

fn get_int(dict: &Dict, field: &'static str) -> Result<i64, TorrentError> {
    let value = get_field(dict, field)?;
    value.as_int().ok_or(TorrentError::WrongType {
        field,
        expected: "integer",
        found: value.kind(),
    })
}

#[derive(Error, Debug)]
pub enum TorrentError {
    #[error("Failed with error `{error}` to read file with path `{path:?}`")]
    IOReadError {
        error: std::io::Error,
        path: PathBuf,
    },
    #[error("Failed to decode the torrent bencode: `{0}`")]
    InvalidBencode(#[from] BencodeError),
    #[error("The torrent is missing the required field `{0}`")]
    MissingField(&'static str),
    #[error("The torrent field `{field}` should be a {expected}, found a {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("The torrent field `{field}` has the out of range value `{value}`")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("Bytes which length is a multiple of 20 expected for `pieces`. Got {0}")]
    InvalidPieces(usize),
    #[error("The torrent should have {expected} piece hashes but has {found}")]
    PieceCountMismatch { expected: u64, found: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent_bytes(length: i64, piece_length: i64, n_hashes: usize) -> Vec<u8> {
        let mut info = Dict::new();
        info.insert("length", length);
        info.insert("name", "sample.txt");
        info.insert("piece length", piece_length);
        info.insert("pieces", vec![0xab_u8; n_hashes * SHA1_LEN]);
        let mut root = Dict::new();
        root.insert("announce", "http://tracker.example/announce");
        root.insert("created by", "test");
        root.insert("info", info);
        bencode::encode(&Value::Dict(root))
    }

    #[test]
    fn piece_count_follows_length() {
        let torrent = Torrent::from_bytes(&torrent_bytes(1024, 256, 4)).unwrap();
        assert_eq!(torrent.num_pieces(), 4);
        assert!(!torrent.piece_hashes().is_empty());
        assert_eq!(torrent.piece_size(3), Some(256));

        let torrent = Torrent::from_bytes(&torrent_bytes(1000, 256, 4)).unwrap();
        assert_eq!(torrent.num_pieces(), 4);
        assert_eq!(torrent.piece_size(0), Some(256));
        assert_eq!(torrent.piece_size(3), Some(232));
        assert_eq!(torrent.piece_size(4), None);
    }

    #[test]
    fn wrong_number_of_hashes_is_rejected() {
        let err = Torrent::from_bytes(&torrent_bytes(1000, 256, 3)).unwrap_err();
        assert!(matches!(
            err,
            TorrentError::PieceCountMismatch {
                expected: 4,
                found: 3
            }
        ));
    }

    #[test]
    fn pieces_must_be_a_multiple_of_20() {
        let mut info = Dict::new();
        info.insert("length", 10_i64);
        info.insert("name", "a");
        info.insert("piece length", 16_i64);
        info.insert("pieces", vec![1u8; 21]);
        let mut root = Dict::new();
        root.insert("announce", "http://t");
        root.insert("info", info);
        let err = Torrent::from_bytes(&bencode::encode(&Value::Dict(root))).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidPieces(21)));
    }

    #[test]
    fn missing_and_mistyped_fields_are_reported() {
        let err = Torrent::from_bytes(b"d4:infod4:name1:aee").unwrap_err();
        assert!(matches!(err, TorrentError::MissingField("announce")));

        let err = Torrent::from_bytes(b"d8:announce1:x4:infoi3ee").unwrap_err();
        assert!(matches!(err, TorrentError::WrongType { field: "info", .. }));

        let err = Torrent::from_bytes(b"li1ee").unwrap_err();
        assert!(matches!(err, TorrentError::WrongType { field: "<root>", .. }));

        let err = Torrent::from_bytes(b"d8:announce").unwrap_err();
        assert!(matches!(err, TorrentError::InvalidBencode(_)));
    }

    #[test]
    fn info_hash_ignores_key_order_of_the_file() {
        let sorted = b"d8:announce1:x4:infod6:lengthi1e4:name1:a12:piece lengthi1e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
        let unsorted = b"d8:announce1:x4:infod4:name1:a6:lengthi1e6:pieces20:aaaaaaaaaaaaaaaaaaaa12:piece lengthi1eee";
        let a = Torrent::from_bytes(sorted).unwrap();
        let b = Torrent::from_bytes(unsorted).unwrap();
        assert_eq!(a.info_hash(), b.info_hash());
    }

    fn multi_file_bytes(lengths: &[i64], n_hashes: usize) -> Vec<u8> {
        let files: Vec<Value> = lengths
            .iter()
            .map(|&len| {
                let mut file = Dict::new();
                file.insert("length", len);
                file.insert("path", vec![Value::from("f")]);
                Value::Dict(file)
            })
            .collect();
        let mut info = Dict::new();
        info.insert("files", files);
        info.insert("name", "dir");
        info.insert("piece length", 256_i64);
        info.insert("pieces", vec![0u8; n_hashes * SHA1_LEN]);
        let mut root = Dict::new();
        root.insert("announce", "http://t");
        root.insert("info", info);
        bencode::encode(&Value::Dict(root))
    }

    #[test]
    fn multi_file_length_is_the_sum_of_the_files() {
        let torrent = Torrent::from_bytes(&multi_file_bytes(&[300, 200], 2)).unwrap();
        assert_eq!(torrent.length(), 500);
        assert_eq!(torrent.piece_size(1), Some(244));
    }

    #[test]
    fn multi_file_length_that_overflows_is_out_of_range() {
        let err = Torrent::from_bytes(&multi_file_bytes(&[i64::MAX; 3], 1)).unwrap_err();
        assert!(
            matches!(err, TorrentError::OutOfRange { field: "files.length", value: i64::MAX }),
            "{err}"
        );
    }
}
