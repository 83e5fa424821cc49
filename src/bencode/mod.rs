//! Bencode, the encoding used by torrent files and tracker responses.
//!
//! Decoding keeps dictionary entries in the order they appeared in the input.
//! Encoding always writes dictionaries with their keys sorted by raw bytes, which is
//! what the info hash is computed over.

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::{encode, encode_into};
pub use error::{BencodeError, MalformedKind};
pub use value::{Dict, Value};

/// dictionaries and lists nested deeper than this are rejected
pub(crate) const MAX_DEPTH: usize = 64;
