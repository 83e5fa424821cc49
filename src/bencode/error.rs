use thiserror::Error;

/// The input is not valid bencode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed bencode at byte {offset}: {kind}")]
pub struct BencodeError {
    /// offset into the input where decoding gave up
    pub offset: usize,
    pub kind: MalformedKind,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("missing `{0}` delimiter")]
    MissingDelimiter(char),
    #[error("the length prefix of a byte string is not a number")]
    InvalidLength,
    #[error("a byte string of length {0} exceeds the remaining input")]
    LengthOverflow(usize),
    #[error("invalid integer")]
    InvalidInteger,
    #[error("unterminated list")]
    UnterminatedList,
    #[error("unterminated dictionary")]
    UnterminatedDict,
    #[error("unsupported leading byte `0x{0:02x}`")]
    UnsupportedByte(u8),
    #[error("dictionary keys must be byte strings")]
    NonStringKey,
    #[error("duplicate dictionary key")]
    DuplicateKey,
    #[error("trailing data after the value")]
    TrailingData,
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),
}
