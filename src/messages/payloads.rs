use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The payload of a `request` message: the block `length` bytes at `begin` of piece `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPiecePayload {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

impl RequestPiecePayload {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self {
            index,
            begin,
            length,
        }
    }

    pub fn to_be_bytes(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(12);
        bytes.put_u32(self.index);
        bytes.put_u32(self.begin);
        bytes.put_u32(self.length);
        bytes.freeze()
    }

    pub fn from_be_bytes(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 12 {
            return None;
        }
        Some(Self {
            index: bytes.get_u32(),
            begin: bytes.get_u32(),
            length: bytes.get_u32(),
        })
    }
}

/// The payload of a `piece` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePiecePayload {
    pub index: u32,
    pub begin: u32,
    pub block: Bytes,
}

impl ResponsePiecePayload {
    /// None if the payload is too short to hold index and begin
    pub fn from_be_bytes(mut bytes: Bytes) -> Option<Self> {
        if bytes.len() < 8 {
            return None;
        }
        let index = bytes.get_u32();
        let begin = bytes.get_u32();
        Some(Self {
            index,
            begin,
            block: bytes,
        })
    }

    pub fn to_be_bytes(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(8 + self.block.len());
        bytes.put_u32(self.index);
        bytes.put_u32(self.begin);
        bytes.extend_from_slice(&self.block);
        bytes.freeze()
    }
}
