use std::{fmt, io};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub mod payloads;

/// The message types of the peer wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            other => return Err(other),
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", *self as u8)
    }
}

/// One length prefixed message, the id is kept raw so unknown ids can be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    /// the length_prefix of the message which includes the id byte + payload length
    pub length: u32,
    pub id: u8,
    /// the payload without the id
    pub data: Bytes,
}

impl PeerMessage {
    pub fn new(id: MessageId, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            length: data.len() as u32 + 1,
            id: id as u8,
            data,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        MessageId::try_from(self.id).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// a zero length frame
    KeepAlive,
    Message(PeerMessage),
}

pub struct MessageFramer;

/// Frames larger than this are rejected.
pub const MAX: u32 = 8 * 1024 * 1024;

impl Decoder for MessageFramer {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            // Not enough data to read the length marker.
            return Ok(None);
        }

        // Read length marker.
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes);

        if length == 0 {
            src.advance(4);
            return Ok(Some(Frame::KeepAlive));
        }

        // Check that the length is not too large to avoid a denial of
        // service attack where the peer makes us run out of memory.
        if length > MAX {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame of length {} is too large.", length),
            ));
        }

        let frame_len = 4 + length as usize;
        if src.len() < frame_len {
            // The full frame has not yet arrived, reserve the rest up front.
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let id = src.get_u8();
        let data = src.split_to(length as usize - 1).freeze();
        Ok(Some(Frame::Message(PeerMessage { length, id, data })))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("the stream ended inside a frame, {} bytes left", src.len()),
            )),
        }
    }
}

impl Encoder<PeerMessage> for MessageFramer {
    type Error = io::Error;

    fn encode(&mut self, item: PeerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Don't send a message if it is longer than the other end will accept.
        if item.length > MAX || item.length as usize != item.data.len() + 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame of length {} with {} payload bytes can't be sent.",
                    item.length,
                    item.data.len()
                ),
            ));
        }

        dst.reserve(4 + item.length as usize);
        dst.put_u32(item.length);
        dst.put_u8(item.id);
        dst.extend_from_slice(&item.data);
        Ok(())
    }
}
