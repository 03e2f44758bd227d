use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;

/// Maximum serialized frame size, excluding piece payloads.
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024;

/// Message type identifiers in the peer wire protocol.
///
/// Each frame carries a one-byte ID following the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    /// Report a protocol-level error to the peer.
    Error = 0,
    /// Announce identity and available pieces; the handshake frame.
    Bitfield = 1,
    /// Announce a newly-acquired piece.
    AnnouncePiece = 2,
    /// Request a piece.
    PieceRequest = 3,
    /// Send piece data; the raw payload follows the frame.
    PiecePayload = 4,
    /// Cancel a pending piece request.
    CancelPiece = 5,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, PeerError> {
        match value {
            0 => Ok(MessageId::Error),
            1 => Ok(MessageId::Bitfield),
            2 => Ok(MessageId::AnnouncePiece),
            3 => Ok(MessageId::PieceRequest),
            4 => Ok(MessageId::PiecePayload),
            5 => Ok(MessageId::CancelPiece),
            _ => Err(PeerError::InvalidMessageId(value)),
        }
    }
}

/// A peer wire protocol message.
///
/// Frames are length-prefixed: a 4-byte big-endian length followed by a
/// 1-byte message ID and the message fields. Peer and torrent identities
/// travel as hex strings; strings and byte blobs are u32-length-prefixed.
///
/// `PiecePayload` is the only message with an out-of-band payload: the frame
/// carries only the `{index, offset, length}` header, and `length` raw bytes
/// of piece data follow it on the same socket. `encode` and `decode` handle
/// the frame alone; the connection's I/O loops attach and stream the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A protocol-level error report.
    Error { message: String },
    /// Identity and piece availability; the first frame in each direction.
    Bitfield {
        peer_id: String,
        name: String,
        info_hash: String,
        bitfield: Bytes,
    },
    /// Announce that the sender now has a piece.
    AnnouncePiece { index: u32 },
    /// Request a piece from the peer.
    PieceRequest { index: u32, offset: u32, length: u32 },
    /// Piece data header; `payload` rides after the frame.
    PiecePayload {
        index: u32,
        offset: u32,
        length: u32,
        payload: Bytes,
    },
    /// Cancel a pending piece request.
    CancelPiece { index: u32 },
}

impl Message {
    /// Returns this message's wire discriminator.
    pub fn id(&self) -> MessageId {
        match self {
            Message::Error { .. } => MessageId::Error,
            Message::Bitfield { .. } => MessageId::Bitfield,
            Message::AnnouncePiece { .. } => MessageId::AnnouncePiece,
            Message::PieceRequest { .. } => MessageId::PieceRequest,
            Message::PiecePayload { .. } => MessageId::PiecePayload,
            Message::CancelPiece { .. } => MessageId::CancelPiece,
        }
    }

    /// Encodes the message frame, including the 4-byte length prefix.
    ///
    /// Piece payload bytes are not part of the frame.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        body.put_u8(self.id() as u8);

        match self {
            Message::Error { message } => {
                put_string(&mut body, message);
            }
            Message::Bitfield {
                peer_id,
                name,
                info_hash,
                bitfield,
            } => {
                put_string(&mut body, peer_id);
                put_string(&mut body, name);
                put_string(&mut body, info_hash);
                body.put_u32(bitfield.len() as u32);
                body.put_slice(bitfield);
            }
            Message::AnnouncePiece { index } => {
                body.put_u32(*index);
            }
            Message::PieceRequest {
                index,
                offset,
                length,
            } => {
                body.put_u32(*index);
                body.put_u32(*offset);
                body.put_u32(*length);
            }
            Message::PiecePayload {
                index,
                offset,
                length,
                ..
            } => {
                body.put_u32(*index);
                body.put_u32(*offset);
                body.put_u32(*length);
            }
            Message::CancelPiece { index } => {
                body.put_u32(*index);
            }
        }

        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        buf.freeze()
    }

    /// Decodes a full frame, including the 4-byte length prefix.
    pub fn decode(mut data: Bytes) -> Result<Self, PeerError> {
        if data.len() < 4 {
            return Err(PeerError::InvalidMessage("too short".into()));
        }

        let length = data.get_u32() as usize;
        if length == 0 {
            return Err(PeerError::InvalidMessage("empty frame".into()));
        }
        if data.remaining() < length {
            return Err(PeerError::InvalidMessage("incomplete message".into()));
        }

        let id = MessageId::try_from(data.get_u8())?;

        match id {
            MessageId::Error => Ok(Message::Error {
                message: get_string(&mut data)?,
            }),
            MessageId::Bitfield => {
                let peer_id = get_string(&mut data)?;
                let name = get_string(&mut data)?;
                let info_hash = get_string(&mut data)?;
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("bitfield too short".into()));
                }
                let len = data.get_u32() as usize;
                if data.remaining() < len {
                    return Err(PeerError::InvalidMessage("bitfield too short".into()));
                }
                Ok(Message::Bitfield {
                    peer_id,
                    name,
                    info_hash,
                    bitfield: data.copy_to_bytes(len),
                })
            }
            MessageId::AnnouncePiece => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("announce piece too short".into()));
                }
                Ok(Message::AnnouncePiece {
                    index: data.get_u32(),
                })
            }
            MessageId::PieceRequest => {
                if data.remaining() < 12 {
                    return Err(PeerError::InvalidMessage("piece request too short".into()));
                }
                Ok(Message::PieceRequest {
                    index: data.get_u32(),
                    offset: data.get_u32(),
                    length: data.get_u32(),
                })
            }
            MessageId::PiecePayload => {
                if data.remaining() < 12 {
                    return Err(PeerError::InvalidMessage("piece payload too short".into()));
                }
                Ok(Message::PiecePayload {
                    index: data.get_u32(),
                    offset: data.get_u32(),
                    length: data.get_u32(),
                    payload: Bytes::new(),
                })
            }
            MessageId::CancelPiece => {
                if data.remaining() < 4 {
                    return Err(PeerError::InvalidMessage("cancel piece too short".into()));
                }
                Ok(Message::CancelPiece {
                    index: data.get_u32(),
                })
            }
        }
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_string(data: &mut Bytes) -> Result<String, PeerError> {
    if data.remaining() < 4 {
        return Err(PeerError::InvalidMessage("string too short".into()));
    }
    let len = data.get_u32() as usize;
    if data.remaining() < len {
        return Err(PeerError::InvalidMessage("string too short".into()));
    }
    let bytes = data.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| PeerError::InvalidMessage("string not utf-8".into()))
}
