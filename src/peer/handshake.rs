use std::fmt;

use bytes::Bytes;

use super::error::PeerError;
use super::message::Message;
use super::peer_id::PeerId;
use crate::torrent::InfoHash;

/// The first message exchanged on a new connection.
///
/// Carries the same fields as a bitfield frame, with identities parsed into
/// their typed forms. Carrying the full bitfield means piece availability is
/// known immediately after connect, with no extra round trip. In this module
/// "handshake" and "bitfield message" are synonymous.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub peer_id: PeerId,
    pub name: String,
    pub info_hash: InfoHash,
    /// The sender's piece availability, in wire form. The receiving side
    /// sizes it with its torrent's piece count.
    pub bitfield: Bytes,
}

impl Handshake {
    /// Converts the handshake into its wire frame.
    pub fn to_message(&self) -> Message {
        Message::Bitfield {
            peer_id: self.peer_id.to_hex(),
            name: self.name.clone(),
            info_hash: self.info_hash.to_hex(),
            bitfield: self.bitfield.clone(),
        }
    }

    /// Parses a handshake out of the first frame on a connection.
    ///
    /// Any frame other than a bitfield fails with `ExpectedBitfield`; peer ID
    /// and info hash must parse from their hex forms.
    pub fn from_message(message: Message) -> Result<Self, PeerError> {
        let Message::Bitfield {
            peer_id,
            name,
            info_hash,
            bitfield,
        } = message
        else {
            return Err(PeerError::ExpectedBitfield);
        };

        let peer_id = PeerId::from_hex(&peer_id).ok_or(PeerError::InvalidPeerId(peer_id))?;
        let info_hash =
            InfoHash::from_hex(&info_hash).map_err(|_| PeerError::InvalidInfoHash(info_hash))?;

        Ok(Self {
            peer_id,
            name,
            info_hash,
            bitfield,
        })
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handshake(peer={}, hash={}, name={})",
            self.peer_id, self.info_hash, self.name
        )
    }
}
