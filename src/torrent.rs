//! Torrent identity and the storage-facing torrent view.

use std::fmt;

use thiserror::Error;

use crate::digest::{hex_decode, hex_encode};
use crate::peer::Bitfield;

/// Errors produced when parsing torrent identities.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// The hex string does not decode to a 20-byte hash.
    #[error("invalid info hash: {0}")]
    InvalidInfoHash(String),
}

/// The identity of a torrent (20-byte SHA-1 of its metainfo).
///
/// Both sides of a connection must agree on the info hash before any piece
/// traffic is exchanged; it renders as a 40-character lowercase hex string
/// on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    /// Creates an info hash from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Creates an info hash by hashing serialized metainfo bytes.
    pub fn from_info_bytes(info_bytes: &[u8]) -> Self {
        use sha1::{Digest as _, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        Self(hasher.finalize().into())
    }

    /// Parses an info hash from a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TorrentError> {
        if s.len() != 40 {
            return Err(TorrentError::InvalidInfoHash(s.to_string()));
        }
        let bytes = hex_decode(s).ok_or_else(|| TorrentError::InvalidInfoHash(s.to_string()))?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Returns the raw bytes of the info hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Converts to a lowercase hexadecimal string.
    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The view of an open torrent the connection layer depends on.
///
/// Implemented by the storage layer above this crate's scope. The factory
/// uses it to build handshakes and to size a connection's egress burst.
pub trait Torrent: Send + Sync {
    /// The torrent's name (the layer file name; informational only).
    fn name(&self) -> &str;

    /// The torrent's identity.
    fn info_hash(&self) -> InfoHash;

    /// A snapshot of the pieces the local peer currently holds.
    fn bitfield(&self) -> Bitfield;

    /// Total number of pieces.
    fn num_pieces(&self) -> usize;

    /// The largest piece length, in bytes. Fixes a connection's egress burst.
    fn max_piece_length(&self) -> u64;
}
