use thiserror::Error;

use crate::torrent::InfoHash;

/// Errors that can occur on a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or write deadline expired.
    #[error("timeout")]
    Timeout,

    /// A frame declared a length above the protocol maximum.
    #[error("message of {0} bytes exceeds max allowed size")]
    MessageTooLarge(usize),

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received an unknown message discriminator.
    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    /// The first message on a new connection was not a bitfield.
    #[error("handshaking new connection expected bitfield message")]
    ExpectedBitfield,

    /// The handshake carried an unparseable peer ID.
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// The handshake carried an unparseable info hash.
    #[error("invalid info hash: {0}")]
    InvalidInfoHash(String),

    /// The remote handshake named a different torrent.
    #[error("received handshake with incorrect info hash: expected {expected}, got {actual}")]
    InfoHashMismatch { expected: InfoHash, actual: InfoHash },

    /// The connection has been closed.
    #[error("conn is closed")]
    ConnClosed,

    /// Attempted to send a piece payload with no bytes.
    #[error("payload is empty")]
    EmptyPayload,

    /// A piece payload reservation can never be satisfied by the egress
    /// limiter, either because the payload exceeds the burst capacity or
    /// because no bandwidth has been allocated.
    #[error("piece payload of {payload} bytes cannot be sent (burst {burst}, rate {rate} B/s)")]
    PayloadExceedsBurst {
        payload: usize,
        burst: u64,
        rate: u64,
    },
}

impl From<tokio::time::error::Elapsed> for PeerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        PeerError::Timeout
    }
}
