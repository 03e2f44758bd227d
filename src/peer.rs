//! Peer connection subsystem.
//!
//! This module implements the peer-to-peer session layer: the framed wire
//! protocol, the bitfield handshake, and the long-lived [`Conn`] that
//! multiplexes piece-level messages for a torrent under egress bandwidth
//! shaping.

mod bitfield;
mod conn;
mod error;
mod factory;
mod handshake;
mod limit;
mod message;
mod peer_id;
mod wire;

pub use bitfield::{Bitfield, SyncBitfield};
pub use conn::{Conn, ConnEvent};
pub use error::PeerError;
pub use factory::ConnFactory;
pub use handshake::Handshake;
pub use limit::EgressLimiter;
pub use message::{Message, MessageId, MAX_MESSAGE_SIZE};
pub use peer_id::PeerId;
