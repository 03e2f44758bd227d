//! kelp - A peer-to-peer content distribution library
//!
//! This library implements the core of a peer-to-peer distribution system
//! for container image layers: blobs are split into piece-granular torrents
//! and exchanged directly between peers, with an origin cluster repairing
//! replicas behind the swarm.
//!
//! # Modules
//!
//! - [`peer`] - Peer wire protocol, handshake, and the per-peer connection
//! - [`torrent`] - Torrent identity and the storage-facing torrent view
//! - [`storage`] - Layer download state, piece status, and cache promotion
//! - [`repair`] - Batch blob repair worker pool
//! - [`digest`] - Content-addressed blob identities
//! - [`config`] - Centralized configuration

pub mod config;
pub mod digest;
pub mod peer;
pub mod repair;
pub mod storage;
pub mod torrent;

pub use config::{BackoffMode, Config, ConnConfig, RepairConfig, StorageConfig};
pub use digest::{Digest, DigestError};
pub use peer::{
    Bitfield, Conn, ConnEvent, ConnFactory, EgressLimiter, Handshake, Message, MessageId,
    PeerError, PeerId, SyncBitfield,
};
pub use repair::{BlobRepairer, BlobTransferer, RepairRecord, TransferError};
pub use storage::{layer_key, LayerCache, LayerManager, PieceStatus, StorageError};
pub use torrent::{InfoHash, Torrent, TorrentError};
