use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::bitfield::Bitfield;
use super::conn::{Conn, ConnEvent};
use super::error::PeerError;
use super::handshake::Handshake;
use super::peer_id::PeerId;
use super::wire;
use crate::config::ConnConfig;
use crate::torrent::Torrent;

/// Builds [`Conn`] instances by negotiating handshakes on new sockets.
///
/// A factory validates that the remote handshake names the torrent the local
/// side intended to open; mismatches never yield a `Conn`. Closed-connection
/// events for every conn it creates arrive on the factory's event channel.
pub struct ConnFactory {
    config: ConnConfig,
    local_peer_id: PeerId,
    events: mpsc::UnboundedSender<ConnEvent>,
}

impl ConnFactory {
    pub fn new(
        config: ConnConfig,
        local_peer_id: PeerId,
        events: mpsc::UnboundedSender<ConnEvent>,
    ) -> Self {
        Self {
            config,
            local_peer_id,
            events,
        }
    }

    /// Initializes a new conn for `torrent` by sending a handshake over
    /// `stream` and waiting for a handshake in response.
    pub async fn send_and_receive_handshake(
        &self,
        mut stream: TcpStream,
        torrent: &dyn Torrent,
    ) -> Result<Arc<Conn>, PeerError> {
        let local = self.local_handshake(torrent);
        wire::write_frame(&mut stream, &local.to_message(), self.config.write_timeout).await?;

        let message = wire::read_frame(&mut stream, self.config.read_timeout).await?;
        let remote = Handshake::from_message(message)?;
        if remote.info_hash != torrent.info_hash() {
            return Err(PeerError::InfoHashMismatch {
                expected: torrent.info_hash(),
                actual: remote.info_hash,
            });
        }

        Ok(self.new_conn(stream, torrent, remote, false))
    }

    /// Initializes a new conn for `torrent` by sending a handshake over
    /// `stream`, assuming `remote` has already been read off it (listeners
    /// read the first frame to dispatch by info hash).
    pub async fn reciprocate_handshake(
        &self,
        mut stream: TcpStream,
        torrent: &dyn Torrent,
        remote: Handshake,
    ) -> Result<Arc<Conn>, PeerError> {
        if remote.info_hash != torrent.info_hash() {
            return Err(PeerError::InfoHashMismatch {
                expected: torrent.info_hash(),
                actual: remote.info_hash,
            });
        }

        let local = self.local_handshake(torrent);
        wire::write_frame(&mut stream, &local.to_message(), self.config.write_timeout).await?;

        Ok(self.new_conn(stream, torrent, remote, true))
    }

    /// Reads a handshake from a new connection.
    pub async fn receive_handshake(
        stream: &mut TcpStream,
        deadline: Duration,
    ) -> Result<Handshake, PeerError> {
        let message = wire::read_frame(stream, deadline).await?;
        Handshake::from_message(message)
    }

    fn local_handshake(&self, torrent: &dyn Torrent) -> Handshake {
        Handshake {
            peer_id: self.local_peer_id,
            name: torrent.name().to_string(),
            info_hash: torrent.info_hash(),
            bitfield: torrent.bitfield().to_bytes(),
        }
    }

    /// Resolves a validated remote handshake into a running conn.
    fn new_conn(
        &self,
        stream: TcpStream,
        torrent: &dyn Torrent,
        remote: Handshake,
        opened_by_remote: bool,
    ) -> Arc<Conn> {
        let remote_bitfield = Bitfield::from_bytes(remote.bitfield, torrent.num_pieces());
        Conn::spawn(
            stream,
            self.config.clone(),
            self.local_peer_id,
            remote.peer_id,
            torrent.info_hash(),
            remote_bitfield,
            torrent.max_piece_length(),
            opened_by_remote,
            self.events.clone(),
        )
    }
}
