use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::bitfield::{Bitfield, SyncBitfield};
use super::error::PeerError;
use super::limit::EgressLimiter;
use super::message::Message;
use super::peer_id::PeerId;
use super::wire;
use crate::config::ConnConfig;
use crate::torrent::InfoHash;

/// Lifecycle events published for upstream bookkeeping.
#[derive(Debug, Clone)]
pub enum ConnEvent {
    /// Emitted exactly once per connection, after both I/O loops have exited.
    Closed(Arc<Conn>),
}

#[derive(Debug, Default)]
struct Timestamps {
    last_good_piece_received: Option<Instant>,
    last_piece_sent: Option<Instant>,
}

/// Taken exactly once by the first `close` call; owning it is the license to
/// run the shutdown sequence.
struct ClosePending {
    loops_exited: mpsc::Receiver<()>,
    events: mpsc::UnboundedSender<ConnEvent>,
}

/// A live session with one remote peer for one torrent.
///
/// A `Conn` owns its socket and two long-running tasks: a read loop that
/// turns inbound frames into a bounded receiver queue, and a write loop that
/// drains a bounded sender queue onto the socket, shaping piece payloads
/// through the egress limiter. Message scheduling is the dispatcher's job
/// above this layer; the `Conn` only moves bytes.
///
/// Shutdown runs exactly once no matter how many tasks call [`close`], and
/// finishes by publishing a single [`ConnEvent::Closed`].
///
/// [`close`]: Conn::close
pub struct Conn {
    peer_id: PeerId,
    info_hash: InfoHash,
    created_at: Instant,
    opened_by_remote: bool,
    local_peer_id: PeerId,
    config: ConnConfig,

    /// Known pieces of the remote peer, seeded from its handshake.
    bitfield: SyncBitfield,
    egress_limiter: EgressLimiter,
    timestamps: Mutex<Timestamps>,
    ingress_piece_bytes: AtomicU64,
    egress_piece_bytes: AtomicU64,

    sender: mpsc::Sender<Message>,
    receiver: TokioMutex<mpsc::Receiver<Message>>,

    done: CancellationToken,
    close_pending: Mutex<Option<ClosePending>>,
}

impl Conn {
    /// Builds a `Conn` over a handshaked socket and starts its I/O loops.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        stream: TcpStream,
        config: ConnConfig,
        local_peer_id: PeerId,
        remote_peer_id: PeerId,
        info_hash: InfoHash,
        remote_bitfield: Bitfield,
        max_piece_length: u64,
        opened_by_remote: bool,
        events: mpsc::UnboundedSender<ConnEvent>,
    ) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let (sender_tx, sender_rx) = mpsc::channel(config.sender_buffer_size.max(1));
        let (receiver_tx, receiver_rx) = mpsc::channel(config.receiver_buffer_size.max(1));
        // Each loop holds one sender; the shutdown sequence joins the loops
        // by draining this channel until both have dropped theirs.
        let (exited_tx, exited_rx) = mpsc::channel::<()>(2);

        let conn = Arc::new(Self {
            peer_id: remote_peer_id,
            info_hash,
            created_at: Instant::now(),
            opened_by_remote,
            local_peer_id,
            config,
            bitfield: SyncBitfield::new(remote_bitfield),
            // A rate of 0 means no pieces may be sent until bandwidth is
            // allocated with set_egress_bandwidth_limit.
            egress_limiter: EgressLimiter::new(max_piece_length),
            timestamps: Mutex::new(Timestamps::default()),
            ingress_piece_bytes: AtomicU64::new(0),
            egress_piece_bytes: AtomicU64::new(0),
            sender: sender_tx,
            receiver: TokioMutex::new(receiver_rx),
            done: CancellationToken::new(),
            close_pending: Mutex::new(Some(ClosePending {
                loops_exited: exited_rx,
                events,
            })),
        });

        tokio::spawn(read_loop(
            Arc::clone(&conn),
            read_half,
            receiver_tx,
            exited_tx.clone(),
        ));
        tokio::spawn(write_loop(
            Arc::clone(&conn),
            write_half,
            sender_rx,
            exited_tx,
        ));

        conn
    }

    /// The remote peer's identity.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The torrent this session serves.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// When the connection was established.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The remote peer's known pieces.
    pub fn bitfield(&self) -> &SyncBitfield {
        &self.bitfield
    }

    /// Returns whether the conn was opened by the remote peer, or the local peer.
    pub fn opened_by_remote(&self) -> bool {
        self.opened_by_remote
    }

    /// Returns whether shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Sets the egress token rate, effective immediately.
    pub fn set_egress_bandwidth_limit(&self, bytes_per_sec: u64) {
        self.egress_limiter.set_rate(bytes_per_sec);
    }

    /// The current egress token rate.
    pub fn egress_bandwidth_limit(&self) -> u64 {
        self.egress_limiter.rate()
    }

    /// When the last verified piece arrived from this peer.
    pub fn last_good_piece_received(&self) -> Option<Instant> {
        self.timestamps.lock().last_good_piece_received
    }

    /// Records that a verified piece just arrived from this peer.
    pub fn touch_last_good_piece_received(&self) {
        self.timestamps.lock().last_good_piece_received = Some(Instant::now());
    }

    /// When the last piece was sent to this peer.
    pub fn last_piece_sent(&self) -> Option<Instant> {
        self.timestamps.lock().last_piece_sent
    }

    /// Records that a piece was just sent to this peer.
    pub fn touch_last_piece_sent(&self) {
        self.timestamps.lock().last_piece_sent = Some(Instant::now());
    }

    /// Total piece payload bytes received on this connection.
    pub fn ingress_piece_bytes(&self) -> u64 {
        self.ingress_piece_bytes.load(Ordering::Relaxed)
    }

    /// Total piece payload bytes sent on this connection.
    pub fn egress_piece_bytes(&self) -> u64 {
        self.egress_piece_bytes.load(Ordering::Relaxed)
    }

    /// Enqueues a message for the write loop.
    ///
    /// Blocks only while the sender queue is full. Fails with `ConnClosed`
    /// once shutdown has begun.
    pub async fn send(&self, message: Message) -> Result<(), PeerError> {
        tokio::select! {
            biased;
            _ = self.done.cancelled() => Err(PeerError::ConnClosed),
            sent = self.sender.send(message) => sent.map_err(|_| PeerError::ConnClosed),
        }
    }

    /// Receives the next inbound message.
    ///
    /// Returns `None` exactly when the read loop has exited and the queue is
    /// drained.
    pub async fn receive(&self) -> Option<Message> {
        self.receiver.lock().await.recv().await
    }

    /// Starts the shutdown sequence for the conn.
    ///
    /// Idempotent and safe to call from any task, including the I/O loops
    /// themselves: the sequence runs asynchronously so callers never block
    /// on the join. Signals `done`, waits for both loops to exit (dropping
    /// their socket halves closes the socket), then publishes
    /// [`ConnEvent::Closed`].
    pub fn close(self: &Arc<Self>) {
        let Some(pending) = self.close_pending.lock().take() else {
            return;
        };
        self.done.cancel();

        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let ClosePending {
                mut loops_exited,
                events,
            } = pending;
            while loops_exited.recv().await.is_some() {}
            let _ = events.send(ConnEvent::Closed(conn));
        });
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("peer_id", &self.peer_id)
            .field("info_hash", &self.info_hash)
            .field("opened_by_remote", &self.opened_by_remote)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conn(peer={}, hash={}, opened_by_remote={})",
            self.peer_id, self.info_hash, self.opened_by_remote
        )
    }
}

async fn read_loop(
    conn: Arc<Conn>,
    mut stream: OwnedReadHalf,
    receiver: mpsc::Sender<Message>,
    _exited: mpsc::Sender<()>,
) {
    loop {
        tokio::select! {
            _ = conn.done.cancelled() => break,
            result = read_message(&conn, &mut stream) => {
                let message = match result {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::error!(
                            peer = %conn.peer_id,
                            hash = %conn.info_hash,
                            scheduler = %conn.local_peer_id,
                            %err,
                            "error reading message from socket, closing connection",
                        );
                        break;
                    }
                };
                tokio::select! {
                    _ = conn.done.cancelled() => break,
                    pushed = receiver.send(message) => {
                        if pushed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    // Dropping the last sender closes the receiver stream.
    drop(receiver);
    conn.close();
}

async fn read_message(conn: &Conn, stream: &mut OwnedReadHalf) -> Result<Message, PeerError> {
    let message = wire::read_frame(stream, conn.config.read_timeout).await?;
    match message {
        Message::PiecePayload {
            index,
            offset,
            length,
            ..
        } => {
            // Payload messages carry their piece data after the frame.
            let payload = wire::read_payload(stream, length, conn.config.read_timeout).await?;
            conn.ingress_piece_bytes
                .fetch_add(u64::from(length), Ordering::Relaxed);
            Ok(Message::PiecePayload {
                index,
                offset,
                length,
                payload,
            })
        }
        message => Ok(message),
    }
}

async fn write_loop(
    conn: Arc<Conn>,
    mut stream: OwnedWriteHalf,
    mut sender: mpsc::Receiver<Message>,
    _exited: mpsc::Sender<()>,
) {
    loop {
        tokio::select! {
            _ = conn.done.cancelled() => break,
            next = sender.recv() => {
                let Some(message) = next else { break };
                let result = tokio::select! {
                    _ = conn.done.cancelled() => break,
                    result = write_message(&conn, &mut stream, &message) => result,
                };
                if let Err(err) = result {
                    tracing::info!(
                        peer = %conn.peer_id,
                        hash = %conn.info_hash,
                        scheduler = %conn.local_peer_id,
                        %err,
                        "error writing message to socket, closing connection",
                    );
                    break;
                }
            }
        }
    }
    conn.close();
}

async fn write_message(
    conn: &Conn,
    stream: &mut OwnedWriteHalf,
    message: &Message,
) -> Result<(), PeerError> {
    wire::write_frame(stream, message, conn.config.write_timeout).await?;
    if let Message::PiecePayload { payload, .. } = message {
        send_piece_payload(conn, stream, payload).await?;
    }
    Ok(())
}

async fn send_piece_payload(
    conn: &Conn,
    stream: &mut OwnedWriteHalf,
    payload: &Bytes,
) -> Result<(), PeerError> {
    if payload.is_empty() {
        return Err(PeerError::EmptyPayload);
    }

    if !conn.config.disable_throttling {
        let delay = conn.egress_limiter.reserve(payload.len()).ok_or({
            PeerError::PayloadExceedsBurst {
                payload: payload.len(),
                burst: conn.egress_limiter.burst(),
                rate: conn.egress_limiter.rate(),
            }
        })?;
        // Throttle the connection egress if we've exceeded our bandwidth.
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    wire::write_payload(stream, payload, conn.config.write_timeout).await?;
    conn.egress_piece_bytes
        .fetch_add(payload.len() as u64, Ordering::Relaxed);
    Ok(())
}
