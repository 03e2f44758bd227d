//! Framed message I/O.
//!
//! Every message travels as `[u32 big-endian length][length bytes]`. A frame
//! declaring more than [`MAX_MESSAGE_SIZE`] bytes is rejected before its body
//! is consumed. Piece payloads are streamed raw after their header frame.
//!
//! Deadlines use the runtime's real timers; the OS socket only honors
//! wall-clock time.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::error::PeerError;
use super::message::{Message, MAX_MESSAGE_SIZE};

/// Reads one framed message, enforcing the frame size cap and the deadline.
pub async fn read_frame<R>(stream: &mut R, deadline: Duration) -> Result<Message, PeerError>
where
    R: AsyncRead + Unpin,
{
    timeout(deadline, async {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await?;

        let length = u32::from_be_bytes(prefix) as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::MessageTooLarge(length));
        }

        let mut frame = BytesMut::with_capacity(4 + length);
        frame.extend_from_slice(&prefix);
        frame.resize(4 + length, 0);
        stream.read_exact(&mut frame[4..]).await?;

        Message::decode(frame.freeze())
    })
    .await?
}

/// Writes one framed message under the deadline.
pub async fn write_frame<W>(
    stream: &mut W,
    message: &Message,
    deadline: Duration,
) -> Result<(), PeerError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.encode();
    timeout(deadline, async {
        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    })
    .await?
}

/// Reads a raw piece payload of exactly `length` bytes.
///
/// Short reads are retried until the full payload has been delivered or the
/// stream errors.
pub async fn read_payload<R>(
    stream: &mut R,
    length: u32,
    deadline: Duration,
) -> Result<Bytes, PeerError>
where
    R: AsyncRead + Unpin,
{
    timeout(deadline, async {
        let mut payload = vec![0u8; length as usize];
        stream.read_exact(&mut payload).await?;
        Ok(Bytes::from(payload))
    })
    .await?
}

/// Writes a raw piece payload under the deadline.
pub async fn write_payload<W>(
    stream: &mut W,
    payload: &[u8],
    deadline: Duration,
) -> Result<(), PeerError>
where
    W: AsyncWrite + Unpin,
{
    timeout(deadline, async {
        stream.write_all(payload).await?;
        stream.flush().await?;
        Ok(())
    })
    .await?
}
