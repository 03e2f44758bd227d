use super::error::StorageError;

/// Completion state of a single piece, persisted as one byte in a layer's
/// status sidecar.
///
/// Pieces move `Clean → Dirty → Done`. A piece that fails verification may
/// fall back from `Dirty` to `Clean`, but `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PieceStatus {
    /// Not yet written.
    Clean = 0,
    /// Being written, not yet verified.
    Dirty = 1,
    /// Written and verified.
    Done = 2,
}

impl PieceStatus {
    /// The sidecar byte encoding of this status.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PieceStatus {
    type Error = StorageError;

    fn try_from(value: u8) -> Result<Self, StorageError> {
        match value {
            0 => Ok(PieceStatus::Clean),
            1 => Ok(PieceStatus::Dirty),
            2 => Ok(PieceStatus::Done),
            _ => Err(StorageError::InvalidPieceStatus(value)),
        }
    }
}
