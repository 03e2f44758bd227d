use thiserror::Error;

use super::piece::PieceStatus;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("layer not open: {0}")]
    LayerNotFound(String),

    #[error("download is not completed yet, unable to cache layer file {0}")]
    DownloadNotComplete(String),

    #[error("failed to cache layer file {0}")]
    CacheRejected(String),

    #[error("invalid piece status byte: {0}")]
    InvalidPieceStatus(u8),

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(usize),

    #[error("piece {index} cannot move from {from:?} to {to:?}")]
    StatusRegression {
        index: usize,
        from: PieceStatus,
        to: PieceStatus,
    },
}
