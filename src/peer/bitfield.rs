use bytes::Bytes;
use parking_lot::RwLock;

/// A bitfield representing which pieces a peer has.
///
/// Each bit represents whether a piece is available (1) or not (0).
/// Bits are numbered from the high bit of the first byte. The wire form is
/// the raw byte array; the piece count is supplied by the torrent.
#[derive(Debug, Clone)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Creates a new empty bitfield for the given number of pieces.
    pub fn new(piece_count: usize) -> Self {
        let byte_count = piece_count.div_ceil(8);
        Self {
            bits: vec![0; byte_count],
            piece_count,
        }
    }

    /// Creates a bitfield from raw wire bytes.
    pub fn from_bytes(bytes: Bytes, piece_count: usize) -> Self {
        let mut bits = bytes.to_vec();
        let expected_bytes = piece_count.div_ceil(8);

        if bits.len() < expected_bytes {
            bits.resize(expected_bytes, 0);
        }
        bits.truncate(expected_bytes);

        let mut bf = Self { bits, piece_count };
        bf.clear_spare_bits();
        bf
    }

    /// Creates a full bitfield (all pieces available).
    pub fn full(piece_count: usize) -> Self {
        let byte_count = piece_count.div_ceil(8);
        let mut bf = Self {
            bits: vec![0xFF; byte_count],
            piece_count,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Returns true if the piece at the given index is available.
    pub fn has(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        (self.bits[byte_index] >> bit_index) & 1 == 1
    }

    /// Sets the bit for the piece at the given index.
    pub fn set(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        self.bits[byte_index] |= 1 << bit_index;
    }

    /// Returns the number of pieces that are available.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns true if all pieces are available.
    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    /// Returns the total number of pieces.
    pub fn num_pieces(&self) -> usize {
        self.piece_count
    }

    /// Returns the raw bytes of the bitfield.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Converts the bitfield to owned wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Clears any spare bits in the last byte that don't correspond to pieces.
    fn clear_spare_bits(&mut self) {
        let spare = (self.bits.len() * 8) - self.piece_count;
        if spare > 0 && spare < 8 && !self.bits.is_empty() {
            let mask = 0xFFu8 << spare;
            let last = self.bits.len() - 1;
            self.bits[last] &= mask;
        }
    }
}

/// A bitfield shared between a connection's I/O loops and the dispatcher.
///
/// Tracks the known pieces of the remote peer, initialized from the
/// handshake. Bits are only ever set through this view, never cleared.
#[derive(Debug)]
pub struct SyncBitfield {
    inner: RwLock<Bitfield>,
}

impl SyncBitfield {
    pub fn new(bitfield: Bitfield) -> Self {
        Self {
            inner: RwLock::new(bitfield),
        }
    }

    /// Returns true if the remote peer has the piece at the given index.
    pub fn has(&self, index: usize) -> bool {
        self.inner.read().has(index)
    }

    /// Marks the piece at the given index as held by the remote peer.
    pub fn set(&self, index: usize) {
        self.inner.write().set(index);
    }

    /// Returns the number of pieces the remote peer holds.
    pub fn count(&self) -> usize {
        self.inner.read().count()
    }

    /// Returns true if the remote peer holds every piece.
    pub fn is_complete(&self) -> bool {
        self.inner.read().is_complete()
    }

    /// Returns the total number of pieces.
    pub fn num_pieces(&self) -> usize {
        self.inner.read().num_pieces()
    }

    /// Snapshots the bitfield as wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        self.inner.read().to_bytes()
    }
}
