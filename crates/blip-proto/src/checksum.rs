//! Rolling CRC32 accumulator.
//!
//! Standard CRC32 (polynomial `0xEDB88320`, initial and final XOR
//! `0xFFFFFFFF`), delegating to `crc32fast`. The digest can be sampled at
//! any point without disturbing the running state, which is what lets the
//! codec fold the cumulative plaintext checksum into each frame trailer.

/// Length of the big-endian CRC32 trailer carried by data frames.
pub const TRAILER_LEN: usize = 4;

/// Incrementally updatable CRC32 over a byte stream.
#[derive(Debug, Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    /// Fresh accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `bytes` into the running checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Current digest. The accumulator keeps running.
    #[must_use]
    pub fn digest(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}
