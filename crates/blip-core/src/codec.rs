//! Streaming compression coupled to frame boundaries.
//!
//! Each direction of a connection owns one codec: a [`Deflater`] for
//! outgoing frames, an [`Inflater`] for incoming ones. Both keep a rolling
//! CRC32 over the *plaintext* that has passed through them, in wire order.
//!
//! Data frames end in a 4-byte big-endian checksum trailer. For raw
//! (uncompressed) frames the trailer is simply appended. For compressed
//! frames the codec exploits a zlib property: a deflate stream ended with
//! a sync flush always finishes in the bytes `00 00 FF FF`, so the sender
//! overwrites those four bytes with the running checksum. The receiver
//! strips the trailer before inflating, re-feeds the literal sync marker
//! to keep its inflate stream aligned, and then compares checksums.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use thiserror::Error;

use blip_proto::checksum::{Crc32, TRAILER_LEN};

/// The deflate sync-flush marker that ends every flushed block.
pub(crate) const SYNC_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// How a single `write` call treats the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecMode {
    /// Bypass compression; bytes pass through with checksum updates only.
    Raw,
    /// Compress without flushing; output may lag input.
    NoFlush,
    /// Compress and end the output on a sync-flush boundary, then fold the
    /// running checksum over the flush marker. The per-frame default.
    #[default]
    SyncFlush,
    /// Terminate the deflate stream.
    Finish,
}

/// Compression and checksum failures.
///
/// Both are fatal for the connection: once a deflate stream or checksum
/// diverges there is no way to resynchronize with the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// zlib reported a failure other than running out of buffer space.
    #[error("deflate error: {0}")]
    Zlib(String),

    /// The plaintext checksum did not match a frame's trailer.
    #[error("checksum mismatch (trailer {expected:#010x}, computed {actual:#010x})")]
    ChecksumMismatch {
        /// Digest carried by the frame trailer
        expected: u32,
        /// Digest computed over the received plaintext
        actual: u32,
    },
}

/// Worst-case deflate output for `len` bytes of input, sync flush
/// included. Mirrors zlib's `deflateBound` for a raw stream.
fn deflate_bound_overhead(len: usize) -> usize {
    (len >> 12) + (len >> 14) + (len >> 25) + 13
}

/// Outgoing-direction codec: deflate plus rolling plaintext CRC32.
pub struct Deflater {
    compress: Compress,
    crc: Crc32,
}

impl Deflater {
    /// Codec compressing at `level`. The stream is raw deflate (no zlib
    /// header) so frames can be spliced at sync-flush boundaries.
    #[must_use]
    pub fn new(level: Compression) -> Self {
        Self { compress: Compress::new(level, false), crc: Crc32::new() }
    }

    /// Running digest of all plaintext written so far.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.crc.digest()
    }

    /// Move bytes from `input` to `output`, consuming as much input as the
    /// `budget` of output bytes allows and advancing `input` past what was
    /// consumed.
    ///
    /// In `Raw` mode the bytes pass through untouched and the 4-byte
    /// checksum trailer is appended. In the compressing modes the input is
    /// capped so that a worst-case deflate of it, flush marker included,
    /// still fits the budget; `SyncFlush` then overwrites the trailing
    /// `00 00 FF FF` with the running checksum.
    ///
    /// # Errors
    ///
    /// [`CodecError::Zlib`] if deflate fails or the flush does not
    /// complete within the budget.
    pub fn write(
        &mut self,
        input: &mut Bytes,
        output: &mut BytesMut,
        budget: usize,
        mode: CodecMode,
    ) -> Result<(), CodecError> {
        match mode {
            CodecMode::Raw => {
                self.write_raw(input, output, budget);
                Ok(())
            },
            _ => self.write_deflate(input, output, budget, mode),
        }
    }

    fn write_raw(&mut self, input: &mut Bytes, output: &mut BytesMut, budget: usize) {
        debug_assert!(budget > TRAILER_LEN);
        let take = input.len().min(budget.saturating_sub(TRAILER_LEN));
        self.crc.update(&input[..take]);
        output.extend_from_slice(&input[..take]);
        input.advance(take);
        output.put_u32(self.crc.digest());
    }

    fn write_deflate(
        &mut self,
        input: &mut Bytes,
        output: &mut BytesMut,
        budget: usize,
        mode: CodecMode,
    ) -> Result<(), CodecError> {
        // Cap the input so the worst-case deflate of it fits the budget.
        let cap = budget.saturating_sub(deflate_bound_overhead(budget));
        let take = input.len().min(cap);
        let flush = match mode {
            CodecMode::NoFlush => FlushCompress::None,
            CodecMode::SyncFlush => FlushCompress::Sync,
            CodecMode::Finish => FlushCompress::Finish,
            CodecMode::Raw => unreachable!("raw mode handled by write_raw"),
        };

        let start = output.len();
        output.resize(start + budget, 0);
        let before_in = self.compress.total_in();
        let before_out = self.compress.total_out();
        let result = self.compress.compress(&input[..take], &mut output[start..], flush);
        let consumed = (self.compress.total_in() - before_in) as usize;
        let produced = (self.compress.total_out() - before_out) as usize;
        output.truncate(start + produced);
        if let Err(e) = result {
            return Err(CodecError::Zlib(e.to_string()));
        }

        self.crc.update(&input[..consumed]);
        input.advance(consumed);

        if mode == CodecMode::SyncFlush {
            // The budget was sized from deflateBound, so the flush must
            // have completed and left the sync marker in place.
            let tail = output.len().checked_sub(TRAILER_LEN);
            let flushed = tail.is_some_and(|t| output[t..] == SYNC_TRAILER);
            if consumed < take || !flushed {
                return Err(CodecError::Zlib("sync flush did not complete".to_string()));
            }
            let crc = self.crc.digest().to_be_bytes();
            let tail = output.len() - TRAILER_LEN;
            output[tail..].copy_from_slice(&crc);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Deflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deflater").field("checksum", &self.checksum()).finish_non_exhaustive()
    }
}

/// Incoming-direction codec: inflate plus rolling plaintext CRC32.
pub struct Inflater {
    decompress: Decompress,
    crc: Crc32,
}

impl Inflater {
    /// Codec for a raw deflate stream (no zlib header).
    #[must_use]
    pub fn new() -> Self {
        Self { decompress: Decompress::new(false), crc: Crc32::new() }
    }

    /// Running digest of all plaintext produced so far.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.crc.digest()
    }

    /// Compare the running digest against a frame's trailer.
    ///
    /// # Errors
    ///
    /// [`CodecError::ChecksumMismatch`] when they differ.
    pub fn verify(&self, expected: u32) -> Result<(), CodecError> {
        let actual = self.crc.digest();
        if actual == expected {
            Ok(())
        } else {
            Err(CodecError::ChecksumMismatch { expected, actual })
        }
    }

    /// Move bytes from `input` to `output`, producing at most `budget`
    /// bytes of plaintext and advancing `input` past what was consumed.
    ///
    /// Callers loop until `input` is empty, draining `output` between
    /// calls; a single call may stop early when the budget fills. The
    /// frame's checksum trailer must be stripped from `input` beforehand
    /// and checked with [`Inflater::verify`] afterwards.
    ///
    /// # Errors
    ///
    /// [`CodecError::Zlib`] if the deflate stream is corrupt.
    pub fn write(
        &mut self,
        input: &mut Bytes,
        output: &mut BytesMut,
        budget: usize,
        mode: CodecMode,
    ) -> Result<(), CodecError> {
        if mode == CodecMode::Raw {
            let take = input.len().min(budget);
            self.crc.update(&input[..take]);
            output.extend_from_slice(&input[..take]);
            input.advance(take);
            return Ok(());
        }

        let flush = match mode {
            CodecMode::Finish => FlushDecompress::Finish,
            _ => FlushDecompress::Sync,
        };
        let start = output.len();
        output.resize(start + budget, 0);
        let before_in = self.decompress.total_in();
        let before_out = self.decompress.total_out();
        let result = self.decompress.decompress(&input[..], &mut output[start..], flush);
        let consumed = (self.decompress.total_in() - before_in) as usize;
        let produced = (self.decompress.total_out() - before_out) as usize;
        output.truncate(start + produced);
        if let Err(e) = result {
            return Err(CodecError::Zlib(e.to_string()));
        }

        self.crc.update(&output[start..]);
        input.advance(consumed);
        Ok(())
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater").field("checksum", &self.checksum()).finish_non_exhaustive()
    }
}
