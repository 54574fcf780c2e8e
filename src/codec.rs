//! Single-block gzip compression.
//!
//! Each call to [`BlockCompressor::compress_into`] turns one input block into
//! one complete, independently decodable gzip member: our own header, a raw
//! deflate payload from libdeflate, and a CRC32 + ISIZE trailer. Members
//! produced this way can be concatenated freely; any multi-member-aware gzip
//! reader reconstructs the original byte sequence.

use libdeflater::{CompressionLvl, Compressor};

use crate::error::{ParzError, ParzResult};
use crate::gzip::{self, MemberHeader};

/// Highest level libdeflate supports; 0 emits stored (uncompressed) blocks.
pub const MAX_LEVEL: u32 = 12;
/// libdeflate's default, same as gzip's.
pub const DEFAULT_LEVEL: u32 = 6;

/// One owned gzip block compressor.
///
/// Stateless across calls apart from libdeflate's internal scratch memory,
/// so each worker slot owns one and calls it wave after wave without any
/// cross-slot coordination.
pub struct BlockCompressor {
    compressor: Compressor,
    level: u32,
    header: MemberHeader,
}

impl BlockCompressor {
    /// Create a compressor for `level`, rejecting out-of-range levels here
    /// so per-block calls never need to re-validate.
    pub fn new(level: u32) -> ParzResult<Self> {
        Self::with_header(level, MemberHeader::default())
    }

    /// Like [`BlockCompressor::new`] but every emitted member carries the
    /// given FNAME/MTIME metadata.
    pub fn with_header(level: u32, header: MemberHeader) -> ParzResult<Self> {
        if level > MAX_LEVEL {
            return Err(ParzError::InvalidLevel(level));
        }
        let lvl = CompressionLvl::new(level as i32)
            .map_err(|_| ParzError::InvalidLevel(level))?;
        Ok(Self {
            compressor: Compressor::new(lvl),
            level,
            header,
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Worst-case size of one member for `input_len` input bytes. Used to
    /// pre-size slot output buffers so waves never reallocate.
    pub fn member_bound(&mut self, input_len: usize) -> usize {
        let name_len = self
            .header
            .filename
            .as_ref()
            .map_or(0, |name| name.len() + 1);
        gzip::BASE_HEADER_LEN
            + name_len
            + self.compressor.deflate_compress_bound(input_len)
            + gzip::TRAILER_LEN
    }

    /// Compress `block` into `out` as one self-contained gzip member,
    /// replacing any previous contents of `out`.
    ///
    /// A zero-length block still produces a valid (empty) member.
    pub fn compress_into(&mut self, block: &[u8], out: &mut Vec<u8>) {
        out.clear();
        gzip::write_member_header(out, &self.header);

        let deflate_start = out.len();
        let bound = self.compressor.deflate_compress_bound(block.len());
        out.resize(deflate_start + bound, 0);
        let written = self
            .compressor
            .deflate_compress(block, &mut out[deflate_start..])
            .expect("libdeflate compression failed");
        out.truncate(deflate_start + written);

        let crc32 = crc32fast::hash(block);
        gzip::write_member_trailer(out, crc32, block.len() as u64);
    }
}
