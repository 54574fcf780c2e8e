//! Streaming decoder for multi-member gzip streams.
//!
//! A gzip stream produced by block-parallel compression is a chain of
//! independent members, and the boundary between two members can fall
//! anywhere relative to the decoder's read buffer. The decoder here is an
//! explicit state machine over a single refillable input buffer: when a
//! member ends mid-buffer, the unconsumed remainder is re-examined
//! immediately as the start of the next member — no bytes are re-read and
//! none are discarded. The driver is one iterative loop, so a pathological
//! stream of thousands of tiny members cannot grow the stack.
//!
//! Inflate itself comes from flate2's raw-deflate `Decompress`; headers and
//! trailers are parsed by us (src/gzip.rs) so the decoder knows the exact
//! byte offset of every member boundary and of any error.

use std::io::{self, Read, Write};

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::{ParzError, ParzResult};
use crate::gzip::{self, HeaderParse};

/// Default size for the compressed-input read buffer and the inflate output
/// buffer (128 KiB, matching the compressor's default block size).
pub const DEFAULT_IO_BUFFER_SIZE: usize = 128 * 1024;

/// Decoder position in the current stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Between members: the next unconsumed byte, if any, must start a
    /// member header.
    AwaitingMemberStart,
    /// Inside a member's deflate payload.
    DecodingMember,
    /// A member's trailer has been verified; remaining buffered bytes are
    /// re-examined without a fresh read.
    MemberComplete,
    /// Clean end: input exhausted with no partial member pending.
    StreamExhausted,
}

/// Result of one inflate step over the current input window.
#[derive(Debug, Clone, Copy)]
pub struct StepResult {
    /// Compressed bytes consumed from the window
    pub consumed: usize,
    /// Uncompressed bytes written to the sink
    pub produced: u64,
    /// True when the deflate stream of the current member ended
    pub finished: bool,
}

/// Inflate state for exactly one member: the live deflate context plus the
/// running CRC and length needed to verify the trailer. Reset at every
/// member boundary.
pub struct MemberDecoder {
    inflate: Decompress,
    crc: crc32fast::Hasher,
    produced: u64,
    out_buf: Vec<u8>,
}

impl MemberDecoder {
    pub fn new(out_buf_size: usize) -> Self {
        Self {
            // Raw deflate: the gzip wrapper is handled by the caller
            inflate: Decompress::new(false),
            crc: crc32fast::Hasher::new(),
            produced: 0,
            out_buf: vec![0u8; out_buf_size.max(1)],
        }
    }

    /// Discard all member state. Called when crossing into a new member.
    pub fn reset(&mut self) {
        self.inflate.reset(false);
        self.crc = crc32fast::Hasher::new();
        self.produced = 0;
    }

    /// Uncompressed bytes produced for the current member so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// CRC32 of the uncompressed bytes produced so far.
    pub fn crc32(&self) -> u32 {
        self.crc.clone().finalize()
    }

    /// Inflate as much of `input` as possible, flushing output to `sink` as
    /// it is produced.
    ///
    /// Loops internally while the output buffer fills before the input
    /// window is drained, so a single step consumes the whole window unless
    /// the member ends or more input is needed. `offset` is the absolute
    /// stream offset of `input[0]`; errors surface the exact byte at which
    /// the payload became undecodable.
    pub fn step<W: Write>(
        &mut self,
        input: &[u8],
        sink: &mut W,
        offset: u64,
    ) -> ParzResult<StepResult> {
        let mut consumed = 0;
        let mut produced = 0u64;

        loop {
            let in_before = self.inflate.total_in();
            let out_before = self.inflate.total_out();

            let status = self
                .inflate
                .decompress(&input[consumed..], &mut self.out_buf, FlushDecompress::None)
                .map_err(|e| {
                    ParzError::format(
                        offset + consumed as u64,
                        format!("corrupt deflate data: {}", e),
                    )
                })?;

            let in_now = (self.inflate.total_in() - in_before) as usize;
            let out_now = (self.inflate.total_out() - out_before) as usize;
            consumed += in_now;

            if out_now > 0 {
                let bytes = &self.out_buf[..out_now];
                self.crc.update(bytes);
                sink.write_all(bytes)?;
                self.produced += out_now as u64;
                produced += out_now as u64;
            }

            match status {
                Status::StreamEnd => {
                    return Ok(StepResult {
                        consumed,
                        produced,
                        finished: true,
                    });
                }
                Status::Ok | Status::BufError => {
                    // Keep looping while the output buffer was the limit;
                    // stop once the input is drained or no progress is
                    // possible without more input.
                    let output_was_full = out_now == self.out_buf.len();
                    if (consumed == input.len() && !output_was_full)
                        || (in_now == 0 && out_now == 0)
                    {
                        return Ok(StepResult {
                            consumed,
                            produced,
                            finished: false,
                        });
                    }
                }
            }
        }
    }
}

/// Totals reported after a successful decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeSummary {
    pub bytes_written: u64,
    pub members: u64,
}

/// The single decode cursor over a multi-member stream.
///
/// Owns the input buffer and the `(start, end)` window of bytes fetched but
/// not yet consumed. The window survives member boundaries; refills compact
/// it to the front of the buffer and never drop bytes.
pub struct StreamDecoder {
    buf: Vec<u8>,
    start: usize,
    end: usize,
    io_buffer_size: usize,
    /// Absolute stream offset of `buf[start]`
    offset: u64,
    member: MemberDecoder,
}

impl StreamDecoder {
    pub fn new(io_buffer_size: usize) -> ParzResult<Self> {
        if io_buffer_size == 0 {
            return Err(ParzError::config("io buffer size must be nonzero"));
        }
        Ok(Self {
            buf: vec![0u8; io_buffer_size],
            start: 0,
            end: 0,
            io_buffer_size,
            offset: 0,
            // The inflate output buffer never needs to track a tiny input
            // buffer; keep it large enough to amortize sink writes.
            member: MemberDecoder::new(io_buffer_size.clamp(64 * 1024, DEFAULT_IO_BUFFER_SIZE)),
        })
    }

    fn window(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    fn pending(&self) -> usize {
        self.end - self.start
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        self.offset += n as u64;
    }

    /// Compact the unconsumed window to the front of the buffer and read
    /// once from `reader`. Returns the number of new bytes (0 = EOF). Grows
    /// the buffer when a header larger than the whole buffer is pending.
    fn refill<R: Read>(&mut self, reader: &mut R) -> ParzResult<usize> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buf.len() {
            // Window fills the buffer and the caller still needs more
            // (only reachable while parsing an oversized member header)
            self.buf.resize(self.buf.len() + self.io_buffer_size, 0);
        }
        loop {
            match reader.read(&mut self.buf[self.end..]) {
                Ok(n) => {
                    self.end += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ParzError::Io(e)),
            }
        }
    }

    /// Decode every member of `reader` into `writer`.
    ///
    /// Success requires the input to end exactly at a member boundary: EOF
    /// anywhere inside a header, payload, or trailer is a
    /// [`ParzError::PrematureEnd`], and any header/checksum inconsistency is
    /// a [`ParzError::Format`] carrying the absolute byte offset.
    pub fn decode<R: Read, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> ParzResult<DecodeSummary> {
        self.start = 0;
        self.end = 0;
        self.offset = 0;
        self.member.reset();

        let mut summary = DecodeSummary::default();
        let mut state = DecoderState::AwaitingMemberStart;

        loop {
            match state {
                DecoderState::AwaitingMemberStart => {
                    if self.pending() == 0 && self.refill(&mut reader)? == 0 {
                        state = DecoderState::StreamExhausted;
                        continue;
                    }
                    match gzip::parse_member_header(self.window(), self.offset)? {
                        HeaderParse::Done { len } => {
                            self.consume(len);
                            self.member.reset();
                            state = DecoderState::DecodingMember;
                        }
                        HeaderParse::NeedMore => {
                            if self.refill(&mut reader)? == 0 {
                                return Err(ParzError::PrematureEnd {
                                    offset: self.offset + self.pending() as u64,
                                    written: summary.bytes_written,
                                });
                            }
                        }
                    }
                }

                DecoderState::DecodingMember => {
                    if self.pending() == 0 && self.refill(&mut reader)? == 0 {
                        return Err(ParzError::PrematureEnd {
                            offset: self.offset,
                            written: summary.bytes_written,
                        });
                    }

                    // Field access instead of self.window(): the member
                    // decoder is mutably borrowed for the call
                    let window = &self.buf[self.start..self.end];
                    let step = self.member.step(window, &mut writer, self.offset)?;
                    self.consume(step.consumed);
                    summary.bytes_written += step.produced;

                    if step.finished {
                        self.verify_trailer(&mut reader, summary.bytes_written)?;
                        summary.members += 1;
                        state = DecoderState::MemberComplete;
                    } else if step.consumed == 0 && self.refill(&mut reader)? == 0 {
                        // The window holds a partial deflate element the
                        // inflater cannot advance through without more bytes
                        return Err(ParzError::PrematureEnd {
                            offset: self.offset + self.pending() as u64,
                            written: summary.bytes_written,
                        });
                    }
                }

                DecoderState::MemberComplete => {
                    // The remaining window bytes, if any, must start the
                    // next member; re-examine them without a fresh read.
                    state = DecoderState::AwaitingMemberStart;
                }

                DecoderState::StreamExhausted => {
                    writer.flush()?;
                    return Ok(summary);
                }
            }
        }
    }

    /// Read and verify the 8-byte member trailer, refilling as needed.
    fn verify_trailer<R: Read>(&mut self, reader: &mut R, written: u64) -> ParzResult<()> {
        while self.pending() < gzip::TRAILER_LEN {
            if self.refill(reader)? == 0 {
                return Err(ParzError::PrematureEnd {
                    offset: self.offset + self.pending() as u64,
                    written,
                });
            }
        }

        let (stored_crc, stored_len) = gzip::read_member_trailer(self.window());
        let computed_crc = self.member.crc32();
        if stored_crc != computed_crc {
            return Err(ParzError::format(
                self.offset,
                format!(
                    "CRC32 mismatch (stored {:#010x}, computed {:#010x})",
                    stored_crc, computed_crc
                ),
            ));
        }
        let computed_len = self.member.produced() as u32; // ISIZE is mod 2^32
        if stored_len != computed_len {
            return Err(ParzError::format(
                self.offset + 4,
                format!(
                    "length mismatch (trailer says {}, decoded {})",
                    stored_len, computed_len
                ),
            ));
        }
        self.consume(gzip::TRAILER_LEN);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BlockCompressor;
    use std::io::Cursor;

    fn compress_member(data: &[u8]) -> Vec<u8> {
        let mut compressor = BlockCompressor::new(6).unwrap();
        let mut out = Vec::new();
        compressor.compress_into(data, &mut out);
        out
    }

    fn decode_with_buffer(compressed: &[u8], io_buffer_size: usize) -> ParzResult<Vec<u8>> {
        let mut decoder = StreamDecoder::new(io_buffer_size)?;
        let mut out = Vec::new();
        decoder.decode(Cursor::new(compressed), &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_single_member() {
        let data = b"hello, multi-member world".repeat(100);
        let compressed = compress_member(&data);
        assert_eq!(decode_with_buffer(&compressed, 4096).unwrap(), data);
    }

    #[test]
    fn test_empty_input_is_clean_eof() {
        let mut decoder = StreamDecoder::new(4096).unwrap();
        let mut out = Vec::new();
        let summary = decoder.decode(Cursor::new(&b""[..]), &mut out).unwrap();
        assert_eq!(summary.members, 0);
        assert_eq!(summary.bytes_written, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_member_decodes_to_nothing() {
        let compressed = compress_member(b"");
        let out = decode_with_buffer(&compressed, 4096).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_two_members_concatenated() {
        let a = b"first payload ".repeat(300);
        let b = b"second payload ".repeat(400);
        let mut compressed = compress_member(&a);
        compressed.extend_from_slice(&compress_member(&b));

        let mut expected = a.clone();
        expected.extend_from_slice(&b);

        let mut decoder = StreamDecoder::new(4096).unwrap();
        let mut out = Vec::new();
        let summary = decoder.decode(Cursor::new(&compressed), &mut out).unwrap();
        assert_eq!(summary.members, 2);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_boundary_at_every_buffer_alignment() {
        // Slide the member boundary across every position of the read
        // buffer by varying the buffer size from tiny (smaller than one
        // member) to larger than the whole stream.
        let a: Vec<u8> = (0..2000u32).map(|i| (i % 7) as u8).collect();
        let b: Vec<u8> = (0..3000u32).map(|i| (i % 13) as u8).collect();
        let mut compressed = compress_member(&a);
        let member_len = compressed.len();
        compressed.extend_from_slice(&compress_member(&b));

        let mut expected = a.clone();
        expected.extend_from_slice(&b);

        let mut sizes: Vec<usize> = (1..=64).collect();
        sizes.extend([
            member_len - 1,
            member_len,
            member_len + 1,
            compressed.len(),
            compressed.len() + 1,
        ]);
        for size in sizes {
            let out = decode_with_buffer(&compressed, size)
                .unwrap_or_else(|e| panic!("buffer size {}: {}", size, e));
            assert_eq!(out, expected, "buffer size {}", size);
        }
    }

    #[test]
    fn test_many_tiny_members_iterative() {
        // Hundreds of minimal members inside a single small buffer; the
        // driver must not recurse per member.
        let mut compressed = Vec::new();
        let mut expected = Vec::new();
        for i in 0..500u32 {
            let payload = [i as u8];
            compressed.extend_from_slice(&compress_member(&payload));
            expected.push(i as u8);
        }

        let mut decoder = StreamDecoder::new(512).unwrap();
        let mut out = Vec::new();
        let summary = decoder.decode(Cursor::new(&compressed), &mut out).unwrap();
        assert_eq!(summary.members, 500);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_truncation_at_any_offset_is_premature_end() {
        let data = b"truncate me".repeat(50);
        let compressed = compress_member(&data);

        for cut in 1..compressed.len() {
            let err = decode_with_buffer(&compressed[..cut], 256).unwrap_err();
            assert!(
                matches!(err, ParzError::PrematureEnd { .. }),
                "cut at {} gave {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_corrupt_crc_reported_with_offset() {
        let data = b"crc check".repeat(100);
        let mut compressed = compress_member(&data);
        let crc_pos = compressed.len() - 8;
        compressed[crc_pos] ^= 0xff;

        let err = decode_with_buffer(&compressed, 4096).unwrap_err();
        match err {
            ParzError::Format { offset, reason } => {
                assert_eq!(offset, crc_pos as u64);
                assert!(reason.contains("CRC32"), "got: {}", reason);
            }
            other => panic!("expected Format error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_isize_reported() {
        let data = b"length check".repeat(100);
        let mut compressed = compress_member(&data);
        let len_pos = compressed.len() - 4;
        compressed[len_pos] ^= 0x01;

        let err = decode_with_buffer(&compressed, 4096).unwrap_err();
        match err {
            ParzError::Format { reason, .. } => {
                assert!(reason.contains("length mismatch"), "got: {}", reason)
            }
            other => panic!("expected Format error, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_between_members_rejected() {
        let mut compressed = compress_member(b"ok");
        let garbage_at = compressed.len() as u64;
        compressed.extend_from_slice(b"not gzip at all");

        let err = decode_with_buffer(&compressed, 4096).unwrap_err();
        match err {
            ParzError::Format { offset, .. } => assert_eq!(offset, garbage_at),
            other => panic!("expected Format error, got {:?}", other),
        }
    }

    #[test]
    fn test_premature_end_reports_written_bytes() {
        let a = b"A".repeat(5000);
        let b = b"B".repeat(5000);
        let mut compressed = compress_member(&a);
        compressed.extend_from_slice(&compress_member(&b));
        // Cut in the middle of the second member's payload
        let cut = compressed.len() - 20;

        let err = decode_with_buffer(&compressed[..cut], 1024).unwrap_err();
        match err {
            ParzError::PrematureEnd { written, .. } => {
                // All of member A must have been flushed before the failure
                assert!(written >= a.len() as u64, "written = {}", written);
            }
            other => panic!("expected PrematureEnd, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_output_of_scheduler() {
        use crate::scheduler::ParallelCompressor;

        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 256) as u8).collect();
        let mut compressor = ParallelCompressor::new(4, 6, 32 * 1024).unwrap();
        let mut compressed = Vec::new();
        compressor
            .compress_stream(Cursor::new(&data), &mut compressed)
            .unwrap();

        let mut decoder = StreamDecoder::new(DEFAULT_IO_BUFFER_SIZE).unwrap();
        let mut out = Vec::new();
        let summary = decoder.decode(Cursor::new(&compressed), &mut out).unwrap();
        assert_eq!(summary.members as usize, 300_000usize.div_ceil(32 * 1024));
        assert_eq!(out, data);
    }
}
