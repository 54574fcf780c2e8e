//! Wave-based parallel compression scheduler.
//!
//! The input stream is consumed in waves: each wave reads up to one block per
//! worker slot, compresses the populated slots concurrently on scoped
//! threads, then writes the compressed members to the output in ascending
//! slot order. The scope join is the wave barrier — wave n+1 does not read
//! until wave n is fully written — so memory stays bounded at
//! O(threads x block_size) no matter how long the stream is.
//!
//! Within a wave the compression tasks share nothing: each slot owns its
//! input buffer, output buffer and compressor for the whole run, and is
//! touched by exactly one thread at a time. Ordering is enforced only at the
//! write step, which runs on the joining thread after the barrier.

use std::io::{self, Read, Write};
use std::thread;

use crate::codec::BlockCompressor;
use crate::error::{ParzError, ParzResult};
use crate::gzip::MemberHeader;

/// Default block size per worker per wave (128 KiB, the pigz default).
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;
/// Below this, per-member header/trailer overhead dominates.
pub const MIN_BLOCK_SIZE: usize = 1024;

/// One reusable (input buffer, output buffer, compressor) triple.
///
/// Slots live for the whole run and are re-populated every wave. A slot is
/// never handed to a new block while its previous output is unflushed: the
/// write step drains every populated slot before the next read step begins.
struct WorkerSlot {
    input: Vec<u8>,
    /// Bytes of `input` filled by the current wave's read
    filled: usize,
    output: Vec<u8>,
    compressor: BlockCompressor,
}

impl WorkerSlot {
    fn new(block_size: usize, level: u32, header: MemberHeader) -> ParzResult<Self> {
        let mut compressor = BlockCompressor::with_header(level, header)?;
        let capacity = compressor.member_bound(block_size);
        Ok(Self {
            input: vec![0u8; block_size],
            filled: 0,
            output: Vec::with_capacity(capacity),
            compressor,
        })
    }

    /// Compress the filled portion of the input buffer into the output
    /// buffer. Only ever called by the one thread that owns the slot for
    /// this wave. A final partial block compresses at its actual length;
    /// the uninitialized tail of the input buffer is never touched.
    fn compress(&mut self) {
        self.compressor
            .compress_into(&self.input[..self.filled], &mut self.output);
    }
}

/// Totals reported after a successful run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressSummary {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub members: u64,
}

/// Block-parallel gzip compressor.
///
/// Splits the input into fixed-size blocks, compresses each block into an
/// independent gzip member on a worker pool, and concatenates the members in
/// input order.
pub struct ParallelCompressor {
    slots: Vec<WorkerSlot>,
    block_size: usize,
    #[cfg(test)]
    completion_log: Option<std::sync::Arc<std::sync::Mutex<Vec<usize>>>>,
    #[cfg(test)]
    stagger: Vec<std::time::Duration>,
}

impl ParallelCompressor {
    /// Create a compressor with `n_threads` worker slots (0 = all available
    /// hardware threads) at the given level and block size. Level and block
    /// size are validated here; a constructed compressor cannot fail on
    /// configuration grounds mid-run.
    pub fn new(n_threads: usize, level: u32, block_size: usize) -> ParzResult<Self> {
        Self::with_header(n_threads, level, block_size, MemberHeader::default())
    }

    pub fn with_header(
        n_threads: usize,
        level: u32,
        block_size: usize,
        header: MemberHeader,
    ) -> ParzResult<Self> {
        if block_size < MIN_BLOCK_SIZE {
            return Err(ParzError::InvalidBlockSize(format!(
                "{} bytes (minimum is {})",
                block_size, MIN_BLOCK_SIZE
            )));
        }
        let n_threads = resolve_thread_count(n_threads);

        let slots = (0..n_threads)
            .map(|_| WorkerSlot::new(block_size, level, header.clone()))
            .collect::<ParzResult<Vec<_>>>()?;

        Ok(Self {
            slots,
            block_size,
            #[cfg(test)]
            completion_log: None,
            #[cfg(test)]
            stagger: Vec::new(),
        })
    }

    pub fn n_threads(&self) -> usize {
        self.slots.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Compress `reader` to `writer` until the input is exhausted.
    ///
    /// Output members appear in the exact order their blocks were read, even
    /// though compression finishes out of order across workers. Zero-byte
    /// input still emits one (empty) gzip member so the output is always a
    /// decodable gzip stream.
    pub fn compress_stream<R: Read, W: Write>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> ParzResult<CompressSummary> {
        let mut summary = CompressSummary::default();
        let mut eof = false;

        while !eof {
            // Read step: fill slots until each holds a full block, the
            // input runs out, or every slot is populated.
            let mut populated = 0;
            for slot in self.slots.iter_mut() {
                let n = read_block(&mut reader, &mut slot.input)?;
                slot.filled = n;
                if n < self.block_size {
                    eof = true;
                }
                if n > 0 {
                    populated += 1;
                }
                if eof {
                    break;
                }
            }

            if populated == 0 {
                if summary.members == 0 {
                    // Empty input: emit a single empty member so the
                    // output is still a valid gzip stream.
                    let slot = &mut self.slots[0];
                    slot.filled = 0;
                    slot.compress();
                    populated = 1;
                } else {
                    break;
                }
            } else {
                summary.bytes_read += self.slots[..populated]
                    .iter()
                    .map(|slot| slot.filled as u64)
                    .sum::<u64>();

                // Dispatch step: one scoped thread per populated slot. The
                // end of the scope is the wave barrier.
                self.run_wave(populated);
            }

            // Write step: strictly ascending slot order, regardless of the
            // order compression finished in.
            for slot in self.slots[..populated].iter() {
                write_member(&mut writer, &slot.output, summary.bytes_written)?;
                summary.bytes_written += slot.output.len() as u64;
                summary.members += 1;
            }
        }

        writer.flush()?;
        Ok(summary)
    }

    /// Compress slots `0..populated` concurrently and wait for all of them.
    fn run_wave(&mut self, populated: usize) {
        if populated == 1 {
            self.compress_slot(0);
            return;
        }

        #[cfg(test)]
        let log = self.completion_log.clone();
        #[cfg(test)]
        let stagger = self.stagger.clone();

        let active = &mut self.slots[..populated];
        thread::scope(|scope| {
            for (index, slot) in active.iter_mut().enumerate() {
                #[cfg(test)]
                let log = log.clone();
                #[cfg(test)]
                let delay = stagger.get(index).copied();
                let _ = index;
                scope.spawn(move || {
                    #[cfg(test)]
                    if let Some(delay) = delay {
                        std::thread::sleep(delay);
                    }
                    slot.compress();
                    #[cfg(test)]
                    if let Some(log) = log {
                        log.lock().unwrap().push(index);
                    }
                });
            }
        });
    }

    fn compress_slot(&mut self, index: usize) {
        #[cfg(test)]
        if let Some(delay) = self.stagger.get(index).copied() {
            std::thread::sleep(delay);
        }
        self.slots[index].compress();
        #[cfg(test)]
        if let Some(ref log) = self.completion_log {
            log.lock().unwrap().push(index);
        }
    }
}

/// Resolve a user thread count: 0 means every available hardware thread.
pub fn resolve_thread_count(n_threads: usize) -> usize {
    if n_threads > 0 {
        n_threads
    } else {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Fill `buf` from `reader`, retrying short reads, until the buffer is full
/// or the input is exhausted. Returns the number of bytes read. A read
/// failure that is not clean EOF is fatal.
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> ParzResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ParzError::Io(e)),
        }
    }
    Ok(filled)
}

/// Write one compressed member, attributing failures with how much output
/// had already been safely written.
fn write_member<W: Write>(writer: &mut W, member: &[u8], written_so_far: u64) -> ParzResult<()> {
    writer.write_all(member).map_err(|e| {
        ParzError::Io(io::Error::new(
            e.kind(),
            format!(
                "writing {} bytes failed after {} bytes were written: {}",
                member.len(),
                written_so_far,
                e
            ),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn gunzip_multi(data: &[u8]) -> Vec<u8> {
        let mut decoder = flate2::read::MultiGzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_round_trip_multi_wave() {
        let data = b"wave after wave of highly compressible text. ".repeat(40_000);
        let mut compressor = ParallelCompressor::new(4, 6, 64 * 1024).unwrap();

        let mut output = Vec::new();
        let summary = compressor
            .compress_stream(Cursor::new(&data), &mut output)
            .unwrap();

        assert_eq!(summary.bytes_read, data.len() as u64);
        assert_eq!(summary.bytes_written, output.len() as u64);
        assert_eq!(summary.members as usize, data.len().div_ceil(64 * 1024));
        assert_eq!(gunzip_multi(&output), data);
    }

    #[test]
    fn test_empty_input_emits_one_decodable_member() {
        let mut compressor = ParallelCompressor::new(2, 6, DEFAULT_BLOCK_SIZE).unwrap();
        let mut output = Vec::new();
        let summary = compressor
            .compress_stream(Cursor::new(&b""[..]), &mut output)
            .unwrap();

        assert_eq!(summary.bytes_read, 0);
        assert_eq!(summary.members, 1);
        assert!(!output.is_empty());
        assert_eq!(gunzip_multi(&output), b"");
    }

    #[test]
    fn test_final_partial_block_uses_actual_length() {
        // 2.5 blocks: the last member must decode to exactly the tail, not
        // to a full buffer of stale bytes.
        let block = MIN_BLOCK_SIZE;
        let data: Vec<u8> = (0..block * 2 + block / 2).map(|i| (i % 251) as u8).collect();
        let mut compressor = ParallelCompressor::new(3, 1, block).unwrap();

        let mut output = Vec::new();
        let summary = compressor
            .compress_stream(Cursor::new(&data), &mut output)
            .unwrap();

        assert_eq!(summary.members, 3);
        assert_eq!(gunzip_multi(&output), data);
    }

    #[test]
    fn test_input_exactly_one_block() {
        let data = vec![7u8; MIN_BLOCK_SIZE];
        let mut compressor = ParallelCompressor::new(4, 6, MIN_BLOCK_SIZE).unwrap();
        let mut output = Vec::new();
        let summary = compressor
            .compress_stream(Cursor::new(&data), &mut output)
            .unwrap();

        assert_eq!(summary.members, 1);
        assert_eq!(gunzip_multi(&output), data);
    }

    #[test]
    fn test_out_of_order_completion_preserves_write_order() {
        // Slot 0 is forced to finish last within each wave; the output must
        // still decode to the input in original order.
        let block = MIN_BLOCK_SIZE;
        let data: Vec<u8> = (0..block * 4).map(|i| (i / block) as u8).collect();

        let mut compressor = ParallelCompressor::new(4, 6, block).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        compressor.completion_log = Some(log.clone());
        compressor.stagger = vec![
            Duration::from_millis(60),
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
        ];

        let mut output = Vec::new();
        compressor
            .compress_stream(Cursor::new(&data), &mut output)
            .unwrap();

        let completions = log.lock().unwrap().clone();
        assert_eq!(completions.len(), 4);
        assert_ne!(
            completions[0], 0,
            "slot 0 was delayed and should not finish first"
        );
        assert_eq!(gunzip_multi(&output), data);
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        assert!(matches!(
            ParallelCompressor::new(4, 13, DEFAULT_BLOCK_SIZE),
            Err(ParzError::InvalidLevel(13))
        ));
        assert!(matches!(
            ParallelCompressor::new(4, 6, 16),
            Err(ParzError::InvalidBlockSize(_))
        ));
    }

    #[test]
    fn test_zero_threads_uses_all_cores() {
        let compressor = ParallelCompressor::new(0, 6, DEFAULT_BLOCK_SIZE).unwrap();
        assert!(compressor.n_threads() >= 1);
    }

    #[test]
    fn test_write_failure_reports_progress() {
        struct FailingWriter {
            accepted: usize,
        }
        impl Write for FailingWriter {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.accepted == 0 {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "disk full"));
                }
                let n = buf.len().min(self.accepted);
                self.accepted -= n;
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let data = vec![0u8; MIN_BLOCK_SIZE * 4];
        let mut compressor = ParallelCompressor::new(2, 6, MIN_BLOCK_SIZE).unwrap();
        let err = compressor
            .compress_stream(Cursor::new(&data), FailingWriter { accepted: 40 })
            .unwrap_err();
        match err {
            ParzError::Io(e) => {
                let msg = e.to_string();
                assert!(msg.contains("bytes were written"), "got: {}", msg);
            }
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_level_zero_round_trips() {
        let data = b"stored, not entropy coded".repeat(500);
        let mut compressor = ParallelCompressor::new(2, 0, MIN_BLOCK_SIZE).unwrap();
        let mut output = Vec::new();
        compressor
            .compress_stream(Cursor::new(&data), &mut output)
            .unwrap();
        assert_eq!(gunzip_multi(&output), data);
    }
}
