//! RFC 1952 gzip container plumbing shared by the compressor and the
//! streaming decoder.
//!
//! The compressor writes member headers and trailers itself (the deflate
//! payload comes from libdeflate), and the decoder parses them itself so it
//! has exact control over member boundaries and error offsets. The header
//! parser is resumable: a header that ends past the current read buffer
//! reports `NeedMore` instead of failing, because member boundaries can land
//! anywhere relative to buffer refills.

use crate::error::{ParzError, ParzResult};

pub const MAGIC: [u8; 2] = [0x1f, 0x8b];
pub const CM_DEFLATE: u8 = 8;
pub const OS_UNKNOWN: u8 = 0xff;

/// FLG bits from RFC 1952 section 2.3.1
pub const FHCRC: u8 = 0x02;
pub const FEXTRA: u8 = 0x04;
pub const FNAME: u8 = 0x08;
pub const FCOMMENT: u8 = 0x10;
/// Bits 5-7 are reserved and must be zero
pub const FLG_RESERVED: u8 = 0xe0;

/// Fixed part of a member header: magic, CM, FLG, MTIME, XFL, OS
pub const BASE_HEADER_LEN: usize = 10;
/// CRC32 + ISIZE
pub const TRAILER_LEN: usize = 8;

/// Optional header metadata carried in every emitted member.
#[derive(Clone, Debug, Default)]
pub struct MemberHeader {
    /// Original filename (basename only) for the FNAME field
    pub filename: Option<String>,
    /// File modification time as a Unix timestamp, 0 if unknown
    pub mtime: u32,
}

/// Append a gzip member header for `header` to `out`.
pub fn write_member_header(out: &mut Vec<u8>, header: &MemberHeader) {
    let mut flags: u8 = 0;
    if header.filename.is_some() {
        flags |= FNAME;
    }

    out.extend_from_slice(&MAGIC);
    out.push(CM_DEFLATE);
    out.push(flags);
    out.extend_from_slice(&header.mtime.to_le_bytes());
    out.push(0x00); // XFL
    out.push(OS_UNKNOWN);

    if let Some(ref name) = header.filename {
        out.extend_from_slice(name.as_bytes());
        out.push(0); // null terminator
    }
}

/// Append a gzip member trailer: CRC32 then ISIZE, both little-endian.
pub fn write_member_trailer(out: &mut Vec<u8>, crc32: u32, uncompressed_len: u64) {
    out.extend_from_slice(&crc32.to_le_bytes());
    out.extend_from_slice(&((uncompressed_len as u32).to_le_bytes()));
}

/// Outcome of attempting to parse a member header from a byte window.
#[derive(Debug, PartialEq, Eq)]
pub enum HeaderParse {
    /// A complete header occupies the first `len` bytes of the window.
    Done { len: usize },
    /// The window ends before the header does; refill and retry.
    NeedMore,
}

/// Parse a gzip member header at the start of `buf`.
///
/// `offset` is the absolute stream offset of `buf[0]`, used only for error
/// reporting. Returns `NeedMore` when the window is too short to decide,
/// which the caller resolves by reading more input (or reporting premature
/// end when there is none).
pub fn parse_member_header(buf: &[u8], offset: u64) -> ParzResult<HeaderParse> {
    // Reject bad magic as soon as the first bytes disagree, even before a
    // full fixed header is available.
    if !buf.is_empty() && buf[0] != MAGIC[0] {
        return Err(ParzError::format(offset, "not a gzip member (bad magic)"));
    }
    if buf.len() >= 2 && buf[1] != MAGIC[1] {
        return Err(ParzError::format(offset, "not a gzip member (bad magic)"));
    }
    if buf.len() < BASE_HEADER_LEN {
        return Ok(HeaderParse::NeedMore);
    }

    if buf[2] != CM_DEFLATE {
        return Err(ParzError::format(
            offset + 2,
            format!("unsupported compression method {}", buf[2]),
        ));
    }
    let flg = buf[3];
    if flg & FLG_RESERVED != 0 {
        return Err(ParzError::format(
            offset + 3,
            format!("reserved header flag bits set (FLG={:#04x})", flg),
        ));
    }

    let mut pos = BASE_HEADER_LEN;

    if flg & FEXTRA != 0 {
        if buf.len() < pos + 2 {
            return Ok(HeaderParse::NeedMore);
        }
        let xlen = u16::from_le_bytes([buf[pos], buf[pos + 1]]) as usize;
        pos += 2;
        if buf.len() < pos + xlen {
            return Ok(HeaderParse::NeedMore);
        }
        pos += xlen;
    }

    if flg & FNAME != 0 {
        match buf[pos..].iter().position(|&b| b == 0) {
            Some(nul) => pos += nul + 1,
            None => return Ok(HeaderParse::NeedMore),
        }
    }

    if flg & FCOMMENT != 0 {
        match buf[pos..].iter().position(|&b| b == 0) {
            Some(nul) => pos += nul + 1,
            None => return Ok(HeaderParse::NeedMore),
        }
    }

    if flg & FHCRC != 0 {
        if buf.len() < pos + 2 {
            return Ok(HeaderParse::NeedMore);
        }
        let stored = u16::from_le_bytes([buf[pos], buf[pos + 1]]);
        let computed = (crc32fast::hash(&buf[..pos]) & 0xffff) as u16;
        if stored != computed {
            return Err(ParzError::format(
                offset + pos as u64,
                format!(
                    "header CRC mismatch (stored {:#06x}, computed {:#06x})",
                    stored, computed
                ),
            ));
        }
        pos += 2;
    }

    Ok(HeaderParse::Done { len: pos })
}

/// Read the CRC32 and ISIZE fields from a trailer window.
/// The caller guarantees `buf.len() >= TRAILER_LEN`.
pub fn read_member_trailer(buf: &[u8]) -> (u32, u32) {
    let crc32 = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let isize = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    (crc32, isize)
}
