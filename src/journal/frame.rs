//! Record framing (magic + length + crc32c).

use std::io::Read;

use crc32c::crc32c;

use super::JournalError;

pub(crate) const FRAME_MAGIC: u32 = 0x5342_5231; // "SBR1"
pub(crate) const FRAME_HEADER_LEN: usize = 12;

/// Hard cap on one encoded record. Keeps a corrupt length field from
/// swallowing the rest of the ring during a scan.
pub(crate) const MAX_RECORD_BYTES: usize = 1 << 20;

/// Why a scan stopped believing the bytes in front of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FrameCorruption {
    BadMagic { offset: u64, got: u32 },
    LengthInvalid { offset: u64, length: u32 },
    Truncated { offset: u64 },
    CrcMismatch { offset: u64, expected: u32, got: u32 },
}

/// One step of a tail scan.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ScanItem {
    /// A well-formed frame; the payload is one encoded record.
    Frame(Vec<u8>),
    /// Zeroed space: the clean end of the log.
    CleanTail,
    /// Bytes that are neither a frame nor zeroes.
    Corrupt(FrameCorruption),
}

pub(crate) fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, JournalError> {
    if payload.len() > MAX_RECORD_BYTES {
        return Err(JournalError::RecordTooLarge {
            max_bytes: MAX_RECORD_BYTES,
            got_bytes: payload.len(),
        });
    }

    let length = payload.len() as u32;
    let crc = crc32c(payload);

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Reads frames off a byte stream until the clean tail or corruption.
///
/// `remaining` bounds the scan to the record region so a frame length can
/// never claim bytes past the end of the ring.
pub(crate) struct FrameReader<R> {
    reader: R,
    offset: u64,
    remaining: u64,
}

impl<R: Read> FrameReader<R> {
    pub(crate) fn new(reader: R, start_offset: u64, region_len: u64) -> Self {
        FrameReader {
            reader,
            offset: start_offset,
            remaining: region_len,
        }
    }

    /// Offset of the next unread byte.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn read_next(&mut self) -> Result<ScanItem, std::io::Error> {
        if self.remaining < FRAME_HEADER_LEN as u64 {
            return Ok(ScanItem::CleanTail);
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        self.reader.read_exact(&mut header)?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic == 0 {
            return Ok(ScanItem::CleanTail);
        }
        if magic != FRAME_MAGIC {
            return Ok(ScanItem::Corrupt(FrameCorruption::BadMagic {
                offset: self.offset,
                got: magic,
            }));
        }

        let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let body_fits = (length as u64) <= self.remaining - FRAME_HEADER_LEN as u64;
        if length == 0 || length as usize > MAX_RECORD_BYTES || !body_fits {
            return Ok(ScanItem::Corrupt(FrameCorruption::LengthInvalid {
                offset: self.offset,
                length,
            }));
        }

        let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let mut body = vec![0u8; length as usize];
        if let Err(err) = self.reader.read_exact(&mut body) {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(ScanItem::Corrupt(FrameCorruption::Truncated {
                    offset: self.offset,
                }));
            }
            return Err(err);
        }

        let actual_crc = crc32c(&body);
        if actual_crc != expected_crc {
            return Ok(ScanItem::Corrupt(FrameCorruption::CrcMismatch {
                offset: self.offset,
                expected: expected_crc,
                got: actual_crc,
            }));
        }

        let consumed = FRAME_HEADER_LEN as u64 + length as u64;
        self.offset += consumed;
        self.remaining -= consumed;
        Ok(ScanItem::Frame(body))
    }
}
