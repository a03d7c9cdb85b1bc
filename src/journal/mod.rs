//! The redo log: an append-ordered record of every mutation, kept on a
//! fixed-size preallocated file.
//!
//! Layout: one header block (geometry + checksum) followed by the record
//! region, zero-filled at creation. Records are crc32c-framed encoded ops,
//! packed back to back; the tail is wherever the scan meets zeroes. Nothing
//! ever rewinds the log, so exhaustion surfaces as a failed append rather
//! than an overwrite.
//!
//! Recovery scans the whole record region before the switch accepts work: a
//! well-framed record that fails to decode is dropped with a log line and
//! the scan continues; a torn or corrupt frame ends the log there and the
//! remainder is re-zeroed.

mod frame;

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32c::crc32c;
use thiserror::Error;

use crate::config::{JournalConfig, MIN_JOURNAL_BYTES};
use crate::core::Op;
use self::frame::{FrameReader, ScanItem};

const JOURNAL_MAGIC: u32 = 0x5342_4a31; // "SBJ1"
const JOURNAL_VERSION: u16 = 1;
const HEADER_BLOCK_LEN: u64 = 64;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal full: record needs {needed} bytes, {available} available")]
    Full { needed: u64, available: u64 },

    #[error("record too large: {got_bytes} bytes (max {max_bytes})")]
    RecordTooLarge { max_bytes: usize, got_bytes: usize },

    #[error("invalid journal header at {path:?}: {reason}")]
    HeaderInvalid { path: PathBuf, reason: String },

    #[error("journal capacity {got} below minimum {min}")]
    CapacityTooSmall { got: u64, min: u64 },
}

/// What recovery found in the record region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// Records decoded and handed to the reducer.
    pub records_replayed: usize,
    /// Well-framed records whose payload failed to decode; dropped.
    pub records_dropped: usize,
    /// True when the scan hit a torn or corrupt frame and cut the log there.
    pub tail_truncated: bool,
    /// Bytes of the record region in use after recovery.
    pub bytes_used: u64,
}

/// Append side of the redo log.
pub struct Journal {
    file: File,
    path: PathBuf,
    capacity: u64,
    tail: u64,
    fsync: bool,
}

impl Journal {
    /// Open (or create) the journal and replay its records.
    ///
    /// Returns the decoded ops in append order; the caller feeds them to the
    /// reducer before accepting new appends.
    pub fn open(config: &JournalConfig) -> Result<(Journal, Vec<Op>, JournalStats), JournalError> {
        if config.capacity_bytes < MIN_JOURNAL_BYTES {
            return Err(JournalError::CapacityTooSmall {
                got: config.capacity_bytes,
                min: MIN_JOURNAL_BYTES,
            });
        }

        if config.path.exists() {
            Self::open_existing(config)
        } else {
            let journal = Self::create(config)?;
            Ok((journal, Vec::new(), JournalStats::default()))
        }
    }

    fn create(config: &JournalConfig) -> Result<Journal, JournalError> {
        let path = config.path.clone();
        let io_err = |source| JournalError::Io {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_err)?;
        file.set_len(config.capacity_bytes).map_err(io_err)?;

        let header = encode_header(config.capacity_bytes);
        write_at(&file, 0, &header).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        Ok(Journal {
            file,
            path,
            capacity: config.capacity_bytes,
            tail: HEADER_BLOCK_LEN,
            fsync: config.fsync,
        })
    }

    fn open_existing(
        config: &JournalConfig,
    ) -> Result<(Journal, Vec<Op>, JournalStats), JournalError> {
        let path = config.path.clone();
        let io_err = |source| JournalError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        let file_len = file.metadata().map_err(io_err)?.len();
        let mut header = [0u8; HEADER_BLOCK_LEN as usize];
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.read_exact(&mut header).map_err(io_err)?;
        let capacity = decode_header(&header, &path)?;
        if capacity != file_len {
            return Err(JournalError::HeaderInvalid {
                path: path.clone(),
                reason: format!("header capacity {capacity} != file length {file_len}"),
            });
        }
        if capacity != config.capacity_bytes {
            tracing::warn!(
                configured = config.capacity_bytes,
                on_disk = capacity,
                "journal capacity differs from configuration; keeping on-disk geometry"
            );
        }

        let mut ops = Vec::new();
        let mut stats = JournalStats::default();

        file.seek(SeekFrom::Start(HEADER_BLOCK_LEN)).map_err(io_err)?;
        let tail = {
            let mut reader = FrameReader::new(
                BufReader::new(&mut file),
                HEADER_BLOCK_LEN,
                capacity - HEADER_BLOCK_LEN,
            );
            loop {
                match reader.read_next().map_err(io_err)? {
                    ScanItem::Frame(payload) => match Op::decode(&payload) {
                        Ok(op) => {
                            stats.records_replayed += 1;
                            ops.push(op);
                        }
                        Err(err) => {
                            stats.records_dropped += 1;
                            tracing::warn!(offset = reader.offset(), %err, "dropping undecodable journal record");
                        }
                    },
                    ScanItem::CleanTail => break reader.offset(),
                    ScanItem::Corrupt(corruption) => {
                        stats.tail_truncated = true;
                        tracing::warn!(
                            ?corruption,
                            "journal tail corrupt; truncating log at offset {}",
                            reader.offset()
                        );
                        break reader.offset();
                    }
                }
            }
        };

        let mut journal = Journal {
            file,
            path,
            capacity,
            tail,
            fsync: config.fsync,
        };
        if stats.tail_truncated {
            journal.zero_from(tail)?;
        }
        stats.bytes_used = tail - HEADER_BLOCK_LEN;

        Ok((journal, ops, stats))
    }

    /// Append one record. On success the record is durable (per the fsync
    /// policy) before this returns; on failure nothing was made visible and
    /// the caller must not apply the op.
    pub fn append(&mut self, op: &Op) -> Result<(), JournalError> {
        let frame = frame::encode_frame(&op.encode())?;
        let needed = frame.len() as u64;
        let available = self.capacity - self.tail;
        if needed > available {
            return Err(JournalError::Full { needed, available });
        }

        write_at(&self.file, self.tail, &frame).map_err(|source| self.io_err(source))?;
        if self.fsync {
            self.file
                .sync_data()
                .map_err(|source| self.io_err(source))?;
        }
        self.tail += needed;
        Ok(())
    }

    /// Flush outstanding writes regardless of the fsync policy.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.file.sync_data().map_err(|source| self.io_err(source))
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn bytes_used(&self) -> u64 {
        self.tail - HEADER_BLOCK_LEN
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn zero_from(&mut self, offset: u64) -> Result<(), JournalError> {
        let zeroes = vec![0u8; 64 * 1024];
        let mut at = offset;
        while at < self.capacity {
            let chunk = ((self.capacity - at) as usize).min(zeroes.len());
            write_at(&self.file, at, &zeroes[..chunk]).map_err(|source| self.io_err(source))?;
            at += chunk as u64;
        }
        self.file.sync_data().map_err(|source| self.io_err(source))
    }

    fn io_err(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn write_at(mut file: &File, offset: u64, bytes: &[u8]) -> Result<(), std::io::Error> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

fn encode_header(capacity: u64) -> [u8; HEADER_BLOCK_LEN as usize] {
    let mut header = [0u8; HEADER_BLOCK_LEN as usize];
    header[0..4].copy_from_slice(&JOURNAL_MAGIC.to_le_bytes());
    header[4..6].copy_from_slice(&JOURNAL_VERSION.to_le_bytes());
    // bytes 6..8 reserved
    header[8..16].copy_from_slice(&capacity.to_le_bytes());
    let crc = crc32c(&header[0..16]);
    header[16..20].copy_from_slice(&crc.to_le_bytes());
    header
}

fn decode_header(header: &[u8; HEADER_BLOCK_LEN as usize], path: &Path) -> Result<u64, JournalError> {
    let invalid = |reason: String| JournalError::HeaderInvalid {
        path: path.to_path_buf(),
        reason,
    };

    let magic = u32::from_le_bytes(header[0..4].try_into().expect("header slice"));
    if magic != JOURNAL_MAGIC {
        return Err(invalid(format!("bad magic {magic:#010x}")));
    }
    let version = u16::from_le_bytes(header[4..6].try_into().expect("header slice"));
    if version != JOURNAL_VERSION {
        return Err(invalid(format!("unsupported version {version}")));
    }
    let expected_crc = u32::from_le_bytes(header[16..20].try_into().expect("header slice"));
    let actual_crc = crc32c(&header[0..16]);
    if expected_crc != actual_crc {
        return Err(invalid(format!(
            "header crc mismatch (expected {expected_crc:#010x}, got {actual_crc:#010x})"
        )));
    }
    Ok(u64::from_le_bytes(header[8..16].try_into().expect("header slice")))
}
