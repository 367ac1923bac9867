//! Memory-mapped FASTA ingestion.
//!
//! The reader maps the whole input read-only and decodes records straight
//! off the mapping: whitespace is dropped and every retained byte passes
//! through a 256-entry translation table. Records can be streamed one at a
//! time, skipped without decoding, or concatenated in a single pass into one
//! padded buffer with an `N` separator at every record boundary while a
//! [`SequenceIndexDb`] collects titles, start offsets, and checksums.
//!
//! A reader only exists in the mapped state: `open` either returns a fully
//! mapped reader or an error, and dropping it unmaps on every exit path.
//! End of input is an ordinary `Ok(None)`/`false`, never an error.

use std::fmt;
use std::fs::File;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

use log::debug;
use md5::{Digest, Md5};
use memmap2::Mmap;

use crate::nucconv::{ConvTable, ALL_TO_UPPER, PRESERVE_CASE};
use crate::seqbuf::{DnaLength, FastaSequence, GenomeLength, SeqBuffer};
use crate::seqdb::SequenceIndexDb;

#[derive(Debug)]
pub enum IngestError {
    FileNotFound(PathBuf),
    EmptyFile(PathBuf),
    OpenFailed(PathBuf, IoError),
    MapFailed(PathBuf, IoError),
    /// A record-start delimiter was required and none was found.
    MissingRecordStart {
        offset: GenomeLength,
        delim: u8,
    },
    EmptyTitle {
        offset: GenomeLength,
    },
    /// A decoded sequence or allocation would not fit in 32-bit coordinates.
    SequenceTooLong {
        bytes: GenomeLength,
    },
    /// A record was required where the input had none left.
    UnexpectedEndOfInput,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::FileNotFound(path) => {
                write!(f, "FASTA file {} doesn't exist", path.display())
            }
            IngestError::EmptyFile(path) => write!(f, "FASTA file {} is empty", path.display()),
            IngestError::OpenFailed(path, e) => {
                write!(f, "Could not open FASTA file {}: {}", path.display(), e)
            }
            IngestError::MapFailed(path, e) => write!(
                f,
                "Failed to map FASTA file {} into memory: {}",
                path.display(),
                e
            ),
            IngestError::MissingRecordStart { offset, delim } => write!(
                f,
                "FASTA entry must begin with '{}' (at byte {})",
                *delim as char, offset
            ),
            IngestError::EmptyTitle { offset } => {
                write!(f, "Sequence at byte {} must have a nonempty title", offset)
            }
            IngestError::SequenceTooLong { bytes } => write!(
                f,
                "Sequences stored in more than 4 Gbytes of space ({} bytes) are not supported",
                bytes
            ),
            IngestError::UnexpectedEndOfInput => write!(f, "Could not read a sequence"),
        }
    }
}

impl std::error::Error for IngestError {}

fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r')
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Largest decoded sequence or allocation the 32-bit coordinate space can
/// address.
const MAX_SEQUENCE_BYTES: GenomeLength = DnaLength::MAX as GenomeLength;

fn check_addressable(bytes: GenomeLength) -> Result<(), IngestError> {
    if bytes > MAX_SEQUENCE_BYTES {
        Err(IngestError::SequenceTooLong { bytes })
    } else {
        Ok(())
    }
}

#[derive(Debug)]
pub struct FastaReader {
    path: PathBuf,
    map: Mmap,
    file_size: GenomeLength,
    cur_pos: GenomeLength,
    padding: DnaLength,
    read_start_delim: u8,
    end_of_read_delim: u8,
    conv: ConvTable,
    preserve_title_case: bool,
    compute_checksum: bool,
}

impl FastaReader {
    /// Map `path` read-only. Missing, empty, unopenable, and unmappable
    /// files are distinct errors; there is no partially opened state.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IngestError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(IngestError::FileNotFound(path));
        }
        let file = File::open(&path).map_err(|e| IngestError::OpenFailed(path.clone(), e))?;
        let file_size = file
            .metadata()
            .map_err(|e| IngestError::OpenFailed(path.clone(), e))?
            .len();
        if file_size == 0 {
            return Err(IngestError::EmptyFile(path));
        }
        let map =
            unsafe { Mmap::map(&file) }.map_err(|e| IngestError::MapFailed(path.clone(), e))?;
        debug!("mapped {} ({} bytes)", path.display(), file_size);
        Ok(FastaReader {
            path,
            map,
            file_size,
            cur_pos: 0,
            padding: 0,
            read_start_delim: b'>',
            end_of_read_delim: b'>',
            conv: PRESERVE_CASE,
            preserve_title_case: true,
            compute_checksum: false,
        })
    }

    /// Unmap and release the file. Dropping the reader does the same; this
    /// exists for call sites that want the hand-off to be explicit.
    pub fn close(self) {}

    pub fn file_size(&self) -> GenomeLength {
        self.file_size
    }

    /// Bytes reserved (zero-filled) after each decoded sequence so
    /// downstream code can grow it in place.
    pub fn set_space_padding(&mut self, padding: DnaLength) {
        self.padding = padding;
    }

    /// Fold decoded sequence characters to uppercase.
    pub fn set_to_upper(&mut self) {
        self.conv = ALL_TO_UPPER;
    }

    /// Install a caller-supplied translation table.
    pub fn set_conversion(&mut self, table: ConvTable) {
        self.conv = table;
    }

    /// Change the record delimiters; `>` plays both roles by default.
    pub fn set_record_delimiters(&mut self, start: u8, end: u8) {
        self.read_start_delim = start;
        self.end_of_read_delim = end;
    }

    /// When disabled, titles run through the same translation table as the
    /// sequence body. On by default.
    pub fn set_preserve_title_case(&mut self, preserve: bool) {
        self.preserve_title_case = preserve;
    }

    pub fn set_compute_checksum(&mut self, compute: bool) {
        self.compute_checksum = compute;
    }

    fn advance_to_title_start(&self, mut p: GenomeLength) -> GenomeLength {
        while p < self.file_size && self.map[p as usize] != self.read_start_delim {
            p += 1;
        }
        p
    }

    fn check_valid_title_start(&self, p: GenomeLength) -> Result<(), IngestError> {
        if p >= self.file_size || self.map[p as usize] != self.read_start_delim {
            return Err(IngestError::MissingRecordStart {
                offset: p,
                delim: self.read_start_delim,
            });
        }
        Ok(())
    }

    fn decode_title(&self, raw: &[u8]) -> String {
        if self.preserve_title_case {
            String::from_utf8_lossy(raw).into_owned()
        } else {
            let converted: Vec<u8> = raw.iter().map(|&b| self.conv[b as usize]).collect();
            String::from_utf8_lossy(&converted).into_owned()
        }
    }

    /// Parse the title line whose delimiter sits at `p`. Returns the title
    /// (text to the newline, exclusive; may be empty) and the position of
    /// the terminating newline or EOF.
    fn read_title(&self, p: GenomeLength) -> (String, GenomeLength) {
        let start = p + 1;
        let mut p = start;
        while p < self.file_size && self.map[p as usize] != b'\n' {
            p += 1;
        }
        let title = self.decode_title(&self.map[start as usize..p as usize]);
        (title, p)
    }

    /// Decode the next record, or `Ok(None)` once the cursor is at the end
    /// of the input. On success the cursor rests on the following record
    /// boundary (or EOF).
    pub fn get_next(&mut self) -> Result<Option<FastaSequence>, IngestError> {
        if self.cur_pos == self.file_size {
            return Ok(None);
        }

        let p = self.advance_to_title_start(self.cur_pos);
        self.check_valid_title_start(p)?;
        let (title, body_start) = self.read_title(p);

        // Count the decoded length before allocating.
        let mut seq_length: GenomeLength = 0;
        let mut p = body_start;
        while p < self.file_size {
            let c = self.map[p as usize];
            if c == self.end_of_read_delim {
                break;
            }
            if !is_space(c) {
                seq_length += 1;
            }
            p += 1;
        }
        check_addressable(seq_length)?;

        let mut record = FastaSequence {
            title,
            seq: SeqBuffer::default(),
            checksum: None,
        };
        if seq_length > 0 {
            let mut data = vec![0u8; (seq_length + self.padding as GenomeLength) as usize];
            let mut s = 0usize;
            let mut q = body_start;
            while q < self.file_size {
                let c = self.map[q as usize];
                if c == self.end_of_read_delim {
                    break;
                }
                if !is_space(c) {
                    data[s] = self.conv[c as usize];
                    s += 1;
                }
                q += 1;
            }
            data.truncate(seq_length as usize);
            record.seq = SeqBuffer::from_vec(data);
        }
        self.cur_pos = p;

        if self.compute_checksum {
            record.checksum = Some(md5_hex(record.bytes()));
        }
        Ok(Some(record))
    }

    /// `get_next` for call sites where a missing record is a hard error
    /// rather than expected end of input.
    pub fn critical_get_next(&mut self) -> Result<FastaSequence, IngestError> {
        self.get_next()?.ok_or(IngestError::UnexpectedEndOfInput)
    }

    /// Skip `n_seq` whole records without decoding them. Returns true iff
    /// exactly `n_seq` records were available, leaving the cursor on the
    /// following record delimiter; skipping zero always succeeds.
    pub fn advance(&mut self, n_seq: usize) -> bool {
        if n_seq == 0 {
            return true;
        }

        let mut p = self.cur_pos;
        // The skip has to start at the beginning of a record.
        while p < self.file_size && self.map[p as usize] != self.end_of_read_delim {
            p += 1;
        }
        if p >= self.file_size {
            return false;
        }

        p += 1;
        let mut n_advanced = 1;
        while n_advanced <= n_seq && p < self.file_size {
            if self.map[p as usize] == self.end_of_read_delim {
                if n_advanced == n_seq {
                    // Land on the delimiter so the next read starts here.
                    self.cur_pos = p;
                    return true;
                }
                n_advanced += 1;
            }
            p += 1;
        }
        self.cur_pos = p;
        false
    }

    /// Read one record and append it to `cur` behind a single `N`
    /// separator. `Ok(false)` at end of input.
    pub fn concatenate_next(&mut self, cur: &mut FastaSequence) -> Result<bool, IngestError> {
        match self.get_next()? {
            Some(next) => {
                cur.concatenate(b"N");
                cur.concatenate(next.bytes());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decode every remaining record into one contiguous buffer.
    ///
    /// Each record marker, the first included, becomes a single `N` in the
    /// decoded output, and a final `N` follows the last record so the layout
    /// is the same regardless of record order. When `index` is given, every
    /// title is appended with the start offset of its decoded run (just past
    /// its `N`), per-record checksums are computed as records complete, and
    /// the index is finalized with the sentinel offset. The allocation is
    /// `remaining + padding + 1` bytes with the tail beyond the decoded
    /// content zero-filled.
    pub fn read_all_into_one(
        &mut self,
        mut index: Option<&mut SequenceIndexDb>,
    ) -> Result<FastaSequence, IngestError> {
        let start = self.advance_to_title_start(self.cur_pos);
        self.check_valid_title_start(start)?;

        let region = &self.map[start as usize..self.file_size as usize];
        let memory_size = region.len() as GenomeLength + self.padding as GenomeLength + 1;
        check_addressable(memory_size)?;

        let mut data = vec![0u8; memory_size as usize];
        let mut i = 0usize; // write cursor in the decoded buffer
        let mut p = 0usize; // read cursor in the raw region
        let mut combined_title: Option<String> = None;
        // Decoded start of the record currently being filled, for closing
        // its checksum at the next boundary.
        let mut open_record_start: Option<usize> = None;
        let mut n_records = 0usize;

        while p < region.len() {
            while p < region.len() && is_space(region[p]) {
                p += 1;
            }
            if p >= region.len() {
                break;
            }
            if region[p] == self.read_start_delim {
                // One separator byte stands in for the whole marker line.
                data[i] = b'N';
                i += 1;
                let title_start = p + 1;
                while p < region.len() && region[p] != b'\n' {
                    p += 1;
                }
                if p < region.len() {
                    let title = self.decode_title(&region[title_start..p]);
                    if title.is_empty() {
                        return Err(IngestError::EmptyTitle {
                            offset: start + title_start as GenomeLength,
                        });
                    }
                    if combined_title.is_none() {
                        combined_title = Some(title.clone());
                    }
                    n_records += 1;
                    if let Some(db) = index.as_deref_mut() {
                        if self.compute_checksum {
                            if let Some(prev) = open_record_start {
                                // Close the previous record, excluding the
                                // separator that ended it.
                                db.add_checksum(md5_hex(&data[prev..i - 1]));
                            }
                        }
                        db.add_record(title, i as DnaLength);
                    }
                    open_record_start = Some(i);
                }
            } else {
                data[i] = self.conv[region[p] as usize];
                i += 1;
                p += 1;
            }
        }

        // Trailing separator after the last record, for consistency between
        // different orderings of the input.
        data[i] = b'N';
        i += 1;
        let length = i as DnaLength;

        if let Some(db) = index.as_deref_mut() {
            if self.compute_checksum {
                if let Some(prev) = open_record_start {
                    db.add_checksum(md5_hex(&data[prev..i - 1]));
                }
            }
            db.finalize(length);
        }

        data.truncate(length as usize);
        self.cur_pos = self.file_size;
        debug!(
            "ingested {} records ({} decoded bytes) from {}",
            n_records,
            length,
            self.path.display()
        );

        Ok(FastaSequence {
            title: combined_title.unwrap_or_default(),
            seq: SeqBuffer::from_vec(data),
            checksum: None,
        })
    }

    /// Two-pass convenience: count record delimiters to presize storage,
    /// then drain `get_next`.
    pub fn read_all_sequences(&mut self) -> Result<Vec<FastaSequence>, IngestError> {
        let n_seq = self.map[..self.file_size as usize]
            .iter()
            .filter(|&&c| c == self.read_start_delim)
            .count();
        let mut sequences = Vec::with_capacity(n_seq);
        while let Some(seq) = self.get_next()? {
            sequences.push(seq);
        }
        Ok(sequences)
    }
}
