//! Side table built during whole-file ingestion: one title, start offset,
//! and optional content checksum per record, bounded by a trailing sentinel
//! offset equal to the decoded buffer length.

use std::io;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::seqbuf::DnaLength;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SequenceIndexDb {
    pub names: Vec<String>,
    /// Start offsets into the decoded buffer, one per record, plus the
    /// sentinel appended by `finalize`. Strictly increasing.
    pub seq_start_pos: Vec<DnaLength>,
    /// Hex digests, one per record, present only when checksumming was
    /// enabled during ingestion.
    pub md5: Vec<String>,
    #[serde(skip)]
    name_to_index: FxHashMap<String, usize>,
}

impl SequenceIndexDb {
    pub fn new() -> Self {
        SequenceIndexDb::default()
    }

    pub fn num_records(&self) -> usize {
        self.names.len()
    }

    pub fn add_record(&mut self, name: String, start: DnaLength) {
        debug_assert!(
            self.seq_start_pos.last().is_none_or(|&prev| prev < start),
            "record offsets must be strictly increasing"
        );
        self.names.push(name);
        self.seq_start_pos.push(start);
    }

    pub fn add_checksum(&mut self, digest: String) {
        self.md5.push(digest);
    }

    /// Append the sentinel offset bounding the final record and build the
    /// title lookup table. Call once, after the last record.
    pub fn finalize(&mut self, total_length: DnaLength) {
        self.seq_start_pos.push(total_length);
        self.build_lookup();
    }

    fn build_lookup(&mut self) {
        self.name_to_index = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Decoded-buffer range `[start, next_start)` covered by record `i`,
    /// including the separator byte that closes it. Requires `finalize`.
    pub fn record_bounds(&self, i: usize) -> (DnaLength, DnaLength) {
        (self.seq_start_pos[i], self.seq_start_pos[i + 1])
    }

    /// Number of sequence bytes in record `i`, excluding the trailing
    /// separator.
    pub fn record_length(&self, i: usize) -> DnaLength {
        let (start, end) = self.record_bounds(i);
        end - start - 1
    }

    pub fn checksum(&self, i: usize) -> Option<&str> {
        self.md5.get(i).map(String::as_str)
    }

    pub fn save<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        bincode::serde::encode_into_std_write(self, writer, bincode::config::standard()).map_err(
            |e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Failed to serialize sequence index: {e:?}"),
                )
            },
        )?;
        Ok(())
    }

    pub fn load<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        let mut db: SequenceIndexDb =
            bincode::serde::decode_from_std_read(reader, bincode::config::standard()).map_err(
                |e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Failed to deserialize sequence index: {e:?}"),
                    )
                },
            )?;
        db.build_lookup();
        Ok(db)
    }
}
