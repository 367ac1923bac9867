//! Owned and borrowed sequence byte storage.
//!
//! Aligned sub-sequences are frequently views into a much larger decoded
//! buffer (a whole concatenated genome), so storage is a tagged variant:
//! either a plain owned vector or a sub-range of a shared buffer. Releasing
//! a view drops the handle and never touches the backing allocation, which
//! makes `free` safe and idempotent no matter which variant is held.

use std::sync::Arc;

/// Position or length inside a decoded sequence. The ingestion path rejects
/// anything that would not fit, so 32 bits always suffice.
pub type DnaLength = u32;

/// Byte offset or size in a raw (undecoded) input file.
pub type GenomeLength = u64;

/// Sequence bytes, owned outright or borrowed from a longer-lived buffer.
#[derive(Debug, Clone)]
pub enum SeqBuffer {
    Owned(Vec<u8>),
    View {
        source: Arc<Vec<u8>>,
        offset: usize,
        len: usize,
    },
}

impl Default for SeqBuffer {
    fn default() -> Self {
        SeqBuffer::Owned(Vec::new())
    }
}

impl PartialEq for SeqBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl SeqBuffer {
    pub fn from_vec(data: Vec<u8>) -> Self {
        SeqBuffer::Owned(data)
    }

    pub fn len(&self) -> usize {
        match self {
            SeqBuffer::Owned(data) => data.len(),
            SeqBuffer::View { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_view(&self) -> bool {
        matches!(self, SeqBuffer::View { .. })
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            SeqBuffer::Owned(data) => data,
            SeqBuffer::View {
                source,
                offset,
                len,
            } => &source[*offset..*offset + *len],
        }
    }

    /// Release the contents. Owned storage is dropped; for a view only the
    /// handle goes away, the backing allocation is untouched.
    pub fn free(&mut self) {
        *self = SeqBuffer::default();
    }

    /// Convert owned storage into shared storage so sub-ranges can be
    /// referenced without copying. The buffer itself becomes a view covering
    /// its full former contents; an existing view just hands out its source.
    pub fn share(&mut self) -> Arc<Vec<u8>> {
        match self {
            SeqBuffer::Owned(data) => {
                let source = Arc::new(std::mem::take(data));
                let len = source.len();
                *self = SeqBuffer::View {
                    source: Arc::clone(&source),
                    offset: 0,
                    len,
                };
                source
            }
            SeqBuffer::View { source, .. } => Arc::clone(source),
        }
    }

    /// A view of `len` bytes of `source` starting at `offset`.
    pub fn substring_of(source: &Arc<Vec<u8>>, offset: usize, len: usize) -> Self {
        assert!(
            offset + len <= source.len(),
            "substring [{}, {}) out of range for buffer of {} bytes",
            offset,
            offset + len,
            source.len()
        );
        SeqBuffer::View {
            source: Arc::clone(source),
            offset,
            len,
        }
    }

    /// Mutable access to owned storage; a view is materialized (copied out)
    /// first.
    pub fn make_owned(&mut self) -> &mut Vec<u8> {
        if let SeqBuffer::View { .. } = self {
            let copied = self.bytes().to_vec();
            *self = SeqBuffer::Owned(copied);
        }
        match self {
            SeqBuffer::Owned(data) => data,
            SeqBuffer::View { .. } => unreachable!(),
        }
    }
}

/// One titled sequence record: decoded bytes plus an optional content
/// checksum filled in by the reader when checksumming is enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FastaSequence {
    pub title: String,
    pub seq: SeqBuffer,
    pub checksum: Option<String>,
}

impl FastaSequence {
    pub fn new(title: impl Into<String>, seq: Vec<u8>) -> Self {
        FastaSequence {
            title: title.into(),
            seq: SeqBuffer::from_vec(seq),
            checksum: None,
        }
    }

    pub fn len(&self) -> DnaLength {
        self.seq.len() as DnaLength
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        self.seq.bytes()
    }

    pub fn free(&mut self) {
        self.seq.free();
        self.checksum = None;
    }

    /// Rebind this record's bytes to a sub-range of `other`'s storage
    /// without copying. `other`'s storage is shared in place if it was not
    /// already.
    pub fn reference_substring(
        &mut self,
        other: &mut FastaSequence,
        pos: DnaLength,
        length: DnaLength,
    ) {
        let source = other.seq.share();
        self.seq = SeqBuffer::substring_of(&source, pos as usize, length as usize);
    }

    /// Append raw bytes, materializing owned storage if this record was a
    /// view.
    pub fn concatenate(&mut self, other: &[u8]) {
        self.seq.make_owned().extend_from_slice(other);
        self.checksum = None;
    }
}
