//! The mutable alignment record: aligned sub-sequences, coordinate frames,
//! per-base quality channels, and block-level merge of adjacent alignments.
//!
//! Coordinates compose in three layers. `*_aligned_seq_pos` places the
//! aligned sub-sequence inside the original source sequence, `q_pos`/`t_pos`
//! place the alignment inside the sub-sequence, and block coordinates are
//! local to the alignment. Absolute position on an axis is always
//! `aligned_seq_pos + pos [+ block offset]`, and every mutation, merges
//! included, must keep that composition valid.

use std::cmp::Ordering;
use std::fmt;

use crate::block::{Block, Gap, GapList, Strand};
use crate::seqbuf::{DnaLength, FastaSequence, SeqBuffer};

/// Names of the six optional QV/tag channels, in wire order. Downstream
/// consumers match these positionally or by literal name, so both the order
/// and the spelling are part of the external contract.
pub const OPTIONAL_QV_NAMES: [&str; 6] = [
    "InsertionQV",
    "DeletionQV",
    "SubstitutionQV",
    "MergeQV",
    "SubstitutionTag",
    "DeletionTag",
];

/// A merge was attempted with a `next` candidate that does not start at or
/// after the receiver's end on the named axis, in original-sequence
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeError {
    QueryOutOfOrder {
        this_end: DnaLength,
        next_start: DnaLength,
    },
    TargetOutOfOrder {
        this_end: DnaLength,
        next_start: DnaLength,
    },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::QueryOutOfOrder {
                this_end,
                next_start,
            } => write!(
                f,
                "next alignment starts at query position {} before the current end {}",
                next_start, this_end
            ),
            MergeError::TargetOutOfOrder {
                this_end,
                next_start,
            } => write!(
                f,
                "next alignment starts at target position {} before the current end {}",
                next_start, this_end
            ),
        }
    }
}

impl std::error::Error for MergeError {}

/// An alignment of a query sub-sequence against a target sub-sequence,
/// carried from seeding through refinement as a mutable record.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentCandidate {
    pub q_aligned_seq: SeqBuffer,
    pub t_aligned_seq: SeqBuffer,
    pub q_aligned_seq_pos: DnaLength,
    pub t_aligned_seq_pos: DnaLength,
    pub q_aligned_seq_length: DnaLength,
    pub t_aligned_seq_length: DnaLength,
    pub q_pos: DnaLength,
    pub t_pos: DnaLength,
    pub q_strand: Strand,
    pub t_strand: Strand,
    /// Full length of the original query/target sequences, used to mirror
    /// reverse-strand intervals onto the forward strand.
    pub q_length: DnaLength,
    pub t_length: DnaLength,
    pub q_title: String,
    pub t_title: String,
    pub blocks: Vec<Block>,
    pub gaps: Vec<GapList>,
    pub score: i32,
    pub map_qv: i32,
    pub insertion_qv: String,
    pub deletion_qv: String,
    pub substitution_qv: String,
    pub merge_qv: String,
    pub substitution_tag: String,
    pub deletion_tag: String,
    pub cluster_score: f32,
    pub cluster_weight: f32,
    pub pval_variance: f32,
    pub pval_n_std_dev: f32,
    pub weight_variance: f32,
    pub weight_n_std_dev: f32,
    pub num_significant_clusters: i32,
    /// Which target record of a sequence index this alignment is against.
    pub t_index: i32,
    pub read_index: i32,
}

impl Default for AlignmentCandidate {
    fn default() -> Self {
        AlignmentCandidate {
            q_aligned_seq: SeqBuffer::default(),
            t_aligned_seq: SeqBuffer::default(),
            q_aligned_seq_pos: 0,
            t_aligned_seq_pos: 0,
            q_aligned_seq_length: 0,
            t_aligned_seq_length: 0,
            q_pos: 0,
            t_pos: 0,
            q_strand: Strand::Forward,
            t_strand: Strand::Forward,
            q_length: 0,
            t_length: 0,
            q_title: String::new(),
            t_title: String::new(),
            blocks: Vec::new(),
            gaps: Vec::new(),
            score: 0,
            map_qv: 50,
            insertion_qv: String::new(),
            deletion_qv: String::new(),
            substitution_qv: String::new(),
            merge_qv: String::new(),
            substitution_tag: String::new(),
            deletion_tag: String::new(),
            cluster_score: 0.0,
            cluster_weight: 0.0,
            pval_variance: 0.0,
            pval_n_std_dev: 0.0,
            weight_variance: 0.0,
            weight_n_std_dev: 0.0,
            num_significant_clusters: 0,
            t_index: 0,
            read_index: 0,
        }
    }
}

impl AlignmentCandidate {
    /// Query end of the alignment in alignment-local coordinates; 0 when
    /// there are no blocks.
    pub fn q_end(&self) -> DnaLength {
        self.blocks.last().map_or(0, Block::q_end)
    }

    /// Target end of the alignment in alignment-local coordinates.
    pub fn t_end(&self) -> DnaLength {
        self.blocks.last().map_or(0, Block::t_end)
    }

    pub fn genomic_t_begin(&self) -> DnaLength {
        self.t_aligned_seq_pos + self.t_pos
    }

    pub fn genomic_t_end(&self) -> DnaLength {
        self.t_aligned_seq_pos + self.t_pos + self.t_end()
    }

    pub fn t_align_start(&self) -> DnaLength {
        self.t_pos + self.t_aligned_seq_pos
    }

    pub fn q_align_start(&self) -> DnaLength {
        self.q_pos + self.q_aligned_seq_pos
    }

    pub fn q_align_end(&self) -> DnaLength {
        self.q_end() + self.q_pos + self.q_aligned_seq_pos
    }

    // Synonyms used by the merge path.
    pub fn q_bases_to_start(&self) -> DnaLength {
        self.q_pos + self.q_aligned_seq_pos
    }

    pub fn t_bases_to_start(&self) -> DnaLength {
        self.t_pos + self.t_aligned_seq_pos
    }

    /// Query interval covered by the blocks, offset into the original
    /// sequence. With `use_forward_strand`, a reverse-strand interval is
    /// mirrored through `q_length` onto the forward strand. Returns (0, 0)
    /// for an empty block list.
    pub fn q_interval(&self, use_forward_strand: bool) -> (DnaLength, DnaLength) {
        if self.blocks.is_empty() {
            return (0, 0);
        }
        let q_start = self.blocks[0].q_pos + self.q_aligned_seq_pos;
        let q_end = self.q_end() + self.q_aligned_seq_pos;
        if use_forward_strand && self.q_strand == Strand::Reverse {
            (self.q_length - q_end, self.q_length - q_start)
        } else {
            (q_start, q_end)
        }
    }

    pub fn q_interval_on_forward_strand(&self) -> (DnaLength, DnaLength) {
        self.q_interval(true)
    }

    /// Populate the six optional channels from `qvs` (positional, wire
    /// order), keeping `[start, start + length)` of each. An empty source
    /// channel clears the destination instead of slicing out of range.
    pub fn read_optional_qvs(&mut self, qvs: &[String], start: DnaLength, length: DnaLength) {
        slice_channel(&qvs[0], start, length, &mut self.insertion_qv);
        slice_channel(&qvs[1], start, length, &mut self.deletion_qv);
        slice_channel(&qvs[2], start, length, &mut self.substitution_qv);
        slice_channel(&qvs[3], start, length, &mut self.merge_qv);
        slice_channel(&qvs[4], start, length, &mut self.substitution_tag);
        slice_channel(&qvs[5], start, length, &mut self.deletion_tag);
    }

    /// Serialize the six optional channels with their literal names, in wire
    /// order.
    pub fn copy_qvs(&self) -> (Vec<String>, Vec<String>) {
        let qvs = vec![
            self.insertion_qv.clone(),
            self.deletion_qv.clone(),
            self.substitution_qv.clone(),
            self.merge_qv.clone(),
            self.substitution_tag.clone(),
            self.deletion_tag.clone(),
        ];
        let names = OPTIONAL_QV_NAMES.iter().map(|s| (*s).to_string()).collect();
        (qvs, names)
    }

    /// Merge a strictly-downstream alignment of the same query/target pair
    /// into this one, in place.
    ///
    /// `next` must start at or after this alignment's end on both axes in
    /// original-sequence coordinates. The boundary region between the two is
    /// approximated, not re-aligned: one ungapped block advances both axes
    /// by the common portion of the boundary, and whatever one axis has over
    /// the other becomes a single residual gap record. A `t_gap == q_gap`
    /// tie routes everything into the common block.
    pub fn append_alignment(&mut self, next: &AlignmentCandidate) -> Result<(), MergeError> {
        if next.blocks.is_empty() {
            return Ok(());
        }

        let this_t_end = self.t_bases_to_start() + self.t_end();
        let this_q_end = self.q_bases_to_start() + self.q_end();
        if next.t_bases_to_start() < this_t_end {
            return Err(MergeError::TargetOutOfOrder {
                this_end: this_t_end,
                next_start: next.t_bases_to_start(),
            });
        }
        if next.q_bases_to_start() < this_q_end {
            return Err(MergeError::QueryOutOfOrder {
                this_end: this_q_end,
                next_start: next.q_bases_to_start(),
            });
        }

        // Shift between the two candidates' local coordinate origins. Blocks
        // appended from `next` are rebased by this so they keep pointing at
        // the same original-sequence positions.
        let q_offset = next.q_bases_to_start() - self.q_bases_to_start();
        let t_offset = next.t_bases_to_start() - self.t_bases_to_start();
        let orig_q_end = self.q_end();
        let orig_t_end = self.t_end();

        let t_gap = next.t_bases_to_start() - this_t_end;
        let q_gap = next.q_bases_to_start() - this_q_end;

        if !self.gaps.is_empty() && !next.gaps.is_empty() {
            // The >= keeps a t_gap == q_gap tie entirely in the common
            // block, with zero residual on either axis.
            let (common_gap, residual) = if t_gap >= q_gap {
                (q_gap, Gap::target(t_gap - q_gap))
            } else {
                (t_gap, Gap::query(q_gap - t_gap))
            };

            if common_gap > 0 {
                self.blocks.push(Block::new(orig_q_end, orig_t_end, common_gap));
                self.gaps.push(GapList::new());
            }
            if residual.length > 0 {
                if let Some(last) = self.gaps.last_mut() {
                    last.push(residual);
                }
            }
            self.gaps.extend(next.gaps.iter().cloned());
        }

        self.blocks.extend(next.blocks.iter().map(|block| Block {
            q_pos: block.q_pos + q_offset,
            t_pos: block.t_pos + t_offset,
            length: block.length,
        }));
        Ok(())
    }

    /// Rebind the aligned target sub-sequence to a view of `new_seq`'s
    /// storage. Previously owned bytes are dropped; a previous view merely
    /// releases its handle.
    pub fn reassign_t_sequence(&mut self, new_seq: &mut FastaSequence) {
        self.t_aligned_seq.free();
        let source = new_seq.seq.share();
        let len = source.len();
        self.t_aligned_seq = SeqBuffer::substring_of(&source, 0, len);
    }

    /// Rebind the aligned query sub-sequence; same rules as the target side.
    pub fn reassign_q_sequence(&mut self, new_seq: &mut FastaSequence) {
        self.q_aligned_seq.free();
        let source = new_seq.seq.share();
        let len = source.len();
        self.q_aligned_seq = SeqBuffer::substring_of(&source, 0, len);
    }

    /// Release both aligned sub-sequences. Idempotent; a no-op on any
    /// backing buffer a view refers to.
    pub fn free_subsequences(&mut self) {
        self.q_aligned_seq.free();
        self.t_aligned_seq.free();
    }
}

fn slice_channel(src: &str, start: DnaLength, length: DnaLength, dst: &mut String) {
    if src.is_empty() {
        dst.clear();
        return;
    }
    let start = (start as usize).min(src.len());
    let end = (start + length as usize).min(src.len());
    *dst = src[start..end].to_string();
}

/// Order by score (smaller scores rank first), breaking ties by target
/// start position.
pub fn cmp_by_score(lhs: &AlignmentCandidate, rhs: &AlignmentCandidate) -> Ordering {
    lhs.score
        .cmp(&rhs.score)
        .then_with(|| lhs.t_align_start().cmp(&rhs.t_align_start()))
}

/// Order by mapping quality (higher first), breaking ties by target start
/// position.
pub fn cmp_by_map_qv(lhs: &AlignmentCandidate, rhs: &AlignmentCandidate) -> Ordering {
    rhs.map_qv
        .cmp(&lhs.map_qv)
        .then_with(|| lhs.t_align_start().cmp(&rhs.t_align_start()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_with_blocks(
        q_pos: DnaLength,
        t_pos: DnaLength,
        blocks: Vec<Block>,
        with_gap_records: bool,
    ) -> AlignmentCandidate {
        let gaps = if with_gap_records {
            vec![GapList::new(); blocks.len()]
        } else {
            Vec::new()
        };
        AlignmentCandidate {
            q_pos,
            t_pos,
            blocks,
            gaps,
            ..AlignmentCandidate::default()
        }
    }

    #[test]
    fn test_default_is_substring_mode() {
        let cand = AlignmentCandidate::default();
        assert_eq!(cand.map_qv, 50);
        assert_eq!(cand.q_aligned_seq_pos, 0);
        assert_eq!(cand.t_aligned_seq_pos, 0);
        assert!(cand.blocks.is_empty());
        assert_eq!(cand.q_interval(true), (0, 0));
        assert_eq!(cand.genomic_t_begin(), 0);
    }

    #[test]
    fn test_genomic_coordinates_compose() {
        let mut cand = candidate_with_blocks(2, 7, vec![Block::new(0, 0, 5)], false);
        cand.t_aligned_seq_pos = 100;
        cand.q_aligned_seq_pos = 40;

        assert_eq!(cand.genomic_t_begin(), 107);
        assert_eq!(cand.genomic_t_end(), 112);
        assert_eq!(cand.t_align_start(), 107);
        assert_eq!(cand.q_align_start(), 42);
        assert_eq!(cand.q_align_end(), 47);
    }

    #[test]
    fn test_q_interval_mirrors_reverse_strand() {
        let mut cand = candidate_with_blocks(0, 0, vec![Block::new(10, 10, 20)], false);
        cand.q_aligned_seq_pos = 5;
        cand.q_length = 100;

        assert_eq!(cand.q_interval(false), (15, 35));
        // Forward strand: no mirroring even when requested.
        assert_eq!(cand.q_interval(true), (15, 35));

        cand.q_strand = Strand::Reverse;
        assert_eq!(cand.q_interval(true), (65, 85));
        assert_eq!(cand.q_interval_on_forward_strand(), (65, 85));
    }

    #[test]
    fn test_qv_round_trip() {
        let mut cand = AlignmentCandidate {
            insertion_qv: "IIII".to_string(),
            deletion_qv: "DDDD".to_string(),
            substitution_qv: "SSSS".to_string(),
            merge_qv: "MMMM".to_string(),
            substitution_tag: "ACGT".to_string(),
            deletion_tag: String::new(),
            ..AlignmentCandidate::default()
        };
        let (qvs, names) = cand.copy_qvs();
        assert_eq!(
            names,
            vec![
                "InsertionQV",
                "DeletionQV",
                "SubstitutionQV",
                "MergeQV",
                "SubstitutionTag",
                "DeletionTag"
            ]
        );

        let mut other = AlignmentCandidate::default();
        other.read_optional_qvs(&qvs, 0, 4);
        assert_eq!(other.insertion_qv, cand.insertion_qv);
        assert_eq!(other.deletion_qv, cand.deletion_qv);
        assert_eq!(other.substitution_qv, cand.substitution_qv);
        assert_eq!(other.merge_qv, cand.merge_qv);
        assert_eq!(other.substitution_tag, cand.substitution_tag);
        // Empty source channel stays empty rather than slicing out of range.
        assert_eq!(other.deletion_tag, "");
    }

    #[test]
    fn test_read_optional_qvs_slices_window() {
        let qvs = vec![
            "0123456789".to_string(),
            String::new(),
            "ab".to_string(),
            String::new(),
            String::new(),
            String::new(),
        ];
        let mut cand = AlignmentCandidate::default();
        cand.read_optional_qvs(&qvs, 2, 4);
        assert_eq!(cand.insertion_qv, "2345");
        assert_eq!(cand.deletion_qv, "");
        // A short channel clamps instead of panicking.
        assert_eq!(cand.substitution_qv, "");
    }

    #[test]
    fn test_append_rejects_out_of_order_target() {
        let mut first = candidate_with_blocks(0, 10, vec![Block::new(0, 0, 5)], false);
        let next = candidate_with_blocks(20, 3, vec![Block::new(0, 0, 4)], false);
        assert_eq!(
            first.append_alignment(&next),
            Err(MergeError::TargetOutOfOrder {
                this_end: 15,
                next_start: 3
            })
        );
    }

    #[test]
    fn test_append_rejects_out_of_order_query() {
        let mut first = candidate_with_blocks(10, 0, vec![Block::new(0, 0, 5)], false);
        let next = candidate_with_blocks(3, 20, vec![Block::new(0, 0, 4)], false);
        assert_eq!(
            first.append_alignment(&next),
            Err(MergeError::QueryOutOfOrder {
                this_end: 15,
                next_start: 3
            })
        );
    }

    #[test]
    fn test_append_with_empty_next_is_a_no_op() {
        let mut first = candidate_with_blocks(0, 0, vec![Block::new(0, 0, 5)], true);
        let next = AlignmentCandidate::default();
        first.append_alignment(&next).unwrap();
        assert_eq!(first.blocks.len(), 1);
        assert_eq!(first.gaps.len(), 1);
    }

    #[test]
    fn test_append_emits_common_gap_block() {
        // A covers [0, 5) on both axes; B starts 3 bases later on both.
        let mut first = candidate_with_blocks(0, 0, vec![Block::new(0, 0, 5)], true);
        let next = candidate_with_blocks(8, 8, vec![Block::new(0, 0, 4)], true);

        first.append_alignment(&next).unwrap();

        assert_eq!(
            first.blocks,
            vec![
                Block::new(0, 0, 5),
                Block::new(5, 5, 3),
                Block::new(8, 8, 4),
            ]
        );
        // The tie routed the whole boundary into the common block: every gap
        // record is empty.
        assert_eq!(first.gaps.len(), 3);
        assert!(first.gaps.iter().all(GapList::is_empty));
        assert_eq!(first.q_end(), 12);
        assert_eq!(first.t_end(), 12);
    }

    #[test]
    fn test_append_records_target_residual() {
        // Boundary gap of 5 on the target but only 2 on the query: common
        // step of 2, residual of 3 target bases.
        let mut first = candidate_with_blocks(0, 0, vec![Block::new(0, 0, 5)], true);
        let next = candidate_with_blocks(7, 10, vec![Block::new(0, 0, 4)], true);

        first.append_alignment(&next).unwrap();

        assert_eq!(
            first.blocks,
            vec![
                Block::new(0, 0, 5),
                Block::new(5, 5, 2),
                Block::new(7, 10, 4),
            ]
        );
        assert_eq!(first.gaps.len(), 3);
        assert_eq!(first.gaps[1], vec![Gap::target(3)]);
    }

    #[test]
    fn test_append_records_query_residual_without_common_block() {
        // No common portion at all: the target is contiguous and the query
        // jumps by 4.
        let mut first = candidate_with_blocks(0, 0, vec![Block::new(0, 0, 5)], true);
        let next = candidate_with_blocks(9, 5, vec![Block::new(0, 0, 4)], true);

        first.append_alignment(&next).unwrap();

        assert_eq!(
            first.blocks,
            vec![Block::new(0, 0, 5), Block::new(9, 5, 4)]
        );
        assert_eq!(first.gaps.len(), 2);
        assert_eq!(first.gaps[0], vec![Gap::query(4)]);
    }

    #[test]
    fn test_append_rebases_frames() {
        // The second candidate lives in a different sub-sequence frame;
        // offsets must end up relative to the receiver's origin.
        let mut first = candidate_with_blocks(0, 0, vec![Block::new(0, 0, 5)], false);
        first.q_aligned_seq_pos = 100;
        first.t_aligned_seq_pos = 200;

        let mut next = candidate_with_blocks(2, 3, vec![Block::new(0, 0, 4)], false);
        next.q_aligned_seq_pos = 110;
        next.t_aligned_seq_pos = 210;

        first.append_alignment(&next).unwrap();
        assert_eq!(first.blocks, vec![Block::new(0, 0, 5), Block::new(12, 13, 4)]);
        // Composition still holds after the merge.
        assert_eq!(first.genomic_t_end(), 200 + 0 + 17);
    }

    #[test]
    fn test_clone_is_a_deep_value_copy() {
        let mut original = candidate_with_blocks(0, 0, vec![Block::new(0, 0, 5)], true);
        original.insertion_qv = "III".to_string();
        original.map_qv = 30;

        let mut copy = original.clone();
        copy.blocks.push(Block::new(5, 5, 2));
        copy.insertion_qv.push('!');
        copy.map_qv = 10;

        assert_eq!(original.blocks.len(), 1);
        assert_eq!(original.insertion_qv, "III");
        assert_eq!(original.map_qv, 30);
    }

    #[test]
    fn test_free_subsequences_is_idempotent() {
        let mut owner = FastaSequence::new("t", b"ACGTACGT".to_vec());
        let mut cand = AlignmentCandidate::default();
        cand.reassign_t_sequence(&mut owner);
        assert_eq!(cand.t_aligned_seq.bytes(), b"ACGTACGT");

        cand.free_subsequences();
        cand.free_subsequences();
        assert!(cand.t_aligned_seq.is_empty());
        // The referent survives the candidate's release.
        assert_eq!(owner.bytes(), b"ACGTACGT");
    }

    #[test]
    fn test_comparators() {
        let mut a = AlignmentCandidate::default();
        a.score = -100;
        a.map_qv = 20;
        a.t_pos = 50;
        let mut b = AlignmentCandidate::default();
        b.score = -50;
        b.map_qv = 40;
        b.t_pos = 10;

        // Lower score ranks first.
        assert_eq!(cmp_by_score(&a, &b), Ordering::Less);
        // Higher mapQV ranks first.
        assert_eq!(cmp_by_map_qv(&a, &b), Ordering::Greater);

        // Ties fall back to target start.
        b.score = -100;
        assert_eq!(cmp_by_score(&a, &b), Ordering::Greater);
    }
}
