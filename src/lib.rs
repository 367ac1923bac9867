// lib.rs
pub mod block;
pub mod candidate;
pub mod fasta;
pub mod nucconv;
pub mod seqbuf;
pub mod seqdb;
