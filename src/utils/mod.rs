//! Shared helpers for docseq binaries.

pub mod bootstrap;
