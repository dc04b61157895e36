//! Rust library for preprocessing Tn-Seq sequencing reads.
//!
//! # Overview
//! tnprep turns raw transposon-mutant-library reads into a per-insertion-
//! site count table and summary statistics.
//!
//! This is useful for:
//! * Mapping Himar1/Tn5 insertion sites from single- or paired-end runs
//! * Estimating unique template counts from barcoded paired-end protocols
//! * Assessing library quality (density, strand correlation, contaminants)
//!
//! ## Pipeline
//! A run is driven by [`Pipeline`](pipeline::Pipeline) from an immutable
//! [`RunConfig`](config::RunConfig) and an injected
//! [`Aligner`](aligner::Aligner):
//!
//! 1. Inputs (FASTA/FASTQ, optionally gzipped) are converted to two-line
//!    reads files ([`fastx`]).
//! 2. Paired headers are reconciled to shared identifiers ([`headers`]).
//! 3. The transposon prefix, adapter, and barcode-flanking constants are
//!    located by approximate matching ([`matcher`], [`protocol`]) and the
//!    genomic/barcode slices are extracted ([`layout`]).
//! 4. The external mapper aligns the genomic reads ([`aligner`]).
//! 5. Aligned pairs are folded into per-TA-site read and template counts
//!    ([`sam`], [`sites`]) and library-level metrics are derived
//!    ([`stats`]).
//!
//! ## Read structure
//! Read 1 starts with the transposon prefix and continues into the
//! genomic insert; read 2 carries a barcode between constant regions:
//!
//! ```text
//! read1:  [0..15 offset] PREFIX genomic... [ADAPTER when short]
//! read2:  const1 barcode const2 genomic const3 ...
//! ```

pub mod aligner;
pub mod config;
pub mod errors;
pub mod fastx;
pub mod headers;
pub mod layout;
pub mod matcher;
pub mod pipeline;
pub mod protocol;
pub mod sam;
pub mod sites;
pub mod stats;

// commonly used functions and types

pub use crate::aligner::{Aligner, Bwa};
pub use crate::config::{RunConfig, RunCounters, WorkPaths};
pub use crate::errors::{Error, Result};
pub use crate::pipeline::{Pipeline, RunReport};
pub use crate::protocol::{Protocol, Transposon};
pub use crate::sites::SiteCount;
