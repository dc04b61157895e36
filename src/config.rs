//! Run configuration and accumulators.
//!
//! Input parameters are immutable for the duration of a run and live in
//! [`RunConfig`]; counts accumulated by the stages live in
//! [`RunCounters`] so the data flow between stages stays explicit.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::*;
use crate::protocol::{Protocol, Transposon};

/// Immutable parameters of one preprocessing run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub reads1: PathBuf,
    /// Second mate file; absent for single-end runs.
    pub reads2: Option<PathBuf>,
    pub reference: PathBuf,
    /// Path of the external mapper executable.
    pub bwa: PathBuf,
    /// Base name shared by all intermediate and output files.
    pub base: String,
    /// Cap on the number of input reads converted per file.
    pub max_reads: Option<usize>,
    /// Mismatch budget for constant-sequence location.
    pub mismatches: usize,
    pub transposon: Transposon,
    /// Overrides the transposon's default prefix sequence.
    pub prefix: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            reads1: PathBuf::new(),
            reads2: None,
            reference: PathBuf::new(),
            bwa: PathBuf::from("bwa"),
            base: "temp".to_owned(),
            max_reads: None,
            mismatches: 1,
            transposon: Transposon::Himar1,
            prefix: None,
        }
    }
}

impl RunConfig {
    pub fn new(
        reads1: impl Into<PathBuf>,
        reference: impl Into<PathBuf>,
        base: impl Into<String>,
    ) -> Self {
        Self {
            reads1: reads1.into(),
            reference: reference.into(),
            base: base.into(),
            ..Self::default()
        }
    }

    pub fn single_end(&self) -> bool {
        self.reads2.is_none()
    }

    pub fn protocol(&self) -> Protocol {
        let protocol = Protocol::new(self.transposon);
        match &self.prefix {
            Some(prefix) => protocol.with_prefix(prefix),
            None => protocol,
        }
    }

    /// Loads a whitespace key-value config file, starting from built-in
    /// defaults. A missing file yields the defaults unchanged.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        if !path.exists() {
            return Ok(config);
        }

        let content =
            fs::read_to_string(path).map_err(|e| Error::file_io(path.to_string_lossy(), e))?;

        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
                continue;
            };

            match key {
                "reads1" => config.reads1 = PathBuf::from(value),
                "reads2" => config.reads2 = Some(PathBuf::from(value)),
                "ref" => config.reference = PathBuf::from(value),
                "bwa" => config.bwa = PathBuf::from(value),
                "base" => config.base = value.to_owned(),
                "mismatches" => {
                    config.mismatches = value.parse().map_err(|_| Error::Parse {
                        string: value.to_owned(),
                        context: path.to_string_lossy().into_owned(),
                        reason: "mismatches must be an integer",
                    })?
                }
                "transposon" => config.transposon = Transposon::parse(value)?,
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str(&format!("reads1 {}\n", self.reads1.display()));
        if let Some(reads2) = &self.reads2 {
            out.push_str(&format!("reads2 {}\n", reads2.display()));
        }
        out.push_str(&format!("ref {}\n", self.reference.display()));
        out.push_str(&format!("bwa {}\n", self.bwa.display()));
        out.push_str(&format!("base {}\n", self.base));
        out.push_str(&format!("mismatches {}\n", self.mismatches));
        out.push_str(&format!("transposon {}\n", self.transposon));

        fs::write(path, out).map_err(|e| Error::file_io(path.to_string_lossy(), e))
    }

    /// Checks the referenced inputs before any processing begins.
    pub fn verify(&self) -> Result<()> {
        if self.base.is_empty() {
            return Err(Error::Parse {
                string: String::new(),
                context: "run configuration".to_owned(),
                reason: "base name cannot be empty",
            });
        }
        if !self.reads1.exists() {
            return Err(Error::MissingInput(self.reads1.display().to_string()));
        }
        if let Some(reads2) = &self.reads2 {
            if reads2 == &self.reads1 {
                return Err(Error::Parse {
                    string: reads2.display().to_string(),
                    context: "run configuration".to_owned(),
                    reason: "reads files cannot be identical",
                });
            }
            if !reads2.exists() {
                return Err(Error::MissingInput(reads2.display().to_string()));
            }
        }
        if !self.reference.exists() {
            return Err(Error::MissingInput(self.reference.display().to_string()));
        }
        Ok(())
    }
}

/// Counts accumulated across the pipeline stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Input reads (or read pairs).
    pub tot_reads: usize,
    /// Reads with a valid transposon prefix and a mappable insert.
    pub tgtta_reads: usize,
    /// Reads truncated at the adapter (fragment shorter than the read).
    pub truncated_reads: usize,
    pub r1_mapped: usize,
    pub r2_mapped: usize,
    pub both_mapped: usize,
}

/// Intermediate and output files derived from the run's base name.
#[derive(Debug, Clone)]
pub struct WorkPaths {
    pub reads1: PathBuf,
    pub reads2: PathBuf,
    pub tgtta1: PathBuf,
    pub tgtta2: PathBuf,
    pub barcodes1: PathBuf,
    pub barcodes2: PathBuf,
    pub genomic2: PathBuf,
    pub sam: PathBuf,
    pub counts: PathBuf,
    pub wig: PathBuf,
    pub stats: PathBuf,
}

impl WorkPaths {
    pub fn new(base: &str) -> Self {
        let path = |suffix: &str| PathBuf::from(format!("{}.{}", base, suffix));
        Self {
            reads1: path("reads1"),
            reads2: path("reads2"),
            tgtta1: path("tgtta1"),
            tgtta2: path("tgtta2"),
            barcodes1: path("barcodes1"),
            barcodes2: path("barcodes2"),
            genomic2: path("genomic2"),
            sam: path("sam"),
            counts: path("counts"),
            wig: path("wig"),
            stats: path("tn_stats"),
        }
    }
}
