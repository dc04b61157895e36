//! Library-level summary statistics derived from the per-site table,
//! plus literal marker-sequence scans over the raw extracted reads.

use memchr::memmem;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::errors::*;
use crate::fastx::ReadsFile;
use crate::sites::SiteCount;

/// T7 primer carried over from the transposon construct.
pub const PRIMER: &[u8] = b"CTAGAGGGCCCAATTCGCCCTATAGTGAGT";
/// phiMycoMarT7 vector backbone.
pub const VECTOR: &[u8] = b"CTAGACCGTCCAGTCTGGCAGGCCGGAAAC";
/// Illumina/TruSeq index adapter.
pub const ADAPTER: &[u8] = b"GATCGGAAGAGCACACGTCTGAACTCCAGTCAC";

/// Population mean and standard deviation.
pub fn mean_stdev(vals: &[f64]) -> (f64, f64) {
    let n = vals.len() as f64;
    let mut sum = 0.0;
    let mut ss = 0.0;
    for x in vals {
        sum += x;
        ss += x * x;
    }
    let mean = sum / n;
    let var = ss / n - mean * mean;
    (mean, var.max(0.0).sqrt())
}

/// Pearson correlation. NaN when either series is constant, empty, or
/// the lengths differ; never an error.
pub fn corr(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.is_empty() || xs.len() != ys.len() {
        return f64::NAN;
    }

    let (mx, sx) = mean_stdev(xs);
    let (my, sy) = mean_stdev(ys);
    if sx == 0.0 || sy == 0.0 {
        return f64::NAN;
    }

    let s: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - mx) * (y - my))
        .sum();
    s / (xs.len() as f64 * sx * sy)
}

/// Metrics derived from the per-site count table.
#[derive(Debug, Clone, Copy)]
pub struct SiteSummary {
    pub read_count: usize,
    pub template_count: usize,
    /// Reads per template; exactly 1 in read-count mode.
    pub template_ratio: f64,
    pub ta_sites: usize,
    pub tas_hit: usize,
    pub density: f64,
    pub max_count: usize,
    pub max_coord: usize,
    pub nz_mean: f64,
    /// Forward vs. reverse template counts across all sites.
    pub fr_corr: f64,
    /// Reads vs. templates over sites with nonzero reads.
    pub bc_corr: f64,
}

pub fn summarize(sites: &[SiteCount]) -> SiteSummary {
    let read_count: usize = sites.iter().map(|s| s.total_reads()).sum();
    let template_count: usize = sites.iter().map(|s| s.total_templates()).sum();
    let ta_sites = sites.len();
    let tas_hit = sites.iter().filter(|s| s.total_reads() > 0).count();

    let (max_count, max_coord) = sites
        .iter()
        .max_by_key(|s| s.total_templates())
        .map(|s| (s.total_templates(), s.coord))
        .unwrap_or((0, 0));

    let fwd: Vec<f64> = sites.iter().map(|s| s.fwd_templates as f64).collect();
    let rev: Vec<f64> = sites.iter().map(|s| s.rev_templates as f64).collect();

    let nonzero: Vec<&SiteCount> = sites.iter().filter(|s| s.total_reads() > 0).collect();
    let nz_reads: Vec<f64> = nonzero.iter().map(|s| s.total_reads() as f64).collect();
    let nz_templates: Vec<f64> = nonzero.iter().map(|s| s.total_templates() as f64).collect();

    SiteSummary {
        read_count,
        template_count,
        template_ratio: read_count as f64 / template_count as f64,
        ta_sites,
        tas_hit,
        density: tas_hit as f64 / ta_sites as f64,
        max_count,
        max_coord,
        nz_mean: template_count as f64 / tas_hit as f64,
        fr_corr: corr(&fwd, &rev),
        bc_corr: corr(&nz_reads, &nz_templates),
    }
}

/// Occurrence counts of known contaminant markers in the raw reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerCounts {
    pub tot_reads: usize,
    pub primer: usize,
    pub vector: usize,
    pub adapter: usize,
    /// Reads carrying the prefix stem but not the full prefix.
    pub misprimed: usize,
}

impl MarkerCounts {
    pub fn pct(&self, n: usize) -> f64 {
        n as f64 * 100.0 / self.tot_reads as f64
    }
}

/// Scans the raw extracted reads for literal marker occurrences.
pub fn scan_markers(reads: &Path, prefix: &[u8]) -> Result<MarkerCounts> {
    let primer = memmem::Finder::new(PRIMER);
    let vector = memmem::Finder::new(VECTOR);
    let adapter = memmem::Finder::new(ADAPTER);
    let full = memmem::Finder::new(prefix);
    let stem = memmem::Finder::new(&prefix[..prefix.len().saturating_sub(5)]);

    let mut counts = MarkerCounts::default();
    for record in ReadsFile::open(reads)? {
        let seq = record?.seq;
        counts.tot_reads += 1;
        if primer.find(&seq).is_some() {
            counts.primer += 1;
        }
        if vector.find(&seq).is_some() {
            counts.vector += 1;
        }
        if adapter.find(&seq).is_some() {
            counts.adapter += 1;
        }
        if stem.find(&seq).is_some() && full.find(&seq).is_none() {
            counts.misprimed += 1;
        }
    }

    Ok(counts)
}

/// Re-analyzes a coverage-track file, writing a `.stats` sidecar with
/// totals and the five highest counts.
pub fn analyze_dataset(wig: &Path) -> Result<()> {
    let file = File::open(wig).map_err(|e| Error::file_io(wig.to_string_lossy(), e))?;

    let mut data: Vec<(i64, String)> = Vec::new();
    let mut sites = 0usize;
    let mut insertions = 0usize;
    let mut reads = 0i64;

    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::file_io(wig.to_string_lossy(), e))?;
        if line.starts_with('#') || line.starts_with("var") {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(coord), Some(count)) = (fields.next(), fields.next()) else {
            continue;
        };
        let count: i64 = count.parse().map_err(|_| Error::Parse {
            string: line.clone(),
            context: wig.to_string_lossy().into_owned(),
            reason: "invalid count field",
        })?;

        sites += 1;
        if count > 1 {
            insertions += 1;
        }
        reads += count;
        data.push((count, coord.to_owned()));
    }

    let out_path = {
        let mut s = wig.as_os_str().to_owned();
        s.push(".stats");
        std::path::PathBuf::from(s)
    };
    let mut out = BufWriter::new(
        File::create(&out_path).map_err(|e| Error::file_io(out_path.to_string_lossy(), e))?,
    );

    let write = |out: &mut BufWriter<File>, s: String| -> Result<()> {
        out.write_all(s.as_bytes())
            .map_err(|e| Error::file_io(out_path.to_string_lossy(), e))
    };

    write(
        &mut out,
        format!(
            "total TAs: {}, insertions: {} ({:.1}%), total reads: {}\n",
            sites,
            insertions,
            insertions as f64 * 100.0 / sites as f64,
            reads
        ),
    )?;
    write(
        &mut out,
        format!(
            "mean read count per non-zero site: {:.1}\n",
            reads as f64 / insertions as f64
        ),
    )?;
    write(&mut out, "5 highest counts:\n".to_owned())?;

    data.sort_by(|a, b| b.cmp(a));
    for (count, coord) in data.iter().take(5) {
        write(&mut out, format!("coord={}, count={}\n", coord, count))?;
    }

    out.flush()
        .map_err(|e| Error::file_io(out_path.to_string_lossy(), e))?;
    Ok(())
}
