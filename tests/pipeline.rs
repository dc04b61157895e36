//! End-to-end pipeline tests against a mock aligner.
//!
//! The aligner is injected as synthetic SAM output, so these tests
//! exercise extraction, aggregation, and reporting without any external
//! mapper.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use tnprep::errors::Result;
use tnprep::{Aligner, Error, Pipeline, RunConfig};

const PREFIX: &str = "ACTTATCAGCCAACCTGTTA";
const CONST1: &str = "GTCAAGTCTCGCAGATGATAAGG";
const CONST2: &str = "CTTGGTTTGGTCGTGGTCG";
const CONST3: &str = "TAACAGGTTGGCT";

/// Writes predetermined SAM content instead of running a mapper.
struct MockAligner {
    sam: String,
}

impl Aligner for MockAligner {
    fn map_single(&self, _reference: &Path, _reads: &Path, out_sam: &Path) -> Result<()> {
        fs::write(out_sam, &self.sam).unwrap();
        Ok(())
    }

    fn map_paired(
        &self,
        _reference: &Path,
        _reads1: &Path,
        _reads2: &Path,
        out_sam: &Path,
    ) -> Result<()> {
        fs::write(out_sam, &self.sam).unwrap();
        Ok(())
    }
}

fn write_fastq(path: &Path, reads: &[(&str, &str)]) {
    let mut file = File::create(path).unwrap();
    for (id, seq) in reads {
        writeln!(file, "@{}", id).unwrap();
        writeln!(file, "{}", seq).unwrap();
        writeln!(file, "+").unwrap();
        writeln!(file, "{}", "I".repeat(seq.len())).unwrap();
    }
}

/// Reference with TA sites at coordinates 5 and 25 and nothing else.
fn write_reference(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("ref.fna");
    let genome = format!("GGGGTA{}TA{}", "G".repeat(18), "G".repeat(34));
    fs::write(&path, format!(">ref\n{}\n", genome)).unwrap();
    path
}

fn base(dir: &TempDir) -> String {
    dir.path().join("run").to_string_lossy().into_owned()
}

fn sam_line(id: &str, flag: u16, pos: usize, frag: i64, seq: &str) -> String {
    format!(
        "{}\t{}\tref\t{}\t37\t{}M\t*\t0\t{}\t{}\t{}\n",
        id,
        flag,
        pos,
        seq.len(),
        frag,
        seq,
        "I".repeat(seq.len())
    )
}

#[test]
fn single_end_run_produces_count_table_wig_and_stats() {
    let dir = TempDir::new().unwrap();
    let reference = write_reference(&dir);

    let genomic = "G".repeat(20);
    let reads1 = dir.path().join("reads.fq");
    write_fastq(
        &reads1,
        &[
            ("r1", &format!("{}{}", PREFIX, genomic)),
            ("r2", &format!("{}{}", PREFIX, genomic)),
            ("r3", &format!("{}{}", PREFIX, genomic)),
        ],
    );

    // r1 and r2 map forward at pos 7 (insertion coordinate 5); r3 stays
    // unmapped
    let mut sam = String::from("@SQ\tSN:ref\tLN:60\n");
    sam.push_str(&sam_line("r1", 0, 7, 0, &genomic));
    sam.push_str(&sam_line("r2", 0, 7, 0, &genomic));
    sam.push_str(&sam_line("r3", 4, 0, 0, &genomic));
    let aligner = MockAligner { sam };

    let config = RunConfig::new(&reads1, &reference, base(&dir));
    let pipeline = Pipeline::new(&config, &aligner);
    let report = pipeline.run().unwrap();

    assert_eq!(report.counters.tot_reads, 3);
    assert_eq!(report.counters.tgtta_reads, 3);
    assert_eq!(report.counters.r1_mapped, 2);
    assert_eq!(report.counters.both_mapped, 2);

    // count table: header plus one row per TA site
    let counts = fs::read_to_string(dir.path().join("run.counts")).unwrap();
    let lines: Vec<&str> = counts.lines().collect();
    assert_eq!(
        lines[0],
        "coord\tFwd_Rd_Ct\tFwd_Templ_Ct\tRev_Rd_Ct\tRev_Templ_Ct\tTot_Rd_Ct\tTot_Templ_Ct"
    );
    assert_eq!(lines[1], "5\t2\t2\t0\t0\t2\t2");
    assert_eq!(lines[2], "25\t0\t0\t0\t0\t0\t0");
    assert_eq!(lines.len(), 3);

    let wig = fs::read_to_string(dir.path().join("run.wig")).unwrap();
    assert!(wig.starts_with("# Generated by tnprep from reads.fq\n"));
    assert!(wig.contains("variableStep chrom=ref\n"));
    assert!(wig.contains("5 2\n"));
    assert!(wig.contains("25 0\n"));

    // every read is its own template in read-count mode
    assert!((report.summary.template_ratio - 1.0).abs() < 1e-9);
    assert!((report.summary.density - 0.5).abs() < 1e-9);
    assert_eq!(report.summary.max_count, 2);
    assert_eq!(report.summary.max_coord, 5);

    let stats = fs::read_to_string(dir.path().join("run.tn_stats")).unwrap();
    assert!(stats.contains("# density 0.500"));
    assert!(stats.contains("# TAs_hit 1"));
    assert!(stats.contains("# read_length: 40 bp"));

    // the machine row stays aligned with its header
    let mut lines = stats.lines().rev();
    let values = lines.next().unwrap();
    let names = lines.next().unwrap();
    assert!(names.starts_with('#'));
    assert_eq!(
        names.matches('\t').count(),
        values.matches('\t').count()
    );
}

#[test]
fn paired_end_run_deduplicates_templates_by_barcode() {
    let dir = TempDir::new().unwrap();
    let reference = write_reference(&dir);

    let genomic1 = "G".repeat(20);
    let read1 = format!("{}{}", PREFIX, genomic1);
    let read2 = |barcode: &str| {
        format!(
            "{}{}{}{}{}",
            CONST1,
            barcode,
            CONST2,
            "C".repeat(25),
            CONST3
        )
    };

    let reads1 = dir.path().join("reads1.fq");
    let reads2 = dir.path().join("reads2.fq");
    write_fastq(
        &reads1,
        &[
            ("T1:100#0/1", &read1),
            ("T2:200#0/1", &read1),
            ("T3:300#0/1", &read1),
        ],
    );
    // T1 and T2 share a barcode, T3 has its own
    write_fastq(
        &reads2,
        &[
            ("T1:100#0/2", &read2("ACGTACGTAA")),
            ("T2:200#0/2", &read2("ACGTACGTAA")),
            ("T3:300#0/2", &read2("TTGGCCAATT")),
        ],
    );

    // all three templates map forward onto coordinate 5 with identical
    // fragment sizes, so barcode dedup collapses T1 and T2
    let mut sam = String::from("@SQ\tSN:ref\tLN:60\n");
    for id in ["T1:100#0", "T2:200#0", "T3:300#0"] {
        sam.push_str(&sam_line(id, 99, 7, 30, &genomic1));
        sam.push_str(&sam_line(id, 147, 17, -30, &"C".repeat(25)));
    }
    let aligner = MockAligner { sam };

    let mut config = RunConfig::new(&reads1, &reference, base(&dir));
    config.reads2 = Some(reads2.clone());
    let pipeline = Pipeline::new(&config, &aligner);
    let report = pipeline.run().unwrap();

    assert_eq!(report.counters.tot_reads, 3);
    assert_eq!(report.counters.r1_mapped, 3);
    assert_eq!(report.counters.r2_mapped, 3);
    assert_eq!(report.counters.both_mapped, 3);

    let counts = fs::read_to_string(dir.path().join("run.counts")).unwrap();
    let lines: Vec<&str> = counts.lines().collect();
    assert_eq!(lines[1], "5\t3\t2\t0\t0\t3\t2");
    assert_eq!(lines[2], "25\t0\t0\t0\t0\t0\t0");

    assert!((report.summary.template_ratio - 1.5).abs() < 1e-9);
    assert_eq!(report.summary.template_count, 2);

    // reverse templates are all zero and only one site is hit, so both
    // correlations are undefined rather than errors
    assert!(report.summary.fr_corr.is_nan());
    assert!(report.summary.bc_corr.is_nan());

    let wig = fs::read_to_string(dir.path().join("run.wig")).unwrap();
    assert!(wig.starts_with("# Generated by tnprep from reads1.fq and reads2.fq\n"));
    assert!(wig.contains("5 2\n"));

    // reconciliation rewrote the intermediate reads files in place
    let reconciled = fs::read_to_string(dir.path().join("run.reads1")).unwrap();
    assert!(reconciled.starts_with(">T1:100#0\n"));
}

#[test]
fn zero_mapped_reads_is_fatal_but_leaves_count_table() {
    let dir = TempDir::new().unwrap();
    let reference = write_reference(&dir);

    let genomic = "G".repeat(20);
    let reads1 = dir.path().join("reads.fq");
    write_fastq(&reads1, &[("r1", &format!("{}{}", PREFIX, genomic))]);

    let sam = sam_line("r1", 4, 0, 0, &genomic);
    let aligner = MockAligner { sam };

    let config = RunConfig::new(&reads1, &reference, base(&dir));
    let err = Pipeline::new(&config, &aligner).run().unwrap_err();
    assert!(matches!(err, Error::NoMatch(_)));

    // the zero-filled table is still on disk for inspection
    let counts = fs::read_to_string(dir.path().join("run.counts")).unwrap();
    assert_eq!(counts.lines().count(), 3);
}

#[test]
fn missing_inputs_detected_before_processing() {
    let dir = TempDir::new().unwrap();
    let config = RunConfig::new(
        dir.path().join("absent.fq"),
        dir.path().join("absent.fna"),
        base(&dir),
    );
    let aligner = MockAligner { sam: String::new() };

    let err = Pipeline::new(&config, &aligner).run().unwrap_err();
    assert!(matches!(err, Error::MissingInput(_)));
    assert!(!dir.path().join("run.reads1").exists());
}
