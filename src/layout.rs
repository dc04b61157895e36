//! Read-layout extraction.
//!
//! Read 1 carries the transposon prefix followed by the genomic insert;
//! short fragments run into the sequencing adapter before the read ends.
//! Read 2 carries a barcode and a second genomic slice between constant
//! regions:
//!
//! ```text
//! ----const1---- -barcode- ----const2---- ----genomic---- ----const3----
//! ```
//!
//! Constant sequences are located with a mismatch budget. A read 2 whose
//! layout cannot be resolved is not dropped (dropping would desynchronize
//! the mate streams); it is emitted with sentinel barcode and genomic
//! values that are unlikely to map.

use log::info;
use rustc_hash::FxHashSet;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::errors::*;
use crate::fastx::{write_record, ReadsFile};
use crate::matcher;
use crate::protocol::Protocol;

/// Allowed start offsets for the transposon prefix in read 1.
const PREFIX_WINDOW: (usize, usize) = (0, 15);

/// Genomic slices shorter than this are too short to map usefully.
const MIN_GENOMIC_LEN: usize = 20;

/// Mismatch budget for the short-fragment adapter search.
const ADAPTER_MISMATCHES: usize = 1;

/// Emitted for unresolvable read-2 layouts in place of real slices.
pub const SENTINEL: &[u8] = b"XXXXXXXXXX";

/// Counts accumulated by the prefix extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefixExtract {
    /// Reads with a valid prefix and a mappable genomic slice.
    pub accepted: usize,
    /// Reads where the adapter was found (fragment shorter than the read).
    pub truncated: usize,
}

/// Strips the transposon prefix from each read and writes the genomic
/// slice, dropping reads without a prefix in the allowed window or with
/// less than 20bp of genomic sequence.
///
/// Zero accepted reads across the whole input is a fatal input-format
/// error: the library does not match the expected protocol.
pub fn extract_prefixed(
    input: &Path,
    output: &Path,
    protocol: &Protocol,
    mismatches: usize,
) -> Result<PrefixExtract> {
    info!("prefix sequence: {}", protocol.prefix);
    info!("adapter sequence: {}", protocol.adapter);

    let mut writer = BufWriter::new(
        File::create(output).map_err(|e| Error::file_io(output.to_string_lossy(), e))?,
    );

    let mut counts = PrefixExtract::default();
    let mut tot = 0usize;

    for record in ReadsFile::open(input)? {
        let record = record?;
        tot += 1;
        if tot % 1_000_000 == 0 {
            info!("{} reads processed", tot);
        }

        let Some(a) = matcher::find_in_window(
            &record.seq,
            protocol.prefix(),
            mismatches,
            PREFIX_WINDOW,
        ) else {
            continue;
        };

        let gstart = a + protocol.prefix().len();
        let mut gend = record.seq.len();
        if let Some(b) = matcher::find(&record.seq, protocol.adapter(), ADAPTER_MISMATCHES) {
            gend = gend.min(b);
            counts.truncated += 1;
        }

        if gend.saturating_sub(gstart) < MIN_GENOMIC_LEN {
            continue;
        }

        write_record(&mut writer, record.id.as_bytes(), &record.seq[gstart..gend])
            .map_err(|e| Error::file_io(output.to_string_lossy(), e))?;
        counts.accepted += 1;
    }

    writer
        .flush()
        .map_err(|e| Error::file_io(output.to_string_lossy(), e))?;

    if counts.accepted == 0 {
        return Err(Error::NoMatch(format!(
            "Input files did not contain any reads matching the prefix sequence with {} mismatches",
            mismatches
        )));
    }

    Ok(counts)
}

/// Result of locating the barcode and genomic slices in one read 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Extracted { barcode: Vec<u8>, genomic: Vec<u8> },
    Sentinel,
}

/// Locates const1/const2/const3 and slices out the barcode and genomic
/// parts. Unresolvable layouts (missing const1, barcode length outside
/// 5..=15) yield [`Layout::Sentinel`].
pub fn parse_layout(seq: &[u8], protocol: &Protocol, mismatches: usize) -> Layout {
    let a = matcher::find(seq, protocol.const1(), mismatches);
    let b = matcher::find(seq, protocol.const2(), mismatches);
    let c = matcher::find(seq, protocol.const3(), mismatches);

    let (Some(a), Some(b)) = (a, b) else {
        return Layout::Sentinel;
    };

    let bstart = a + protocol.const1().len();
    let bend = b;
    if bend < bstart + 5 || bend > bstart + 15 {
        return Layout::Sentinel;
    }

    let gstart = b + protocol.const2().len();
    let mut gend = seq.len();
    if let Some(c) = c {
        // const3 appears only when the fragment is shorter than the read
        if c > gstart && c - gstart > MIN_GENOMIC_LEN {
            gend = c;
        }
    }

    Layout::Extracted {
        barcode: seq[bstart..bend].to_vec(),
        genomic: seq[gstart..gend].to_vec(),
    }
}

/// Splits each read 2 into its barcode and genomic files, one record per
/// input record (sentinels included). Returns the record count.
pub fn extract_barcoded(
    input: &Path,
    barcodes_out: &Path,
    genomic_out: &Path,
    protocol: &Protocol,
    mismatches: usize,
) -> Result<usize> {
    info!("const1: {}", protocol.const1);
    info!("const2: {}", protocol.const2);
    info!("const3: {}", protocol.const3);

    let mut bc_writer = BufWriter::new(
        File::create(barcodes_out)
            .map_err(|e| Error::file_io(barcodes_out.to_string_lossy(), e))?,
    );
    let mut gen_writer = BufWriter::new(
        File::create(genomic_out)
            .map_err(|e| Error::file_io(genomic_out.to_string_lossy(), e))?,
    );

    let mut tot = 0usize;
    for record in ReadsFile::open(input)? {
        let record = record?;
        tot += 1;
        if tot % 1_000_000 == 0 {
            info!("{} reads processed", tot);
        }

        let (barcode, genomic) = match parse_layout(&record.seq, protocol, mismatches) {
            Layout::Extracted { barcode, genomic } => (barcode, genomic),
            Layout::Sentinel => (SENTINEL.to_vec(), SENTINEL.to_vec()),
        };

        write_record(&mut bc_writer, record.id.as_bytes(), &barcode)
            .map_err(|e| Error::file_io(barcodes_out.to_string_lossy(), e))?;
        write_record(&mut gen_writer, record.id.as_bytes(), &genomic)
            .map_err(|e| Error::file_io(genomic_out.to_string_lossy(), e))?;
    }

    bc_writer
        .flush()
        .map_err(|e| Error::file_io(barcodes_out.to_string_lossy(), e))?;
    gen_writer
        .flush()
        .map_err(|e| Error::file_io(genomic_out.to_string_lossy(), e))?;
    Ok(tot)
}

/// Key used to match mate records across files: the span between the
/// first ':' and the last '#' (or '_') of the identifier.
pub fn read_key(id: &str) -> &str {
    let start = id.find(':').map_or(0, |i| i + 1);
    let end = id
        .rfind('#')
        .or_else(|| id.rfind('_'))
        .unwrap_or_else(|| id.len().saturating_sub(1));
    &id[start..end.max(start)]
}

/// Writes the records of `input` whose key appears among the headers of
/// `good`. Used to restrict the mate-2 stream to reads that survived
/// mate-1 extraction.
pub fn select_reads(good: &Path, input: &Path, output: &Path) -> Result<usize> {
    let mut keys = FxHashSet::default();
    for record in ReadsFile::open(good)? {
        keys.insert(read_key(&record?.id).to_owned());
    }

    let mut writer = BufWriter::new(
        File::create(output).map_err(|e| Error::file_io(output.to_string_lossy(), e))?,
    );

    let mut kept = 0usize;
    for record in ReadsFile::open(input)? {
        let record = record?;
        if keys.contains(read_key(&record.id)) {
            write_record(&mut writer, record.id.as_bytes(), &record.seq)
                .map_err(|e| Error::file_io(output.to_string_lossy(), e))?;
            kept += 1;
        }
    }

    writer
        .flush()
        .map_err(|e| Error::file_io(output.to_string_lossy(), e))?;
    Ok(kept)
}

/// Writes records pairing the identifiers of `ids_from` with the
/// sequences of `seqs_from`, record by record. The files must hold the
/// same number of records.
pub fn replace_ids(ids_from: &Path, seqs_from: &Path, output: &Path) -> Result<()> {
    let mut ids = ReadsFile::open(ids_from)?;
    let mut seqs = ReadsFile::open(seqs_from)?;

    let mut writer = BufWriter::new(
        File::create(output).map_err(|e| Error::file_io(output.to_string_lossy(), e))?,
    );

    let mut tot = 0usize;
    loop {
        let (id_rec, seq_rec) = match (ids.next(), seqs.next()) {
            (None, None) => break,
            (Some(a), Some(b)) => (a?, b?),
            _ => {
                return Err(Error::Format {
                    file: seqs_from.to_string_lossy().into_owned(),
                    line: 2 * tot + 1,
                    reason: "reads files do not have the same number of records",
                    header1: String::new(),
                    header2: String::new(),
                })
            }
        };
        tot += 1;

        write_record(&mut writer, id_rec.id.as_bytes(), &seq_rec.seq)
            .map_err(|e| Error::file_io(output.to_string_lossy(), e))?;
    }

    writer
        .flush()
        .map_err(|e| Error::file_io(output.to_string_lossy(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    fn write_reads(path: &Path, records: &[(&str, &str)]) {
        let mut out = String::new();
        for (id, seq) in records {
            out.push_str(&format!(">{}\n{}\n", id, seq));
        }
        fs::write(path, out).unwrap();
    }

    fn read_all(path: &Path) -> Vec<(String, String)> {
        ReadsFile::open(path)
            .unwrap()
            .map(|r| {
                let r = r.unwrap();
                (r.id, String::from_utf8(r.seq).unwrap())
            })
            .collect()
    }

    const PREFIX: &str = "ACTTATCAGCCAACCTGTTA";

    #[test]
    fn prefix_extraction_slices_genomic() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.reads");
        let output = dir.path().join("out.reads");
        let genomic = "ACGTACGTACGTACGTACGTACGT"; // 24bp
        write_reads(&input, &[("r1", &format!("{}{}", PREFIX, genomic))]);

        let counts = extract_prefixed(&input, &output, &Protocol::default(), 1).unwrap();
        assert_eq!(counts, PrefixExtract { accepted: 1, truncated: 0 });
        assert_eq!(read_all(&output), vec![("r1".to_owned(), genomic.to_owned())]);
    }

    #[test]
    fn staggered_prefix_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.reads");
        let output = dir.path().join("out.reads");
        let genomic = "ACGTACGTACGTACGTACGT"; // 20bp
        write_reads(
            &input,
            &[
                ("r1", &format!("GGGGG{}{}", PREFIX, genomic)),
                ("r2", &format!("{}{}{}", "G".repeat(16), PREFIX, genomic)),
            ],
        );

        let counts = extract_prefixed(&input, &output, &Protocol::default(), 1).unwrap();
        // r2's prefix starts at offset 16, outside the allowed window
        assert_eq!(counts.accepted, 1);
        assert_eq!(read_all(&output), vec![("r1".to_owned(), genomic.to_owned())]);
    }

    #[test]
    fn adapter_truncates_short_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.reads");
        let output = dir.path().join("out.reads");
        let genomic = "ACGTACGTACGTACGTACGTAC"; // 22bp
        write_reads(
            &input,
            &[("r1", &format!("{}{}CGACCACGACCTTTT", PREFIX, genomic))],
        );

        let counts = extract_prefixed(&input, &output, &Protocol::default(), 1).unwrap();
        assert_eq!(counts, PrefixExtract { accepted: 1, truncated: 1 });
        assert_eq!(read_all(&output)[0].1, genomic);
    }

    #[test]
    fn short_genomic_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.reads");
        let output = dir.path().join("out.reads");
        write_reads(
            &input,
            &[
                ("r1", &format!("{}ACGTACGTACGTACGTACG", PREFIX)), // 19bp
                ("r2", &format!("{}ACGTACGTACGTACGTACGT", PREFIX)), // 20bp
            ],
        );

        let counts = extract_prefixed(&input, &output, &Protocol::default(), 1).unwrap();
        assert_eq!(counts.accepted, 1);
        assert_eq!(read_all(&output)[0].0, "r2");
    }

    #[test]
    fn no_matching_reads_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.reads");
        let output = dir.path().join("out.reads");
        write_reads(&input, &[("r1", &"G".repeat(50))]);

        let err = extract_prefixed(&input, &output, &Protocol::default(), 1).unwrap_err();
        assert!(matches!(err, Error::NoMatch(_)));
    }

    fn layout_read(barcode: &str, genomic: &str, tail: bool) -> String {
        let p = Protocol::default();
        let mut s = format!("{}{}{}{}", p.const1, barcode, p.const2, genomic);
        if tail {
            s.push_str(&p.const3);
            s.push_str("AGATCGGAAGAGC");
        }
        s
    }

    #[test]
    fn layout_extracts_barcode_and_genomic() {
        let genomic = "TTGACCTAGGACCTTGACCTAGGACCTTG"; // 29bp
        let read = layout_read("GTAATTACCA", genomic, true);
        let layout = parse_layout(read.as_bytes(), &Protocol::default(), 1);
        assert_eq!(
            layout,
            Layout::Extracted {
                barcode: b"GTAATTACCA".to_vec(),
                genomic: genomic.as_bytes().to_vec(),
            }
        );
    }

    #[test]
    fn layout_without_const3_runs_to_read_end() {
        let genomic = "TTGACCTAGGACCTTGACCTAGGACCTTG";
        let read = layout_read("GTAATTACCA", genomic, false);
        let layout = parse_layout(read.as_bytes(), &Protocol::default(), 1);
        match layout {
            Layout::Extracted { genomic: g, .. } => assert_eq!(g, genomic.as_bytes()),
            other => panic!("unexpected layout: {other:?}"),
        }
    }

    #[test]
    fn missing_const1_yields_sentinel() {
        let p = Protocol::default();
        let read = format!("TTTTTTTTTTGTAATTACCA{}ACGTACGTACGTACGTACGTACGT", p.const2);
        assert_eq!(parse_layout(read.as_bytes(), &p, 1), Layout::Sentinel);
    }

    #[test]
    fn bad_barcode_length_yields_sentinel() {
        for barcode in ["ACGT", "ACGTACGTACGTACGT"] {
            // 4bp and 16bp, outside 5..=15
            let read = layout_read(barcode, "TTGACCTAGGACCTTGACCTAGGACCTTG", true);
            assert_eq!(
                parse_layout(read.as_bytes(), &Protocol::default(), 1),
                Layout::Sentinel,
                "barcode {barcode}"
            );
        }
    }

    #[test]
    fn barcoded_extraction_keeps_stream_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.reads");
        let bc_out = dir.path().join("out.barcodes");
        let gen_out = dir.path().join("out.genomic");
        let genomic = "TTGACCTAGGACCTTGACCTAGGACCTTG";
        write_reads(
            &input,
            &[
                ("r1", &layout_read("GTAATTACCA", genomic, true)),
                ("r2", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTT"),
            ],
        );

        let tot =
            extract_barcoded(&input, &bc_out, &gen_out, &Protocol::default(), 1).unwrap();
        assert_eq!(tot, 2);

        let barcodes = read_all(&bc_out);
        let genomics = read_all(&gen_out);
        assert_eq!(barcodes[0], ("r1".to_owned(), "GTAATTACCA".to_owned()));
        assert_eq!(genomics[0], ("r1".to_owned(), genomic.to_owned()));
        // the unresolvable mate is carried through as sentinels
        assert_eq!(barcodes[1], ("r2".to_owned(), "XXXXXXXXXX".to_owned()));
        assert_eq!(genomics[1], ("r2".to_owned(), "XXXXXXXXXX".to_owned()));
    }

    #[test]
    fn read_keys() {
        assert_eq!(read_key("READ1:100#0"), "100");
        assert_eq!(read_key("M01:8_:N:0:A"), "8");
        assert_eq!(read_key("plain"), "plai");
    }

    #[test]
    fn select_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.reads");
        let input = dir.path().join("in.reads");
        let selected = dir.path().join("sel.reads");
        write_reads(&good, &[("R:1#0", "ACGT")]);
        write_reads(&input, &[("R:1#0", "AAAA"), ("R:2#0", "CCCC")]);

        assert_eq!(select_reads(&good, &input, &selected).unwrap(), 1);
        assert_eq!(read_all(&selected), vec![("R:1#0".to_owned(), "AAAA".to_owned())]);

        let out = dir.path().join("replaced.reads");
        replace_ids(&good, &selected, &out).unwrap();
        assert_eq!(read_all(&out), vec![("R:1#0".to_owned(), "AAAA".to_owned())]);
    }
}
