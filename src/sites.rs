//! Per-site aggregation of aligned reads.
//!
//! Aligned read pairs are folded into per-coordinate hit lists, then
//! reported against every valid insertion site in the reference: one row
//! per occurrence of the target dinucleotide (every position for Tn5),
//! ordered by genome coordinate, zero-filled where nothing mapped.
//!
//! The insertion coordinate of a pair is derived from the read-1
//! alignment: its reference position shifted by -2 on the forward strand
//! or by the read length on the reverse strand, which maps the aligned
//! read start onto the first base of the dinucleotide.

use memchr::memmem;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::*;
use crate::protocol::Transposon;
use crate::sam::SamRecord;

pub const TARGET_DINUCLEOTIDE: &[u8] = b"TA";

const FORWARD_OFFSET: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strand {
    Fwd,
    Rev,
}

/// One output row of the count table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteCount {
    /// 1-based coordinate of the dinucleotide's first base.
    pub coord: usize,
    pub fwd_reads: usize,
    pub fwd_templates: usize,
    pub rev_reads: usize,
    pub rev_templates: usize,
}

impl SiteCount {
    pub fn total_reads(&self) -> usize {
        self.fwd_reads + self.rev_reads
    }

    pub fn total_templates(&self) -> usize {
        self.fwd_templates + self.rev_templates
    }
}

/// Mapping totals accumulated while consuming alignment records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingCounts {
    /// Read-1 records seen (read pairs in barcode-aware mode).
    pub seen: usize,
    pub r1_mapped: usize,
    pub r2_mapped: usize,
    /// Templates with both mates mapped, proper pair or not.
    pub both_mapped: usize,
}

/// 1-based coordinates of every valid insertion site in the genome.
pub fn site_coords(genome: &[u8], transposon: Transposon) -> Vec<usize> {
    match transposon {
        Transposon::Himar1 => memmem::find_iter(genome, TARGET_DINUCLEOTIDE)
            .map(|i| i + 1)
            .collect(),
        // Tn5 inserts anywhere; every position pairs with a successor
        Transposon::Tn5 => (1..genome.len()).collect(),
    }
}

fn insertion_coord(record: &SamRecord) -> (Strand, i64) {
    let pos = record.pos as i64;
    if record.flags.reverse() {
        (Strand::Rev, pos + record.read_len() as i64)
    } else {
        (Strand::Fwd, pos + FORWARD_OFFSET)
    }
}

/// Barcode-aware aggregation over the paired-end record stream.
///
/// Read and mapping totals are counted regardless of the proper-pair
/// flag, since short fragments may map as improper pairs. Templates are
/// estimated per coordinate by deduplicating (strand, barcode,
/// fragment-size) triples. Records with a soft-clipped alignment are
/// skipped entirely.
pub fn template_counts<'b>(
    genome: &[u8],
    records: impl IntoIterator<Item = Result<SamRecord>>,
    barcodes: &'b FxHashMap<String, String>,
) -> Result<(Vec<SiteCount>, MappingCounts)> {
    let mut counts = MappingCounts::default();
    let mut hits: FxHashMap<i64, Vec<(Strand, i64, &'b str)>> = FxHashMap::default();

    for record in records {
        let record = record?;
        if record.soft_clipped() {
            continue;
        }

        let flags = record.flags;
        if flags.first_in_template() {
            counts.seen += 1;
            if !flags.unmapped() {
                counts.r1_mapped += 1;
            }
        }
        if flags.last_in_template() && !flags.unmapped() {
            counts.r2_mapped += 1;
        }

        if flags.first_in_template() && !flags.unmapped() && !flags.mate_unmapped() {
            counts.both_mapped += 1;

            let (strand, coord) = insertion_coord(&record);
            let barcode = barcodes.get(&record.id).map(String::as_str).unwrap_or("");
            hits.entry(coord)
                .or_default()
                .push((strand, record.frag_size, barcode));
        }
    }

    let sites = site_coords(genome, Transposon::Himar1)
        .into_iter()
        .map(|coord| site_row(coord, hits.get(&(coord as i64))))
        .collect();

    Ok((sites, counts))
}

fn site_row(coord: usize, hits: Option<&Vec<(Strand, i64, &str)>>) -> SiteCount {
    let mut row = SiteCount {
        coord,
        ..SiteCount::default()
    };

    let Some(hits) = hits else {
        return row;
    };

    let mut unique = FxHashSet::default();
    for &(strand, size, barcode) in hits {
        match strand {
            Strand::Fwd => row.fwd_reads += 1,
            Strand::Rev => row.rev_reads += 1,
        }
        if unique.insert((strand, size, barcode)) {
            match strand {
                Strand::Fwd => row.fwd_templates += 1,
                Strand::Rev => row.rev_templates += 1,
            }
        }
    }

    row
}

/// Read-count aggregation for single-end data: every mapped read counts
/// as its own template.
pub fn read_counts(
    genome: &[u8],
    records: impl IntoIterator<Item = Result<SamRecord>>,
    transposon: Transposon,
) -> Result<(Vec<SiteCount>, MappingCounts)> {
    let mut counts = MappingCounts::default();
    let mut hits: FxHashMap<i64, (usize, usize)> = FxHashMap::default();

    for record in records {
        let record = record?;
        counts.seen += 1;

        // plain mapped records only: forward (0) or reverse (16)
        if record.flags.0 != 0 && record.flags.0 != 16 {
            continue;
        }
        counts.r1_mapped += 1;
        counts.both_mapped += 1;

        let (strand, coord) = insertion_coord(&record);
        let entry = hits.entry(coord).or_insert((0, 0));
        match strand {
            Strand::Fwd => entry.0 += 1,
            Strand::Rev => entry.1 += 1,
        }
    }

    let sites = site_coords(genome, transposon)
        .into_iter()
        .map(|coord| {
            let &(fwd, rev) = hits.get(&(coord as i64)).unwrap_or(&(0, 0));
            SiteCount {
                coord,
                fwd_reads: fwd,
                fwd_templates: fwd,
                rev_reads: rev,
                rev_templates: rev,
            }
        })
        .collect();

    Ok((sites, counts))
}
