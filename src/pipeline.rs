//! The sequential preprocessing pipeline: extract reads, map them with
//! the injected aligner, tabulate per-site counts, and write the count
//! table, coverage track, and statistics report.
//!
//! Stages run strictly in order and fail fast; a failed stage aborts the
//! run. Input conversion steps skip work when their output file already
//! exists, so an interrupted run can be resumed cheaply.

use log::info;
use rustc_hash::FxHashMap;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::aligner::Aligner;
use crate::config::{RunConfig, RunCounters, WorkPaths};
use crate::errors::*;
use crate::fastx;
use crate::headers;
use crate::layout;
use crate::protocol::Protocol;
use crate::sam::SamReader;
use crate::sites::{self, SiteCount};
use crate::stats::{self, MarkerCounts, SiteSummary};

/// Outcome of one full run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub counters: RunCounters,
    pub sites: Vec<SiteCount>,
    pub summary: SiteSummary,
    pub markers: MarkerCounts,
}

pub struct Pipeline<'a, A: Aligner> {
    config: &'a RunConfig,
    aligner: &'a A,
    protocol: Protocol,
    paths: WorkPaths,
}

impl<'a, A: Aligner> Pipeline<'a, A> {
    pub fn new(config: &'a RunConfig, aligner: &'a A) -> Self {
        Self {
            config,
            aligner,
            protocol: config.protocol(),
            paths: WorkPaths::new(&config.base),
        }
    }

    pub fn run(&self) -> Result<RunReport> {
        self.config.verify()?;

        let mut counters = RunCounters::default();
        self.extract_reads(&mut counters)?;
        self.map_reads()?;
        let report = self.generate_output(&mut counters)?;

        info!("done");
        Ok(report)
    }

    fn convert_input(&self, input: &Path, output: &Path) -> Result<()> {
        let input = fastx::uncompress(input)?;
        if output.exists() {
            info!(
                "skipping reads conversion, file already exists: {}",
                output.display()
            );
            return Ok(());
        }
        info!("converting {} -> {}", input.display(), output.display());
        fastx::to_reads_file(&input, output, self.config.max_reads)?;
        Ok(())
    }

    fn extract_reads(&self, counters: &mut RunCounters) -> Result<()> {
        info!("extracting reads...");
        self.convert_input(&self.config.reads1, &self.paths.reads1)?;

        if self.config.single_end() {
            info!("assuming single-ended reads");
            info!("creating {}", self.paths.tgtta1.display());
            let extract = layout::extract_prefixed(
                &self.paths.reads1,
                &self.paths.tgtta1,
                &self.protocol,
                self.config.mismatches,
            )?;
            counters.tgtta_reads = extract.accepted;
            counters.truncated_reads = extract.truncated;
            return Ok(());
        }

        let Some(reads2) = &self.config.reads2 else {
            return Ok(());
        };
        self.convert_input(reads2, &self.paths.reads2)?;

        info!("reconciling paired headers...");
        headers::reconcile(&self.paths.reads1, &self.paths.reads2)?;

        info!("extracting barcodes and genomic parts of reads...");
        info!("creating {}", self.paths.tgtta1.display());
        let extract = layout::extract_prefixed(
            &self.paths.reads1,
            &self.paths.tgtta1,
            &self.protocol,
            self.config.mismatches,
        )?;
        counters.tgtta_reads = extract.accepted;
        counters.truncated_reads = extract.truncated;

        info!("creating {}", self.paths.tgtta2.display());
        layout::select_reads(&self.paths.tgtta1, &self.paths.reads2, &self.paths.tgtta2)?;

        info!(
            "creating {} and {}",
            self.paths.barcodes2.display(),
            self.paths.genomic2.display()
        );
        layout::extract_barcoded(
            &self.paths.tgtta2,
            &self.paths.barcodes2,
            &self.paths.genomic2,
            &self.protocol,
            self.config.mismatches,
        )?;

        info!("creating {}", self.paths.barcodes1.display());
        layout::replace_ids(&self.paths.tgtta1, &self.paths.barcodes2, &self.paths.barcodes1)?;

        Ok(())
    }

    fn map_reads(&self) -> Result<()> {
        info!("mapping reads (this can take a couple of minutes)...");
        if self.config.single_end() {
            self.aligner
                .map_single(&self.config.reference, &self.paths.tgtta1, &self.paths.sam)
        } else {
            self.aligner.map_paired(
                &self.config.reference,
                &self.paths.tgtta1,
                &self.paths.genomic2,
                &self.paths.sam,
            )
        }
    }

    fn generate_output(&self, counters: &mut RunCounters) -> Result<RunReport> {
        info!("tabulating template counts and statistics...");
        let genome = fastx::read_genome(&self.config.reference)?;
        let records = SamReader::open(&self.paths.sam)?;

        let (site_table, mapping) = if self.config.single_end() {
            sites::read_counts(&genome, records, self.config.transposon)?
        } else {
            let barcodes = load_barcodes(&self.paths.barcodes1)?;
            sites::template_counts(&genome, records, &barcodes)?
        };

        counters.r1_mapped = mapping.r1_mapped;
        counters.r2_mapped = mapping.r2_mapped;
        counters.both_mapped = mapping.both_mapped;

        write_counts_table(&self.paths.counts, &site_table)?;

        if mapping.both_mapped == 0 {
            return Err(Error::NoMatch(
                "The aligner was unable to map any reads to the genome".to_owned(),
            ));
        }

        info!("writing {}", self.paths.wig.display());
        self.write_wig(&site_table)?;

        let markers = stats::scan_markers(&self.paths.reads1, self.protocol.prefix())?;
        counters.tot_reads = markers.tot_reads;

        let summary = stats::summarize(&site_table);

        info!("writing {}", self.paths.stats.display());
        self.write_stats_report(counters, &summary, &markers)?;

        Ok(RunReport {
            counters: *counters,
            sites: site_table,
            summary,
            markers,
        })
    }

    fn write_wig(&self, site_table: &[SiteCount]) -> Result<()> {
        let mut out = create(&self.paths.wig)?;

        let read1 = file_name(&self.config.reads1);
        let provenance = match &self.config.reads2 {
            Some(reads2) => format!(
                "# Generated by tnprep from {} and {}\n",
                read1,
                file_name(reads2)
            ),
            None => format!("# Generated by tnprep from {}\n", read1),
        };
        let ref_name = file_name(&self.config.reference);
        let ref_name = ref_name.split('.').next().unwrap_or("");

        write_str(&mut out, &self.paths.wig, &provenance)?;
        write_str(
            &mut out,
            &self.paths.wig,
            &format!("variableStep chrom={}\n", ref_name),
        )?;
        for site in site_table {
            write_str(
                &mut out,
                &self.paths.wig,
                &format!("{} {}\n", site.coord, site.total_templates()),
            )?;
        }

        out.flush()
            .map_err(|e| Error::file_io(self.paths.wig.to_string_lossy(), e))
    }

    fn write_stats_report(
        &self,
        counters: &RunCounters,
        summary: &SiteSummary,
        markers: &MarkerCounts,
    ) -> Result<()> {
        let read_length = fastx::first_seq_len(&self.paths.reads1)?.unwrap_or(0);
        let mean_r1_genomic = fastx::mean_seq_len(&self.paths.tgtta1)?;
        let mean_r2_genomic = if self.config.single_end() {
            None
        } else {
            Some(fastx::mean_seq_len(&self.paths.genomic2)?)
        };

        let read2 = self
            .config
            .reads2
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_owned());

        // (name, value, annotation) triples: the annotated lines are the
        // human-readable part, the names and values form the machine row
        let mut fields: Vec<(&str, String, &str)> = vec![
            ("read1", self.config.reads1.display().to_string(), ""),
            ("read2", read2, ""),
            (
                "total_reads",
                counters.tot_reads.to_string(),
                "(or read pairs)",
            ),
            (
                "TGTTA_reads",
                counters.tgtta_reads.to_string(),
                "(reads with valid Tn prefix, and insert size>20bp)",
            ),
            ("reads1_mapped", counters.r1_mapped.to_string(), ""),
            ("reads2_mapped", counters.r2_mapped.to_string(), ""),
            (
                "mapped_reads",
                counters.both_mapped.to_string(),
                "(both R1 and R2 map into genome)",
            ),
            (
                "read_count",
                summary.read_count.to_string(),
                "(TA sites only, for Himar1)",
            ),
            ("template_count", summary.template_count.to_string(), ""),
            (
                "template_ratio",
                format!("{:.2}", summary.template_ratio),
                "(reads per template)",
            ),
            ("TA_sites", summary.ta_sites.to_string(), ""),
            ("TAs_hit", summary.tas_hit.to_string(), ""),
            ("density", format!("{:.3}", summary.density), ""),
            (
                "max_count",
                summary.max_count.to_string(),
                "(among templates)",
            ),
            ("max_site", summary.max_coord.to_string(), "(coordinate)"),
            (
                "NZ_mean",
                format!("{:.1}", summary.nz_mean),
                "(among templates)",
            ),
            (
                "FR_corr",
                format!("{:.3}", summary.fr_corr),
                "(Fwd templates vs. Rev templates)",
            ),
            (
                "BC_corr",
                format!("{:.3}", summary.bc_corr),
                "(reads vs. templates, summed over both strands)",
            ),
        ];

        let pct_line = |n: usize| format!("{} reads ({:.1}%)", n, markers.pct(n));
        let marker_lines = [
            (
                "primer_matches",
                markers.primer,
                format!(
                    "contain {} (Himar1)",
                    String::from_utf8_lossy(stats::PRIMER)
                ),
            ),
            (
                "vector_matches",
                markers.vector,
                format!(
                    "contain {} (phiMycoMarT7)",
                    String::from_utf8_lossy(stats::VECTOR)
                ),
            ),
            (
                "adapter_matches",
                markers.adapter,
                format!(
                    "contain {} (Illumina/TruSeq index)",
                    String::from_utf8_lossy(stats::ADAPTER)
                ),
            ),
            (
                "misprimed_reads",
                markers.misprimed,
                "contain the prefix stem without the full prefix".to_owned(),
            ),
        ];

        let mut out = create(&self.paths.stats)?;
        let path = &self.paths.stats;

        write_str(&mut out, path, "# title: Tn-Seq Pre-Processor\n")?;
        write_str(
            &mut out,
            path,
            &format!("# transposon type: {}\n", self.config.transposon),
        )?;
        write_str(
            &mut out,
            path,
            &format!("# ref_genome: {}\n", self.config.reference.display()),
        )?;

        for (name, value, annotation) in &fields {
            let line = if annotation.is_empty() {
                format!("# {} {}\n", name, value)
            } else {
                format!("# {} {} {}\n", name, value, annotation)
            };
            write_str(&mut out, path, &line)?;
        }
        for (name, count, annotation) in &marker_lines {
            write_str(
                &mut out,
                path,
                &format!("# {}: {} {}\n", name, pct_line(*count), annotation),
            )?;
        }
        write_str(&mut out, path, &format!("# read_length: {} bp\n", read_length))?;
        write_str(
            &mut out,
            path,
            &format!("# mean_R1_genomic_length: {:.1} bp\n", mean_r1_genomic),
        )?;
        if let Some(mean) = mean_r2_genomic {
            write_str(
                &mut out,
                path,
                &format!("# mean_R2_genomic_length: {:.1} bp\n", mean),
            )?;
        }

        // machine-consumable row: header and values stay aligned
        for (name, count, _) in &marker_lines {
            fields.push((*name, count.to_string(), ""));
        }
        fields.push(("read_length", read_length.to_string(), ""));
        fields.push(("mean_R1_genomic_length", format!("{:.1}", mean_r1_genomic), ""));
        if let Some(mean) = mean_r2_genomic {
            fields.push(("mean_R2_genomic_length", format!("{:.1}", mean), ""));
        }

        let names: Vec<&str> = fields.iter().map(|(name, _, _)| *name).collect();
        let values: Vec<&str> = fields.iter().map(|(_, value, _)| value.as_str()).collect();
        write_str(&mut out, path, &format!("#{}\n", names.join("\t")))?;
        write_str(&mut out, path, &format!("{}\n", values.join("\t")))?;

        out.flush()
            .map_err(|e| Error::file_io(path.to_string_lossy(), e))
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path).map_err(|e| {
        Error::file_io(path.to_string_lossy(), e)
    })?))
}

fn write_str(out: &mut BufWriter<File>, path: &Path, s: &str) -> Result<()> {
    out.write_all(s.as_bytes())
        .map_err(|e| Error::file_io(path.to_string_lossy(), e))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_barcodes(path: &Path) -> Result<FxHashMap<String, String>> {
    let mut barcodes = FxHashMap::default();
    for record in fastx::ReadsFile::open(path)? {
        let record = record?;
        barcodes.insert(record.id, String::from_utf8_lossy(&record.seq).into_owned());
    }
    Ok(barcodes)
}

/// Writes the per-site count table, one row per valid insertion site in
/// coordinate order.
pub fn write_counts_table(path: &Path, site_table: &[SiteCount]) -> Result<()> {
    let mut out = create(path)?;

    write_str(
        &mut out,
        path,
        "coord\tFwd_Rd_Ct\tFwd_Templ_Ct\tRev_Rd_Ct\tRev_Templ_Ct\tTot_Rd_Ct\tTot_Templ_Ct\n",
    )?;
    for site in site_table {
        write_str(
            &mut out,
            path,
            &format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                site.coord,
                site.fwd_reads,
                site.fwd_templates,
                site.rev_reads,
                site.rev_templates,
                site.total_reads(),
                site.total_templates()
            ),
        )?;
    }

    out.flush()
        .map_err(|e| Error::file_io(path.to_string_lossy(), e))
}
