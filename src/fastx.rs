//! Input-file handling: FASTA/FASTQ parsing, gzip decompression, and
//! the two-line working format used between pipeline stages.
//!
//! Every stage after input conversion operates on *reads* files: plain
//! ">header\nsequence\n" records, one sequence line per record. Quality
//! lines are never carried; only headers and sequences are consumed.

use flate2::read::MultiGzDecoder;
use log::info;
use needletail::parse_fastx_file;

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::*;

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Decompresses `path` (a `.gz` file) to its sibling without the suffix
/// and returns the sibling path. If the sibling already exists the work
/// is skipped.
pub fn uncompress(path: &Path) -> Result<PathBuf> {
    let out = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.ends_with(".gz") => {
            path.with_file_name(name.trim_end_matches(".gz").to_owned())
        }
        _ => return Ok(path.to_owned()),
    };

    if out.exists() {
        info!("skipping uncompress, file already exists: {}", out.display());
        return Ok(out);
    }

    let input = File::open(path).map_err(|e| Error::file_io(path_str(path), e))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut writer = BufWriter::new(
        File::create(&out).map_err(|e| Error::file_io(path_str(&out), e))?,
    );
    io::copy(&mut decoder, &mut writer).map_err(|e| Error::file_io(path_str(path), e))?;
    writer
        .flush()
        .map_err(|e| Error::file_io(path_str(&out), e))?;

    Ok(out)
}

/// Converts a FASTA/FASTQ input to the two-line reads format, keeping at
/// most `max_reads` records when a cap is given. Returns the number of
/// records written.
pub fn to_reads_file(input: &Path, output: &Path, max_reads: Option<usize>) -> Result<usize> {
    let mut reader = parse_fastx_file(input).map_err(|e| Error::ParseRecords {
        file: path_str(input),
        source: Box::new(e),
    })?;

    let mut writer = BufWriter::new(
        File::create(output).map_err(|e| Error::file_io(path_str(output), e))?,
    );

    let mut tot = 0;
    while let Some(record) = reader.next() {
        if let Some(max) = max_reads {
            if tot >= max {
                break;
            }
        }

        let record = record.map_err(|e| Error::ParseRecords {
            file: path_str(input),
            source: Box::new(e),
        })?;

        write_record(&mut writer, record.id(), &record.seq())
            .map_err(|e| Error::file_io(path_str(output), e))?;

        tot += 1;
        if tot % 1_000_000 == 0 {
            info!("{} reads processed", tot);
        }
    }

    writer
        .flush()
        .map_err(|e| Error::file_io(path_str(output), e))?;
    Ok(tot)
}

pub fn write_record(writer: &mut impl Write, id: &[u8], seq: &[u8]) -> io::Result<()> {
    writer.write_all(b">")?;
    writer.write_all(id)?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n")
}

/// Reads a reference FASTA into a single contiguous sequence, joining all
/// records in file order.
pub fn read_genome(path: &Path) -> Result<Vec<u8>> {
    let mut reader = parse_fastx_file(path).map_err(|e| Error::ParseRecords {
        file: path_str(path),
        source: Box::new(e),
    })?;

    let mut genome = Vec::new();
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| Error::ParseRecords {
            file: path_str(path),
            source: Box::new(e),
        })?;
        genome.extend_from_slice(&record.seq());
    }

    Ok(genome)
}

/// One record of a two-line reads file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadsRecord {
    /// Header line content, without the '>' marker.
    pub id: String,
    pub seq: Vec<u8>,
}

/// Streaming reader over a two-line reads file.
pub struct ReadsFile {
    reader: BufReader<File>,
    file: String,
}

impl ReadsFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::file_io(path_str(path), e))?;
        Ok(Self {
            reader: BufReader::new(file),
            file: path_str(path),
        })
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut buf = String::new();
        let n = self
            .reader
            .read_line(&mut buf)
            .map_err(|e| Error::file_io(&self.file, e))?;
        if n == 0 {
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }
}

impl Iterator for ReadsFile {
    type Item = Result<ReadsRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = match self.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };

        if !header.starts_with('>') {
            return Some(Err(Error::Parse {
                string: header,
                context: self.file.clone(),
                reason: "expected a '>' header line",
            }));
        }

        let seq = match self.next_line() {
            Ok(Some(line)) => line.into_bytes(),
            Ok(None) => {
                return Some(Err(Error::Parse {
                    string: header,
                    context: self.file.clone(),
                    reason: "header without a sequence line",
                }))
            }
            Err(e) => return Some(Err(e)),
        };

        Some(Ok(ReadsRecord {
            id: header[1..].to_owned(),
            seq,
        }))
    }
}

/// Length of the first sequence in a reads file, used as the nominal read
/// length in the statistics report.
pub fn first_seq_len(path: &Path) -> Result<Option<usize>> {
    let mut reads = ReadsFile::open(path)?;
    match reads.next() {
        Some(record) => Ok(Some(record?.seq.len())),
        None => Ok(None),
    }
}

/// Mean sequence length over a reads file, 0.0 when empty.
pub fn mean_seq_len(path: &Path) -> Result<f64> {
    let mut tot = 0usize;
    let mut n = 0usize;
    for record in ReadsFile::open(path)? {
        tot += record?.seq.len();
        n += 1;
    }
    if n == 0 {
        return Ok(0.0);
    }
    Ok(tot as f64 / n as f64)
}
