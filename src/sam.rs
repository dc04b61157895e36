//! Minimal parsing of the mapper's SAM-format output.
//!
//! Only the fields the aggregation stage consumes are kept: identifier,
//! flag bits, 1-based position, CIGAR string, signed fragment size, and
//! the mapped sequence (whose length is the effective read length).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::errors::*;

/// SAM flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamFlags(pub u16);

impl SamFlags {
    pub fn multi_segment(&self) -> bool {
        self.0 & 0x1 != 0
    }

    pub fn proper_pair(&self) -> bool {
        self.0 & 0x2 != 0
    }

    pub fn unmapped(&self) -> bool {
        self.0 & 0x4 != 0
    }

    pub fn mate_unmapped(&self) -> bool {
        self.0 & 0x8 != 0
    }

    pub fn reverse(&self) -> bool {
        self.0 & 0x10 != 0
    }

    pub fn mate_reverse(&self) -> bool {
        self.0 & 0x20 != 0
    }

    pub fn first_in_template(&self) -> bool {
        self.0 & 0x40 != 0
    }

    pub fn last_in_template(&self) -> bool {
        self.0 & 0x80 != 0
    }
}

/// One alignment line of mapper output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamRecord {
    pub id: String,
    pub flags: SamFlags,
    /// 1-based reference position (0 when unmapped).
    pub pos: usize,
    pub cigar: String,
    /// Signed template fragment size.
    pub frag_size: i64,
    pub seq: String,
}

impl SamRecord {
    /// Parses one alignment line; header lines ('@') yield `None`.
    pub fn parse(line: &str, file: &str) -> Result<Option<SamRecord>> {
        if line.is_empty() || line.starts_with('@') {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 10 {
            return Err(Error::Parse {
                string: line.to_owned(),
                context: file.to_owned(),
                reason: "alignment line has fewer than 10 fields",
            });
        }

        let parse_num = |s: &str, reason: &'static str| -> Result<i64> {
            s.parse().map_err(|_| Error::Parse {
                string: s.to_owned(),
                context: file.to_owned(),
                reason,
            })
        };

        Ok(Some(SamRecord {
            id: fields[0].to_owned(),
            flags: SamFlags(parse_num(fields[1], "invalid flag field")? as u16),
            pos: parse_num(fields[3], "invalid position field")?.max(0) as usize,
            cigar: fields[5].to_owned(),
            frag_size: parse_num(fields[8], "invalid fragment size field")?,
            seq: fields[9].to_owned(),
        }))
    }

    pub fn soft_clipped(&self) -> bool {
        self.cigar.contains('S')
    }

    pub fn read_len(&self) -> usize {
        self.seq.len()
    }
}

/// Streaming reader over a SAM file, skipping header lines.
pub struct SamReader {
    reader: BufReader<File>,
    file: String,
}

impl SamReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::file_io(path.to_string_lossy(), e))?;
        Ok(Self {
            reader: BufReader::new(file),
            file: path.to_string_lossy().into_owned(),
        })
    }
}

impl Iterator for SamReader {
    type Item = Result<SamRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(Error::file_io(&self.file, e))),
            }

            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }

            match SamRecord::parse(&line, &self.file) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
