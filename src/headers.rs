//! Paired-header reconciliation.
//!
//! Downstream mapping requires mate 1 and mate 2 of a template to carry
//! byte-identical identifiers. Raw headers differ at exactly one
//! character (the mate index), which may sit anywhere in the header, and
//! carry separators the mapper mishandles. Each pair is collapsed to one
//! shared identifier; the reconciled streams replace the inputs only
//! after the whole pass succeeds.

use log::info;

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::*;
use crate::fastx::{write_record, ReadsFile};

const STAGING_SUFFIX: &str = ".staging";

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Collapses a pair of raw mate headers to their shared identifier.
///
/// Already-identical headers are returned as-is, so reconciliation is
/// idempotent on its own output. Otherwise the headers must have equal
/// length and differ at exactly one position; separators (' ', '/') are
/// replaced with '_', the differing character is deleted, and the
/// trailing mate-suffix character is dropped.
pub fn shared_id(id1: &str, id2: &str) -> Option<String> {
    if id1 == id2 {
        return Some(id1.to_owned());
    }
    if id1.len() != id2.len() {
        return None;
    }

    let a = id1.as_bytes();
    let b = id2.as_bytes();
    let i = a.iter().zip(b).position(|(x, y)| x != y)?;
    if a[i + 1..] != b[i + 1..] {
        return None;
    }

    let mut id: Vec<u8> = a
        .iter()
        .map(|&c| if c == b' ' || c == b'/' { b'_' } else { c })
        .collect();
    id.remove(i);
    id.pop();

    Some(String::from_utf8_lossy(&id).into_owned())
}

/// Rewrites both reads files in place with reconciled headers.
///
/// Output is staged to sibling files and renamed over the inputs only
/// after the full pass succeeds; any failure removes the staging files
/// and leaves the inputs untouched.
pub fn reconcile(reads1: &Path, reads2: &Path) -> Result<()> {
    let temp1 = staging_path(reads1);
    let temp2 = staging_path(reads2);

    if let Err(e) = reconcile_to(reads1, reads2, &temp1, &temp2) {
        let _ = fs::remove_file(&temp1);
        let _ = fs::remove_file(&temp2);
        return Err(e);
    }

    fs::rename(&temp1, reads1)
        .map_err(|e| Error::file_io(reads1.to_string_lossy(), e))?;
    fs::rename(&temp2, reads2)
        .map_err(|e| Error::file_io(reads2.to_string_lossy(), e))?;
    Ok(())
}

fn reconcile_to(reads1: &Path, reads2: &Path, out1: &Path, out2: &Path) -> Result<()> {
    let mut in1 = ReadsFile::open(reads1)?;
    let mut in2 = ReadsFile::open(reads2)?;

    let mut w1 = BufWriter::new(
        fs::File::create(out1).map_err(|e| Error::file_io(out1.to_string_lossy(), e))?,
    );
    let mut w2 = BufWriter::new(
        fs::File::create(out2).map_err(|e| Error::file_io(out2.to_string_lossy(), e))?,
    );

    let mut tot = 0usize;
    loop {
        let (r1, r2) = match (in1.next(), in2.next()) {
            (None, None) => break,
            (Some(r1), Some(r2)) => (r1?, r2?),
            _ => {
                return Err(Error::Format {
                    file: reads2.to_string_lossy().into_owned(),
                    line: 2 * tot + 1,
                    reason: "reads files do not have the same number of records",
                    header1: String::new(),
                    header2: String::new(),
                })
            }
        };

        let line = 2 * tot + 1;
        tot += 1;
        if tot % 1_000_000 == 0 {
            info!("{} read pairs processed", tot);
        }

        let Some(id) = shared_id(&r1.id, &r2.id) else {
            let reason = if r1.id.len() != r2.id.len() {
                "headers have unequal lengths"
            } else {
                "headers differ at more than the mate-index character"
            };
            return Err(Error::Format {
                file: reads2.to_string_lossy().into_owned(),
                line,
                reason,
                header1: format!(">{}", r1.id),
                header2: format!(">{}", r2.id),
            });
        };
        write_record(&mut w1, id.as_bytes(), &r1.seq)
            .map_err(|e| Error::file_io(out1.to_string_lossy(), e))?;
        write_record(&mut w2, id.as_bytes(), &r2.seq)
            .map_err(|e| Error::file_io(out2.to_string_lossy(), e))?;
    }

    w1.flush()
        .map_err(|e| Error::file_io(out1.to_string_lossy(), e))?;
    w2.flush()
        .map_err(|e| Error::file_io(out2.to_string_lossy(), e))?;
    Ok(())
}
