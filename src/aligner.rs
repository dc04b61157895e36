//! The external short-read mapper, behind a trait so aggregation can be
//! tested against synthetic alignment records.

use log::{info, warn};

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::errors::*;

/// Maps reads against a reference, producing a SAM-format file.
pub trait Aligner {
    fn map_single(&self, reference: &Path, reads: &Path, out_sam: &Path) -> Result<()>;

    fn map_paired(
        &self,
        reference: &Path,
        reads1: &Path,
        reads2: &Path,
        out_sam: &Path,
    ) -> Result<()>;
}

/// BWA invoked as a subprocess: `index` (once per reference), `aln` per
/// reads file, then `samse`/`sampe` to emit SAM.
pub struct Bwa {
    exe: PathBuf,
}

impl Bwa {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    fn ensure_index(&self, reference: &Path) -> Result<()> {
        let mut amb = OsString::from(reference.as_os_str());
        amb.push(".amb");
        if Path::new(&amb).exists() {
            return Ok(());
        }
        self.run(&[reference.as_os_str()], "index", None)
    }

    /// Runs one bwa subcommand, redirecting stdout to `out` when given.
    ///
    /// The child's stderr is drained line-by-line while it runs, both to
    /// surface permission failures promptly and to avoid pipe-buffer
    /// deadlock on chatty runs.
    fn run(&self, args: &[&std::ffi::OsStr], subcommand: &str, out: Option<&Path>) -> Result<()> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg(subcommand).args(args);

        match out {
            Some(path) => {
                let file = File::create(path)
                    .map_err(|e| Error::file_io(path.to_string_lossy(), e))?;
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::inherit());
            }
        }
        cmd.stderr(Stdio::piped());

        info!(
            "running: {} {} {}",
            self.exe.display(),
            subcommand,
            args.iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = cmd.spawn().map_err(|e| {
            Error::ExternalTool(format!("could not run {}: {}", self.exe.display(), e))
        })?;

        let mut denied = None;
        if let Some(stderr) = child.stderr.take() {
            for line in BufReader::new(stderr).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                if line.contains("Permission denied") && denied.is_none() {
                    denied = Some(line.clone());
                }
                warn!("{}", line);
            }
        }

        let status = child.wait().map_err(|e| {
            Error::ExternalTool(format!("waiting for {}: {}", self.exe.display(), e))
        })?;

        if let Some(line) = denied {
            return Err(Error::ExternalTool(format!(
                "bwa encountered a permissions error:\n{}",
                line
            )));
        }
        if !status.success() {
            return Err(Error::ExternalTool(format!(
                "bwa {} exited with {}",
                subcommand, status
            )));
        }

        Ok(())
    }

    fn aln(&self, reference: &Path, reads: &Path, sai: &Path) -> Result<()> {
        self.run(&[reference.as_os_str(), reads.as_os_str()], "aln", Some(sai))
    }
}

impl Aligner for Bwa {
    fn map_single(&self, reference: &Path, reads: &Path, out_sam: &Path) -> Result<()> {
        self.ensure_index(reference)?;

        let sai = out_sam.with_extension("sai1");
        self.aln(reference, reads, &sai)?;
        self.run(
            &[reference.as_os_str(), sai.as_os_str(), reads.as_os_str()],
            "samse",
            Some(out_sam),
        )
    }

    fn map_paired(
        &self,
        reference: &Path,
        reads1: &Path,
        reads2: &Path,
        out_sam: &Path,
    ) -> Result<()> {
        self.ensure_index(reference)?;

        let sai1 = out_sam.with_extension("sai1");
        let sai2 = out_sam.with_extension("sai2");
        self.aln(reference, reads1, &sai1)?;
        self.aln(reference, reads2, &sai2)?;
        self.run(
            &[
                reference.as_os_str(),
                sai1.as_os_str(),
                sai2.as_os_str(),
                reads1.as_os_str(),
                reads2.as_os_str(),
            ],
            "sampe",
            Some(out_sam),
        )
    }
}
