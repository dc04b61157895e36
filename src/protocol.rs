use serde::Deserialize;

use crate::errors::*;

/// Transposon flavor of the library being processed.
///
/// The flavor selects the default prefix sequence and, for Tn5, lifts the
/// TA-dinucleotide restriction on insertion sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Transposon {
    Himar1,
    Tn5,
}

impl Transposon {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Himar1" => Ok(Transposon::Himar1),
            "Tn5" => Ok(Transposon::Tn5),
            _ => Err(Error::Parse {
                string: s.to_owned(),
                context: "transposon type".to_owned(),
                reason: "expected Himar1 or Tn5",
            }),
        }
    }

    pub fn default_prefix(&self) -> &'static str {
        match self {
            Transposon::Himar1 => "ACTTATCAGCCAACCTGTTA",
            Transposon::Tn5 => "TAAGAGACAG",
        }
    }
}

impl std::fmt::Display for Transposon {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Transposon::Himar1 => write!(f, "Himar1"),
            Transposon::Tn5 => write!(f, "Tn5"),
        }
    }
}

/// Constant sequences flanking the variable regions of a read.
///
/// `prefix` is the transposon end carried at the start of read 1.
/// `adapter` marks the end of short inserts in read 1. `const1`..`const3`
/// bracket the barcode and genomic parts of read 2:
///
/// ```text
/// ----const1---- -barcode- ----const2---- ----genomic---- ----const3----
/// ```
///
/// The defaults are the Himar1 protocol constants; a custom protocol can
/// be loaded from a YAML definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Protocol {
    pub prefix: String,
    pub adapter: String,
    pub const1: String,
    pub const2: String,
    pub const3: String,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new(Transposon::Himar1)
    }
}

impl Protocol {
    pub fn new(transposon: Transposon) -> Self {
        Self {
            prefix: transposon.default_prefix().to_owned(),
            adapter: "CGACCACGACC".to_owned(),
            const1: "GTCAAGTCTCGCAGATGATAAGG".to_owned(),
            const2: "CTTGGTTTGGTCGTGGTCG".to_owned(),
            const3: "TAACAGGTTGGCT".to_owned(),
        }
    }

    /// Overrides the default prefix, e.g. from a custom primer sequence.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_owned();
        self
    }

    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(yaml).map_err(|e| Error::ParseProtocol {
            source: Box::new(e),
        })
    }

    pub fn prefix(&self) -> &[u8] {
        self.prefix.as_bytes()
    }

    pub fn adapter(&self) -> &[u8] {
        self.adapter.as_bytes()
    }

    pub fn const1(&self) -> &[u8] {
        self.const1.as_bytes()
    }

    pub fn const2(&self) -> &[u8] {
        self.const2.as_bytes()
    }

    pub fn const3(&self) -> &[u8] {
        self.const3.as_bytes()
    }
}
