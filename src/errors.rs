use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error reading or writing \"{file}\": {source}")]
    FileIo {
        file: String,
        source: std::io::Error,
    },

    #[error("Error parsing records in \"{file}\": {source}")]
    ParseRecords {
        file: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unexpected format of headers in \"{file}\" at line {line}: {reason}\nheader1: {header1}\nheader2: {header2}")]
    Format {
        file: String,
        line: usize,
        reason: &'static str,
        header1: String,
        header2: String,
    },

    #[error("{0}")]
    NoMatch(String),

    #[error("File not found: {0}")]
    MissingInput(String),

    #[error("External aligner failed: {0}")]
    ExternalTool(String),

    #[error("Error parsing protocol definition:\n{source}")]
    ParseProtocol {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Could not parse \"{string}\" in \"{context}\": {reason}")]
    Parse {
        string: String,
        context: String,
        reason: &'static str,
    },
}

impl Error {
    pub fn file_io(file: impl AsRef<str>, source: std::io::Error) -> Self {
        Error::FileIo {
            file: file.as_ref().to_owned(),
            source,
        }
    }
}
