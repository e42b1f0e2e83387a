use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TariffError>;

/// Failures surfaced while loading, resolving or writing tariff sets.
///
/// A numeric code missing from the concordance is not an error: such rows
/// are dropped during the merge.
#[derive(Debug, Error)]
pub enum TariffError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("malformed row in {source_name} at line {line}, column {column} ('{value}'): {reason}")]
    MalformedRow {
        source_name: String,
        line: u64,
        column: usize,
        value: String,
        reason: String,
    },
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive error in {name}: {source}")]
    Archive {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("delimited read error in {name}: {source}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TariffError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
