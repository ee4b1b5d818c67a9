use std::io;
use std::path::PathBuf;

/// Errors produced while reading, cataloguing or extracting a remote archive.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid read offset {offset} for a {len}-byte buffer")]
    InvalidOffset { offset: u64, len: usize },

    #[error("unexpected end of data at offset {offset}")]
    EndOfData { offset: u64 },

    #[error("range fetch failed for bytes {start}-{end}: {cause:#}")]
    RangeFetch {
        start: u64,
        end: u64,
        cause: anyhow::Error,
    },

    #[error("invalid ZIP archive: {0}")]
    Format(String),

    #[error("entry '{entry}' resolves outside the output root: '{resolved}'")]
    PathViolation { entry: String, resolved: PathBuf },

    #[error("unsupported compression method {method} for '{entry}'")]
    UnsupportedCompression { entry: String, method: u16 },

    #[error("checksum mismatch for '{entry}': expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        entry: String,
        expected: u32,
        actual: u32,
    },

    #[error("decompress '{entry}': {source}")]
    Decompress { entry: String, source: io::Error },

    #[error("{action} '{path}': {source}")]
    Fs {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    #[error("extract {file}: {source}")]
    Entry { file: String, source: Box<Error> },

    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("extraction cancelled")]
    Cancelled,

    #[error("unknown extraction session: {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn fs(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Fs {
            action,
            path,
            source,
        }
    }

    pub(crate) fn entry(file: impl Into<String>, source: Error) -> Self {
        Self::Entry {
            file: file.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
