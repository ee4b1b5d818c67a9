//! # rangezip
//!
//! Extract ZIP archives that are only reachable through byte-range fetches,
//! without downloading the whole archive first.
//!
//! The pieces, leaves first:
//!
//! - [`ChunkedRangeReader`] turns any [`RangeSource`] (HTTP server, local
//!   file, ...) into a random-access byte source with chunk-level caching
//! - [`ArchiveCatalog`] parses the central directory through that reader
//! - [`is_within_base`] keeps every destination below the output root
//! - [`ExtractionScheduler`] filters, validates and writes entries,
//!   sequentially or with a worker pool, collecting per-entry errors
//! - [`SessionRegistry`] runs named, cancellable extractions of a selection
//!   of entries and streams their progress as text lines
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use rangezip::{Backend, ExtractOptions, ExtractionScheduler, RemoteArchive};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Backend::from_location("https://example.com/archive.zip").open().await?;
//!     let archive = Arc::new(RemoteArchive::open(source, 4 * 1024 * 1024).await?);
//!
//!     let scheduler = ExtractionScheduler::new(archive);
//!     let options = ExtractOptions::default().include("*.pdf").parallel(4);
//!     let report = scheduler.extract(Path::new("out"), &options).await?;
//!
//!     for error in &report.errors {
//!         eprintln!("{}: {}", error.file, error.reason);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod extract;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use extract::{
    ExtractMode, ExtractOptions, ExtractionError, ExtractionReport, ExtractionScheduler,
    ExtractionSession, SessionId, SessionRegistry, SessionState, is_within_base, should_extract,
};
pub use io::{Backend, ChunkedRangeReader, HttpRangeSource, LocalFileSource, RangeSource};
pub use zip::{ArchiveCatalog, ArchiveEntry, CompressionMethod, RemoteArchive};
