//! ZIP archive parsing and entry streaming over range-fetched data.
//!
//! - `structures`: fixed-format records (EOCD, ZIP64 trailer, header signatures)
//!   and the parsed [`ArchiveEntry`]
//! - `catalog`: locating and parsing the central directory
//! - `archive`: [`RemoteArchive`], which streams entry data out of the archive
//!
//! ## Supported Features
//!
//! - Standard ZIP format with archive comments
//! - ZIP64 end-of-central-directory records and extra fields
//! - STORED and DEFLATE compression methods
//!
//! No encryption, multi-disk archives or other compression methods.

mod archive;
mod catalog;
mod structures;

pub use archive::{COPY_BUFFER_SIZE, RemoteArchive};
pub use catalog::ArchiveCatalog;
pub use structures::{ArchiveEntry, CompressionMethod};
