//! Writing archive entries to disk.
//!
//! [`ExtractionScheduler`] drives whole-archive runs (sequential or with a
//! worker pool) and returns an [`ExtractionReport`]; [`SessionRegistry`]
//! runs cancellable extractions of an explicit selection and streams status
//! lines while doing so. Both validate every destination with
//! [`is_within_base`] before writing.

mod filter;
mod guard;
mod report;
mod scheduler;
mod session;

pub use filter::{EntryFilter, should_extract};
pub use guard::{is_within_base, resolve_target, target_path, validate_target};
pub use report::{ExtractionError, ExtractionReport};
pub use scheduler::{
    ExtractMode, ExtractOptions, ExtractionJob, ExtractionScheduler, ProgressCallback,
};
pub use session::{
    ABORTED_LINE, COMPLETE_LINE, ExtractionSession, SessionId, SessionRegistry, SessionState,
};
