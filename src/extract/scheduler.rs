//! Filtering, validating and writing archive entries to disk.
//!
//! A run walks the catalog once, drops entries rejected by the
//! [`EntryFilter`], and turns the rest into [`ExtractionJob`]s which are
//! executed either one after another or by a fixed pool of workers fed from a
//! bounded queue. A failing entry never stops the run: its error is recorded
//! (unless recording is disabled) and the next entry is attempted.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::zip::{ArchiveEntry, RemoteArchive};

use super::filter::EntryFilter;
use super::guard::{normalized, target_path, validate_target};
use super::report::{ExtractionError, ExtractionReport};

/// Called with `(processed, matched)` after every finished entry.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractMode {
    /// One entry at a time, in catalog order.
    #[default]
    Sequential,
    /// A fixed pool of workers draining a bounded job queue.
    Parallel(NonZeroUsize),
}

#[derive(Clone)]
pub struct ExtractOptions {
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub mode: ExtractMode,
    /// Whether per-entry failures end up in the report. Failures never stop
    /// the run either way.
    pub record_errors: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            include: None,
            exclude: None,
            mode: ExtractMode::Sequential,
            record_errors: true,
            on_progress: None,
        }
    }
}

impl ExtractOptions {
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include = Some(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude = Some(pattern.into());
        self
    }

    pub fn mode(mut self, mode: ExtractMode) -> Self {
        self.mode = mode;
        self
    }

    /// Use `workers` parallel workers; zero falls back to sequential.
    pub fn parallel(mut self, workers: usize) -> Self {
        self.mode = NonZeroUsize::new(workers).map_or(ExtractMode::Sequential, ExtractMode::Parallel);
        self
    }

    pub fn record_errors(mut self, record: bool) -> Self {
        self.record_errors = record;
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

/// One matched entry and where it should be written.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    /// Position of the entry in the catalog.
    pub index: usize,
    pub entry: ArchiveEntry,
    pub target: PathBuf,
}

pub struct ExtractionScheduler {
    archive: Arc<RemoteArchive>,
}

impl ExtractionScheduler {
    pub fn new(archive: Arc<RemoteArchive>) -> Self {
        Self { archive }
    }

    pub fn archive(&self) -> &Arc<RemoteArchive> {
        &self.archive
    }

    /// Catalog entries; no I/O.
    pub fn list_entries(&self) -> &[ArchiveEntry] {
        self.archive.entries()
    }

    /// Extract every entry passing the filter in `options` below `dest`.
    ///
    /// Only configuration problems (bad glob, unusable destination) fail the
    /// whole call; per-entry failures are reported in the returned report.
    pub async fn extract(&self, dest: &Path, options: &ExtractOptions) -> Result<ExtractionReport> {
        let filter = EntryFilter::new(options.include.as_deref(), options.exclude.as_deref())?;

        tokio::fs::create_dir_all(dest)
            .await
            .map_err(Error::fs("create output directory", dest))?;
        let base = std::path::absolute(dest).map_err(Error::fs("resolve output directory", dest))?;

        let entries = self.archive.entries();
        let mut report = ExtractionReport {
            total: entries.len(),
            ..Default::default()
        };

        let mut jobs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if !filter.matches(&entry.name) {
                debug!(entry = %entry.name, "skipping (filtered)");
                report.skipped += 1;
                continue;
            }
            jobs.push(ExtractionJob {
                index,
                entry: entry.clone(),
                target: target_path(&base, &entry.name),
            });
        }

        info!(
            total = report.total,
            matched = jobs.len(),
            mode = ?options.mode,
            dest = %base.display(),
            "starting extraction"
        );

        let tally = match options.mode {
            ExtractMode::Sequential => self.run_sequential(&base, jobs, options).await,
            ExtractMode::Parallel(workers) => {
                self.run_parallel(Arc::new(base), jobs, workers, options)
                    .await?
            }
        };

        report.extracted = tally.extracted;
        report.errors = tally.into_errors();

        info!(
            total = report.total,
            skipped = report.skipped,
            extracted = report.extracted,
            errors = report.errors.len(),
            "extraction complete"
        );
        Ok(report)
    }

    async fn run_sequential(
        &self,
        base: &Path,
        jobs: Vec<ExtractionJob>,
        options: &ExtractOptions,
    ) -> Tally {
        let matched = jobs.len();
        let mut tally = Tally::default();

        for (done, job) in jobs.iter().enumerate() {
            let result = extract_job(&self.archive, base, job).await;
            tally.record(job, result, options.record_errors);
            if let Some(progress) = &options.on_progress {
                progress(done + 1, matched);
            }
        }

        tally
    }

    async fn run_parallel(
        &self,
        base: Arc<PathBuf>,
        jobs: Vec<ExtractionJob>,
        workers: NonZeroUsize,
        options: &ExtractOptions,
    ) -> Result<Tally> {
        let workers = workers.get();
        let matched = jobs.len();
        let (tx, rx) = mpsc::channel::<Vec<ExtractionJob>>(workers * 2);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared::default());

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let archive = self.archive.clone();
            let base = base.clone();
            let rx = rx.clone();
            let shared = shared.clone();
            let progress = options.on_progress.clone();
            let record = options.record_errors;

            pool.spawn(async move {
                loop {
                    let group = rx.lock().await.recv().await;
                    let Some(group) = group else { break };

                    for job in group {
                        let result = extract_job(&archive, &base, &job).await;
                        shared
                            .tally
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .record(&job, result, record);

                        let done = shared.processed.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(progress) = &progress {
                            progress(done, matched);
                        }
                    }
                }
                debug!(worker, "worker drained queue");
            });
        }
        // Only workers hold the receiver now, so a dead pool fails the sends below.
        drop(rx);

        for group in group_by_target(jobs) {
            if tx.send(group).await.is_err() {
                break;
            }
        }
        drop(tx);

        while let Some(joined) = pool.join_next().await {
            joined?;
        }

        let tally = std::mem::take(
            &mut *shared
                .tally
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        Ok(tally)
    }
}

/// Split jobs into groups sharing one destination, in catalog order.
///
/// A group is handled by a single worker, one job after another, so an entry
/// name repeated in the archive ends with the last entry's bytes, as in a
/// sequential run.
fn group_by_target(jobs: Vec<ExtractionJob>) -> Vec<Vec<ExtractionJob>> {
    let mut groups: Vec<Vec<ExtractionJob>> = Vec::with_capacity(jobs.len());
    let mut by_target: HashMap<PathBuf, usize> = HashMap::new();

    for job in jobs {
        match by_target.entry(normalized(&job.target)) {
            Entry::Occupied(slot) => groups[*slot.get()].push(job),
            Entry::Vacant(slot) => {
                slot.insert(groups.len());
                groups.push(vec![job]);
            }
        }
    }
    groups
}

#[derive(Default)]
struct Shared {
    processed: AtomicUsize,
    tally: Mutex<Tally>,
}

#[derive(Default)]
struct Tally {
    extracted: usize,
    errors: Vec<(usize, ExtractionError)>,
}

impl Tally {
    fn record(&mut self, job: &ExtractionJob, result: Result<()>, record_errors: bool) {
        match result {
            Ok(()) => {
                self.extracted += 1;
                debug!(entry = %job.entry.name, target = %job.target.display(), "extracted");
            }
            Err(err) => {
                warn!(entry = %job.entry.name, error = %err, "failed to extract entry");
                if record_errors {
                    self.errors
                        .push((job.index, ExtractionError::from_error(&job.entry.name, &err)));
                }
            }
        }
    }

    fn into_errors(mut self) -> Vec<ExtractionError> {
        self.errors.sort_by_key(|(index, _)| *index);
        self.errors.into_iter().map(|(_, err)| err).collect()
    }
}

/// Write one entry below `base`, re-validating its target first.
pub(crate) async fn extract_job(
    archive: &RemoteArchive,
    base: &Path,
    job: &ExtractionJob,
) -> Result<()> {
    let target = validate_target(base, &job.entry.name, &job.target)?;

    if job.entry.is_directory {
        return create_dirs(&target).await;
    }

    if let Some(parent) = target.parent() {
        create_dirs(parent).await?;
    }
    let mut file = tokio::fs::File::create(&target)
        .await
        .map_err(Error::fs("create file", &target))?;
    archive.copy_entry(&job.entry, &mut file).await?;
    Ok(())
}

async fn create_dirs(path: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder
        .create(path)
        .await
        .map_err(Error::fs("create directory", path))
}
