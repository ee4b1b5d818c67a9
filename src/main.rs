//! Command-line front end for rangezip.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use rangezip::{
    Backend, Cli, Error, ExtractionScheduler, RemoteArchive, SessionRegistry, SessionState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let backend = Backend::from_location(&cli.source);
    let source = backend.open().await?;
    let archive = Arc::new(
        RemoteArchive::open(source, cli.chunk_size())
            .await
            .with_context(|| format!("read archive '{}'", cli.source))?,
    );

    if cli.list || cli.verbose {
        list_entries(&archive, cli.verbose);
    } else if cli.pipe {
        pipe_entries(&archive, &cli).await?;
    } else if !cli.names.is_empty() {
        run_session(archive.clone(), &cli).await?;
    } else {
        run_extraction(archive.clone(), &cli).await?;
    }

    if !cli.is_quiet() {
        let reader = archive.reader();
        eprintln!(
            "\nArchive size: {}, range requests: {}, chunks cached: {}",
            format_size(reader.size()),
            reader.fetch_count(),
            reader.cached_chunks()
        );
    }

    Ok(())
}

/// Print the catalog, either names only or as a table with sizes and dates.
fn list_entries(archive: &RemoteArchive, verbose: bool) {
    let entries = archive.entries();

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        if !verbose {
            println!("{}", entry.name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
}

/// Stream the contents of every matching file entry to stdout.
async fn pipe_entries(archive: &RemoteArchive, cli: &Cli) -> Result<()> {
    let filter = rangezip::extract::EntryFilter::new(cli.include.as_deref(), cli.exclude.as_deref())?;
    let selected: Vec<_> = archive
        .entries()
        .iter()
        .filter(|e| !e.is_directory)
        .filter(|e| {
            if cli.names.is_empty() {
                filter.matches(&e.name)
            } else {
                cli.names.contains(&e.name)
            }
        })
        .collect();

    let mut stdout = tokio::io::stdout();
    let show_names = selected.len() > 1;
    for entry in selected {
        if show_names {
            stdout
                .write_all(format!("--- {} ---\n", entry.name).as_bytes())
                .await?;
        }
        archive.copy_entry(entry, &mut stdout).await?;
    }
    Ok(())
}

/// Whole-archive extraction through the scheduler.
async fn run_extraction(archive: Arc<RemoteArchive>, cli: &Cli) -> Result<()> {
    let mut options = cli.extract_options();

    let bar = if cli.is_quiet() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("[{bar:40}] {pos}/{len} {percent}%") {
            bar.set_style(style.progress_chars("█░-"));
        }
        bar
    };
    let progress = bar.clone();
    options = options.on_progress(Arc::new(move |done: usize, total: usize| {
        progress.set_length(total as u64);
        progress.set_position(done as u64);
    }));

    let scheduler = ExtractionScheduler::new(archive);
    let report = scheduler.extract(&cli.extract_dir, &options).await?;
    bar.finish();

    if !cli.is_very_quiet() {
        eprintln!(
            "Extraction complete. Total: {}, Skipped: {}, Errors: {}",
            report.total,
            report.skipped,
            report.errors.len()
        );
    }

    if report.has_errors() {
        let path = cli.error_report_path();
        report.write_error_report(&path)?;
        eprintln!(
            "{} extraction errors written to {}",
            report.errors.len(),
            path.display()
        );
    }

    Ok(())
}

/// Cancellable extraction of the named entries; Ctrl-C requests cancellation.
async fn run_session(archive: Arc<RemoteArchive>, cli: &Cli) -> Result<()> {
    let registry = SessionRegistry::new();
    let mut session = registry.start(archive, cli.extract_dir.clone(), cli.names.clone());
    let id = session.id();

    let ctrl_c = {
        let registry = registry.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                // The session may already have finished.
                let _ = registry.cancel(&id);
            }
        })
    };

    while let Some(line) = session.next_line().await {
        if !cli.is_very_quiet() {
            println!("{line}");
        }
    }
    let outcome = session.finish().await;
    ctrl_c.abort();

    tracing::info!(session = %id, state = ?SessionState::from_outcome(&outcome), "session finished");
    match outcome {
        Ok(()) => Ok(()),
        Err(Error::Cancelled) => bail!("extraction aborted"),
        Err(err) => Err(err.into()),
    }
}

fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 {
        format!(
            "{:>4}%",
            100u64.saturating_sub(compressed * 100 / uncompressed)
        )
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
