use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::Parser;

use crate::extract::{ExtractMode, ExtractOptions};

#[derive(Parser, Debug)]
#[command(name = "rangezip")]
#[command(version)]
#[command(about = "Extract ZIP archives from HTTP URLs or files using range reads", long_about = None)]
#[command(after_help = "Examples:\n  \
  rangezip -l https://example.com/archive.zip            list entries of a remote ZIP\n  \
  rangezip https://example.com/a.zip -d out --include '*.pdf' --parallel\n  \
  rangezip a.zip -d out docs/readme.txt docs/guide.pdf   extract two entries, Ctrl-C aborts")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Exact entry names to extract in a cancellable session (default: all, filtered)
    #[arg(value_name = "NAMES")]
    pub names: Vec<String>,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List entries verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write entry contents to stdout
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract into this directory
    #[arg(short = 'd', value_name = "DIR", default_value = ".")]
    pub extract_dir: PathBuf,

    /// Only extract entries whose file name matches this glob
    #[arg(long, value_name = "GLOB")]
    pub include: Option<String>,

    /// Skip entries whose file name matches this glob
    #[arg(long, value_name = "GLOB")]
    pub exclude: Option<String>,

    /// Extract entries with a pool of parallel workers
    #[arg(long)]
    pub parallel: bool,

    /// Number of workers for --parallel
    #[arg(long, value_name = "N", default_value = "4")]
    pub workers: NonZeroUsize,

    /// Range fetch chunk size in MiB
    #[arg(long, value_name = "MB", default_value_t = 16, env = "RANGEZIP_CHUNK_MB")]
    pub chunk_mb: u64,

    /// Do not record failing entries (extraction always continues past them)
    #[arg(long)]
    pub skip_errors: bool,

    /// Where to write the JSON error report (default: DIR/errors.json)
    #[arg(long, value_name = "PATH")]
    pub error_report: Option<PathBuf>,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_mb.saturating_mul(1024 * 1024)
    }

    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.is_very_quiet() {
            "error"
        } else {
            "warn"
        }
    }

    pub fn extract_options(&self) -> ExtractOptions {
        let mut options = ExtractOptions::default()
            .mode(if self.parallel {
                ExtractMode::Parallel(self.workers)
            } else {
                ExtractMode::Sequential
            })
            .record_errors(!self.skip_errors);
        options.include = self.include.clone();
        options.exclude = self.exclude.clone();
        options
    }

    pub fn error_report_path(&self) -> PathBuf {
        self.error_report
            .clone()
            .unwrap_or_else(|| self.extract_dir.join("errors.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parallel_extraction() {
        let cli = Cli::parse_from([
            "rangezip",
            "https://example.com/a.zip",
            "-d",
            "out",
            "--include",
            "*.pdf",
            "--parallel",
            "--workers",
            "8",
            "--skip-errors",
        ]);
        let options = cli.extract_options();
        assert_eq!(options.mode, ExtractMode::Parallel(NonZeroUsize::new(8).unwrap()));
        assert_eq!(options.include.as_deref(), Some("*.pdf"));
        assert!(!options.record_errors);
        assert_eq!(cli.error_report_path(), PathBuf::from("out/errors.json"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let parsed = Cli::try_parse_from(["rangezip", "a.zip", "--workers", "0"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn names_select_session_mode() {
        let cli = Cli::parse_from(["rangezip", "a.zip", "docs/a.txt", "b.txt", "--chunk-mb", "2"]);
        assert_eq!(cli.names, vec!["docs/a.txt", "b.txt"]);
        assert_eq!(cli.chunk_size(), 2 * 1024 * 1024);
        assert_eq!(cli.extract_options().mode, ExtractMode::Sequential);
    }
}
