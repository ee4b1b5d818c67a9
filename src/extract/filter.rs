use globset::{Glob, GlobMatcher};

use crate::error::{Error, Result};

/// Include/exclude glob filter applied to the final path segment of an entry.
///
/// An entry passes if it matches the include pattern (when one is set) and
/// does not match the exclude pattern (when one is set). Exclusion wins when
/// both match.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    include: Option<GlobMatcher>,
    exclude: Option<GlobMatcher>,
}

impl EntryFilter {
    /// Compile the patterns. Empty strings mean "no pattern".
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Match against the base name of `name`; directory components are
    /// never matched on their own.
    pub fn matches(&self, name: &str) -> bool {
        let base = base_name(name);
        if let Some(include) = &self.include {
            if !include.is_match(base) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(base) {
                return false;
            }
        }
        true
    }
}

/// One-shot form of [`EntryFilter::matches`]. An invalid pattern never matches.
pub fn should_extract(name: &str, include: &str, exclude: &str) -> bool {
    match EntryFilter::new(Some(include), Some(exclude)) {
        Ok(filter) => filter.matches(name),
        Err(_) => false,
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    match pattern {
        None | Some("") => Ok(None),
        Some(pattern) => Glob::new(pattern)
            .map(|glob| Some(glob.compile_matcher()))
            .map_err(|source| Error::Pattern {
                pattern: pattern.to_string(),
                source,
            }),
    }
}

fn base_name(name: &str) -> &str {
    let trimmed = name.trim_end_matches(['/', '\\']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}
