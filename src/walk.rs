use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

/// A candidate file produced by the walker. The length is captured at
/// enumeration time and drives the work unit's progress accounting.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub len: u64,
}

/// Builds the OR-combined mask set. Masks match file names, not full
/// paths, in the classic `*.txt` style.
pub fn build_patterns(masks: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for mask in masks {
        let glob = Glob::new(mask).map_err(|err| anyhow!("invalid file mask '{mask}': {err}"))?;
        builder.add(glob);
    }
    builder.build().context("unable to build file mask set")
}

/// Lazily enumerates non-empty files under `root` whose names match any
/// mask, in filesystem order. Enumeration errors surface as `Err` items
/// and are fatal to the run; per-file conversion errors belong to the
/// work unit, not here.
pub fn walk<'a>(
    root: &Path,
    patterns: &'a GlobSet,
    recurse: bool,
) -> impl Iterator<Item = Result<FileEntry>> + use<'a> {
    let max_depth = if recurse { usize::MAX } else { 1 };
    WalkDir::new(root)
        .follow_links(false)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err.into())),
            };
            if !entry.file_type().is_file() || !patterns.is_match(entry.file_name()) {
                return None;
            }
            let len = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => return Some(Err(err.into())),
            };
            if len == 0 {
                return None;
            }
            Some(Ok(FileEntry {
                path: entry.into_path(),
                len,
            }))
        })
}
