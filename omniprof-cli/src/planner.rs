//! Profile Planner
//!
//! Expands command-line paths into the list of scripts to profile.
//!
//! - Files are taken as given
//! - Directories are walked for `*.py` files, skipping hidden directories,
//!   bytecode caches and virtual environments
//! - Directory symlinks are not followed; a file reachable under several
//!   names is profiled once
//! - An optional regex is matched against each file's path
//!
//! Ordering: files are sorted by path for deterministic execution.

use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory names never descended into
const SKIPPED_DIRS: &[&str] = &[
    "__pycache__",
    "venv",
    "env",
    "site-packages",
    "node_modules",
];

/// Files selected for profiling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePlan {
    /// Ordered, de-duplicated scripts
    pub files: Vec<PathBuf>,
}

impl ProfilePlan {
    /// True when nothing matched
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn skip_dir(dir: &Path) -> bool {
    let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    // A virtual environment carries pyvenv.cfg whatever it is called
    name.starts_with('.') || SKIPPED_DIRS.contains(&name) || dir.join("pyvenv.cfg").is_file()
}

fn collect_scripts(dir: &Path, files: &mut Vec<PathBuf>) {
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || !skip_dir(e.path()));
    for entry in walker {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "py") && path.is_file() {
                    files.push(entry.into_path());
                }
            }
            Err(e) => tracing::warn!("Skipping unreadable entry under {}: {}", dir.display(), e),
        }
    }
}

/// Keep the first path of every file, comparing resolved locations
fn dedup_resolved(files: &mut Vec<PathBuf>) {
    let mut seen = HashSet::new();
    files.retain(|f| seen.insert(std::fs::canonicalize(f).unwrap_or_else(|_| f.clone())));
}

/// Build the plan from command-line paths
pub fn build_plan(paths: &[PathBuf], filter: Option<&Regex>) -> anyhow::Result<ProfilePlan> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_scripts(path, &mut files);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(anyhow::anyhow!("No such file or directory: {}", path.display()));
        }
    }

    if let Some(re) = filter {
        files.retain(|f| re.is_match(&f.to_string_lossy()));
    }
    files.sort();
    dedup_resolved(&mut files);

    Ok(ProfilePlan { files })
}
