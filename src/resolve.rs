//! Source specification resolution.
//!
//! A source specification is one or more comma-separated segments. Each
//! segment is either a literal path (a file, or a directory walked
//! recursively) or a glob pattern. Glob patterns support `*`, `?`, `[...]`,
//! `{a,b}` and at most one recursive `**` segment.
//!
//! Every resolved file carries the base directory its object key is computed
//! from:
//!
//! - a literal file, or a file matched directly by a glob, uses its parent;
//! - a literal directory uses itself;
//! - a directory matched by a glob uses its parent, so the matched name stays
//!   part of the key;
//! - a file found under `base/**` uses `base`.

use crate::error::TransferError;
use crate::keys::relative_name;
use crate::types::ResolvedFile;
use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', ']', '{'];

const RECURSIVE_WILDCARD: &str = "**";

/// Expands source specifications into concrete file lists.
#[derive(Debug, Clone)]
pub struct PatternResolver {
    working_dir: PathBuf,
}

impl PatternResolver {
    /// Creates a resolver that interprets relative segments against
    /// `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    /// Creates a resolver rooted at the process working directory.
    pub fn from_current_dir() -> Result<Self, TransferError> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// Directory relative segments are resolved against.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Resolves `source` into regular files, dropping those matched by any
    /// pattern in `ignore`.
    ///
    /// Files are returned once each, in the order they were first found.
    pub fn resolve(&self, source: &str, ignore: &str) -> Result<Vec<ResolvedFile>, TransferError> {
        let segments = split_patterns(source);
        if segments.is_empty() {
            return Err(TransferError::Resolution(
                "source specification is empty".to_string(),
            ));
        }
        let ignore = IgnoreSet::parse(ignore)?;

        if segments.iter().any(|s| Path::new(s).is_relative()) {
            info!("source path relative to {}", self.working_dir.display());
        }

        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for segment in segments {
            let absolute = self.absolutize(segment);
            let found = if is_glob(segment) {
                expand_glob(segment, &absolute)?
            } else {
                resolve_literal(&absolute)?
            };
            debug!("{} resolved to {} file(s)", segment, found.len());

            for file in found {
                if ignore.is_ignored(&file)? {
                    debug!("ignoring {}", file.path.display());
                    continue;
                }
                if seen.insert(file.path.clone()) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }

    fn absolutize(&self, segment: &str) -> PathBuf {
        // Rebuilding from components drops interior `.` segments.
        self.working_dir.join(segment).components().collect()
    }
}

/// Splits a comma-separated pattern list, keeping commas inside `{...}`
/// alternations. Segments are trimmed and empty ones dropped.
pub(crate) fn split_patterns(spec: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in spec.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                segments.push(&spec[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&spec[start..]);
    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_glob(segment: &str) -> bool {
    segment.contains(GLOB_METACHARACTERS)
}

fn compile(pattern: &str) -> Result<GlobMatcher, TransferError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| TransferError::Configuration(format!("invalid pattern {pattern:?}: {e}")))
}

fn resolve_literal(path: &Path) -> Result<Vec<ResolvedFile>, TransferError> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            TransferError::Resolution(format!("{} does not exist", path.display()))
        }
        _ => TransferError::Resolution(format!("{}: {}", path.display(), e)),
    })?;

    if metadata.is_dir() {
        walk_directory(path, path)
    } else if metadata.is_file() {
        Ok(vec![file_with_parent_base(path.to_path_buf())])
    } else {
        Err(TransferError::Resolution(format!(
            "{} is not a regular file or directory",
            path.display()
        )))
    }
}

fn file_with_parent_base(path: PathBuf) -> ResolvedFile {
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    ResolvedFile { path, base_dir }
}

/// Splits an absolute pattern into the leading literal directory and the
/// remaining wildcard components.
fn split_literal_root(pattern: &Path) -> (PathBuf, Vec<String>) {
    let mut root = PathBuf::new();
    let mut rest = Vec::new();
    for component in pattern.components() {
        let text = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !(matches!(component, Component::Normal(_)) && is_glob(&text)) {
            root.push(component);
        } else {
            rest.push(text.into_owned());
        }
    }
    (root, rest)
}

fn expand_glob(segment: &str, absolute: &Path) -> Result<Vec<ResolvedFile>, TransferError> {
    if segment.matches(RECURSIVE_WILDCARD).count() > 1 {
        return Err(TransferError::Resolution(format!(
            "pattern {segment:?} uses `**` more than once"
        )));
    }

    let (root, rest) = split_literal_root(absolute);
    match rest.iter().position(|c| c.contains(RECURSIVE_WILDCARD)) {
        Some(0) if rest[0] == RECURSIVE_WILDCARD => {
            expand_recursive(segment, &root, &rest[1..].join("/"))
        }
        Some(0) => Err(TransferError::Configuration(format!(
            "pattern {segment:?}: `**` must be a whole path segment"
        ))),
        Some(_) => Err(TransferError::Configuration(format!(
            "pattern {segment:?}: the part before `**` must be a literal directory"
        ))),
        None => expand_single_level(segment, &root, &rest),
    }
}

/// Expands a pattern without `**`. Matches sit at a fixed depth below the
/// literal root, so each wildcard component is checked against one level of
/// the walk and non-matching directories are pruned.
fn expand_single_level(
    segment: &str,
    root: &Path,
    components: &[String],
) -> Result<Vec<ResolvedFile>, TransferError> {
    let matchers = components
        .iter()
        .map(|c| compile(c))
        .collect::<Result<Vec<_>, _>>()?;
    if !root.is_dir() {
        return Err(TransferError::Resolution(format!(
            "pattern {segment:?} matched no files"
        )));
    }

    let depth = matchers.len();
    // No min_depth: walkdir skips the filter for entries above it.
    let walker = WalkDir::new(root)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || matchers[entry.depth() - 1].is_match(entry.file_name())
        });

    let mut matched = 0usize;
    let mut files = Vec::new();
    for entry in walker {
        let entry = strict_entry(segment, entry)?;
        if entry.depth() != depth {
            continue;
        }
        match classify(&entry) {
            EntryKind::File => {
                matched += 1;
                files.push(file_with_parent_base(entry.into_path()));
            }
            EntryKind::Directory => {
                matched += 1;
                let base = entry
                    .path()
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                files.extend(walk_directory(entry.path(), &base)?);
            }
            EntryKind::Other => {}
        }
    }

    if matched == 0 {
        return Err(TransferError::Resolution(format!(
            "pattern {segment:?} matched no files"
        )));
    }
    Ok(files)
}

/// Expands `base/**/suffix`: every regular file under `base` whose path
/// relative to `base` matches `suffix` at any depth.
fn expand_recursive(segment: &str, base: &Path, suffix: &str) -> Result<Vec<ResolvedFile>, TransferError> {
    let matcher = if suffix.is_empty() {
        None
    } else {
        Some(compile(&format!("{RECURSIVE_WILDCARD}/{suffix}"))?)
    };
    if !base.is_dir() {
        return Err(TransferError::Resolution(format!(
            "pattern {segment:?}: {} is not a directory",
            base.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(base).min_depth(1).sort_by_file_name() {
        let entry = strict_entry(segment, entry)?;
        if classify(&entry) != EntryKind::File {
            continue;
        }
        let keep = match &matcher {
            Some(m) => m.is_match(relative_name(base, entry.path())?),
            None => true,
        };
        if keep {
            files.push(ResolvedFile {
                path: entry.into_path(),
                base_dir: base.to_path_buf(),
            });
        }
    }

    if files.is_empty() {
        return Err(TransferError::Resolution(format!(
            "pattern {segment:?} matched no files"
        )));
    }
    Ok(files)
}

/// Walks `dir` recursively. Entries that cannot be read because of
/// permissions are skipped with a warning.
fn walk_directory(dir: &Path, base_dir: &Path) -> Result<Vec<ResolvedFile>, TransferError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_permission_denied(&e) => {
                warn!("skipping unreadable entry: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if classify(&entry) != EntryKind::File {
            continue;
        }
        match fs::File::open(entry.path()) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!("skipping {}: {}", entry.path().display(), e);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        files.push(ResolvedFile {
            path: entry.into_path(),
            base_dir: base_dir.to_path_buf(),
        });
    }
    Ok(files)
}

fn strict_entry(
    segment: &str,
    entry: walkdir::Result<DirEntry>,
) -> Result<DirEntry, TransferError> {
    entry.map_err(|e| {
        if is_permission_denied(&e) {
            TransferError::Resolution(format!("pattern {segment:?}: {e}"))
        } else {
            TransferError::WalkError(e)
        }
    })
}

fn is_permission_denied(e: &walkdir::Error) -> bool {
    e.io_error()
        .is_some_and(|io| io.kind() == io::ErrorKind::PermissionDenied)
}

#[derive(Debug, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
    Other,
}

/// Symlinks are judged by their target. Broken links, and links to
/// directories found during a walk, are not followed.
fn classify(entry: &DirEntry) -> EntryKind {
    let file_type = entry.file_type();
    if file_type.is_file() {
        EntryKind::File
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        match fs::metadata(entry.path()) {
            Ok(m) if m.is_file() => EntryKind::File,
            Ok(m) if m.is_dir() && entry.depth() == 0 => EntryKind::Directory,
            Ok(_) => EntryKind::Other,
            Err(e) => {
                debug!("skipping broken link {}: {}", entry.path().display(), e);
                EntryKind::Other
            }
        }
    } else {
        EntryKind::Other
    }
}

/// Ignore patterns, matched against a file's path relative to its base.
struct IgnoreSet {
    set: Option<GlobSet>,
}

impl IgnoreSet {
    fn parse(spec: &str) -> Result<Self, TransferError> {
        let patterns = split_patterns(spec);
        if patterns.is_empty() {
            return Ok(Self { set: None });
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    TransferError::Configuration(format!("invalid ignore pattern {pattern:?}: {e}"))
                })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| TransferError::Configuration(format!("invalid ignore patterns: {e}")))?;
        Ok(Self { set: Some(set) })
    }

    fn is_ignored(&self, file: &ResolvedFile) -> Result<bool, TransferError> {
        match &self.set {
            Some(set) => Ok(set.is_match(relative_name(&file.base_dir, &file.path)?)),
            None => Ok(false),
        }
    }
}
