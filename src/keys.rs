//! Object key construction.

use crate::error::TransferError;
use std::path::{Component, Path, PathBuf};

/// Splits `bucket[/prefix]` on the first `/`.
///
/// # Example
///
/// ```
/// use bucketsync::keys::bucket_and_prefix;
///
/// assert_eq!(bucket_and_prefix("bucket/dir/"), ("bucket".to_string(), "dir/".to_string()));
/// assert_eq!(bucket_and_prefix("bucket"), ("bucket".to_string(), String::new()));
/// ```
pub fn bucket_and_prefix(target: &str) -> (String, String) {
    match target.split_once('/') {
        Some((bucket, prefix)) => (bucket.trim_matches('/').to_string(), prefix.to_string()),
        None => (target.trim_matches('/').to_string(), String::new()),
    }
}

/// Returns `file` relative to `base_dir` with `/` separators.
pub fn relative_name(base_dir: &Path, file: &Path) -> Result<String, TransferError> {
    let relative = file.strip_prefix(base_dir).map_err(|_| {
        TransferError::Resolution(format!(
            "{} is not inside {}",
            file.display(),
            base_dir.display()
        ))
    })?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Ok(parts.join("/"))
}

/// Builds the destination key for `file`: `prefix`, `folder` and the path
/// relative to `base_dir`, joined with `/`.
///
/// Empty segments are dropped, so a trailing slash on the prefix or a
/// leading slash anywhere never produces `//` or a leading `/`.
///
/// # Example
///
/// ```
/// use bucketsync::keys::object_key;
/// use std::path::Path;
///
/// let key = object_key(Path::new("/ws/out"), Path::new("/ws/out/css/site.css"), "dir/", "v2").unwrap();
/// assert_eq!(key, "dir/v2/css/site.css");
/// ```
pub fn object_key(
    base_dir: &Path,
    file: &Path,
    prefix: &str,
    folder: &str,
) -> Result<String, TransferError> {
    let relative = relative_name(base_dir, file)?;
    Ok(join_key(&[prefix, folder, &relative]))
}

fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Maps an object name to a path under `target_dir`.
///
/// Names that would land outside `target_dir` are rejected.
pub fn local_path(target_dir: &Path, object_name: &str) -> Result<PathBuf, TransferError> {
    let name = Path::new(object_name);
    let escapes = object_name.is_empty()
        || name
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(TransferError::Download(format!(
            "refusing to write object {object_name:?} outside {}",
            target_dir.display()
        )));
    }
    Ok(target_dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_and_prefix() {
        assert_eq!(
            bucket_and_prefix("bucket/dir/sub"),
            ("bucket".to_string(), "dir/sub".to_string())
        );
        assert_eq!(
            bucket_and_prefix("bucket/"),
            ("bucket".to_string(), String::new())
        );
        assert_eq!(
            bucket_and_prefix("bucket"),
            ("bucket".to_string(), String::new())
        );
    }

    #[test]
    fn test_object_key_joins_segments() {
        let base = Path::new("/work/upload");
        let file = Path::new("/work/upload/sub/file.css");

        assert_eq!(object_key(base, file, "dir/", "").unwrap(), "dir/sub/file.css");
        assert_eq!(object_key(base, file, "", "").unwrap(), "sub/file.css");
        assert_eq!(
            object_key(base, file, "/dir", "/nested/").unwrap(),
            "dir/nested/sub/file.css"
        );
    }

    #[test]
    fn test_object_key_is_deterministic() {
        let base = Path::new("/a");
        let file = Path::new("/a/b/c.txt");
        let first = object_key(base, file, "p", "f").unwrap();
        for _ in 0..10 {
            assert_eq!(object_key(base, file, "p", "f").unwrap(), first);
        }
    }

    #[test]
    fn test_same_relative_name_from_different_bases() {
        let a = object_key(Path::new("/x/one"), Path::new("/x/one/f.txt"), "p", "").unwrap();
        let b = object_key(Path::new("/x/two"), Path::new("/x/two/f.txt"), "p", "").unwrap();
        // Each file carries its own base, so both map to the same relative key.
        assert_eq!(a, "p/f.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn test_object_key_outside_base() {
        let err = object_key(Path::new("/a/b"), Path::new("/a/c.txt"), "", "").unwrap_err();
        assert!(matches!(err, TransferError::Resolution(_)));
    }

    #[test]
    fn test_local_path() {
        let target = Path::new("/out");
        assert_eq!(
            local_path(target, "dir/file.txt").unwrap(),
            PathBuf::from("/out/dir/file.txt")
        );
        assert!(local_path(target, "../etc/passwd").is_err());
        assert!(local_path(target, "/etc/passwd").is_err());
        assert!(local_path(target, "a/./b").is_ok());
        assert!(local_path(target, "").is_err());
    }
}
