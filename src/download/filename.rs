//! Filename derivation, sanitization, and destination resolution.
//!
//! This module is the file-system collaborator used by the engine when it
//! plans where each target is written: it derives a safe filename from the
//! target, creates the output directory, and applies the duplicate policy.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use tracing::debug;
use url::Url;

use super::error::TransferError;
use crate::resume::ResumeStore;

/// Maximum filename length in bytes.
pub const MAX_FILENAME_BYTES: usize = 200;

/// What to do when the planned destination already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Write to `name_1.ext`, `name_2.ext`, ... instead.
    #[default]
    Rename,
    /// Leave the existing file alone and report it as already present.
    Skip,
    /// Truncate and rewrite the existing file.
    Overwrite,
}

impl DuplicatePolicy {
    /// Returns the lowercase name used in config files and CLI flags.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::Skip => "skip",
            Self::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a duplicate policy name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown duplicate policy '{0}' (expected rename, skip, or overwrite)")]
pub struct ParseDuplicatePolicyError(String);

impl FromStr for DuplicatePolicy {
    type Err = ParseDuplicatePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rename" => Ok(Self::Rename),
            "skip" => Ok(Self::Skip),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(ParseDuplicatePolicyError(other.to_string())),
        }
    }
}

/// Where a single-file transfer should write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationPlan {
    /// Write a fresh file at this path.
    Write(PathBuf),
    /// A resume marker exists for this path; reuse it untouched.
    Resume(PathBuf),
    /// The file exists and the policy is [`DuplicatePolicy::Skip`].
    AlreadyPresent(PathBuf),
}

impl DestinationPlan {
    /// The planned path, whatever the decision.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Write(path) | Self::Resume(path) | Self::AlreadyPresent(path) => path,
        }
    }
}

/// Creates `dir` and any missing parents.
///
/// # Errors
///
/// Returns [`TransferError::Io`] if the directory cannot be created.
pub async fn ensure_dir(dir: &Path) -> Result<(), TransferError> {
    if tokio::fs::metadata(dir).await.is_ok_and(|meta| meta.is_dir()) {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| TransferError::io(dir, e))?;
    debug!(dir = %dir.display(), "created output directory");
    Ok(())
}

/// Decides where a single-file transfer of `target` writes `filename`
/// inside `dir`.
///
/// With `resume` enabled, a destination whose resume marker records the
/// same target is reused so the transfer can continue from the bytes
/// already on disk. A marker left by another target does not make the
/// path reusable; the existing file is then handled per `policy` like any
/// other.
pub async fn resolve_destination(
    dir: &Path,
    filename: &str,
    target: &str,
    policy: DuplicatePolicy,
    resume: bool,
) -> DestinationPlan {
    let filename = safe_filename(filename);
    let path = dir.join(&filename);

    if resume {
        if let Some(marker) = ResumeStore::new().read(&path).await {
            if marker.target == target {
                return DestinationPlan::Resume(path);
            }
            debug!(
                path = %path.display(),
                marker_target = %marker.target,
                "resume marker belongs to another target"
            );
        }
    }

    if !path_exists(&path).await {
        return DestinationPlan::Write(path);
    }

    match policy {
        DuplicatePolicy::Skip => DestinationPlan::AlreadyPresent(path),
        DuplicatePolicy::Overwrite => DestinationPlan::Write(path),
        DuplicatePolicy::Rename => DestinationPlan::Write(resolve_unique_path(dir, &filename).await),
    }
}

/// Whether `path` exists. Errors probing it count as absent.
pub(crate) async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Derives a filename from the target's last path segment.
///
/// Falls back to `download_<index>.bin` when the target has no usable
/// segment (bare host, trailing slash, unparseable URL).
#[must_use]
pub fn filename_from_target(target: &str, index: usize) -> String {
    let fallback = || format!("download_{index}.bin");

    let Ok(url) = Url::parse(target) else {
        return fallback();
    };
    let Some(last) = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
    else {
        return fallback();
    };

    let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
        debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
        last.into()
    });
    let sanitized = sanitize_filename(&decoded);
    if sanitized.trim_matches('_').is_empty() {
        fallback()
    } else {
        sanitized
    }
}

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |` and control characters) with `_`, collapses runs of
/// whitespace into one space, and caps the result at
/// [`MAX_FILENAME_BYTES`] on a char boundary.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut prev_space = false;
    for c in name.trim().chars() {
        let mapped = match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => ' ',
            c if c.is_control() => '_',
            c => c,
        };
        if mapped == ' ' {
            if prev_space {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        sanitized.push(mapped);
    }

    let mut sanitized = truncate_on_char_boundary(&sanitized, MAX_FILENAME_BYTES).to_string();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if !is_safe_filename_segment(&sanitized) {
        sanitized = sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect();
    }
    sanitized
}

fn truncate_on_char_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Highest numeric suffix tried before falling back to a timestamp.
pub(crate) const MAX_RENAME_SUFFIX: u32 = 9_999;

/// Resolves a unique file path, adding a numeric suffix if the file exists.
///
/// Example: `file.pdf`, then `file_1.pdf`, `file_2.pdf`, ...
pub(crate) async fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    for n in 0..=MAX_RENAME_SUFFIX {
        let candidate = numbered_candidate(dir, filename, n);
        if !path_exists(&candidate).await {
            return candidate;
        }
    }
    timestamped_candidate(dir, filename)
}

/// The `n`-th rename candidate: `filename` itself for 0, then `stem_n.ext`.
pub(crate) fn numbered_candidate(dir: &Path, filename: &str, n: u32) -> PathBuf {
    let filename = safe_filename(filename);
    if n == 0 {
        return dir.join(filename);
    }
    let (stem, ext) = split_extension(&filename);
    dir.join(format!("{stem}_{n}{ext}"))
}

/// Last-resort candidate once every numeric suffix is taken.
pub(crate) fn timestamped_candidate(dir: &Path, filename: &str) -> PathBuf {
    let filename = safe_filename(filename);
    let (stem, ext) = split_extension(&filename);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    }
}

/// Sanitizes and rejects anything that could still escape `dir`.
fn safe_filename(filename: &str) -> String {
    let sanitized = sanitize_filename(filename);
    if sanitized.contains('/') || sanitized.contains('\\') || sanitized.trim_matches('_').is_empty()
    {
        "download.bin".to_string()
    } else {
        sanitized
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::resume::{ResumeMarker, marker_path};
    use tempfile::TempDir;

    // ==================== Sanitization Tests ====================

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file\\name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file*name?.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file<name>.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file|name.pdf"), "file_name.pdf");
    }

    #[test]
    fn test_sanitize_filename_collapses_whitespace() {
        assert_eq!(sanitize_filename("  my   video \t file.mp4 "), "my video file.mp4");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_sanitize_filename_caps_length_on_char_boundary() {
        let long = "é".repeat(150); // 300 bytes
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.len() <= MAX_FILENAME_BYTES);
        assert_eq!(sanitized.len(), 200);
        assert!(sanitized.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_sanitize_filename_preserves_valid_chars() {
        assert_eq!(sanitize_filename("file (1).pdf"), "file (1).pdf");
        assert_eq!(sanitize_filename("日本語.pdf"), "日本語.pdf");
    }

    // ==================== Filename Derivation Tests ====================

    #[test]
    fn test_filename_from_target_uses_last_segment() {
        assert_eq!(
            filename_from_target("https://example.com/files/report.pdf", 0),
            "report.pdf"
        );
        assert_eq!(
            filename_from_target("ftp://mirror.example.org/pub/iso/disk%20one.iso", 3),
            "disk one.iso"
        );
    }

    #[test]
    fn test_filename_from_target_fallback() {
        assert_eq!(filename_from_target("https://example.com/", 4), "download_4.bin");
        assert_eq!(filename_from_target("https://example.com", 0), "download_0.bin");
        assert_eq!(filename_from_target("not a url", 7), "download_7.bin");
    }

    // ==================== Duplicate Policy Tests ====================

    #[test]
    fn test_duplicate_policy_parse() {
        assert_eq!("rename".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Rename);
        assert_eq!("SKIP".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Skip);
        assert_eq!(
            " overwrite ".parse::<DuplicatePolicy>().unwrap(),
            DuplicatePolicy::Overwrite
        );
        let err = "merge".parse::<DuplicatePolicy>().unwrap_err();
        assert!(err.to_string().contains("merge"));
    }

    const TARGET: &str = "https://example.com/a.bin";

    async fn write_marker(path: &Path, target: &str) {
        ResumeStore::new()
            .write(path, &ResumeMarker::new(target, 10, 7))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_destination_fresh() {
        let dir = TempDir::new().unwrap();
        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Rename, true).await;
        assert_eq!(plan, DestinationPlan::Write(dir.path().join("a.bin")));
    }

    #[tokio::test]
    async fn test_resolve_destination_rename_adds_suffix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("a_1.bin"), b"x").unwrap();

        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Rename, false).await;
        assert_eq!(plan, DestinationPlan::Write(dir.path().join("a_2.bin")));
    }

    #[tokio::test]
    async fn test_resolve_destination_skip_and_overwrite() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();

        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Skip, false).await;
        assert_eq!(plan, DestinationPlan::AlreadyPresent(dir.path().join("a.bin")));

        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Overwrite, false).await;
        assert_eq!(plan, DestinationPlan::Write(dir.path().join("a.bin")));
    }

    #[tokio::test]
    async fn test_resolve_destination_reuses_path_with_own_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"partial").unwrap();
        write_marker(&path, TARGET).await;

        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Rename, true).await;
        assert_eq!(plan, DestinationPlan::Resume(path.clone()));

        // Resume disabled: the marker is ignored and the policy applies
        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Rename, false).await;
        assert_eq!(plan, DestinationPlan::Write(dir.path().join("a_1.bin")));
    }

    #[tokio::test]
    async fn test_resolve_destination_foreign_marker_falls_back_to_policy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"partial").unwrap();
        write_marker(&path, "https://mirror.example/a.bin").await;

        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Rename, true).await;
        assert_eq!(plan, DestinationPlan::Write(dir.path().join("a_1.bin")));

        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Skip, true).await;
        assert_eq!(plan, DestinationPlan::AlreadyPresent(path.clone()));

        assert_eq!(std::fs::read(&path).unwrap(), b"partial");
    }

    #[tokio::test]
    async fn test_resolve_destination_corrupt_marker_is_not_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"partial").unwrap();
        std::fs::write(marker_path(&path), b"{}").unwrap();

        let plan = resolve_destination(dir.path(), "a.bin", TARGET, DuplicatePolicy::Rename, true).await;
        assert_eq!(plan, DestinationPlan::Write(dir.path().join("a_1.bin")));
    }

    #[tokio::test]
    async fn test_resolve_unique_path_without_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(
            resolve_unique_path(dir.path(), "README").await,
            dir.path().join("README_1")
        );
    }

    #[test]
    fn test_numbered_candidate() {
        let dir = Path::new("/out");
        assert_eq!(numbered_candidate(dir, "a.zip", 0), dir.join("a.zip"));
        assert_eq!(numbered_candidate(dir, "a.zip", 2), dir.join("a_2.zip"));
        assert_eq!(numbered_candidate(dir, ".bashrc", 1), dir.join(".bashrc_1"));
    }

    #[tokio::test]
    async fn test_ensure_dir_creates_nested() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        // Idempotent
        ensure_dir(&nested).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_dir_fails_on_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        let err = ensure_dir(&file).await.unwrap_err();
        assert_eq!(err.kind(), crate::download::ErrorKind::FileSystem);
    }
}
