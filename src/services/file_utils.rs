//! Shared file utility functions

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Video file extensions (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".ts", ".m2ts", ".mpg",
    ".mpeg",
];

/// Check if a file is a video file based on extension
pub fn is_video_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Expand files and directories into the video files they contain, sorted
/// per argument. Explicit file arguments are kept whatever their extension.
pub fn collect_video_files(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            warn!(path = %input.display(), "Input path does not exist");
            continue;
        }

        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_video_file(&p.to_string_lossy()))
            .collect();
        found.sort();
        debug!(path = %input.display(), count = found.len(), "Collected video files");
        files.extend(found);
    }
    files
}

/// Move a file, creating the destination directory. Tries a rename first
/// and falls back to copy+delete across filesystems.
pub async fn move_file(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "Rename failed, falling back to copy");
            let preexisting = tokio::fs::try_exists(destination).await.unwrap_or(true);
            if let Err(e) = tokio::fs::copy(source, destination).await {
                if !preexisting {
                    // Drop whatever part of the copy landed
                    let _ = tokio::fs::remove_file(destination).await;
                }
                return Err(e).with_context(|| {
                    format!("Failed to copy {} to {}", source.display(), destination.display())
                });
            }
            tokio::fs::remove_file(source)
                .await
                .with_context(|| format!("Failed to remove {}", source.display()))?;
            Ok(())
        }
    }
}

/// `dir/name`, or `dir/stem (n).ext` for the first `n` not already taken
pub fn unused_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => dir.join(format!("{} ({})", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file("movie.mkv"));
        assert!(is_video_file("/path/to/VIDEO.MP4"));
        assert!(!is_video_file("music.mp3"));
        assert!(!is_video_file("Alien (1979) [DVD].nfo"));
    }

    #[test]
    fn test_collect_video_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("sub/a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = collect_video_files(&[dir.path().to_path_buf()]);
        assert_eq!(files, vec![dir.path().join("b.mkv"), dir.path().join("sub/a.mp4")]);

        let explicit = collect_video_files(&[dir.path().join("notes.txt")]);
        assert_eq!(explicit.len(), 1);
    }

    #[tokio::test]
    async fn test_move_file_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mkv");
        std::fs::write(&source, b"data").unwrap();
        let dest = dir.path().join("a/b/out.mkv");

        move_file(&source, &dest).await.unwrap();
        assert!(!source.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_move_file_missing_source_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("lib/out.mkv");

        assert!(move_file(&dir.path().join("gone.mkv"), &dest).await.is_err());
        assert!(!dest.exists());
    }

    // Reading /proc/self/mem from offset 0 fails after the destination has
    // been created, and the rename fails across filesystems.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_move_file_failed_copy_removes_partial_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mkv");

        let result = move_file(Path::new("/proc/self/mem"), &dest).await;
        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_unused_path() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unused_path(dir.path(), "x.mkv"), dir.path().join("x.mkv"));
        std::fs::write(dir.path().join("x.mkv"), b"").unwrap();
        std::fs::write(dir.path().join("x (1).mkv"), b"").unwrap();
        assert_eq!(unused_path(dir.path(), "x.mkv"), dir.path().join("x (2).mkv"));
    }
}
