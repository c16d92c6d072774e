//! File system helpers.
//!
//! Small synchronous primitives shared by the engines: directory
//! creation, atomic writes, recursive copies and the hard-link-or-copy
//! used by `--link-duplicates`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Create a directory and all parents if missing.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write a file atomically: write to a temp file in the same directory,
/// sync, then rename over the target.
///
/// # Guarantees
///
/// - **Atomicity**: the target is never observed in a partial state
/// - **Durability**: content is synced to disk before the rename
/// - **Safety**: parent directories are created automatically
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;
        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Recursively copy a directory tree.
///
/// With `link` set, regular files are hard-linked instead of copied
/// where the filesystem allows it, falling back to a copy.
pub fn copy_dir_all(src: &Path, dst: &Path, link: bool) -> Result<()> {
    ensure_dir(dst)?;
    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&src_path, &dst_path, link)?;
        } else {
            link_or_copy_file(&src_path, &dst_path, link)?;
        }
    }
    Ok(())
}

/// Place a single file at `dst`, replacing anything already there.
pub fn link_or_copy_file(src: &Path, dst: &Path, link: bool) -> Result<()> {
    if dst.exists() {
        fs::remove_file(dst)
            .with_context(|| format!("Failed to replace file: {}", dst.display()))?;
    }
    if link && fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst).with_context(|| {
        format!("Failed to copy {} to {}", src.display(), dst.display())
    })?;
    Ok(())
}

/// The basename of a URL or path-like string, with any `#<hash>` suffix
/// stripped first.
pub fn url_basename(url: &str) -> String {
    let without_hash = url.split('#').next().unwrap_or(url);
    without_hash.rsplit('/').next().unwrap_or(without_hash).to_string()
}

/// All regular files directly under a directory. Missing directories
/// yield an empty list.
pub fn files_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
