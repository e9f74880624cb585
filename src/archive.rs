use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::GwCloudError;

const COMPRESSION_LEVEL: u32 = 2;

/// Writes every entry below `directory` into a gzip compressed tar at
/// `destination`, named relative to `directory`.
pub fn build_job_archive(directory: &Path, destination: &Path) -> Result<(), GwCloudError> {
    let file = File::create(destination).map_err(|err| {
        GwCloudError::Filesystem(format!("create {}: {err}", destination.display()))
    })?;
    write_archive(directory, file)
}

/// Archives `directory` into a temporary `.tar.gz` in the system temp
/// directory. The file is removed when the handle is dropped.
pub fn temporary_job_archive(directory: &Path) -> Result<NamedTempFile, GwCloudError> {
    let archive = tempfile::Builder::new()
        .prefix("gwcloud-job-")
        .suffix(".tar.gz")
        .tempfile()
        .map_err(|err| GwCloudError::Filesystem(err.to_string()))?;
    let file = archive
        .reopen()
        .map_err(|err| GwCloudError::Filesystem(err.to_string()))?;
    write_archive(directory, file)?;
    Ok(archive)
}

fn write_archive(directory: &Path, file: File) -> Result<(), GwCloudError> {
    if !directory.is_dir() {
        return Err(GwCloudError::Archive(format!(
            "{} is not a directory",
            directory.display()
        )));
    }

    let encoder = GzEncoder::new(file, Compression::new(COMPRESSION_LEVEL));
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in walk_dir(directory)? {
        let path = entry.path;
        let name = path
            .strip_prefix(directory)
            .map_err(|err| GwCloudError::Archive(err.to_string()))?;
        debug!(entry = %name.display(), "adding to job archive");
        if entry.is_dir {
            builder
                .append_dir(name, &path)
                .map_err(|err| GwCloudError::Archive(format!("{}: {err}", path.display())))?;
        } else {
            builder
                .append_path_with_name(&path, name)
                .map_err(|err| GwCloudError::Archive(format!("{}: {err}", path.display())))?;
        }
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|err| GwCloudError::Archive(err.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct WalkEntry {
    path: PathBuf,
    /// A real directory; symlinks to directories are not descended into.
    is_dir: bool,
}

/// Every entry below `root`, parents before their children.
fn walk_dir(root: &Path) -> Result<Vec<WalkEntry>, GwCloudError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let mut entries = fs::read_dir(&path)
            .map_err(|err| GwCloudError::Filesystem(err.to_string()))?
            .map(|entry| -> std::io::Result<WalkEntry> {
                let entry = entry?;
                Ok(WalkEntry {
                    path: entry.path(),
                    is_dir: entry.file_type()?.is_dir(),
                })
            })
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|err| GwCloudError::Filesystem(err.to_string()))?;
        entries.sort();
        stack.extend(
            entries
                .iter()
                .rev()
                .filter(|entry| entry.is_dir)
                .map(|entry| entry.path.clone()),
        );
        items.extend(entries);
    }
    Ok(items)
}
