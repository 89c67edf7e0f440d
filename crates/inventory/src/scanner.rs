//! Dataset directory walk.
//!
//! Enumerates candidate files first (cheap), enforces the upload ceiling,
//! then hashes each file while reporting fractional progress as
//! bytes-hashed / total-bytes.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use datalift_protocol::FileRecord;
use datalift_protocol::constants::MAX_INVENTORY_FILES;
use tracing::debug;

use crate::InventoryError;
use crate::hasher::sha1_file;

/// Progress callback: fraction of total bytes hashed so far, 0.0–1.0.
pub type ScanProgressFn = dyn Fn(f64) + Send + Sync;

const CACHE_INFO_SUFFIX: &str = "_CacheInfo.txt";

struct Candidate {
    local_path: PathBuf,
    subdir: String,
    file_name: String,
    size: u64,
}

/// Builds the upload inventory for a dataset directory.
///
/// Files are enumerated in a stable order (name-sorted within each
/// directory, parents before children). With `recurse` false only the top
/// level is considered. Fails with [`InventoryError::TooManyFiles`] when
/// the candidate count reaches the upload ceiling.
///
/// Files named `*_CacheInfo.txt` are pointers: their single-line content
/// names a staged target file (often outside the dataset tree) which is
/// hashed and inventoried alongside the pointer itself, inheriting the
/// pointer's destination directory.
pub fn build_inventory(
    root: &Path,
    recurse: bool,
    progress: Option<&ScanProgressFn>,
) -> Result<Vec<FileRecord>, InventoryError> {
    if !root.is_dir() {
        return Err(InventoryError::NotFound {
            path: root.to_path_buf(),
        });
    }

    let mut candidates = Vec::new();
    enumerate(root, root, recurse, &mut candidates)?;

    if candidates.len() >= MAX_INVENTORY_FILES {
        return Err(InventoryError::TooManyFiles {
            count: candidates.len(),
        });
    }

    let total_bytes: u64 = candidates.iter().map(|c| c.size).sum();
    let mut hashed_bytes: u64 = 0;
    let mut records = Vec::with_capacity(candidates.len());

    for candidate in &candidates {
        let hashsum = sha1_file(&candidate.local_path)?;
        let (created, modified) = file_times(&candidate.local_path)?;
        records.push(FileRecord::new(
            candidate.local_path.clone(),
            &candidate.subdir,
            candidate.file_name.clone(),
            hashsum,
            candidate.size,
            created,
            modified,
        ));

        hashed_bytes += candidate.size;
        if let Some(cb) = progress {
            let fraction = if total_bytes == 0 {
                1.0
            } else {
                hashed_bytes as f64 / total_bytes as f64
            };
            cb(fraction);
        }
    }

    debug!(
        files = records.len(),
        total_bytes,
        root = %root.display(),
        "inventory complete"
    );
    Ok(records)
}

fn enumerate(
    root: &Path,
    current: &Path,
    recurse: bool,
    out: &mut Vec<Candidate>,
) -> Result<(), InventoryError> {
    let mut entries: Vec<_> = fs::read_dir(current)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            if recurse {
                enumerate(root, &path, recurse, out)?;
            }
        } else if metadata.is_file() {
            let subdir = relative_subdir(root, &path);
            let file_name = entry.file_name().to_string_lossy().into_owned();

            if is_cache_info(&file_name) {
                out.push(cache_target(&path, &subdir)?);
            }

            out.push(Candidate {
                local_path: path,
                subdir,
                file_name,
                size: metadata.len(),
            });
        }
    }

    Ok(())
}

/// Resolves a cache-info pointer to its staged target.
fn cache_target(pointer: &Path, subdir: &str) -> Result<Candidate, InventoryError> {
    let content = fs::read_to_string(pointer)?;
    let target = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| InventoryError::CacheTargetMissing {
            pointer: pointer.to_path_buf(),
            target: PathBuf::new(),
        })?;

    let metadata = fs::metadata(&target).map_err(|_| InventoryError::CacheTargetMissing {
        pointer: pointer.to_path_buf(),
        target: target.clone(),
    })?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!(
        pointer = %pointer.display(),
        target = %target.display(),
        "resolved cache info pointer"
    );

    Ok(Candidate {
        local_path: target,
        subdir: subdir.to_string(),
        file_name,
        size: metadata.len(),
    })
}

fn is_cache_info(name: &str) -> bool {
    name.len() > CACHE_INFO_SUFFIX.len() && name.ends_with(CACHE_INFO_SUFFIX)
}

fn relative_subdir(root: &Path, file: &Path) -> String {
    file.parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}

fn file_times(path: &Path) -> Result<(DateTime<Utc>, DateTime<Utc>), InventoryError> {
    let metadata = fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata.modified()?.into();
    // Creation time is not available on every filesystem.
    let created = metadata
        .created()
        .map(DateTime::<Utc>::from)
        .unwrap_or(modified);
    Ok((created, modified))
}
