//! Archive planning and streaming.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use datalift_protocol::FileRecord;
use datalift_protocol::constants::{CONTAINER_ROOT, METADATA_FILE_NAME, PACK_PROGRESS_INTERVAL};
use tracing::debug;

use crate::header::{header_blocks_for, write_content_padding, write_dir_header, write_file_header};
use crate::{ArchiveError, BLOCK_SIZE, RECORD_SIZE};

/// Progress callback: (bytes written so far, total planned bytes).
pub type PackProgressFn = dyn Fn(u64, u64) + Send + Sync;

enum EntrySource {
    /// In-memory content (the manifest).
    Bytes(Vec<u8>),
    /// Content streamed from disk at write time.
    File(PathBuf),
    /// Directory entry, no content.
    Dir,
}

struct PlannedEntry {
    /// Archive-internal path; directories carry the trailing slash.
    dest: String,
    source: EntrySource,
    size: u64,
    mtime: i64,
}

impl PlannedEntry {
    fn blocks(&self) -> u64 {
        header_blocks_for(self.dest.len()) + self.size.div_ceil(BLOCK_SIZE)
    }
}

/// A fully planned archive: entry order and exact total size, computed
/// before any byte is produced.
///
/// Entry order is the manifest at the archive root, the synthetic
/// container-root directory, then each file preceded by any of its
/// ancestor directories not yet emitted. Directories are deduplicated by
/// destination path, so a directory referenced by many files is written
/// exactly once, at first reference.
pub struct ArchivePlan {
    entries: Vec<PlannedEntry>,
    total: u64,
}

impl ArchivePlan {
    pub fn new(manifest_json: Vec<u8>, files: &[FileRecord]) -> Self {
        let now = unix_now();

        let mut entries = Vec::with_capacity(files.len() + 2);
        entries.push(PlannedEntry {
            dest: METADATA_FILE_NAME.to_string(),
            size: manifest_json.len() as u64,
            source: EntrySource::Bytes(manifest_json),
            mtime: now,
        });
        entries.push(PlannedEntry {
            dest: format!("{CONTAINER_ROOT}/"),
            source: EntrySource::Dir,
            size: 0,
            mtime: now,
        });

        let mut seen_dirs: HashSet<String> = HashSet::new();
        seen_dirs.insert(CONTAINER_ROOT.to_string());

        for file in files {
            let mtime = file.modified.timestamp();
            let mut dir = CONTAINER_ROOT.to_string();
            if !file.subdir.is_empty() {
                for segment in file.subdir.split('/') {
                    dir = format!("{dir}/{segment}");
                    if seen_dirs.insert(dir.clone()) {
                        entries.push(PlannedEntry {
                            dest: format!("{dir}/"),
                            source: EntrySource::Dir,
                            size: 0,
                            mtime,
                        });
                    }
                }
            }
            entries.push(PlannedEntry {
                dest: format!("{dir}/{}", file.file_name),
                source: EntrySource::File(file.local_path.clone()),
                size: file.size,
                mtime,
            });
        }

        let blocks: u64 = entries.iter().map(PlannedEntry::blocks).sum();
        // One trailing zero block, then zero-fill to the record boundary.
        let unpadded = (blocks + 1) * BLOCK_SIZE;
        let total = unpadded.div_ceil(RECORD_SIZE) * RECORD_SIZE;

        debug!(
            entries = entries.len(),
            total_bytes = total,
            "archive planned"
        );

        Self { entries, total }
    }

    /// Exact size of the packed stream in bytes. Always a multiple of the
    /// record size. This is the transport's Content-Length.
    pub fn total_size(&self) -> u64 {
        self.total
    }

    /// Number of planned entries, including directories and the manifest.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Streams the archive into `w`, entry by entry.
    ///
    /// Progress is reported through `progress` at least every 2 seconds
    /// while content is flowing, and once at the end. Returns the byte
    /// count written, which is checked against the plan.
    pub fn write_to<W: Write>(
        &self,
        mut w: W,
        progress: Option<&PackProgressFn>,
    ) -> Result<u64, ArchiveError> {
        let mut written: u64 = 0;
        let mut last_report = Instant::now();

        for entry in &self.entries {
            match &entry.source {
                EntrySource::Dir => {
                    written += write_dir_header(&mut w, &entry.dest, entry.mtime)?;
                }
                EntrySource::Bytes(data) => {
                    written +=
                        write_file_header(&mut w, &entry.dest, data.len() as u64, entry.mtime)?;
                    w.write_all(data)?;
                    written += data.len() as u64;
                    written += write_content_padding(&mut w, data.len() as u64)?;
                }
                EntrySource::File(path) => {
                    written += write_file_header(&mut w, &entry.dest, entry.size, entry.mtime)?;
                    written += self.copy_file(
                        &mut w,
                        path,
                        entry.size,
                        written,
                        &mut last_report,
                        progress,
                    )?;
                }
            }

            if let Some(cb) = progress
                && last_report.elapsed() >= PACK_PROGRESS_INTERVAL
            {
                cb(written, self.total);
                last_report = Instant::now();
            }
        }

        // Terminator block, then zero-fill to the planned record boundary.
        w.write_all(&[0u8; BLOCK_SIZE as usize])?;
        written += BLOCK_SIZE;

        if written < self.total {
            let pad = self.total - written;
            w.write_all(&vec![0u8; pad as usize])?;
            written += pad;
        }

        if written != self.total {
            return Err(ArchiveError::SizeMismatch {
                planned: self.total,
                written,
            });
        }

        if let Some(cb) = progress {
            cb(written, self.total);
        }
        Ok(written)
    }

    /// Streams one file's content plus block padding; verifies the on-disk
    /// size still matches the plan.
    fn copy_file<W: Write>(
        &self,
        w: &mut W,
        path: &Path,
        planned: u64,
        written_before: u64,
        last_report: &mut Instant,
        progress: Option<&PackProgressFn>,
    ) -> Result<u64, ArchiveError> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ArchiveError::Io(e)
            }
        })?;

        let mut copied: u64 = 0;
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            // Never write past the planned size even if the file grew.
            if copied + n as u64 > planned {
                return Err(ArchiveError::EntryChanged {
                    path: path.to_path_buf(),
                    planned,
                    actual: copied + n as u64,
                });
            }
            w.write_all(&buf[..n])?;
            copied += n as u64;

            if let Some(cb) = progress
                && last_report.elapsed() >= PACK_PROGRESS_INTERVAL
            {
                cb(written_before + copied, self.total);
                *last_report = Instant::now();
            }
        }

        if copied != planned {
            return Err(ArchiveError::EntryChanged {
                path: path.to_path_buf(),
                planned,
                actual: copied,
            });
        }

        Ok(copied + write_content_padding(w, copied)?)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn record(dir: &TempDir, subdir: &str, name: &str, content: &[u8]) -> FileRecord {
        let parent = if subdir.is_empty() {
            dir.path().to_path_buf()
        } else {
            dir.path().join(subdir)
        };
        fs::create_dir_all(&parent).unwrap();
        let path = parent.join(name);
        fs::write(&path, content).unwrap();

        FileRecord::new(
            path,
            subdir,
            name,
            datalift_inventory_digest(content),
            content.len() as u64,
            Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 0).unwrap(),
        )
    }

    // Local stand-in so this crate's tests do not depend on the inventory
    // crate; the hash value is irrelevant to packing.
    fn datalift_inventory_digest(_content: &[u8]) -> String {
        "0".repeat(40)
    }

    fn manifest() -> Vec<u8> {
        br#"[{"destinationTable":"TransactionKeyValue"}]"#.to_vec()
    }

    #[test]
    fn planned_size_is_record_multiple() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            record(&dir, "", "a.raw", b"AAAA"),
            record(&dir, "sub", "b.raw", &[7u8; 700]),
        ];
        let plan = ArchivePlan::new(manifest(), &files);
        assert_eq!(plan.total_size() % RECORD_SIZE, 0);
        assert!(plan.total_size() > 0);
        // metadata.txt, data/, a.raw, sub/, b.raw
        assert_eq!(plan.entry_count(), 5);
    }

    #[test]
    fn written_bytes_equal_planned_bytes() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            record(&dir, "", "a.raw", b"short"),
            record(&dir, "sub", "b.raw", &[1u8; 512]),
            record(&dir, "sub/nested", "c.raw", &[2u8; 513]),
            record(&dir, "sub", "empty.raw", b""),
        ];
        let plan = ArchivePlan::new(manifest(), &files);

        let mut out = Vec::new();
        let written = plan.write_to(&mut out, None).unwrap();
        assert_eq!(written, plan.total_size());
        assert_eq!(out.len() as u64, plan.total_size());
    }

    #[test]
    fn empty_file_list_packs_one_record() {
        let plan = ArchivePlan::new(manifest(), &[]);
        let mut out = Vec::new();
        plan.write_to(&mut out, None).unwrap();
        // Manifest + root dir + terminator fit one record.
        assert_eq!(out.len() as u64, RECORD_SIZE);
    }

    #[test]
    fn tar_crate_reads_back_entries() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            record(&dir, "", "a.raw", b"content-a"),
            record(&dir, "sub", "b.raw", b"content-b"),
        ];
        let plan = ArchivePlan::new(manifest(), &files);
        let mut out = Vec::new();
        plan.write_to(&mut out, None).unwrap();

        let mut archive = tar::Archive::new(&out[..]);
        let mut names = Vec::new();
        let mut contents = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            contents.push(data);
        }

        assert_eq!(
            names,
            vec!["metadata.txt", "data/", "data/a.raw", "data/sub/", "data/sub/b.raw"]
        );
        assert_eq!(contents[0], manifest());
        assert_eq!(contents[2], b"content-a");
        assert_eq!(contents[4], b"content-b");
    }

    #[test]
    fn long_paths_survive_the_long_name_convention() {
        let dir = TempDir::new().unwrap();
        let deep = "very_long_directory_segment_name_for_header_overflow/".repeat(3);
        let deep = deep.trim_end_matches('/').to_string();
        let files = vec![record(&dir, &deep, "measurement.raw", b"DATA")];
        let plan = ArchivePlan::new(manifest(), &files);

        let mut out = Vec::new();
        let written = plan.write_to(&mut out, None).unwrap();
        assert_eq!(written, plan.total_size());

        let expected = format!("data/{deep}/measurement.raw");
        assert!(expected.len() >= 100);

        let mut archive = tar::Archive::new(&out[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&expected));
    }

    #[test]
    fn shared_directories_are_written_once() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            record(&dir, "shared", "one.raw", b"1"),
            record(&dir, "shared", "two.raw", b"2"),
            record(&dir, "shared/deep", "three.raw", b"3"),
        ];
        let plan = ArchivePlan::new(manifest(), &files);
        let mut out = Vec::new();
        plan.write_to(&mut out, None).unwrap();

        let mut archive = tar::Archive::new(&out[..]);
        let dir_entries: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .filter(|p| p.ends_with('/'))
            .collect();

        assert_eq!(
            dir_entries,
            vec!["data/", "data/shared/", "data/shared/deep/"]
        );
    }

    #[test]
    fn progress_reports_final_total() {
        let dir = TempDir::new().unwrap();
        let files = vec![record(&dir, "", "a.raw", &[5u8; 4096])];
        let plan = ArchivePlan::new(manifest(), &files);

        let reports = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let reports_cb = std::sync::Arc::clone(&reports);
        let mut out = Vec::new();
        plan.write_to(
            &mut out,
            Some(&move |written, total| reports_cb.lock().unwrap().push((written, total))),
        )
        .unwrap();

        let reports = std::sync::Arc::try_unwrap(reports).unwrap().into_inner().unwrap();
        let last = reports.last().unwrap();
        assert_eq!(last.0, plan.total_size());
        assert_eq!(last.1, plan.total_size());
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut rec = record(&dir, "", "a.raw", b"X");
        fs::remove_file(&rec.local_path).unwrap();
        rec.size = 1;

        let plan = ArchivePlan::new(manifest(), &[rec]);
        let err = plan.write_to(Vec::new(), None).unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound { .. }));
    }

    #[test]
    fn truncated_file_is_entry_changed() {
        let dir = TempDir::new().unwrap();
        let rec = record(&dir, "", "a.raw", b"full content here");
        fs::write(&rec.local_path, b"short").unwrap();

        let plan = ArchivePlan::new(manifest(), &[rec]);
        let err = plan.write_to(Vec::new(), None).unwrap_err();
        assert!(matches!(err, ArchiveError::EntryChanged { .. }));
    }

    #[test]
    fn grown_file_is_entry_changed() {
        let dir = TempDir::new().unwrap();
        let rec = record(&dir, "", "a.raw", b"abc");
        fs::write(&rec.local_path, vec![0u8; 9000]).unwrap();

        let plan = ArchivePlan::new(manifest(), &[rec]);
        let err = plan.write_to(Vec::new(), None).unwrap_err();
        assert!(matches!(err, ArchiveError::EntryChanged { .. }));
    }

    #[test]
    fn content_length_accounts_for_long_name_blocks() {
        // A 150-byte destination path costs three header blocks.
        let dir = TempDir::new().unwrap();
        let subdir = "d".repeat(150 - "data/".len() - "/f".len());
        let files = vec![record(&dir, &subdir, "f", b"")];
        let dest_len = format!("data/{subdir}/f").len();
        assert_eq!(dest_len, 150);

        let plan = ArchivePlan::new(Vec::new(), &files);
        // manifest(1 block hdr, 0 content) + data/(1) + subdir dir(3: also ≥100?
        // "data/" + subdir + "/" is 149 bytes -> long form too) + file(3) +
        // terminator(1), padded to a record.
        let mut out = Vec::new();
        let written = plan.write_to(&mut out, None).unwrap();
        assert_eq!(written, plan.total_size());
        assert_eq!(written % RECORD_SIZE, 0);
    }
}
