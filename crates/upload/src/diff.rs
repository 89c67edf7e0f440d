//! Local/remote inventory diffing.
//!
//! The matching key is the **pair** (relative path, content hash): two
//! files at different paths may share a hash, and two versions at the same
//! path share none. A file with an exact (path, hash) match remotely is
//! never re-uploaded — the idempotence guarantee of the whole pipeline.

use datalift_client::RemoteInventory;
use datalift_protocol::FileRecord;
use tracing::debug;

/// The subset of local files requiring upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadSet {
    /// No prior entry exists at the relative path.
    pub new_files: Vec<FileRecord>,
    /// Entries exist at the path but no version matches the current hash.
    pub updated_files: Vec<FileRecord>,
    /// Sum of bytes across both lists.
    pub total_bytes: u64,
}

impl UploadSet {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.updated_files.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.new_files.len() + self.updated_files.len()
    }

    /// All files in upload order (new first, then updated).
    pub fn upload_order(&self) -> Vec<FileRecord> {
        self.new_files
            .iter()
            .chain(&self.updated_files)
            .cloned()
            .collect()
    }
}

/// Compares the local inventory against the remote listing.
pub fn diff_inventories(local: &[FileRecord], remote: &RemoteInventory) -> UploadSet {
    let mut set = UploadSet::default();

    for file in local {
        let relative = file.relative_path();
        match remote.get(&relative) {
            None => {
                set.total_bytes += file.size;
                set.new_files.push(file.clone());
            }
            Some(versions) => {
                let matched = versions
                    .iter()
                    .any(|v| v.hashsum.eq_ignore_ascii_case(&file.hashsum));
                if !matched {
                    set.total_bytes += file.size;
                    set.updated_files.push(file.clone());
                }
            }
        }
    }

    debug!(
        new = set.new_files.len(),
        updated = set.updated_files.len(),
        bytes = set.total_bytes,
        "inventory diff complete"
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use datalift_protocol::RemoteFileEntry;
    use std::path::PathBuf;

    fn local(subdir: &str, name: &str, hash: &str, size: u64) -> FileRecord {
        FileRecord::new(
            PathBuf::from("/ds").join(name),
            subdir,
            name,
            hash,
            size,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn remote_entry(subdir: &str, name: &str, hash: &str) -> RemoteFileEntry {
        RemoteFileEntry {
            name: name.into(),
            subdir: subdir.into(),
            hashsum: hash.into(),
            hashtype: "sha1".into(),
            size: 1,
            transaction_id: 1,
            ctime: String::new(),
            mtime: String::new(),
        }
    }

    fn remote_of(entries: Vec<RemoteFileEntry>) -> RemoteInventory {
        let mut map = RemoteInventory::new();
        for e in entries {
            map.entry(e.relative_path()).or_default().push(e);
        }
        map
    }

    #[test]
    fn identical_inventories_upload_nothing() {
        let locals: Vec<FileRecord> = (0..10)
            .map(|i| local("run", &format!("f{i}.raw"), &format!("{i:040}"), 100))
            .collect();
        let remote = remote_of(
            (0..10)
                .map(|i| remote_entry("run", &format!("f{i}.raw"), &format!("{i:040}")))
                .collect(),
        );

        let set = diff_inventories(&locals, &remote);
        assert!(set.is_empty());
        assert_eq!(set.total_bytes, 0);
    }

    #[test]
    fn unseen_path_is_new() {
        let locals = vec![local("", "fresh.raw", &"a".repeat(40), 512)];
        let set = diff_inventories(&locals, &RemoteInventory::new());

        assert_eq!(set.new_files.len(), 1);
        assert!(set.updated_files.is_empty());
        assert_eq!(set.total_bytes, 512);
    }

    #[test]
    fn changed_hash_is_updated() {
        let locals = vec![local("run", "spectra.raw", &"b".repeat(40), 256)];
        let remote = remote_of(vec![remote_entry("run", "spectra.raw", &"a".repeat(40))]);

        let set = diff_inventories(&locals, &remote);
        assert!(set.new_files.is_empty());
        assert_eq!(set.updated_files.len(), 1);
        assert_eq!(set.total_bytes, 256);
    }

    #[test]
    fn any_matching_version_skips_upload() {
        let locals = vec![local("run", "spectra.raw", &"b".repeat(40), 256)];
        let remote = remote_of(vec![
            remote_entry("run", "spectra.raw", &"a".repeat(40)),
            remote_entry("run", "spectra.raw", &"b".repeat(40)),
        ]);

        assert!(diff_inventories(&locals, &remote).is_empty());
    }

    #[test]
    fn matching_is_keyed_on_the_path_hash_pair() {
        // The same hash at a different path does not satisfy the match.
        let locals = vec![local("run_a", "copy.raw", &"c".repeat(40), 64)];
        let remote = remote_of(vec![remote_entry("run_b", "copy.raw", &"c".repeat(40))]);

        let set = diff_inventories(&locals, &remote);
        assert_eq!(set.new_files.len(), 1);
    }

    #[test]
    fn hash_comparison_ignores_case() {
        let locals = vec![local("", "f.raw", "ABCDEF0123456789ABCDEF0123456789ABCDEF01", 1)];
        let remote = remote_of(vec![remote_entry(
            "",
            "f.raw",
            "abcdef0123456789abcdef0123456789abcdef01",
        )]);

        assert!(diff_inventories(&locals, &remote).is_empty());
    }

    #[test]
    fn container_root_prefix_in_listing_is_transparent() {
        // Listings sometimes report subdir with the container root.
        let locals = vec![local("run", "f.raw", &"d".repeat(40), 1)];
        let remote = remote_of(vec![remote_entry("data/run", "f.raw", &"d".repeat(40))]);

        assert!(diff_inventories(&locals, &remote).is_empty());
    }

    #[test]
    fn upload_order_is_new_then_updated() {
        let locals = vec![
            local("", "updated.raw", &"1".repeat(40), 10),
            local("", "new.raw", &"2".repeat(40), 20),
        ];
        let remote = remote_of(vec![remote_entry("", "updated.raw", &"0".repeat(40))]);

        let set = diff_inventories(&locals, &remote);
        let order: Vec<String> = set
            .upload_order()
            .iter()
            .map(|f| f.file_name.clone())
            .collect();
        assert_eq!(order, vec!["new.raw", "updated.raw"]);
        assert_eq!(set.total_bytes, 30);
        assert_eq!(set.file_count(), 2);
    }
}
