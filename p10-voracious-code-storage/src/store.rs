//! Revision history, in memory.
//!
//! Revisions are 1-based and dense: the first write to a path is revision 1,
//! and each later write is the previous revision plus one, except a write
//! whose content is byte-identical to the current revision, which is a
//! no-op that returns the existing revision number.
use std::collections::BTreeMap;

use parking_lot::Mutex;

#[derive(Default)]
pub struct Store {
    files: Mutex<BTreeMap<String, Vec<Vec<u8>>>>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the revision the content now lives at, which is the prior
    /// revision when `data` matches what's already there.
    pub fn save(&self, path: &str, data: Vec<u8>) -> u32 {
        let mut files = self.files.lock();
        let revisions = files.entry(path.to_string()).or_default();
        if revisions.last() == Some(&data) {
            return u32::try_from(revisions.len()).expect("revision count fits u32");
        }
        revisions.push(data);
        u32::try_from(revisions.len()).expect("revision count fits u32")
    }

    #[must_use]
    pub fn latest_revision(&self, path: &str) -> Option<u32> {
        let files = self.files.lock();
        let revisions = files.get(path)?;
        u32::try_from(revisions.len()).ok()
    }

    /// `revision <= 0` never names a real revision, matching the lenient
    /// parse in [`crate::path::parse_revision`].
    #[must_use]
    pub fn get(&self, path: &str, revision: i64) -> Option<Vec<u8>> {
        let index = usize::try_from(revision - 1).ok()?;
        self.files.lock().get(path)?.get(index).cloned()
    }

    /// Direct children of `dir` (which must already end in `/`). A child
    /// that is itself a directory is reported with a trailing `/` and no
    /// revision; a file child is reported with its latest revision.
    #[must_use]
    pub fn list(&self, dir: &str) -> Vec<(String, Option<u32>)> {
        let files = self.files.lock();
        let mut entries: BTreeMap<String, Option<u32>> = BTreeMap::new();
        for (path, revisions) in files.iter() {
            let Some(rest) = path.strip_prefix(dir) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((head, _)) => {
                    entries.entry(format!("{head}/")).or_insert(None);
                }
                None => {
                    let revision = u32::try_from(revisions.len()).expect("revision count fits u32");
                    entries.insert(rest.to_string(), Some(revision));
                }
            }
        }
        entries.into_iter().collect()
    }
}
