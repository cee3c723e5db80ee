//! Remote object index and stale-object selection.

use super::store::{ObjectEntry, ObjectStore};
use crate::Result;
use std::collections::{BTreeSet, HashMap};

/// Snapshot of the objects under a prefix, taken once per push.
#[derive(Debug, Clone, Default)]
pub struct RemoteIndex {
    etags: HashMap<String, String>,
}

impl RemoteIndex {
    pub async fn snapshot<S: ObjectStore + ?Sized>(store: &S, prefix: &str) -> Result<Self> {
        let objects = store.list(prefix).await?;
        Ok(Self::from_entries(objects))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ObjectEntry>) -> Self {
        Self {
            etags: entries.into_iter().map(|o| (o.key, o.etag)).collect(),
        }
    }

    pub fn etag(&self, key: &str) -> Option<&str> {
        self.etags.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.etags.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.etags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.etags.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.etags.keys().map(String::as_str)
    }
}

/// True for a key standing for a directory.
pub fn is_marker(key: &str) -> bool {
    key.ends_with('/')
}

/// Marker key of the directory containing `key`, `None` at the top level.
pub fn parent_marker(key: &str) -> Option<String> {
    let trimmed = key.trim_end_matches('/');
    trimmed
        .rfind('/')
        .map(|idx| format!("{}/", &trimmed[..idx]))
        .filter(|marker| marker != "/")
}

/// Objects of the snapshot that the push did not touch and that can go.
///
/// A plain object goes whenever it was not touched. A directory marker goes
/// only when no touched key lives below it. Sorted by key.
pub fn stale_keys(index: &RemoteIndex, touched: &BTreeSet<String>) -> Vec<String> {
    let mut stale: Vec<String> = index
        .keys()
        .filter(|key| !touched.contains(*key))
        .filter(|key| !is_marker(key) || !has_descendant(touched, key))
        .map(str::to_string)
        .collect();
    stale.sort();
    stale
}

fn has_descendant(touched: &BTreeSet<String>, marker: &str) -> bool {
    touched
        .range::<str, _>((std::ops::Bound::Included(marker), std::ops::Bound::Unbounded))
        .next()
        .is_some_and(|key| key.starts_with(marker))
}
