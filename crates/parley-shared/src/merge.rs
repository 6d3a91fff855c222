//! Reconciliation of a remote-fetched collection with local state.
//!
//! [`merge`] partitions the remote items into added / updated / unchanged
//! and the local-only items into removed / retained. It never touches
//! storage: callers persist the partitions (see `parley-store`).

use std::collections::HashMap;
use std::hash::Hash;

/// Values that know how to fold a fresher remote copy of themselves in.
///
/// `merge_from` must return a value equal to `self` when the remote copy
/// carries no change, so the merge can report it as unchanged.
pub trait Mergeable: Clone + PartialEq {
    fn merge_from(&self, remote: &Self) -> Self;
}

/// What a merge may do to local items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    /// Local items missing from the remote set are reported as removed.
    /// Only valid when the remote set is complete (e.g. a full chat list).
    pub allow_removal: bool,
    /// Local items present remotely take the remote content.
    pub allow_update: bool,
}

impl MergePolicy {
    /// Complete, authoritative remote set: contact lists, chat lists.
    pub const FULL: MergePolicy = MergePolicy {
        allow_removal: true,
        allow_update: true,
    };

    /// One page of a larger remote set: paginated message fetches.
    pub const PAGE: MergePolicy = MergePolicy {
        allow_removal: false,
        allow_update: true,
    };
}

/// Outcome of one [`merge`] call. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult<T, K> {
    /// Remote items with no local counterpart.
    pub added: Vec<T>,
    /// Local items that took remote content (merged values).
    pub updated: Vec<T>,
    /// Keys of local items absent remotely, when removal was allowed.
    pub removed: Vec<K>,
    /// Local items present remotely with nothing to change (local handles).
    pub unchanged: Vec<T>,
    /// Local items absent remotely, kept because removal was not allowed.
    pub retained: Vec<T>,
}

impl<T, K> MergeResult<T, K> {
    pub fn empty() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            unchanged: Vec::new(),
            retained: Vec::new(),
        }
    }

    /// True if applying this result would not change local state.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Local collection once the result is applied.
    pub fn all_applied(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.retained
            .iter()
            .chain(&self.unchanged)
            .chain(&self.updated)
            .chain(&self.added)
            .cloned()
            .collect()
    }
}

impl<T, K> Default for MergeResult<T, K> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Merge `remote` into `local`.
///
/// Items are matched by `key_of`. When the same key appears twice in
/// `remote` the last occurrence wins. The output partitions are disjoint
/// and the keys of `added`, `updated` and `unchanged` are exactly the
/// distinct keys of `remote`.
pub fn merge<T, K, F>(
    remote: impl IntoIterator<Item = T>,
    local: impl IntoIterator<Item = T>,
    key_of: F,
    policy: MergePolicy,
) -> MergeResult<T, K>
where
    T: Mergeable,
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut local_items: Vec<(K, T)> = Vec::new();
    let mut local_index: HashMap<K, usize> = HashMap::new();
    for item in local {
        let key = key_of(&item);
        match local_index.get(&key) {
            Some(&pos) => local_items[pos].1 = item,
            None => {
                local_index.insert(key.clone(), local_items.len());
                local_items.push((key, item));
            }
        }
    }

    let mut remote_items: Vec<(K, T)> = Vec::new();
    let mut remote_index: HashMap<K, usize> = HashMap::new();
    for item in remote {
        let key = key_of(&item);
        match remote_index.get(&key) {
            Some(&pos) => remote_items[pos].1 = item,
            None => {
                remote_index.insert(key.clone(), remote_items.len());
                remote_items.push((key, item));
            }
        }
    }

    let mut result = MergeResult::empty();

    for (key, remote_item) in remote_items {
        let Some(&pos) = local_index.get(&key) else {
            result.added.push(remote_item);
            continue;
        };

        let local_item = &local_items[pos].1;
        if !policy.allow_update {
            result.unchanged.push(local_item.clone());
            continue;
        }

        let merged = local_item.merge_from(&remote_item);
        if merged == *local_item {
            result.unchanged.push(local_item.clone());
        } else {
            result.updated.push(merged);
        }
    }

    for (key, local_item) in local_items {
        if remote_index.contains_key(&key) {
            continue;
        }
        if policy.allow_removal {
            result.removed.push(key);
        } else {
            result.retained.push(local_item);
        }
    }

    result
}
