//! Shared duplicate-resolution helpers for action kinds.

use std::collections::HashSet;
use std::hash::Hash;

/// Remove from `items` every entry whose key already appears in `earlier`.
///
/// Survivors keep their relative order and `earlier` is left untouched.
/// Runs in one pass over `items`: survivors are shifted down over removed
/// runs instead of deleting entries one at a time. Returns the number of
/// entries removed.
pub fn compact_against<T, K, F>(items: &mut Vec<T>, earlier: &[T], key: F) -> usize
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    if items.is_empty() || earlier.is_empty() {
        return 0;
    }
    let seen: HashSet<K> = earlier.iter().map(&key).collect();
    let before = items.len();
    items.retain(|item| !seen.contains(&key(item)));
    before - items.len()
}

/// Folder-name equality used by store actions: byte-equal, or both name
/// the reserved `INBOX` in any letter case.
pub fn same_folder(a: &str, b: &str) -> bool {
    a == b || (a.eq_ignore_ascii_case("INBOX") && b.eq_ignore_ascii_case("INBOX"))
}
