// SPDX-FileCopyrightText: 2021 Softbear, Inc.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

/// Returns items added and ids removed since `old`, or `None` if there was no change.
/// Used to compute delta packets (e.g. player or team DTOs) without resending unchanged state.
pub fn diff<T: Clone + PartialEq, ID: Eq + Hash + Clone>(
    old: &Arc<[T]>,
    new: &[T],
    get_id: impl Fn(&T) -> ID,
) -> Option<(Vec<T>, Vec<ID>)> {
    let old_ids: HashSet<ID> = old.iter().map(&get_id).collect();
    let new_ids: HashSet<ID> = new.iter().map(&get_id).collect();

    let removed: Vec<ID> = old_ids.difference(&new_ids).cloned().collect();
    let mut added = Vec::new();
    for item in new {
        let id = get_id(item);
        let changed = old
            .iter()
            .find(|o| get_id(o) == id)
            .map(|o| o != item)
            .unwrap_or(true);
        if changed {
            added.push(item.clone());
        }
    }

    if added.is_empty() && removed.is_empty() {
        None
    } else {
        Some((added, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_change_yields_none() {
        let old: Arc<[i32]> = vec![1, 2, 3].into();
        assert_eq!(diff(&old, &[1, 2, 3], |x| *x), None);
    }

    #[test]
    fn detects_additions_and_removals() {
        let old: Arc<[i32]> = vec![1, 2, 3].into();
        let (added, removed) = diff(&old, &[2, 3, 4], |x| *x).unwrap();
        assert_eq!(added, vec![4]);
        assert_eq!(removed, vec![1]);
    }
}
