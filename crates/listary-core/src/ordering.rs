//! Ordering engine
//!
//! Pure functions computing rank assignments over an ordered sequence of
//! siblings (lists among lists, items within a list). Every function returns
//! a sequence whose ranks are exactly `0..n-1` in positional order.
//!
//! Sorting is stable, so when several entries are inserted at once their
//! order in the input decides their final relative rank.

use std::collections::HashMap;

use crate::models::{Item, List, Placement};

/// An entry with an identity and a rank among its siblings
pub trait Ranked {
    fn id(&self) -> &str;
    fn rank(&self) -> i64;
    fn set_rank(&mut self, rank: i64);
}

impl Ranked for List {
    fn id(&self) -> &str {
        &self.id
    }

    fn rank(&self) -> i64 {
        self.order
    }

    fn set_rank(&mut self, rank: i64) {
        self.order = rank;
    }
}

impl Ranked for Item {
    fn id(&self) -> &str {
        &self.id
    }

    fn rank(&self) -> i64 {
        self.order
    }

    fn set_rank(&mut self, rank: i64) {
        self.order = rank;
    }
}

/// Result of moving entries between two sequences
#[derive(Debug)]
pub struct MoveResult<T> {
    /// Source sequence without the moved entries, re-ranked
    pub source: Vec<T>,
    /// Target sequence including the moved entries
    pub target: Vec<T>,
    /// `(old_id, new_id)` for every moved entry, in move order
    pub id_map: Vec<(String, String)>,
}

/// Stable sort by current rank
pub fn sort_by_rank<T: Ranked>(sequence: &mut [T]) {
    sequence.sort_by_key(|entry| entry.rank());
}

/// Assign rank = positional index
pub fn reindex<T: Ranked>(sequence: &mut [T]) {
    for (index, entry) in sequence.iter_mut().enumerate() {
        entry.set_rank(index as i64);
    }
}

/// Insert new entries at the head or tail of a sequence
///
/// With `Placement::Bottom` the new entries take ranks `n..n+k-1` and the
/// existing ranks are untouched. With `Placement::Top` the new entries take
/// `0..k-1` and every existing rank shifts up by `k`.
pub fn append<T: Ranked>(mut sequence: Vec<T>, new_entries: Vec<T>, placement: Placement) -> Vec<T> {
    sort_by_rank(&mut sequence);

    let mut result = match placement {
        Placement::Top => {
            let mut result = new_entries;
            result.extend(sequence);
            result
        }
        Placement::Bottom => {
            sequence.extend(new_entries);
            sequence
        }
    };

    reindex(&mut result);
    result
}

/// Re-rank a sequence supplied in its desired order
///
/// Prior ranks are discarded. Reordering an already ordered sequence with
/// itself changes nothing.
pub fn reorder<T: Ranked>(mut new_sequence: Vec<T>) -> Vec<T> {
    reindex(&mut new_sequence);
    new_sequence
}

/// Reorder a sequence to follow the given ids
///
/// Entries whose id is not mentioned keep their relative order after the
/// mentioned ones. Unknown and repeated ids are ignored.
pub fn arrange<T: Ranked, S: AsRef<str>>(mut sequence: Vec<T>, ids: &[S]) -> Vec<T> {
    sort_by_rank(&mut sequence);

    let mut remaining: Vec<Option<T>> = sequence.into_iter().map(Some).collect();
    let mut arranged = Vec::with_capacity(remaining.len());

    for id in ids {
        let slot = remaining
            .iter_mut()
            .find(|slot| matches!(slot, Some(entry) if entry.id() == id.as_ref()));
        if let Some(entry) = slot.and_then(Option::take) {
            arranged.push(entry);
        }
    }

    arranged.extend(remaining.into_iter().flatten());
    reorder(arranged)
}

/// Move a single entry to a position, clamped to the sequence bounds
pub fn reposition<T: Ranked>(mut sequence: Vec<T>, id: &str, position: i64) -> Vec<T> {
    sort_by_rank(&mut sequence);

    if let Some(index) = sequence.iter().position(|entry| entry.id() == id) {
        let entry = sequence.remove(index);
        let position = position.clamp(0, sequence.len() as i64) as usize;
        sequence.insert(position, entry);
    }

    reindex(&mut sequence);
    sequence
}

/// Split off the entries with the given ids
///
/// Returns `(kept, removed)`. Kept entries are re-ranked so ranks stay dense;
/// removed entries keep their old ranks.
pub fn remove<T: Ranked, S: AsRef<str>>(mut sequence: Vec<T>, ids: &[S]) -> (Vec<T>, Vec<T>) {
    sort_by_rank(&mut sequence);

    let (removed, mut kept): (Vec<T>, Vec<T>) = sequence
        .into_iter()
        .partition(|entry| ids.iter().any(|id| id.as_ref() == entry.id()));

    reindex(&mut kept);
    (kept, removed)
}

/// Move entries from one sequence into another
///
/// Each moved entry is passed to `reidentify`, which may assign it an
/// identity in the target's namespace, then appended per `placement`.
pub fn move_entries<T, S, F>(
    source: Vec<T>,
    target: Vec<T>,
    ids: &[S],
    placement: Placement,
    mut reidentify: F,
) -> MoveResult<T>
where
    T: Ranked,
    S: AsRef<str>,
    F: FnMut(&mut T),
{
    let (source, mut moved) = remove(source, ids);

    let mut id_map = Vec::with_capacity(moved.len());
    for entry in &mut moved {
        let old_id = entry.id().to_string();
        reidentify(entry);
        id_map.push((old_id, entry.id().to_string()));
    }

    let target = append(target, moved, placement);

    MoveResult {
        source,
        target,
        id_map,
    }
}

/// Entries present in both sequences whose rank differs
///
/// Returns `(id, new_rank)` pairs in `after` order.
pub fn rank_changes<T: Ranked>(before: &[T], after: &[T]) -> Vec<(String, i64)> {
    let prior: HashMap<&str, i64> = before
        .iter()
        .map(|entry| (entry.id(), entry.rank()))
        .collect();

    after
        .iter()
        .filter_map(|entry| match prior.get(entry.id()) {
            Some(&rank) if rank != entry.rank() => Some((entry.id().to_string(), entry.rank())),
            _ => None,
        })
        .collect()
}

/// Check that ranks are exactly `0..n-1` with no repeats
pub fn is_dense<T: Ranked>(sequence: &[T]) -> bool {
    let mut ranks: Vec<i64> = sequence.iter().map(Ranked::rank).collect();
    ranks.sort_unstable();
    ranks
        .iter()
        .enumerate()
        .all(|(index, &rank)| rank == index as i64)
}
