use ulid::Ulid;

use crate::model::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    at: Timestamp,
    id: Ulid,
}

/// Secondary index over one instant of a reservation, partitioned by the
/// `active` flag. Each partition stays sorted by `(at, id)`.
#[derive(Debug, Default)]
pub struct OrderedIndex {
    active: Vec<Entry>,
    inactive: Vec<Entry>,
}

impl OrderedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, active: bool) -> &Vec<Entry> {
        if active { &self.active } else { &self.inactive }
    }

    fn partition_mut(&mut self, active: bool) -> &mut Vec<Entry> {
        if active {
            &mut self.active
        } else {
            &mut self.inactive
        }
    }

    /// Insert keeping sort order. Re-inserting an existing entry is a no-op.
    pub fn insert(&mut self, at: Timestamp, id: Ulid, active: bool) {
        let entry = Entry { at, id };
        let entries = self.partition_mut(active);
        if let Err(pos) = entries.binary_search(&entry) {
            entries.insert(pos, entry);
        }
    }

    pub fn remove(&mut self, at: Timestamp, id: Ulid, active: bool) -> bool {
        let entries = self.partition_mut(active);
        match entries.binary_search(&Entry { at, id }) {
            Ok(pos) => {
                entries.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Ids whose key lies in `[lo, hi]`, ascending by key. Empty when `lo > hi`.
    pub fn range(&self, lo: Timestamp, hi: Timestamp, active: bool) -> impl Iterator<Item = Ulid> + '_ {
        let entries = self.partition(active);
        let first = entries.partition_point(|e| e.at < lo);
        let last = entries.partition_point(|e| e.at <= hi);
        entries
            .get(first..last)
            .unwrap_or_default()
            .iter()
            .map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.inactive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn day(n: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 11, 1, 12, 0, 0).unwrap() + Duration::days(n)
    }

    #[test]
    fn range_is_inclusive_and_sorted() {
        let mut idx = OrderedIndex::new();
        let ids: Vec<Ulid> = (0..5).map(|_| Ulid::new()).collect();
        // Insert out of order.
        for &i in &[3usize, 0, 4, 1, 2] {
            idx.insert(day(i as i64), ids[i], true);
        }
        let hits: Vec<Ulid> = idx.range(day(1), day(3), true).collect();
        assert_eq!(hits, vec![ids[1], ids[2], ids[3]]);
    }

    #[test]
    fn partitions_are_separate() {
        let mut idx = OrderedIndex::new();
        let live = Ulid::new();
        let cancelled = Ulid::new();
        idx.insert(day(1), live, true);
        idx.insert(day(1), cancelled, false);
        assert_eq!(idx.range(day(0), day(2), true).collect::<Vec<_>>(), vec![live]);
        assert_eq!(idx.range(day(0), day(2), false).collect::<Vec<_>>(), vec![cancelled]);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn inverted_range_is_empty() {
        let mut idx = OrderedIndex::new();
        idx.insert(day(1), Ulid::new(), true);
        assert_eq!(idx.range(day(2), day(0), true).count(), 0);
    }

    #[test]
    fn remove_only_matching_entry() {
        let mut idx = OrderedIndex::new();
        let a = Ulid::new();
        let b = Ulid::new();
        idx.insert(day(1), a, true);
        idx.insert(day(1), b, true);
        assert!(!idx.remove(day(2), a, true));
        assert!(!idx.remove(day(1), a, false));
        assert!(idx.remove(day(1), a, true));
        assert_eq!(idx.range(day(0), day(5), true).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn duplicate_insert_ignored() {
        let mut idx = OrderedIndex::new();
        let a = Ulid::new();
        idx.insert(day(1), a, true);
        idx.insert(day(1), a, true);
        assert_eq!(idx.len(), 1);
        assert!(!idx.is_empty());
    }
}
