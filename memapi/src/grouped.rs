//! Regrouping a snapshot's statistics by a chosen key kind, and diffing two
//! groupings of the same kind.

use crate::frame::Traceback;
use std::collections::HashMap;
use std::time::SystemTime;

/// Which dimension `Snapshot::top_by` grouped its statistics by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupBy {
    Line,
    Filename,
    Address,
    Traceback,
}

/// A grouping key. A single `GroupedStats` only ever uses one variant, so
/// `Ord` only needs to be meaningful within one `group_by` kind at a time —
/// comparisons across variants still type-check (derived `Ord` orders by
/// declaration order first) but carry no documented meaning.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    File(String),
    FileLine(String, u32),
    Address(usize),
    AddressTraceback(usize, Traceback),
}

/// One entry of a `GroupedStats::compare_to` result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub size_delta: i64,
    pub size: u64,
    pub count_delta: i64,
    pub count: u64,
    pub key: Key,
}

/// A snapshot's statistics regrouped by `group_by`, optionally cumulative
/// (size attributed to every distinct key in a trace's traceback, rather
/// than only its innermost frame).
#[derive(Clone, Debug)]
pub struct GroupedStats {
    timestamp: SystemTime,
    traceback_limit: usize,
    stats: HashMap<Key, (u64, u64)>,
    group_by: GroupBy,
    cumulative: bool,
    metrics: HashMap<String, (i64, String)>,
}

impl GroupedStats {
    pub fn new(
        timestamp: SystemTime,
        traceback_limit: usize,
        stats: HashMap<Key, (u64, u64)>,
        group_by: GroupBy,
        cumulative: bool,
        metrics: HashMap<String, (i64, String)>,
    ) -> Self {
        GroupedStats { timestamp, traceback_limit, stats, group_by, cumulative, metrics }
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn traceback_limit(&self) -> usize {
        self.traceback_limit
    }

    pub fn group_by(&self) -> GroupBy {
        self.group_by
    }

    pub fn cumulative(&self) -> bool {
        self.cumulative
    }

    pub fn metrics(&self) -> &HashMap<String, (i64, String)> {
        &self.metrics
    }

    pub fn stats(&self) -> &HashMap<Key, (u64, u64)> {
        &self.stats
    }

    pub fn get(&self, key: &Key) -> Option<(u64, u64)> {
        self.stats.get(key).copied()
    }

    /// Diffs `self` against `other` (or against an all-zero baseline if
    /// `other` is absent). With `sort`, entries come back in descending
    /// `(|Δsize|, size, |Δcount|, count, key)` order, largest change first.
    pub fn compare_to(&self, other: Option<&GroupedStats>, sort: bool) -> Vec<DiffEntry> {
        let empty = HashMap::new();
        let other_stats = other.map(|o| &o.stats).unwrap_or(&empty);

        let mut entries: Vec<DiffEntry> = self
            .stats
            .iter()
            .map(|(key, &(size, count))| {
                let (prev_size, prev_count) = other_stats.get(key).copied().unwrap_or((0, 0));
                DiffEntry {
                    size_delta: size as i64 - prev_size as i64,
                    size,
                    count_delta: count as i64 - prev_count as i64,
                    count,
                    key: key.clone(),
                }
            })
            .collect();

        for (key, &(prev_size, prev_count)) in other_stats {
            if !self.stats.contains_key(key) {
                entries.push(DiffEntry {
                    size_delta: -(prev_size as i64),
                    size: 0,
                    count_delta: -(prev_count as i64),
                    count: 0,
                    key: key.clone(),
                });
            }
        }

        if sort {
            entries.sort_by(|a, b| {
                b.size_delta
                    .abs()
                    .cmp(&a.size_delta.abs())
                    .then_with(|| b.size.cmp(&a.size))
                    .then_with(|| b.count_delta.abs().cmp(&a.count_delta.abs()))
                    .then_with(|| b.count.cmp(&a.count))
                    .then_with(|| b.key.cmp(&a.key))
            });
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouped(stats: Vec<(Key, (u64, u64))>) -> GroupedStats {
        GroupedStats::new(
            SystemTime::UNIX_EPOCH,
            1,
            stats.into_iter().collect(),
            GroupBy::Line,
            false,
            HashMap::new(),
        )
    }

    #[test]
    fn diff_against_self_is_all_zero() {
        let g = grouped(vec![(Key::FileLine("a.py".into(), 2), (30, 3))]);
        let diff = g.compare_to(Some(&g), true);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].size_delta, 0);
        assert_eq!(diff[0].count_delta, 0);
    }

    #[test]
    fn diff_against_none_reports_current_values_as_deltas() {
        let g = grouped(vec![(Key::FileLine("a.py".into(), 2), (30, 3))]);
        let diff = g.compare_to(None, true);
        assert_eq!(diff[0].size_delta, 30);
        assert_eq!(diff[0].count_delta, 3);
    }

    #[test]
    fn key_present_only_in_other_reports_negative_delta() {
        let current = grouped(vec![(Key::FileLine("a.py".into(), 2), (30, 3))]);
        let previous = grouped(vec![
            (Key::FileLine("a.py".into(), 2), (30, 3)),
            (Key::FileLine("b.py".into(), 1), (66, 1)),
        ]);
        let diff = current.compare_to(Some(&previous), true);
        let b = diff.iter().find(|e| e.key == Key::FileLine("b.py".into(), 1)).unwrap();
        assert_eq!(b.size_delta, -66);
        assert_eq!(b.size, 0);
        assert_eq!(b.count_delta, -1);
        assert_eq!(b.count, 0);
    }

    #[test]
    fn sorted_diff_orders_by_descending_magnitude_of_size_delta() {
        let current = grouped(vec![
            (Key::FileLine("a.py".into(), 2), (30, 3)),
            (Key::FileLine("a.py".into(), 5), (5002, 2)),
            (Key::FileLine("c.py".into(), 578), (400, 1)),
        ]);
        let previous = grouped(vec![
            (Key::FileLine("a.py".into(), 2), (30, 3)),
            (Key::FileLine("a.py".into(), 5), (2, 1)),
            (Key::FileLine("b.py".into(), 1), (66, 1)),
            (Key::FileLine(String::new(), 0), (7, 1)),
        ]);
        let diff = current.compare_to(Some(&previous), true);
        let keys: Vec<&Key> = diff.iter().map(|e| &e.key).collect();
        assert_eq!(
            keys,
            vec![
                &Key::FileLine("a.py".into(), 5),
                &Key::FileLine("c.py".into(), 578),
                &Key::FileLine("b.py".into(), 1),
                &Key::FileLine(String::new(), 0),
                &Key::FileLine("a.py".into(), 2),
            ]
        );
        assert_eq!(diff[0].size_delta, 5000);
        assert_eq!(diff[0].size, 5002);
    }
}
