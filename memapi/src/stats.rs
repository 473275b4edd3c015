use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `(size, count)` totals for one (filename, lineno) bucket.
pub type LineStats = (u64, u64);

/// `filename -> (lineno -> LineStats)`, with the sentinel bucket
/// `("", 0)` collecting allocations whose origin couldn't be determined.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Statistics {
    by_file: HashMap<String, HashMap<u32, LineStats>>,
}

impl Statistics {
    pub fn new() -> Self {
        Statistics { by_file: HashMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.by_file.keys().map(|s| s.as_str())
    }

    pub fn lines(&self, filename: &str) -> Option<&HashMap<u32, LineStats>> {
        self.by_file.get(filename)
    }

    pub fn get(&self, filename: &str, lineno: u32) -> Option<LineStats> {
        self.by_file.get(filename).and_then(|lines| lines.get(&lineno)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32, LineStats)> {
        self.by_file.iter().flat_map(|(filename, lines)| {
            lines.iter().map(move |(lineno, stats)| (filename.as_str(), *lineno, *stats))
        })
    }

    /// Overwrite the bucket for `(filename, lineno)` with an exact
    /// `(size, count)`, used when rebuilding a filtered copy rather than
    /// incrementally accounting live allocations.
    pub fn set(&mut self, filename: String, lineno: u32, size: u64, count: u64) {
        if count == 0 {
            return;
        }
        self.by_file.entry(filename).or_default().insert(lineno, (size, count));
    }

    /// Add `(size, +1)` to the bucket for `(filename, lineno)`.
    pub fn add(&mut self, filename: String, lineno: u32, size: u64) {
        let line_stats = self.by_file.entry(filename).or_default();
        let entry = line_stats.entry(lineno).or_insert((0, 0));
        entry.0 += size;
        entry.1 += 1;
    }

    /// Subtract `(size, -1)` from the bucket, removing it once its count
    /// reaches zero, and pruning the file entry once it has no lines left.
    pub fn remove(&mut self, filename: &str, lineno: u32, size: u64) {
        let Some(line_stats) = self.by_file.get_mut(filename) else { return };
        if let Some(entry) = line_stats.get_mut(&lineno) {
            entry.0 = entry.0.saturating_sub(size);
            entry.1 = entry.1.saturating_sub(1);
            if entry.1 == 0 {
                line_stats.remove(&lineno);
            }
        }
        if line_stats.is_empty() {
            self.by_file.remove(filename);
        }
    }

    pub fn clear(&mut self) {
        self.by_file.clear();
    }

    /// The sum of all bucket sizes; must always equal the sum of all live
    /// trace sizes.
    pub fn total_size(&self) -> u64 {
        self.by_file
            .values()
            .flat_map(|lines| lines.values())
            .map(|(size, _)| *size)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_drops_empty_buckets() {
        let mut stats = Statistics::new();
        stats.add("a.py".to_string(), 1, 100);
        assert_eq!(stats.get("a.py", 1), Some((100, 1)));
        stats.remove("a.py", 1, 100);
        assert_eq!(stats.get("a.py", 1), None);
        assert!(stats.is_empty());
    }

    #[test]
    fn duplicate_bucket_accumulates() {
        let mut stats = Statistics::new();
        stats.add("a.py".to_string(), 1, 100);
        stats.add("a.py".to_string(), 1, 50);
        assert_eq!(stats.get("a.py", 1), Some((150, 2)));
    }

    #[test]
    fn total_size_matches_sum_of_buckets() {
        let mut stats = Statistics::new();
        stats.add("a.py".to_string(), 1, 100);
        stats.add("b.py".to_string(), 2, 250);
        assert_eq!(stats.total_size(), 350);
        stats.remove("a.py", 1, 100);
        assert_eq!(stats.total_size(), 250);
    }

    #[test]
    fn remove_on_unknown_bucket_is_idempotent() {
        let mut stats = Statistics::new();
        stats.remove("missing.py", 1, 10);
        assert!(stats.is_empty());
    }
}
