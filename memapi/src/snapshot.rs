//! Immutable, point-in-time copies of tracer state.

use crate::alloc_table::Trace;
use crate::error::{Result, TraceError};
use crate::filter::Filter;
use crate::grouped::{GroupBy, GroupedStats, Key};
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

/// `SystemTime` has no native serde support; persist it as seconds+nanos
/// since the epoch instead.
mod timestamp {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        (since_epoch.as_secs(), since_epoch.subsec_nanos()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let (secs, nanos): (u64, u32) = Deserialize::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::new(secs, nanos))
    }
}

/// `(timestamp, traceback_limit, statistics, traces?, metrics)`. Immutable
/// after construction except for the two mutating operations the source
/// exposes on a snapshot itself: `add_metric` and `apply_filters`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "timestamp")]
    timestamp: SystemTime,
    traceback_limit: usize,
    statistics: Statistics,
    traces: Option<Vec<(usize, Trace)>>,
    metrics: HashMap<String, (i64, String)>,
}

/// `self`'s filter semantics use the filter's own include/exclude sense
/// directly (`match_filename`/`matches`/`matches_traceback` already answer
/// "keep?"), so membership is: any inclusive filter keeps it (or there are
/// none), and every exclusive filter keeps it.
fn passes<'a>(includes: &[&'a Filter], excludes: &[&'a Filter], check: impl Fn(&Filter) -> bool) -> bool {
    let include_ok = includes.is_empty() || includes.iter().any(|f| check(f));
    include_ok && excludes.iter().all(|f| check(f))
}

impl Snapshot {
    pub fn new(
        timestamp: SystemTime,
        traceback_limit: usize,
        statistics: Statistics,
        traces: Option<Vec<(usize, Trace)>>,
    ) -> Self {
        Snapshot { timestamp, traceback_limit, statistics, traces, metrics: HashMap::new() }
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn traceback_limit(&self) -> usize {
        self.traceback_limit
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn traces(&self) -> Option<&[(usize, Trace)]> {
        self.traces.as_deref()
    }

    pub fn metrics(&self) -> &HashMap<String, (i64, String)> {
        &self.metrics
    }

    /// Attach a named metric. Fails if the name is already present.
    pub fn add_metric(&mut self, name: impl Into<String>, value: i64, format_tag: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.metrics.contains_key(&name) {
            return Err(TraceError::invalid_argument(format!(
                "metric '{}' is already present on this snapshot",
                name
            )));
        }
        self.metrics.insert(name, (value, format_tag.into()));
        Ok(())
    }

    pub fn get_metric(&self, name: &str, default: i64) -> i64 {
        self.metrics.get(name).map(|(value, _)| *value).unwrap_or(default)
    }

    /// Partitions `filters` into inclusive/exclusive sets and applies them
    /// to `statistics` and (if present) `traces` in place. A no-op on an
    /// empty filter list. Empty file buckets produced by filtering are
    /// dropped rather than preserved.
    pub fn apply_filters(&mut self, filters: &[Filter]) {
        if filters.is_empty() {
            return;
        }
        let includes: Vec<&Filter> = filters.iter().filter(|f| f.include).collect();
        let excludes: Vec<&Filter> = filters.iter().filter(|f| !f.include).collect();

        if let Some(traces) = &mut self.traces {
            traces.retain(|(_, trace)| {
                passes(&includes, &excludes, |f| f.matches_traceback(trace.traceback.frames()))
            });
        }

        let mut filtered = Statistics::new();
        for filename in self.statistics.files().map(str::to_string).collect::<Vec<_>>() {
            if !passes(&includes, &excludes, |f| f.match_filename(Some(&filename))) {
                continue;
            }
            let Some(lines) = self.statistics.lines(&filename) else { continue };
            for (&lineno, &(size, count)) in lines {
                if passes(&includes, &excludes, |f| f.matches(Some(&filename), Some(lineno))) {
                    filtered.set(filename.clone(), lineno, size, count);
                }
            }
        }
        self.statistics = filtered;
    }

    /// Regroups these statistics by `group_by`, optionally cumulative
    /// (attributing a trace's full size to every distinct key that appears
    /// anywhere in its traceback, not only its innermost frame).
    pub fn top_by(&self, group_by: GroupBy, cumulative: bool) -> Result<GroupedStats> {
        let stats = match group_by {
            GroupBy::Line => self.group_by_line(cumulative)?,
            GroupBy::Filename => self.group_by_filename(cumulative)?,
            GroupBy::Address => self.group_by_address()?,
            GroupBy::Traceback => self.group_by_traceback()?,
        };
        // Cumulative grouping silently falls back to non-cumulative when the
        // traceback limit can't support it (see the resolved Open Question),
        // so the `cumulative` flag recorded on the result reflects what was
        // actually computed.
        let effective_cumulative = cumulative && self.supports_cumulative();
        Ok(GroupedStats::new(
            self.timestamp,
            self.traceback_limit,
            stats,
            group_by,
            effective_cumulative,
            self.metrics.clone(),
        ))
    }

    fn supports_cumulative(&self) -> bool {
        self.traces.is_some() && self.traceback_limit >= 2
    }

    fn group_by_line(&self, cumulative: bool) -> Result<HashMap<Key, (u64, u64)>> {
        if cumulative && self.supports_cumulative() {
            return self.cumulative_by(|frame| frame.bucket_key(), |file, line| Key::FileLine(file, line));
        }
        Ok(self
            .statistics
            .iter()
            .map(|(file, line, (size, count))| (Key::FileLine(file.to_string(), line), (size, count)))
            .collect())
    }

    fn group_by_filename(&self, cumulative: bool) -> Result<HashMap<Key, (u64, u64)>> {
        if cumulative && self.supports_cumulative() {
            return self.cumulative_by(|frame| frame.bucket_key().0, |file, _| Key::File(file));
        }
        let mut by_file: HashMap<Key, (u64, u64)> = HashMap::new();
        for file in self.statistics.files() {
            let Some(lines) = self.statistics.lines(file) else { continue };
            let entry = by_file.entry(Key::File(file.to_string())).or_insert((0, 0));
            for &(size, count) in lines.values() {
                entry.0 += size;
                entry.1 += count;
            }
        }
        Ok(by_file)
    }

    /// Shared cumulative-grouping driver: for each trace, every *distinct*
    /// dedup-key occurring anywhere in its traceback gets the trace's full
    /// size attributed once, and its count incremented by one.
    fn cumulative_by<T, F, G>(&self, dedup_key: F, make_key: G) -> Result<HashMap<Key, (u64, u64)>>
    where
        T: std::hash::Hash + Eq,
        F: Fn(&crate::frame::Frame) -> T,
        G: Fn(String, u32) -> Key,
    {
        let traces = self.traces.as_ref().ok_or_else(|| TraceError::invalid_argument("need traces"))?;
        let mut result: HashMap<Key, (u64, u64)> = HashMap::new();
        for (_, trace) in traces {
            if trace.traceback.is_empty() {
                // No frames to attribute to: the whole trace goes to the
                // sentinel bucket, as the original's `else` branch does for
                // an empty traceback.
                let entry = result.entry(make_key(String::new(), 0)).or_insert((0, 0));
                entry.0 += trace.size;
                entry.1 += 1;
                continue;
            }
            let mut seen: HashSet<T> = HashSet::new();
            for frame in trace.traceback.frames() {
                if seen.insert(dedup_key(frame)) {
                    let (file, line) = frame.bucket_key();
                    let entry = result.entry(make_key(file, line)).or_insert((0, 0));
                    entry.0 += trace.size;
                    entry.1 += 1;
                }
            }
        }
        Ok(result)
    }

    fn group_by_address(&self) -> Result<HashMap<Key, (u64, u64)>> {
        let traces = self.traces.as_ref().ok_or_else(|| TraceError::invalid_argument("need traces"))?;
        Ok(traces.iter().map(|(addr, trace)| (Key::Address(*addr), (trace.size, 1))).collect())
    }

    fn group_by_traceback(&self) -> Result<HashMap<Key, (u64, u64)>> {
        let traces = self.traces.as_ref().ok_or_else(|| TraceError::invalid_argument("need traces"))?;
        Ok(traces
            .iter()
            .map(|(addr, trace)| (Key::AddressTraceback(*addr, trace.traceback.clone()), (trace.size, 1)))
            .collect())
    }
}
