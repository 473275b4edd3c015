//! Persistence adapter: two length-prefixed `bincode` records on a byte
//! stream — a header (format version, timestamp, traceback limit,
//! statistics, metrics) and, if present, a second record of traces.
//!
//! This generalizes the distilled source's reliance on a self-delimiting
//! pickle stream: each record here is framed explicitly with an 8-byte
//! little-endian length prefix, so a reader doesn't need seekable I/O.

use crate::alloc_table::Trace;
use crate::error::{Result, TraceError};
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::SystemTime;

/// Exact-match compatibility: refuse anything that isn't precisely this
/// version rather than attempt a salvage migration.
pub const FORMAT_VERSION: (u16, u16) = (3, 4);

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

#[derive(Serialize, Deserialize)]
struct Header {
    format_version: (u16, u16),
    #[serde(with = "timestamp")]
    timestamp: SystemTime,
    traceback_limit: usize,
    statistics: Statistics,
    metrics: std::collections::HashMap<String, (i64, String)>,
}

use crate::snapshot::Snapshot;

fn write_record<W: Write, T: Serialize>(sink: &mut W, record: &T) -> Result<()> {
    let payload = bincode::serialize(record).map_err(|e| TraceError::invalid_format(e.to_string()))?;
    sink.write_all(&(payload.len() as u64).to_le_bytes())?;
    sink.write_all(&payload)?;
    Ok(())
}

fn read_record<R: Read, T: for<'de> Deserialize<'de>>(source: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 8];
    source.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes) as usize;
    let mut payload = vec![0u8; len];
    source.read_exact(&mut payload)?;
    bincode::deserialize(&payload).map_err(|e| TraceError::invalid_format(e.to_string()))
}

/// Serialize `snapshot` to `sink`: a header record, then a traces record if
/// `snapshot.traces()` is present.
pub fn dump<W: Write>(snapshot: &Snapshot, sink: &mut W) -> Result<()> {
    let header = Header {
        format_version: FORMAT_VERSION,
        timestamp: snapshot.timestamp(),
        traceback_limit: snapshot.traceback_limit(),
        statistics: snapshot.statistics().clone(),
        metrics: snapshot.metrics().clone(),
    };
    write_record(sink, &header)?;
    if let Some(traces) = snapshot.traces() {
        write_record(sink, &traces.to_vec())?;
    }
    Ok(())
}

/// Deserialize a snapshot from `source`. `with_traces` must match whether
/// `dump` was called with traces present; it tells the reader whether to
/// expect a second record.
pub fn load<R: Read>(source: &mut R, with_traces: bool) -> Result<Snapshot> {
    let header: Header = read_record(source)?;
    if header.format_version != FORMAT_VERSION {
        return Err(TraceError::invalid_format(format!(
            "unsupported snapshot format version {:?}, expected {:?}",
            header.format_version, FORMAT_VERSION
        )));
    }
    let traces = if with_traces {
        Some(read_record::<_, Vec<(usize, Trace)>>(source)?)
    } else {
        None
    };
    let mut snapshot = Snapshot::new(header.timestamp, header.traceback_limit, header.statistics, traces);
    for (name, (value, format_tag)) in header.metrics {
        // Can't fail: names were unique on the writer's side too.
        let _ = snapshot.add_metric(name, value, format_tag);
    }
    Ok(snapshot)
}

/// Convenience wrapper: writes to a temporary sibling file, then renames it
/// into place, so a failure midway through encoding never leaves a partial
/// artifact at `path`.
pub fn dump_to_path(snapshot: &Snapshot, path: &std::path::Path) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        dump(snapshot, &mut file)?;
        file.sync_all()?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            eprintln!("=alloctrace= failed to write snapshot to {}: {}", path.display(), e);
            Err(e)
        }
    }
}

pub fn load_from_path(path: &std::path::Path, with_traces: bool) -> Result<Snapshot> {
    let mut file = std::fs::File::open(path)?;
    load(&mut file, with_traces)
}
