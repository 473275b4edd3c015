use crate::alloc_table::{AllocationTable, Trace};
use crate::error::{Result, TraceError};
use crate::filter::Filter;
use crate::frame::Frame;
use crate::interner::Interner;
use crate::snapshot::Snapshot;
use crate::stats::Statistics;
use lazy_static::lazy_static;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

/// Process-wide tracer state, guarded by a single coarse lock (see the
/// concurrency discipline in the system design: the hook critical section is
/// O(frames captured), dominated by the host's own allocator, so one lock is
/// enough).
struct TracerState {
    enabled: bool,
    traceback_limit: usize,
    table: AllocationTable,
    interner: Interner,
    stats: Statistics,
    filters: Vec<Filter>,
    current_bytes: u64,
    peak_bytes: u64,
}

impl TracerState {
    fn new() -> Self {
        TracerState {
            enabled: false,
            traceback_limit: 1,
            table: AllocationTable::new(),
            interner: Interner::new(),
            stats: Statistics::new(),
            filters: Vec::new(),
            current_bytes: 0,
            peak_bytes: 0,
        }
    }

    fn clear_session_data(&mut self) {
        self.table.clear();
        self.interner.clear();
        self.stats.clear();
        self.current_bytes = 0;
        self.peak_bytes = 0;
    }

    fn passes_filters(&self, frames: &[Frame]) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let mut has_include = false;
        let mut include_hit = false;
        for f in self.filters.iter().filter(|f| f.include) {
            has_include = true;
            if f.matches_traceback(frames) {
                include_hit = true;
                break;
            }
        }
        let include_ok = !has_include || include_hit;
        include_ok
            && self
                .filters
                .iter()
                .filter(|f| !f.include)
                .all(|f| f.matches_traceback(frames))
    }
}

lazy_static! {
    static ref TRACER: Mutex<TracerState> = Mutex::new(TracerState::new());
}

/// Tracks, for the current thread, whether we're already inside the hook
/// body. Recursive entries (the tracer's own bookkeeping allocating memory)
/// return immediately without recording anything.
thread_local! {
    static IN_HOOK: Cell<bool> = Cell::new(false);
}

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

fn lock() -> std::sync::MutexGuard<'static, TracerState> {
    TRACER.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `body` only if this thread isn't already inside the hook; recursive
/// calls are swallowed silently, per the reentrancy guard in the design.
fn guarded<R>(body: impl FnOnce() -> R) -> Option<R> {
    IN_HOOK.with(|flag| {
        if flag.get() {
            return None;
        }
        flag.set(true);
        let result = body();
        flag.set(false);
        Some(result)
    })
}

/// Idempotent: a no-op if already enabled.
pub fn enable() {
    let mut state = lock();
    if state.enabled {
        return;
    }
    state.clear_session_data();
    state.enabled = true;
    HOOK_INSTALLED.store(true, Ordering::SeqCst);
}

/// Idempotent: a no-op if already disabled. Filters survive this call.
pub fn disable() {
    let mut state = lock();
    if !state.enabled {
        return;
    }
    state.clear_session_data();
    state.enabled = false;
    HOOK_INSTALLED.store(false, Ordering::SeqCst);
}

pub fn is_enabled() -> bool {
    lock().enabled
}

/// Clears the allocation table, interner and statistics while the tracer
/// remains enabled. A no-op while disabled.
pub fn reset() {
    let mut state = lock();
    if !state.enabled {
        return;
    }
    state.clear_session_data();
}

pub fn get_traceback_limit() -> usize {
    lock().traceback_limit
}

pub fn set_traceback_limit(limit: i64) -> Result<()> {
    if limit < 0 {
        return Err(TraceError::invalid_argument(
            "the number of frames must be greater than or equal to 0",
        ));
    }
    lock().traceback_limit = limit as usize;
    Ok(())
}

pub fn get_traced_memory() -> (u64, u64) {
    let state = lock();
    (state.current_bytes, state.peak_bytes)
}

/// Approximates the tracer's own bookkeeping footprint: the allocation
/// table's entries plus the interner's canonical tracebacks. There is no
/// separate sub-allocator pool in this implementation (see DESIGN.md), so
/// `free` is always reported as 0.
pub fn get_tracemalloc_memory() -> (u64, u64) {
    let state = lock();
    let table_bytes = state.table.len() * std::mem::size_of::<Trace>();
    let interner_bytes = state.interner.len() * std::mem::size_of::<Frame>();
    ((table_bytes + interner_bytes) as u64, 0)
}

pub fn get_stats() -> Statistics {
    lock().stats.clone()
}

pub fn get_traces() -> Vec<(usize, Trace)> {
    lock()
        .table
        .iter()
        .map(|(addr, trace)| (addr, trace.clone()))
        .collect()
}

pub fn get_trace(address: usize) -> Option<Trace> {
    lock().table.get(address).cloned()
}

/// Alias of `get_trace`. The source's `get_object_trace`/`get_object_address`
/// pair is a host-object-identity concept (Python's `id(obj)`); this crate
/// never dereferences host objects (see the design notes on cyclic
/// references), so both collapse to looking a trace up by its raw address.
pub fn get_trace_for_address(address: usize) -> Option<Trace> {
    get_trace(address)
}

pub fn add_filter(filter: Filter) {
    lock().filters.push(filter);
}

pub fn add_inclusive_filter(pattern: &str, lineno: Option<u32>, match_traceback: bool) -> Result<()> {
    add_filter(Filter::new(true, pattern, lineno, match_traceback)?);
    Ok(())
}

pub fn add_exclusive_filter(pattern: &str, lineno: Option<u32>, match_traceback: bool) -> Result<()> {
    add_filter(Filter::new(false, pattern, lineno, match_traceback)?);
    Ok(())
}

pub fn clear_filters() {
    lock().filters.clear();
}

pub fn get_filters() -> Vec<Filter> {
    lock().filters.clone()
}

/// Record a new allocation. Called from the host's allocator hook. Never
/// fails: a problem capturing frames degrades to an empty traceback rather
/// than raising, per the hook-body error-handling rule.
pub fn record_alloc(address: usize, size: u64, mut frames: Vec<Frame>) {
    guarded(|| {
        let mut state = lock();
        if !state.enabled {
            return;
        }
        frames.truncate(state.traceback_limit);
        if !state.passes_filters(&frames) {
            return;
        }
        let traceback = state.interner.intern(frames, state.traceback_limit);
        let (filename, lineno) = traceback
            .innermost()
            .map(|f| f.bucket_key())
            .unwrap_or_default();

        let previous = state.table.insert(address, Trace { size, traceback: traceback.clone() });
        if let Some(prev) = &previous {
            let (pf, pl) = prev
                .traceback
                .innermost()
                .map(|f| f.bucket_key())
                .unwrap_or_default();
            state.stats.remove(&pf, pl, prev.size);
            state.current_bytes = state.current_bytes.saturating_sub(prev.size);
        }
        state.stats.add(filename, lineno, size);
        state.current_bytes += size;
        if state.current_bytes > state.peak_bytes {
            state.peak_bytes = state.current_bytes;
        }
    });
}

/// Record that the allocation at `address` was freed. Idempotent on an
/// address the tracer never recorded.
pub fn record_free(address: usize) {
    guarded(|| {
        let mut state = lock();
        if !state.enabled {
            return;
        }
        if let Some(removed) = state.table.remove(address) {
            let (filename, lineno) = removed
                .traceback
                .innermost()
                .map(|f| f.bucket_key())
                .unwrap_or_default();
            state.stats.remove(&filename, lineno, removed.size);
            state.current_bytes = state.current_bytes.saturating_sub(removed.size);
        }
    });
}

/// Build an immutable snapshot of the current state. Requires the tracer to
/// be enabled.
pub fn take_snapshot(timestamp: SystemTime, with_traces: bool) -> Result<Snapshot> {
    let state = lock();
    if !state.enabled {
        return Err(TraceError::invalid_state(
            "the tracer module must be enabled to take a snapshot",
        ));
    }
    let traces = if with_traces {
        Some(
            state
                .table
                .iter()
                .map(|(addr, trace)| (addr, trace.clone()))
                .collect(),
        )
    } else {
        None
    };
    Ok(Snapshot::new(timestamp, state.traceback_limit, state.stats.clone(), traces))
}

/// Best-effort post-fork recovery for the child process: a held lock from a
/// thread that no longer exists in the child would otherwise deadlock any
/// future tracer call forever, so the child tries to recover the lock and,
/// failing that, starts the child from a clean slate while preserving
/// whether tracing was enabled. See DESIGN.md for why this is best-effort
/// rather than using a `prepare`/`parent`/`child` `pthread_atfork` triple.
pub fn after_fork_child() {
    let was_enabled = match TRACER.try_lock() {
        Ok(state) => state.enabled,
        Err(_) => {
            eprintln!("=alloctrace= fork occurred while tracer lock was held; reinitializing");
            true
        }
    };
    // Mutex's internal OS futex is process-local state duplicated by fork();
    // replacing the guarded value (rather than trying to unlock it) is the
    // only way to recover if some other, now-gone thread held it.
    if let Ok(mut state) = TRACER.try_lock() {
        *state = TracerState::new();
        state.enabled = was_enabled;
    }
}

#[cfg(unix)]
pub fn register_fork_handler() {
    extern "C" fn child_hook() {
        after_fork_child();
    }
    unsafe {
        libc::pthread_atfork(None, None, Some(child_hook));
    }
}

#[cfg(not(unix))]
pub fn register_fork_handler() {}
