use crate::frame::{Frame, Traceback};
use std::collections::HashMap;
use std::sync::Arc;

/// Content-addressed store of `Traceback`s.
///
/// Dedicated arena: `frames_to_id` maps a content key to a slot in
/// `canonical`, so that an equal sequence of frames handed in twice comes
/// back as the same `Arc`, and equal `Traceback`s are therefore
/// pointer-equal. Growth is monotonic for the lifetime of a trace session;
/// `clear()` drops everything, used by `reset`/`disable`.
#[derive(Default)]
pub struct Interner {
    canonical: HashMap<Box<[Frame]>, Arc<[Frame]>>,
}

impl Interner {
    pub fn new() -> Self {
        Interner { canonical: HashMap::new() }
    }

    /// Returns the canonical `Traceback` for `frames`, truncated to at most
    /// `limit` entries (innermost-first, so truncation drops the tail, the
    /// oldest/outermost frames).
    pub fn intern(&mut self, mut frames: Vec<Frame>, limit: usize) -> Traceback {
        frames.truncate(limit);
        let key: Box<[Frame]> = frames.into_boxed_slice();
        if let Some(existing) = self.canonical.get(&key) {
            return Traceback::from_arc(existing.clone());
        }
        let arc: Arc<[Frame]> = Arc::from(key.clone());
        self.canonical.insert(key, arc.clone());
        Traceback::from_arc(arc)
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn clear(&mut self) {
        self.canonical.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, line: u32) -> Frame {
        Frame::new(Some(name.to_string()), Some(line))
    }

    #[test]
    fn identical_frame_sequences_intern_to_the_same_identity() {
        let mut interner = Interner::new();
        let a = interner.intern(vec![frame("a.py", 1), frame("b.py", 2)], 10);
        let b = interner.intern(vec![frame("a.py", 1), frame("b.py", 2)], 10);
        assert!(a.same_identity(&b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn different_frame_sequences_intern_separately() {
        let mut interner = Interner::new();
        let a = interner.intern(vec![frame("a.py", 1)], 10);
        let b = interner.intern(vec![frame("a.py", 2)], 10);
        assert!(!a.same_identity(&b));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn limit_zero_yields_empty_tracebacks() {
        let mut interner = Interner::new();
        let tb = interner.intern(vec![frame("a.py", 1), frame("b.py", 2)], 0);
        assert!(tb.is_empty());
    }

    #[test]
    fn truncates_to_limit_keeping_innermost_frames() {
        let mut interner = Interner::new();
        let tb = interner.intern(vec![frame("a.py", 1), frame("b.py", 2), frame("c.py", 3)], 2);
        assert_eq!(tb.len(), 2);
        assert_eq!(tb.frames()[0].filename.as_deref(), Some("a.py"));
        assert_eq!(tb.frames()[1].filename.as_deref(), Some("b.py"));
    }

    #[test]
    fn clear_forgets_previously_interned_tracebacks() {
        let mut interner = Interner::new();
        interner.intern(vec![frame("a.py", 1)], 10);
        assert_eq!(interner.len(), 1);
        interner.clear();
        assert!(interner.is_empty());
    }
}
