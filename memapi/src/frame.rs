use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

/// A single call-stack location: a filename and line number, either of which
/// may be absent when the host couldn't determine the origin.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub filename: Option<String>,
    pub lineno: Option<u32>,
}

impl Frame {
    pub fn new(filename: Option<String>, lineno: Option<u32>) -> Self {
        Frame { filename, lineno }
    }

    pub fn unknown() -> Self {
        Frame { filename: None, lineno: None }
    }

    /// The (filename, lineno) coordinate used as a statistics bucket key,
    /// with absent components normalized to the sentinel values.
    pub fn bucket_key(&self) -> (String, u32) {
        (
            self.filename.clone().unwrap_or_default(),
            self.lineno.unwrap_or(0),
        )
    }
}

/// An interned, immutable call stack, innermost frame first.
///
/// Cloning a `Traceback` is cheap (an `Arc` bump): every distinct sequence of
/// frames is represented by exactly one heap allocation, minted once by the
/// `Interner`.
#[derive(Clone, Debug)]
pub struct Traceback(pub(crate) Arc<[Frame]>);

// `Arc<[Frame]>` needs the `rc` serde feature to derive directly; instead we
// serialize/deserialize through a plain `Vec<Frame>`, which also means a
// deserialized Traceback is never accidentally identity-equal to a live,
// interned one (see `same_identity`).
impl Serialize for Traceback {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Traceback {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let frames = Vec::<Frame>::deserialize(deserializer)?;
        Ok(Traceback(Arc::from(frames.into_boxed_slice())))
    }
}

impl Traceback {
    pub(crate) fn from_arc(frames: Arc<[Frame]>) -> Self {
        Traceback(frames)
    }

    pub fn empty() -> Self {
        Traceback(Arc::from(Vec::new().into_boxed_slice()))
    }

    pub fn frames(&self) -> &[Frame] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The innermost frame, or `None` for an empty traceback.
    pub fn innermost(&self) -> Option<&Frame> {
        self.0.first()
    }

    /// Two canonical tracebacks are the same traceback iff they share one
    /// physical representation.
    pub fn same_identity(&self, other: &Traceback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// Two Tracebacks compare equal by content, independent of interning
// identity, so callers that deserialize a snapshot (and so get a fresh,
// non-interned Traceback) can still compare it against a live one.
impl PartialEq for Traceback {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}
impl Eq for Traceback {}

impl std::hash::Hash for Traceback {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_ref().hash(state);
    }
}

impl PartialOrd for Traceback {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Traceback {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_ref().cmp(other.0.as_ref())
    }
}
