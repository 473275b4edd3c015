use thiserror::Error;

/// Everything that can go wrong at a call boundary of this crate.
///
/// The hook body itself never produces one of these: a failure while
/// servicing an allocation degrades to recording an empty traceback instead
/// (see `tracer::record_alloc`).
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    InvalidFormat(String),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        TraceError::InvalidArgument(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        TraceError::InvalidState(msg.into())
    }

    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        TraceError::InvalidFormat(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
