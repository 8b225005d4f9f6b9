//! Error types for pair lifecycle operations.

use std::fmt;
use std::io;

/// Error returned when a pair run cannot be (re)started.
///
/// Only `reset` is fallible: spawning the worker thread can fail, and
/// resetting while the previous worker is still attached is a misuse the
/// caller must resolve with `cleanup` first. Everything else on the hot
/// path is infallible by design, and `cleanup` in particular never fails.
#[derive(Debug)]
pub enum PairError {
    /// The worker thread from a previous `reset` has not been joined yet.
    ///
    /// Call `cleanup` (or let the run loop exit naturally, which joins the
    /// worker) before resetting again.
    WorkerActive,

    /// The OS refused to create the worker thread.
    Spawn(io::Error),
}

impl fmt::Display for PairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerActive => {
                write!(f, "worker thread still attached - call cleanup before reset")
            }
            Self::Spawn(err) => write!(f, "failed to spawn worker thread: {err}"),
        }
    }
}

impl std::error::Error for PairError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            Self::WorkerActive => None,
        }
    }
}

impl From<io::Error> for PairError {
    fn from(err: io::Error) -> Self {
        Self::Spawn(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_cleanup_for_active_worker() {
        let msg = PairError::WorkerActive.to_string();
        assert!(msg.contains("cleanup"), "unhelpful message: {msg}");
    }

    #[test]
    fn spawn_error_preserves_source() {
        let err = PairError::from(io::Error::new(io::ErrorKind::Other, "EAGAIN"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
