use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Default deadline for single-row writes
pub const WRITE_DEADLINE: Duration = Duration::from_secs(5);
/// Default deadline for searches
pub const SEARCH_DEADLINE: Duration = Duration::from_secs(15);
/// Default deadline for merges
pub const MERGE_DEADLINE: Duration = Duration::from_secs(60);
/// Default deadline for consolidation runs
pub const CONSOLIDATION_DEADLINE: Duration = Duration::from_secs(120);

/// Per-request cancellation token.
///
/// Every engine operation takes a `&Ctx` and calls [`Ctx::check`] at its
/// suspension points (before and after storage, embedder, and judge calls).
/// A request past its deadline surfaces as `ErrorKind::Cancelled`.
///
/// The acting branch is never carried here; it is an explicit argument to
/// every operation.
#[derive(Debug, Clone, Copy)]
pub struct Ctx {
    deadline: Option<Instant>,
}

impl Ctx {
    /// A context with no deadline.
    pub fn background() -> Self {
        Self { deadline: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Apply `timeout` only when the caller did not set a deadline.
    ///
    /// Engines call this at entry with their operation-class default.
    pub fn or_timeout(self, timeout: Duration) -> Self {
        match self.deadline {
            Some(_) => self,
            None => Self::with_timeout(timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Surface `Cancelled` once the deadline has passed.
    pub fn check(&self) -> Result<()> {
        match self.deadline {
            Some(d) if Instant::now() >= d => {
                Err(Error::cancelled("operation deadline exceeded"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn background_never_cancels() {
        let ctx = Ctx::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn expired_deadline_cancels() {
        let ctx = Ctx::with_timeout(Duration::ZERO);
        let err = ctx.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn or_timeout_keeps_existing_deadline() {
        let ctx = Ctx::with_timeout(Duration::from_secs(1));
        let before = ctx.deadline().unwrap();
        let ctx = ctx.or_timeout(Duration::from_secs(600));
        assert_eq!(ctx.deadline().unwrap(), before);
    }
}
