use crate::base::error::DialError;
use std::time::Duration;
use tokio::time::Instant;

/// Absolute monotonic deadline governing a whole establishment pipeline.
///
/// Each sub-stage (proxy handshake, TLS handshake) derives its own timer from
/// the same instant at the moment it begins, so the pipeline observes exactly
/// one wall-clock budget no matter how many stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionDeadline(Instant);

impl ConnectionDeadline {
    /// Deadline at an absolute instant.
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// Deadline `timeout` from now.
    pub fn from_now(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn has_passed(&self) -> bool {
        self.0 <= Instant::now()
    }

    /// Time left until the deadline.
    ///
    /// A deadline already in the past surfaces as a connect-timeout failure;
    /// callers check this before attempting any I/O.
    pub fn remaining(&self) -> Result<Duration, DialError> {
        let now = Instant::now();
        if self.0 <= now {
            return Err(DialError::ConnectTimeout);
        }
        Ok(self.0 - now)
    }
}
