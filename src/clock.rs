//! Wall-clock abstraction

use chrono::{DateTime, Utc};

/// Source of the current time
///
/// Everything that needs the current time goes through this trait so
/// tests can pin the clock.
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
