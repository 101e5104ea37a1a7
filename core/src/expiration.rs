//! Request deadlines.
//!
//! The request only stores the deadline. Comparing it against the clock and
//! completing with `TransportResponse::expired()` is up to the host.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Deadline hosts apply when no explicit one was chosen.
pub const DEFAULT_EXPIRATION_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expiration {
    #[default]
    Never,
    At(DateTime<Utc>),
}

impl Expiration {
    /// Deadline `interval` from now; saturates instead of overflowing.
    pub fn after(interval: Duration) -> Self {
        let deadline = chrono::Duration::from_std(interval)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Expiration::At(deadline)
    }

    pub fn at(date: DateTime<Utc>) -> Self {
        Expiration::At(date)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Expiration::Never => None,
            Expiration::At(deadline) => Some(*deadline),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Expiration::Never => false,
            Expiration::At(deadline) => now >= *deadline,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
