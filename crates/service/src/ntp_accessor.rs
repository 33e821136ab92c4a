//! Dependency-injection seam for the NTP status cache (spec.md §9:
//! "NTP-monitor dependency injection" -- a single accessor is threaded
//! through every writer and processor rather than each one reaching for a
//! subprocess or socket itself).

/// A read of the process-wide NTP status cache, as seen by one channel at
/// one instant. `offset_ms`/`synced` mirror `iq-capture::ntp`'s cached
/// value; this crate never queries NTP directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NtpReading {
    pub synced: bool,
    pub offset_ms: Option<f64>,
    /// Seconds since this reading was cached from the last successful poll.
    pub age_s: f64,
}

pub trait NtpAccessor: Send + Sync {
    fn read(&self) -> NtpReading;
}

/// Accessor for tests and for analytics, which has no live NTP monitor and
/// only ever sees the value already embedded in a minute archive.
pub struct FixedNtpAccessor(pub NtpReading);

impl NtpAccessor for FixedNtpAccessor {
    fn read(&self) -> NtpReading {
        self.0
    }
}

impl NtpAccessor for NtpReading {
    fn read(&self) -> NtpReading {
        *self
    }
}
