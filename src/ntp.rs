//! NTP status monitor (spec.md §4.5): a single process-wide poll thread
//! caches {offset_ms, synced, last_update}; every channel reads the cache
//! through the `pipeline::ntp_accessor::NtpAccessor` seam rather than
//! querying NTP itself (spec.md §9: "NTP-monitor dependency injection").
//!
//! "invoke system time query" (spec.md §4.5) is implemented here as a
//! `chronyc tracking` subprocess call with a hard 2 s timeout, run on its
//! own thread so a hung subprocess can never stall the poll loop.

use std::process::Command;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use pipeline::ntp_accessor::{NtpAccessor, NtpReading};

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);
const STALE_AFTER: Duration = Duration::from_secs(60);

struct Cached {
    reading: NtpReading,
    last_update: Instant,
}

pub struct NtpMonitor {
    cached: Arc<RwLock<Cached>>,
}

impl NtpMonitor {
    /// Spawns the poll thread and returns an accessor immediately; the
    /// first `read()` before the first successful poll reports
    /// unsynchronized, per the same staleness rule as any other stale read.
    pub fn spawn() -> Self {
        let cached = Arc::new(RwLock::new(Cached {
            reading: NtpReading::default(),
            last_update: Instant::now() - STALE_AFTER,
        }));

        let poll_cached = cached.clone();
        std::thread::spawn(move || loop {
            match query_chrony() {
                Some(reading) => {
                    let mut guard = poll_cached.write();
                    guard.reading = reading;
                    guard.last_update = Instant::now();
                }
                None => log::warn!("ntp query failed or timed out; cached value retained"),
            }
            std::thread::sleep(POLL_INTERVAL);
        });

        Self { cached }
    }
}

impl NtpAccessor for NtpMonitor {
    fn read(&self) -> NtpReading {
        let guard = self.cached.read();
        let age_s = guard.last_update.elapsed().as_secs_f64();
        if guard.last_update.elapsed() > STALE_AFTER {
            NtpReading { synced: false, offset_ms: guard.reading.offset_ms, age_s }
        } else {
            NtpReading { age_s, ..guard.reading }
        }
    }
}

fn query_chrony() -> Option<NtpReading> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(Command::new("chronyc").arg("tracking").output());
    });
    let output = rx.recv_timeout(QUERY_TIMEOUT).ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    parse_chronyc_tracking(&String::from_utf8_lossy(&output.stdout))
}

/// Parses the two lines of `chronyc tracking` output this monitor needs;
/// the rest of the report (reference ID, stratum, drift) is not part of
/// spec.md's NTP status contract.
fn parse_chronyc_tracking(text: &str) -> Option<NtpReading> {
    let mut offset_ms = None;
    let mut leap_normal = true;

    for line in text.lines() {
        if let Some((_, value)) = line.split_once(':') {
            if line.starts_with("System time") {
                let value = value.trim();
                let seconds: f64 = value.split_whitespace().next()?.parse().ok()?;
                let sign = if value.contains("slow") { -1.0 } else { 1.0 };
                offset_ms = Some(seconds * 1000.0 * sign);
            } else if line.starts_with("Leap status") {
                leap_normal = value.trim() == "Normal";
            }
        }
    }

    offset_ms.map(|offset_ms| NtpReading { synced: leap_normal, offset_ms: Some(offset_ms), age_s: 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fast_offset_as_positive() {
        let text = "System time     : 0.000123456 seconds fast of NTP time\nLeap status     : Normal\n";
        let reading = parse_chronyc_tracking(text).unwrap();
        assert!(reading.synced);
        assert!(reading.offset_ms.unwrap() > 0.0);
    }

    #[test]
    fn parses_slow_offset_as_negative() {
        let text = "System time     : 0.000500000 seconds slow of NTP time\nLeap status     : Normal\n";
        let reading = parse_chronyc_tracking(text).unwrap();
        assert!(reading.offset_ms.unwrap() < 0.0);
    }

    #[test]
    fn non_normal_leap_status_is_unsynced() {
        let text = "System time     : 0.0 seconds fast of NTP time\nLeap status     : Not synchronised\n";
        let reading = parse_chronyc_tracking(text).unwrap();
        assert!(!reading.synced);
    }

    #[test]
    fn missing_system_time_line_yields_none() {
        assert!(parse_chronyc_tracking("Leap status     : Normal\n").is_none());
    }
}
