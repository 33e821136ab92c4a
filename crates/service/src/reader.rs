//! Minute file reader (spec.md §4.9): sequential consumption of capture's
//! archive directory, in timestamp order, with persisted resume state and
//! bounded backfill.

use std::path::{Path, PathBuf};

use codec::archive::{self, MinuteArchive};
use codec::error::ArchiveError;
use codec::rtp::rtp_ts_diff;

#[derive(Debug)]
pub enum ReaderEvent {
    Archive(Box<MinuteArchive>),
    /// Emitted when an archive's `rtp_timestamp` is not contiguous with the
    /// previous one processed (spec.md §4.9 / §9's Open Question on
    /// session-boundary semantics): downstream must reset decimator filter
    /// state and skip drift computation across this point.
    SessionBoundary,
}

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

pub struct MinuteFileReader {
    archive_dir: PathBuf,
    state_file: PathBuf,
    ssrc: u32,
    last_processed_minute: Option<i64>,
    last_rtp_end: Option<u32>,
    sample_rate: u32,
    backfill_limit: usize,
}

impl MinuteFileReader {
    pub fn new(archive_dir: PathBuf, state_file: PathBuf, ssrc: u32, sample_rate: u32, backfill_limit: usize) -> Self {
        let last_processed_minute = std::fs::read_to_string(&state_file).ok().and_then(|s| s.trim().parse().ok());
        Self {
            archive_dir,
            state_file,
            ssrc,
            last_processed_minute,
            last_rtp_end: None,
            sample_rate,
            backfill_limit,
        }
    }

    fn list_pending(&self) -> Result<Vec<(i64, PathBuf)>, ReaderError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.archive_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok((minute, ssrc)) = archive::parse_archive_file_name(name) else { continue };
            if ssrc != self.ssrc {
                continue;
            }
            if let Some(last) = self.last_processed_minute {
                if minute <= last {
                    continue;
                }
            }
            entries.push((minute, entry.path()));
        }
        entries.sort_by_key(|(minute, _)| *minute);
        entries.truncate(self.backfill_limit.max(1));
        Ok(entries)
    }

    /// Reads all pending archives (bounded by the configured backfill
    /// limit), emitting a `SessionBoundary` event whenever continuity with
    /// the previous archive's RTP timestamp is broken.
    pub fn poll(&mut self) -> Result<Vec<ReaderEvent>, ReaderError> {
        let pending = self.list_pending()?;
        let mut events = Vec::with_capacity(pending.len());

        for (minute, path) in pending {
            let bytes = std::fs::read(&path)?;
            let archive = match archive::decode(&bytes) {
                Ok(a) => a,
                Err(_) => {
                    events.push(ReaderEvent::SessionBoundary);
                    self.last_rtp_end = None;
                    self.last_processed_minute = Some(minute);
                    continue;
                }
            };

            let expected_end = self.last_rtp_end;
            let contiguous = expected_end.is_none_or(|end| rtp_ts_diff(archive.rtp_timestamp, end) == 0);
            if !contiguous {
                events.push(ReaderEvent::SessionBoundary);
            }

            self.last_rtp_end = Some(archive.rtp_timestamp.wrapping_add(self.sample_rate * 60));
            self.last_processed_minute = Some(minute);
            events.push(ReaderEvent::Archive(Box::new(archive)));
        }

        self.persist_state()?;
        Ok(events)
    }

    fn persist_state(&self) -> Result<(), ReaderError> {
        if let Some(minute) = self.last_processed_minute {
            codec::atomic_write(&self.state_file, minute.to_string().as_bytes())?;
        }
        Ok(())
    }
}
