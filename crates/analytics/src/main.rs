//! Analytics binary (spec.md §2/§4.6-§4.11): one process per channel,
//! single-threaded and free to block on file I/O (spec.md §5), consuming
//! capture's minute archives and producing the long-form decimated archive
//! and timing metrics CSV.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fern::Dispatch;

use codec::archive::iso8601_utc;
use codec::rtp::Complex32;
use codec::timesnap::TimeSnap;
use pipeline::anchor::AnchorManager;
use pipeline::decimate::Decimator;
use pipeline::metrics::{classify_quality, TimingMetricsWriter};
use pipeline::reader::{MinuteFileReader, ReaderEvent};
use pipeline::tone::{self, ChannelKind};
use pipeline::writer::LongFormWriter;

/// WWV and WWVH share a multicast group (spec.md §4.6), so the station
/// selector only distinguishes the two 1000 Hz templates (WWV vs CHU); a
/// WWV-configured channel still reports WWVH detections it overhears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StationArg {
    Wwv,
    Chu,
}

impl From<StationArg> for ChannelKind {
    fn from(value: StationArg) -> Self {
        match value {
            StationArg::Wwv => ChannelKind::Wwv,
            StationArg::Chu => ChannelKind::Chu,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "analytics", about = "Tone detection and timing analytics for one captured channel")]
struct Cli {
    /// Channel name, matching the one this archive directory was captured under.
    #[arg(long)]
    channel: String,

    /// Directory capture writes this channel's minute archives into.
    #[arg(long)]
    archive_dir: PathBuf,

    /// Directory for this process's own output: long-form archive and timing CSV.
    #[arg(long)]
    output_dir: PathBuf,

    /// Resume-position file (last processed minute boundary).
    #[arg(long)]
    state_file: PathBuf,

    /// RTP SSRC this channel's archives carry.
    #[arg(long)]
    ssrc: u32,

    #[arg(long, default_value_t = 16_000)]
    sample_rate: u32,

    /// Which minute tone this channel's frequency carries (spec.md §4.6).
    #[arg(long, value_enum)]
    station: StationArg,

    #[arg(long, default_value_t = tone::DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Maximum archives processed per poll, bounding a cold-start backfill.
    #[arg(long, default_value_t = 1440)]
    backfill: usize,

    /// Seconds to sleep between directory polls when nothing new is pending.
    #[arg(long, default_value_t = 5)]
    poll_interval_s: u64,
}

fn init_logger() -> Result<()> {
    Dispatch::new()
        .level(log::LevelFilter::Info)
        .format(|out, message, record| out.finish(format_args!("[{}] - ({}) - {}", record.level(), record.target(), message)))
        .chain(std::io::stdout())
        .apply()
        .context("installing logger")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger()?;
    std::fs::create_dir_all(&cli.output_dir)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested, finishing current archive then exiting");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("installing signal handler")?;

    run(&cli, &shutdown)
}

/// Carries the per-channel state threaded through each archive processed:
/// the decimator's filter state, the rolling 5 s tail used to reconstruct
/// a tone-detection window spanning the minute boundary, and the anchor.
struct Session {
    anchor: Option<AnchorManager>,
    decimator: Decimator,
    tail: Option<Vec<Complex32>>,
}

impl Session {
    fn new() -> Self {
        Self { anchor: None, decimator: Decimator::new(), tail: None }
    }

    fn reset_on_session_boundary(&mut self) {
        self.decimator = Decimator::new();
        if let Some(anchor) = self.anchor.as_mut() {
            anchor.reset_drift_tracking();
        }
        self.tail = None;
    }
}

fn run(cli: &Cli, shutdown: &Arc<AtomicBool>) -> Result<()> {
    let mut reader = MinuteFileReader::new(cli.archive_dir.clone(), cli.state_file.clone(), cli.ssrc, cli.sample_rate, cli.backfill);
    let mut longform = LongFormWriter::new(cli.channel.clone(), cli.ssrc, cli.output_dir.clone());
    let mut metrics = TimingMetricsWriter::new(cli.output_dir.join(format!("{}.timing.csv", cli.channel)));
    let mut session = Session::new();
    let channel_kind: ChannelKind = cli.station.into();
    let tail_len = cli.sample_rate as usize * 5;

    log::info!("analytics running for channel {}", cli.channel);

    while !shutdown.load(Ordering::Relaxed) {
        let events = reader.poll().context("polling archive directory")?;
        if events.is_empty() {
            std::thread::sleep(Duration::from_secs(cli.poll_interval_s));
            continue;
        }

        for event in events {
            match event {
                ReaderEvent::SessionBoundary => {
                    log::warn!("channel {}: session boundary, resetting decimator and drift tracking", cli.channel);
                    session.reset_on_session_boundary();
                }
                ReaderEvent::Archive(archive) => {
                    process_archive(cli, channel_kind, *archive, &mut session, &mut longform, &mut metrics, tail_len)?;
                }
            }
        }
    }

    log::info!("analytics for channel {} exiting", cli.channel);
    Ok(())
}

/// One minute archive through the full pipeline: commit any time-snap
/// scheduled by the previous minute's detections (boundary-aligned, spec.md
/// §4.3), run tone detection over the window spanning this boundary, feed
/// the decimator, and append one long-form segment and one timing row.
fn process_archive(
    cli: &Cli,
    channel_kind: ChannelKind,
    archive: codec::archive::MinuteArchive,
    session: &mut Session,
    longform: &mut LongFormWriter,
    metrics: &mut TimingMetricsWriter,
    tail_len: usize,
) -> Result<()> {
    let anchor = session
        .anchor
        .get_or_insert_with(|| AnchorManager::new(TimeSnap::initial(archive.rtp_timestamp, archive.unix_timestamp, archive.sample_rate)));

    let mut time_snap_label = None;
    if let Some(pending) = anchor.take_pending() {
        time_snap_label = Some(pending.source.as_str().to_string());
        anchor.commit(pending);
    }

    let mut latest_drift_ppm = None;
    if let Some(prev_tail) = session.tail.take() {
        let mut window = prev_tail;
        window.extend_from_slice(&archive.iq[..tail_len.min(archive.iq.len())]);
        let window_start_utc = archive.unix_timestamp - 5.0;

        for detection in tone::detect(&window, archive.sample_rate, window_start_utc, channel_kind, cli.threshold) {
            log::info!(
                "channel {}: detected {:?} tone, confidence={:.2} timing_error_ms={:.2}",
                cli.channel,
                detection.station,
                detection.confidence,
                detection.timing_error_ms
            );
            if let Some(drift) = anchor.observe(&detection, archive.sample_rate) {
                latest_drift_ppm = Some(drift.ppm);
            }
        }
    }
    session.tail = Some(archive.iq[archive.iq.len().saturating_sub(tail_len)..].to_vec());

    let decimated = session.decimator.process_minute(&archive.iq);

    let minute_end_utc = archive.unix_timestamp + 60.0;
    let quality = classify_quality(Some(anchor.active()), minute_end_utc, archive.ntp_offset_ms.is_some(), archive.ntp_offset_ms);

    if let Some(label) = time_snap_label {
        longform.update_time_snap_pending(label);
    }
    longform.push_minute(archive.unix_timestamp as i64, &decimated, quality).context("writing long-form segment")?;

    let predicted_utc = anchor.active().utc_for_rtp(archive.rtp_timestamp);
    metrics
        .append(
            &iso8601_utc(archive.unix_timestamp),
            archive.rtp_timestamp,
            archive.unix_timestamp,
            archive.ntp_offset_ms,
            predicted_utc,
            quality,
            latest_drift_ppm,
        )
        .context("appending timing metrics row")?;

    Ok(())
}
