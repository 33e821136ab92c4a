//! RTP receiver & demuxer (spec.md §4.1) and its handoff to a channel's
//! resequencer/processor pair. One multicast group per channel: a receive
//! task reads datagrams and hands parsed bytes to a bounded ring-buffer
//! queue; a separate processing task drains it, so a rare blocking minute
//! flush (spec.md §5) never stalls the socket read.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use codec::rtp::parse_rtp_packet;
use codec::status::write_status;
use pipeline::channel::{ChannelProcessor, SystemClock};
use pipeline::ntp_accessor::NtpAccessor;
use pipeline::resequencer::Resequencer;
use pipeline::writer::MinuteWriter;

use crate::config::ChannelConfig;
use crate::ntp::NtpMonitor;

const QUEUE_CAPACITY: usize = 256;
const MAX_DATAGRAM: usize = 4096;
const SOCKET_REJOIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_SOCKET_FAILURES: u32 = 10;
const STATUS_WRITE_INTERVAL: Duration = Duration::from_secs(1);

struct RawPacket {
    bytes: Bytes,
    arrival: f64,
}

/// Bounded handoff queue between the receive task and the processing task.
/// Overflow drops the oldest entry and counts it, per spec.md §4.1's
/// "drop oldest and record 'overflow' discontinuity if full".
struct PacketQueue {
    inner: Mutex<VecDeque<RawPacket>>,
    notify: Notify,
    capacity: usize,
    overflowed_packets: Mutex<VecDeque<u32>>,
}

impl PacketQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            overflowed_packets: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, packet: RawPacket, samples_per_packet: u32) {
        let mut guard = self.inner.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.overflowed_packets.lock().push_back(samples_per_packet);
        }
        guard.push_back(packet);
        drop(guard);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<RawPacket> {
        self.inner.lock().pop_front()
    }

    fn drain_overflows(&self) -> Vec<u32> {
        self.overflowed_packets.lock().drain(..).collect()
    }

    fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

fn join_multicast(config: &ChannelConfig) -> Result<UdpSocket> {
    let group: Ipv4Addr = config
        .multicast_group
        .parse()
        .with_context(|| format!("invalid multicast group for channel {}", config.channel_name))?;

    let std_socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))
        .with_context(|| format!("binding udp socket for channel {}", config.channel_name))?;
    std_socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    std_socket.set_nonblocking(true)?;
    UdpSocket::from_std(std_socket).context("converting to tokio socket")
}

async fn recv_loop(config: ChannelConfig, queue: Arc<PacketQueue>, shutdown: Arc<AtomicBool>) {
    let mut socket = match join_multicast(&config) {
        Ok(s) => s,
        Err(err) => {
            log::error!("channel {}: failed to join multicast group: {err:#}", config.channel_name);
            return;
        }
    };

    let mut consecutive_failures = 0u32;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while !shutdown.load(Ordering::Relaxed) {
        let recv = tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await;
        match recv {
            Ok(Ok((len, _src))) => {
                consecutive_failures = 0;
                let arrival = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                queue.push(RawPacket { bytes: Bytes::copy_from_slice(&buf[..len]), arrival }, config.samples_per_packet);
            }
            Ok(Err(err)) => {
                consecutive_failures += 1;
                log::warn!("channel {}: socket error ({consecutive_failures}/{MAX_CONSECUTIVE_SOCKET_FAILURES}): {err}", config.channel_name);
                if consecutive_failures >= MAX_CONSECUTIVE_SOCKET_FAILURES {
                    log::error!("channel {}: too many consecutive socket failures, giving up", config.channel_name);
                    return;
                }
                tokio::time::sleep(SOCKET_REJOIN_BACKOFF).await;
                match join_multicast(&config) {
                    Ok(s) => socket = s,
                    Err(err) => log::error!("channel {}: rejoin failed: {err:#}", config.channel_name),
                }
            }
            Err(_timeout) => {} // just a chance to re-check `shutdown`
        }
    }
}

async fn process_loop(
    config: ChannelConfig,
    archive_dir: std::path::PathBuf,
    status_path: std::path::PathBuf,
    ntp: Arc<NtpMonitor>,
    queue: Arc<PacketQueue>,
    shutdown: Arc<AtomicBool>,
) {
    let writer = MinuteWriter::new(config.channel_name.clone(), config.ssrc, config.frequency_hz, config.sample_rate, archive_dir);
    let ntp_accessor: Arc<dyn NtpAccessor> = ntp;
    let mut processor = ChannelProcessor::new(config.sample_rate, writer, ntp_accessor, Arc::new(SystemClock));
    let mut resequencer = Resequencer::new();
    let mut last_status_write = Instant::now() - STATUS_WRITE_INTERVAL;

    loop {
        for magnitude in queue.drain_overflows() {
            processor.record_overflow(magnitude as i64);
        }

        match queue.pop() {
            Some(raw) => match parse_rtp_packet(raw.bytes, config.samples_per_packet as usize) {
                Ok(pkt) if pkt.ssrc == config.ssrc => {
                    let outcome = resequencer.push(pkt.sequence, pkt.timestamp, pkt.samples, raw.arrival);
                    processor.process(outcome);
                }
                Ok(_) => {} // unknown SSRC on this group: drop silently (spec.md §4.1)
                Err(err) => {
                    processor.record_malformed();
                    log::debug!("channel {}: malformed RTP packet: {err}", config.channel_name);
                }
            },
            None => {
                if shutdown.load(Ordering::Relaxed) && queue.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        if last_status_write.elapsed() >= STATUS_WRITE_INTERVAL {
            let status = processor.status(&config.channel_name);
            if let Err(err) = write_status(&status_path, &status) {
                log::warn!("channel {}: failed to write status file: {err}", config.channel_name);
            }
            last_status_write = Instant::now();
        }
    }

    processor.shutdown();
    let outcome = resequencer.drain_on_shutdown();
    processor.process(outcome);
    let status = processor.status(&config.channel_name);
    let _ = write_status(&status_path, &status);
}

pub struct ChannelReceiver {
    channel_name: String,
    recv_task: JoinHandle<()>,
    process_task: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl ChannelReceiver {
    pub fn spawn(config: ChannelConfig, archive_dir: std::path::PathBuf, ntp: Arc<NtpMonitor>) -> Result<Self> {
        let channel_name = config.channel_name.clone();
        let status_path = archive_dir.join(format!("{channel_name}.status.json"));
        let queue = Arc::new(PacketQueue::new(QUEUE_CAPACITY));
        let shutdown = Arc::new(AtomicBool::new(false));

        let recv_task = tokio::spawn(recv_loop(config.clone(), queue.clone(), shutdown.clone()));
        let process_task = tokio::spawn(process_loop(config, archive_dir, status_path, ntp, queue, shutdown.clone()));

        Ok(Self { channel_name, recv_task, process_task, shutdown })
    }

    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Err(err) = self.recv_task.await {
            log::warn!("channel {}: receive task panicked: {err}", self.channel_name);
        }
        if let Err(err) = self.process_task.await {
            log::warn!("channel {}: process task panicked: {err}", self.channel_name);
        }
    }
}
