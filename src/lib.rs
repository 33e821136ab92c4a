pub mod config;
pub mod logger;
pub mod ntp;
pub mod receiver;

use std::sync::Arc;

use anyhow::Result;

use self::config::Config;
use self::ntp::NtpMonitor;
use self::receiver::ChannelReceiver;

/// Opened so integration tests can start the capture pipeline directly,
/// the same way the binary's `main` does.
pub async fn startup(config: Arc<Config>) -> Result<()> {
    std::fs::create_dir_all(&config.data_root)?;

    let ntp = Arc::new(NtpMonitor::spawn());

    let mut receivers = Vec::with_capacity(config.channels.len());
    for channel in &config.channels {
        let archive_dir = config.data_root.join(&channel.channel_name);
        std::fs::create_dir_all(&archive_dir)?;
        receivers.push(ChannelReceiver::spawn(channel.clone(), archive_dir, ntp.clone())?);
    }

    log::info!("capture running with {} channel(s)", receivers.len());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal, flushing in-progress minutes");
        }
    }

    for receiver in receivers {
        receiver.shutdown().await;
    }

    Ok(())
}
