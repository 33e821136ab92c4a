#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use iq_capture::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    iq_capture::logger::init(&config)?;

    if config.channels.is_empty() {
        log::warn!("no channels configured, exiting without capturing anything");
        return Ok(());
    }

    iq_capture::startup(config).await
}
