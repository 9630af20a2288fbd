use crate::prelude::*;

use crate::coordinator::ChannelData;

/// Periodic poll driver. The device pushes telemetry on its own schedule
/// but goes quiet under some firmwares; asking for the default segments
/// every cycle keeps the snapshot fresh either way.
#[derive(Clone)]
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.scheduler().enabled() {
            info!("scheduler disabled, skipping");
            return Ok(());
        }

        let period = std::time::Duration::from_secs(self.config.scheduler().poll_interval());
        let mut interval = tokio::time::interval(period);

        info!("polling every {:?}", period);

        loop {
            interval.tick().await;

            if self.channels.to_coordinator.send(ChannelData::Poll).is_err() {
                break;
            }
        }

        Ok(())
    }
}
