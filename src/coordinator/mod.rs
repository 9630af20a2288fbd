pub mod mode;

use crate::prelude::*;

use crate::esy::command::{CommandBuilder, DEFAULT_POLL_SEGMENTS};
use crate::esy::decoder::decode_segments;
use crate::esy::frame::Frame;
use crate::esy::payload::parse_segments;
use crate::esy::registry::ProtocolDef;
use crate::esy::telemetry;
use crate::esy::value::{Snapshot, Value};
use mode::{ModeSelect, TimeoutAction};

use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    SetMode(String),
    WriteRegister(u16, u16),
    WriteRegisters(Vec<(u16, Vec<u16>)>),
    Poll,
    Shutdown,
}

#[derive(Debug, Default)]
pub struct PacketStats {
    pub telemetry_frames: u64,
    pub malformed_frames: u64,
    pub event_messages: u64,
    pub alarm_messages: u64,
    pub commands_sent: u64,
    pub invalid_mode_requests: u64,
    pub mode_confirmations: u64,
    pub mode_reverts: u64,
    pub mqtt_messages_sent: u64,
    pub mqtt_errors: u64,
}

impl PacketStats {
    pub fn print_summary(&self) {
        info!("session summary:");
        info!("  telemetry frames: {}", self.telemetry_frames);
        info!("  malformed frames: {}", self.malformed_frames);
        info!("  device events: {}", self.event_messages);
        info!("  device alarms: {}", self.alarm_messages);
        info!("  commands sent: {}", self.commands_sent);
        info!("  invalid mode requests: {}", self.invalid_mode_requests);
        info!("  mode confirmations: {}", self.mode_confirmations);
        info!("  mode reverts: {}", self.mode_reverts);
        info!("  mqtt messages sent: {}", self.mqtt_messages_sent);
        info!("  mqtt errors: {}", self.mqtt_errors);
    }
}

/// Owns the canonical telemetry snapshot and the mode-change state machine.
///
/// Uplink frames merge into the retained snapshot (the device sends partial
/// register sets), derived values are recomputed over the merged state and
/// the result is republished. Downlink requests arrive over the
/// to_coordinator channel from the scheduler and the local cmd topics.
#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    protocol: Arc<ProtocolDef>,
    commands: Arc<CommandBuilder>,
    pub shared_stats: Arc<Mutex<PacketStats>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels, protocol: Arc<ProtocolDef>) -> Self {
        let commands = Arc::new(CommandBuilder::new(protocol.config_id));

        Self {
            config,
            channels,
            protocol,
            commands,
            shared_stats: Arc::new(Mutex::new(PacketStats::default())),
        }
    }

    pub fn stop(&self) {
        let _ = self.channels.to_coordinator.send(ChannelData::Shutdown);
    }

    pub async fn start(&self) -> Result<()> {
        let mut from_mqtt = self.channels.from_mqtt.subscribe();
        let mut requests = self.channels.to_coordinator.subscribe();

        let mut snapshot = Snapshot::new();
        let mut mode = ModeSelect::new(
            self.config.mode_change().timeout(),
            self.config.mode_change().max_retries(),
        );

        loop {
            let deadline = mode.deadline();

            tokio::select! {
                msg = from_mqtt.recv() => match msg {
                    Ok(mqtt::ChannelData::Message(m)) => {
                        if let Err(e) = self.handle_message(m, &mut snapshot, &mut mode) {
                            warn!("{}", e);
                        }
                    }
                    Ok(mqtt::ChannelData::Connected) => {
                        // ask for everything as soon as the broker is back
                        if let Err(e) = self.send_poll() {
                            warn!("{}", e);
                        }
                    }
                    Ok(mqtt::ChannelData::Shutdown) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("coordinator lagged, dropped {} mqtt messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                req = requests.recv() => match req {
                    Ok(ChannelData::SetMode(name)) => {
                        if let Err(e) = self.handle_set_mode(&name, &snapshot, &mut mode) {
                            warn!("{}", e);
                        }
                    }
                    Ok(ChannelData::WriteRegister(register, value)) => {
                        if let Err(e) = self.send_down(self.commands.write_register(register, value)) {
                            warn!("{}", e);
                        }
                    }
                    Ok(ChannelData::WriteRegisters(writes)) => {
                        if let Err(e) = self.send_down(self.commands.write_registers(writes)) {
                            warn!("{}", e);
                        }
                    }
                    Ok(ChannelData::Poll) => {
                        if let Err(e) = self.send_poll() {
                            warn!("{}", e);
                        }
                    }
                    Ok(ChannelData::Shutdown) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("coordinator lagged, dropped {} requests", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                _ = async {
                    match deadline {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Err(e) = self.handle_mode_timeout(&snapshot, &mut mode) {
                        warn!("{}", e);
                    }
                }
            }
        }

        info!("coordinator loop exiting");
        Ok(())
    }

    fn handle_message(
        &self,
        m: mqtt::Message,
        snapshot: &mut Snapshot,
        mode: &mut ModeSelect,
    ) -> Result<()> {
        let device = self.config.device();

        if m.topic == device.up_topic() {
            self.process_uplink(&m.payload, snapshot, mode)
        } else if m.topic == device.event_topic() {
            info!("device event: {}", m.payload_str());
            if let Ok(mut stats) = self.shared_stats.lock() {
                stats.event_messages += 1;
            }
            Ok(())
        } else if m.topic == device.alarm_topic() {
            warn!("device alarm: {}", m.payload_str());
            if let Ok(mut stats) = self.shared_stats.lock() {
                stats.alarm_messages += 1;
            }
            Ok(())
        } else if let Some(command) = m
            .topic
            .strip_prefix(&format!("{}/cmd/", self.config.mqtt().namespace()))
        {
            self.handle_command(command, &m, snapshot, mode)
        } else {
            Ok(())
        }
    }

    fn handle_command(
        &self,
        command: &str,
        m: &mqtt::Message,
        snapshot: &mut Snapshot,
        mode: &mut ModeSelect,
    ) -> Result<()> {
        let parts: Vec<&str> = command.split('/').collect();

        match parts[..] {
            ["mode"] => {
                let name = m.payload_str();
                self.handle_set_mode(name.trim(), snapshot, mode)
            }
            ["poll"] => self.send_poll(),
            ["set", register] => {
                let register: u16 = register.parse()?;
                let value: u16 = m.payload_str().trim().parse()?;
                self.send_down(self.commands.write_register(register, value))
            }
            [..] => bail!("unhandled command topic: cmd/{}", command),
        }
    }

    fn process_uplink(
        &self,
        payload: &[u8],
        snapshot: &mut Snapshot,
        mode: &mut ModeSelect,
    ) -> Result<()> {
        let frame = match Frame::parse(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}", e);
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.malformed_frames += 1;
                }
                return Ok(());
            }
        };

        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.telemetry_frames += 1;
        }

        let segments = parse_segments(&frame.payload);
        let decoded = decode_segments(&self.protocol, &segments);

        debug!(
            "uplink msg_id={}: {} segments, {} values",
            frame.header.msg_id,
            segments.len(),
            decoded.len()
        );

        if decoded.is_empty() {
            return Ok(());
        }

        // partial uplinks are normal; merge over what we already know
        for (key, value) in decoded {
            snapshot.insert(key, value);
        }

        self.publish(snapshot, mode)
    }

    // recompute derived values over the merged snapshot, feed the mode
    // confirmation tracker and republish
    fn publish(&self, snapshot: &Snapshot, mode: &mut ModeSelect) -> Result<()> {
        let mut derived = snapshot.clone();
        telemetry::enrich(&mut derived);

        // confirmation watches the pattern mode only; the running mode
        // ("code") is a different code space and is synthesized even when
        // the register has never been seen
        let reported = derived.get("patternModeName").and_then(|v| match v {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        });

        if let Some(name) = reported {
            if mode.observe(&name) {
                info!("mode change to {:?} confirmed by telemetry", name);
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.mode_confirmations += 1;
                }
            }
        }

        if let Some(display) = mode.displayed() {
            derived.insert(
                "selectedMode".to_string(),
                Value::Text(display.to_string()),
            );
        }

        self.send_message(mqtt::Message {
            topic: "telemetry".to_string(),
            retain: true,
            payload: serde_json::to_vec(&derived)?,
        })
    }

    fn handle_set_mode(
        &self,
        name: &str,
        snapshot: &Snapshot,
        mode: &mut ModeSelect,
    ) -> Result<()> {
        match mode.request(name, Instant::now()) {
            Ok(code) => {
                info!("requesting mode change to {:?} (code {})", name, code);
                self.dispatch_mode_write(code, mode);
                // republish straight away so consumers see the optimistic
                // selection without waiting for the next uplink
                self.publish(snapshot, mode)
            }
            Err(e) => {
                warn!("{}", e);
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.invalid_mode_requests += 1;
                }
                Ok(())
            }
        }
    }

    fn dispatch_mode_write(&self, code: u16, mode: &mut ModeSelect) {
        if let Err(e) = self.send_down(self.commands.set_mode(code)) {
            error!("mode write failed to dispatch ({}), reverting", e);
            if let Ok(mut stats) = self.shared_stats.lock() {
                stats.mode_reverts += 1;
            }
            mode.dispatch_failed();
        }
    }

    fn handle_mode_timeout(&self, snapshot: &Snapshot, mode: &mut ModeSelect) -> Result<()> {
        match mode.on_timeout(Instant::now()) {
            Some(TimeoutAction::Resend(code)) => {
                warn!("mode change unconfirmed, re-sending write (code {})", code);
                self.dispatch_mode_write(code, mode);
                Ok(())
            }
            Some(TimeoutAction::Revert(previous)) => {
                warn!(
                    "mode change abandoned after retries, reverting display to {:?}",
                    previous
                );
                if let Ok(mut stats) = self.shared_stats.lock() {
                    stats.mode_reverts += 1;
                }
                self.publish(snapshot, mode)
            }
            None => Ok(()),
        }
    }

    fn poll_segments(&self) -> Vec<u16> {
        let fast: Vec<u16> = self
            .protocol
            .segments
            .iter()
            .filter(|s| s.fast_upload)
            .map(|s| s.segment_id)
            .collect();

        if fast.is_empty() {
            DEFAULT_POLL_SEGMENTS.to_vec()
        } else {
            fast
        }
    }

    fn send_poll(&self) -> Result<()> {
        self.send_down(self.commands.poll(&self.poll_segments()))
    }

    fn send_down(&self, payload: Vec<u8>) -> Result<()> {
        self.send_message(mqtt::Message {
            topic: self.config.device().down_topic(),
            retain: false,
            payload,
        })?;

        if let Ok(mut stats) = self.shared_stats.lock() {
            stats.commands_sent += 1;
        }

        Ok(())
    }

    fn send_message(&self, message: mqtt::Message) -> Result<()> {
        if self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(message))
            .is_err()
        {
            bail!("send(to_mqtt) failed - channel closed?");
        }

        Ok(())
    }
}
