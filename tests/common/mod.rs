#![allow(dead_code)]

use sunhome_bridge::esy::frame::MsgHeader;
use sunhome_bridge::prelude::*;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();

impl Factory {
    pub fn example_config() -> ConfigWrapper {
        let yaml = r#"
device:
  serial: "0PVE0TEST001"
mqtt:
  enabled: true
  host: "localhost"
scheduler:
  enabled: false
"#;
        ConfigWrapper::from_config(serde_yaml::from_str(yaml).unwrap())
    }

    /// Device-style uplink: 24-byte header followed by a segmented payload.
    /// Each entry is (function_code, start_address, values).
    pub fn uplink_frame(segments: &[(u16, u16, &[u16])]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(segments.len() as u16).to_be_bytes());

        for (i, (function_code, start, values)) in segments.iter().enumerate() {
            payload.extend_from_slice(&(i as u16).to_be_bytes());
            payload.extend_from_slice(&function_code.to_be_bytes());
            payload.extend_from_slice(&start.to_be_bytes());
            payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
            for v in *values {
                payload.extend_from_slice(&v.to_be_bytes());
            }
        }

        let header = MsgHeader {
            config_id: 6,
            msg_id: 1,
            user_id: [0; 8],
            fun_code: 0,
            source_id: 1,
            page_index: 0,
            data_length: payload.len() as u32,
        };

        let mut frame = Vec::with_capacity(24 + payload.len());
        frame.extend_from_slice(&header.bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    pub fn message(topic: String, payload: impl Into<Vec<u8>>) -> mqtt::ChannelData {
        mqtt::ChannelData::Message(mqtt::Message {
            topic,
            retain: false,
            payload: payload.into(),
        })
    }
}

/// Pulls the next Message off a to_mqtt subscription, skipping other
/// channel traffic.
pub async fn recv_message(
    rx: &mut broadcast::Receiver<mqtt::ChannelData>,
) -> mqtt::Message {
    loop {
        match rx.recv().await.expect("channel closed") {
            mqtt::ChannelData::Message(m) => return m,
            _ => continue,
        }
    }
}
