mod common;
use common::*;

use sunhome_bridge::coordinator::{ChannelData, Coordinator};
use sunhome_bridge::esy::command;
use sunhome_bridge::esy::frame::Frame;
use sunhome_bridge::esy::registry::ProtocolDef;
use sunhome_bridge::prelude::*;

use serde_json::json;

async fn setup() -> (
    ConfigWrapper,
    Channels,
    Coordinator,
    broadcast::Receiver<mqtt::ChannelData>,
    tokio::task::JoinHandle<()>,
) {
    common_setup();
    let config = Factory::example_config();
    let channels = Channels::new();
    let to_mqtt = channels.to_mqtt.subscribe();

    let coordinator = Coordinator::new(
        config.clone(),
        channels.clone(),
        Arc::new(ProtocolDef::fallback()),
    );

    let c = coordinator.clone();
    let handle = tokio::spawn(async move {
        let _ = c.start().await;
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (config, channels, coordinator, to_mqtt, handle)
}

#[tokio::test]
async fn mode_request_writes_register_and_confirms_from_telemetry() -> Result<()> {
    let (config, channels, coordinator, mut to_mqtt, handle) = setup().await;

    channels
        .to_coordinator
        .send(ChannelData::SetMode("Emergency Mode".to_string()))?;

    // first the write frame goes out on the device DOWN topic
    let down = recv_message(&mut to_mqtt).await;
    assert_eq!(down.topic, config.device().down_topic());

    let frame = Frame::parse(&down.payload)?;
    assert_eq!(frame.header.user_id, command::USER_ID_WRITE);
    assert_eq!(frame.header.fun_code, command::FUN_WRITE);
    assert_eq!(frame.payload, vec![0, 1, 0, 57, 0, 1, 0, 4]);

    // then an optimistic republish showing the selection
    let published = recv_message(&mut to_mqtt).await;
    assert_eq!(published.topic, "telemetry");
    let data: serde_json::Value = serde_json::from_slice(&published.payload)?;
    assert_eq!(data["selectedMode"], json!("Emergency Mode"));

    // the device reporting the new pattern mode confirms the change
    let uplink = Factory::uplink_frame(&[(3, 57, &[4])]);
    channels
        .from_mqtt
        .send(Factory::message(config.device().up_topic(), uplink))?;

    let published = recv_message(&mut to_mqtt).await;
    let data: serde_json::Value = serde_json::from_slice(&published.payload)?;
    assert_eq!(data["patternModeName"], json!("Emergency Mode"));
    assert_eq!(data["selectedMode"], json!("Emergency Mode"));

    {
        let stats = coordinator.shared_stats.lock().unwrap();
        assert_eq!(stats.mode_confirmations, 1);
        assert_eq!(stats.commands_sent, 1);
        assert_eq!(stats.mode_reverts, 0);
    }

    coordinator.stop();
    let _ = handle.await;
    Ok(())
}

#[tokio::test]
async fn invalid_mode_request_sends_nothing() -> Result<()> {
    let (config, channels, coordinator, mut to_mqtt, handle) = setup().await;

    // readable on the wire but not writable
    channels
        .to_coordinator
        .send(ChannelData::SetMode("Grid Priority Mode".to_string()))?;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    {
        let stats = coordinator.shared_stats.lock().unwrap();
        assert_eq!(stats.invalid_mode_requests, 1);
        assert_eq!(stats.commands_sent, 0);
    }

    // subsequent traffic is unaffected
    channels.from_mqtt.send(mqtt::ChannelData::Connected)?;
    let down = recv_message(&mut to_mqtt).await;
    assert_eq!(down.topic, config.device().down_topic());

    coordinator.stop();
    let _ = handle.await;
    Ok(())
}

#[tokio::test]
async fn mode_command_arrives_over_local_topic() -> Result<()> {
    let (config, channels, coordinator, mut to_mqtt, handle) = setup().await;

    channels.from_mqtt.send(Factory::message(
        format!("{}/cmd/mode", config.mqtt().namespace()),
        "Regular Mode".as_bytes().to_vec(),
    ))?;

    let down = recv_message(&mut to_mqtt).await;
    let frame = Frame::parse(&down.payload)?;
    assert_eq!(frame.payload, vec![0, 1, 0, 57, 0, 1, 0, 1]);

    coordinator.stop();
    let _ = handle.await;
    Ok(())
}

#[tokio::test]
async fn register_write_command_over_local_topic() -> Result<()> {
    let (config, channels, coordinator, mut to_mqtt, handle) = setup().await;

    channels.from_mqtt.send(Factory::message(
        format!("{}/cmd/set/200", config.mqtt().namespace()),
        "3".as_bytes().to_vec(),
    ))?;

    let down = recv_message(&mut to_mqtt).await;
    assert_eq!(down.topic, config.device().down_topic());

    let frame = Frame::parse(&down.payload)?;
    assert_eq!(frame.header.user_id, command::USER_ID_WRITE);
    assert_eq!(frame.payload, vec![0, 1, 0, 200, 0, 1, 0, 3]);

    coordinator.stop();
    let _ = handle.await;
    Ok(())
}
