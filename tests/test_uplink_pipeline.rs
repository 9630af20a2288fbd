mod common;
use common::*;

use sunhome_bridge::coordinator::Coordinator;
use sunhome_bridge::esy::command;
use sunhome_bridge::esy::frame::Frame;
use sunhome_bridge::esy::registry::ProtocolDef;
use sunhome_bridge::prelude::*;

use serde_json::json;

async fn spawn_coordinator(
    config: &ConfigWrapper,
    channels: &Channels,
) -> (Coordinator, tokio::task::JoinHandle<()>) {
    let coordinator = Coordinator::new(
        config.clone(),
        channels.clone(),
        Arc::new(ProtocolDef::fallback()),
    );

    let c = coordinator.clone();
    let handle = tokio::spawn(async move {
        let _ = c.start().await;
    });

    // let the event loop subscribe before anything is sent
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (coordinator, handle)
}

#[tokio::test]
async fn uplink_decodes_merges_and_publishes() -> Result<()> {
    common_setup();
    let config = Factory::example_config();
    let channels = Channels::new();
    let mut to_mqtt = channels.to_mqtt.subscribe();
    let (coordinator, handle) = spawn_coordinator(&config, &channels).await;

    // pv1: 1500W, pv2: 1200W; battery discharging 800W at 73% soc;
    // ct1 reads -800 (importing)
    let frame = Factory::uplink_frame(&[
        (4, 20, &[2305, 82, 1500, 0, 0, 1200]),
        (4, 28, &[5, 512, 25, 800, 73]),
        (4, 49, &[(-800i16) as u16]),
    ]);

    channels
        .from_mqtt
        .send(Factory::message(config.device().up_topic(), frame))?;

    let published = recv_message(&mut to_mqtt).await;
    assert_eq!(published.topic, "telemetry");
    assert!(published.retain);

    let data: serde_json::Value = serde_json::from_slice(&published.payload)?;
    assert_eq!(data["pvPower"], json!(2700));
    assert_eq!(data["dcPvPower"], json!(2700));
    assert_eq!(data["batteryPower"], json!(800));
    assert_eq!(data["batteryExport"], json!(800));
    assert_eq!(data["batteryStatusText"], json!("Discharging"));
    assert_eq!(data["batterySoc"], json!(73));
    assert_eq!(data["batteryVoltage"], json!(51.2));
    // ct1 -800 raw means importing; published sign is positive = import
    assert_eq!(data["gridPower"], json!(800));
    assert_eq!(data["gridImport"], json!(800));
    // legacy alias carried alongside the canonical key
    assert_eq!(data["ct1Power"], json!(-800));

    // a later partial uplink merges over the retained snapshot
    let frame = Factory::uplink_frame(&[(4, 32, &[74])]);
    channels
        .from_mqtt
        .send(Factory::message(config.device().up_topic(), frame))?;

    let published = recv_message(&mut to_mqtt).await;
    let data: serde_json::Value = serde_json::from_slice(&published.payload)?;
    assert_eq!(data["batterySoc"], json!(74));
    assert_eq!(data["pvPower"], json!(2700));

    coordinator.stop();
    let _ = handle.await;
    Ok(())
}

#[tokio::test]
async fn malformed_uplink_is_counted_not_published() -> Result<()> {
    common_setup();
    let config = Factory::example_config();
    let channels = Channels::new();
    let mut to_mqtt = channels.to_mqtt.subscribe();
    let (coordinator, handle) = spawn_coordinator(&config, &channels).await;

    channels.from_mqtt.send(Factory::message(
        config.device().up_topic(),
        vec![0x01, 0x02, 0x03],
    ))?;

    // a good frame afterwards still goes through
    let frame = Factory::uplink_frame(&[(4, 32, &[50])]);
    channels
        .from_mqtt
        .send(Factory::message(config.device().up_topic(), frame))?;

    let published = recv_message(&mut to_mqtt).await;
    let data: serde_json::Value = serde_json::from_slice(&published.payload)?;
    assert_eq!(data["batterySoc"], serde_json::json!(50));

    {
        let stats = coordinator.shared_stats.lock().unwrap();
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.telemetry_frames, 1);
    }

    coordinator.stop();
    let _ = handle.await;
    Ok(())
}

#[tokio::test]
async fn broker_connect_triggers_a_poll() -> Result<()> {
    common_setup();
    let config = Factory::example_config();
    let channels = Channels::new();
    let mut to_mqtt = channels.to_mqtt.subscribe();
    let (coordinator, handle) = spawn_coordinator(&config, &channels).await;

    channels.from_mqtt.send(mqtt::ChannelData::Connected)?;

    let down = recv_message(&mut to_mqtt).await;
    assert_eq!(down.topic, config.device().down_topic());
    assert!(!down.retain);

    let frame = Frame::parse(&down.payload)?;
    assert_eq!(frame.header.fun_code, command::FUN_POLL);
    assert_eq!(frame.header.user_id, command::USER_ID_CONTROL);
    assert_eq!(frame.header.page_index, command::PAGE_POLL);
    assert_eq!(frame.payload, vec![0, 4, 0, 0, 0, 1, 0, 3, 0, 6]);

    coordinator.stop();
    let _ = handle.await;
    Ok(())
}
