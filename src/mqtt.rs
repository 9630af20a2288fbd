use crate::prelude::*;

use crate::coordinator::PacketStats;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use std::sync::{Arc, Mutex};

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    /// Broker (re)connected; subscriptions are in place again.
    Connected,
    Shutdown,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
    shared_stats: Arc<Mutex<PacketStats>>,
}

impl Mqtt {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        shared_stats: Arc<Mutex<PacketStats>>,
    ) -> Self {
        Self {
            config,
            channels,
            shared_stats,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("sunhome-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(self.receiver(client.clone(), eventloop), self.sender(client))?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("stopping mqtt client");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        let _ = self.channels.from_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    // run after every (re)connect so subscriptions survive broker restarts
    async fn subscribe(&self, client: &AsyncClient) -> Result<()> {
        let device = self.config.device();

        for topic in [
            device.up_topic(),
            device.event_topic(),
            device.alarm_topic(),
        ] {
            client.subscribe(topic, QoS::AtMostOnce).await?;
        }

        // local command topics, eg sunhome/cmd/mode
        client
            .subscribe(
                format!("{}/cmd/#", self.config.mqtt().namespace()),
                QoS::AtMostOnce,
            )
            .await?;

        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        Ok(())
    }

    // mqtt -> coordinator
    async fn receiver(&self, client: AsyncClient, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.from_mqtt.subscribe();

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        self.subscribe(&client).await?;
                        let _ = self.channels.from_mqtt.send(ChannelData::Connected);
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        self.handle_message(publish)?;
                    }
                    Ok(_) => {} // keepalives etc
                    Err(e) => {
                        error!("mqtt: {}", e);
                        info!("reconnecting in 5s");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                },
                msg = shutdown.recv() => {
                    if let Ok(ChannelData::Shutdown) = msg {
                        break;
                    }
                }
            }
        }

        info!("mqtt receiver loop exiting");
        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        let message = Message {
            topic: publish.topic,
            retain: publish.retain,
            payload: publish.payload.to_vec(),
        };
        debug!("RX: {} ({} bytes)", message.topic, message.payload.len());

        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await? {
                Shutdown => {
                    info!("mqtt sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Connected => {}
                Message(message) => {
                    // device topics are absolute; local topics get namespaced
                    let topic = if message.topic.starts_with('/') {
                        message.topic
                    } else {
                        format!("{}/{}", self.config.mqtt().namespace(), message.topic)
                    };

                    debug!("TX: {} ({} bytes)", topic, message.payload.len());
                    match client
                        .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload)
                        .await
                    {
                        Ok(()) => {
                            if let Ok(mut stats) = self.shared_stats.lock() {
                                stats.mqtt_messages_sent += 1;
                            }
                        }
                        Err(err) => {
                            error!("publish to {} failed: {}", topic, err);
                            if let Ok(mut stats) = self.shared_stats.lock() {
                                stats.mqtt_errors += 1;
                            }
                        }
                    }
                }
            }
        }

        info!("mqtt sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
