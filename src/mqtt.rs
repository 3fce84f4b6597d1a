use crate::prelude::*;

use crate::device::Snapshot;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    /// Relative to the namespace; empty means the namespace itself.
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    pub fn for_snapshot(snapshot: &Snapshot) -> Result<Message> {
        Ok(Message {
            topic: String::new(),
            retain: false,
            payload: serde_json::to_string(snapshot)?,
        })
    }

    pub fn full_topic(&self, namespace: &str) -> String {
        if self.topic.is_empty() {
            namespace.to_string()
        } else {
            format!("{}/{}", namespace, self.topic)
        }
    }
} // }}}

#[derive(Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
    shutdown: Arc<AtomicBool>,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self {
            config,
            channels,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("powerbus-bridge", c.mqtt().host(), c.mqtt().port());

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

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    /// Queued messages still go out; the sender disconnects once it reaches
    /// the shutdown.
    pub fn stop(&self) {
        info!("Stopping MQTT client...");
        if self.channels.to_mqtt.send(ChannelData::Shutdown).is_err() {
            self.shutdown.store(true, Ordering::SeqCst);
        }
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        Ok(())
    }

    // nothing is subscribed; polling keeps the connection alive and flushes
    // publishes, up to and including the final disconnect
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        loop {
            match tokio::time::timeout(std::time::Duration::from_secs(1), eventloop.poll()).await {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => break,
                Ok(Ok(Event::Incoming(incoming))) => trace!("mqtt RX: {:?}", incoming),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    error!("{}", e);
                    info!("reconnecting in 5s");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
                // idle
                Err(_) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    // publisher -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await {
                Ok(Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    self.shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("mqtt sender lagged, {} messages dropped", n);
                }
                Ok(Message(message)) => {
                    let topic = message.full_topic(self.config.mqtt().namespace());
                    debug!("publishing: {} = {}", topic, message.payload);
                    if let Err(err) = client
                        .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload.into_bytes())
                        .await
                    {
                        error!("MQTT publish to {} failed: {:?}", topic, err);
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}

/// Every `publish_interval`, merges the snapshots of all registries into one
/// JSON object and hands it to the MQTT sender.
#[derive(Clone)]
pub struct Publisher {
    config: ConfigWrapper,
    channels: Channels,
    registries: Vec<Arc<DeviceRegistry>>,
}

impl Publisher {
    pub fn new(config: ConfigWrapper, channels: Channels, registries: Vec<Arc<DeviceRegistry>>) -> Self {
        Self {
            config,
            channels,
            registries,
        }
    }

    /// The merged snapshot. A topic seen on more than one bus keeps the
    /// value from the registry listed last.
    pub fn snapshot(&self) -> Snapshot {
        self.registries
            .iter()
            .flat_map(|registry| registry.snapshot())
            .collect()
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.mqtt().enabled() {
            return Ok(());
        }

        let mut shutdown = self.channels.to_mqtt.subscribe();
        let mut interval = tokio::time::interval(self.config.publish_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.publish() {
                        warn!("publish failed: {}", e);
                    }
                }
                msg = shutdown.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                        _ => {}
                    }
                }
            }
        }

        info!("publisher exiting");
        Ok(())
    }

    /// Sends the current snapshot to the MQTT sender.
    pub fn publish(&self) -> Result<()> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            debug!("nothing to publish yet");
            return Ok(());
        }

        let message = Message::for_snapshot(&snapshot)?;
        if self.channels.to_mqtt.send(ChannelData::Message(message)).is_err() {
            bail!("send(to_mqtt) failed - channel closed?");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_topic() {
        let mut message = Message {
            topic: String::new(),
            retain: false,
            payload: "{}".to_string(),
        };
        assert_eq!(message.full_topic("powerbus"), "powerbus");

        message.topic = "LWT".to_string();
        assert_eq!(message.full_topic("powerbus"), "powerbus/LWT");
    }

    #[test]
    fn publisher_merges_registries() {
        let bms = Arc::new(DeviceRegistry::new());
        bms.get_or_insert(1, DeviceKind::BatteryPack)
            .values()
            .set("BatVol", 53.1);

        let can = Arc::new(DeviceRegistry::new());
        let mppt = can.insert(Device::new(7, DeviceKind::Mppt));
        mppt.values().set("PVVoltage", 120.5);
        can.insert(Device::new(9, DeviceKind::Mppt));
        mppt.set_serial("S123");

        let publisher = Publisher::new(
            ConfigWrapper::from_config(Config::from_yaml("loglevel: info\n").unwrap()),
            Channels::new(),
            vec![bms, can],
        );

        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("bms-1"));

        let message = Message::for_snapshot(&snapshot).unwrap();
        assert!(message.payload.contains("\"PVVoltage\":120.5"));
        assert!(!message.retain);
    }

    fn bms_registry() -> Arc<DeviceRegistry> {
        let bms = Arc::new(DeviceRegistry::new());
        bms.get_or_insert(1, DeviceKind::BatteryPack)
            .values()
            .set("BatVol", 53.1);
        bms
    }

    fn mqtt_config() -> ConfigWrapper {
        ConfigWrapper::from_config(
            Config::from_yaml("publish_interval: 1\nmqtt:\n  enabled: true\n  host: localhost\n").unwrap(),
        )
    }

    #[test]
    fn publish_without_a_sender_fails() {
        let publisher = Publisher::new(mqtt_config(), Channels::new(), vec![bms_registry()]);
        assert!(publisher.publish().is_err());
    }

    #[tokio::test]
    async fn publisher_runs_until_shutdown() {
        let channels = Channels::new();
        let mut rx = channels.to_mqtt.subscribe();
        let publisher = Publisher::new(mqtt_config(), channels.clone(), vec![bms_registry()]);

        let task = publisher.clone();
        let handle = tokio::spawn(async move { task.start().await });

        // the first tick fires straight away
        match rx.recv().await.unwrap() {
            ChannelData::Message(m) => assert!(m.payload.contains("\"bms-1\"")),
            other => panic!("unexpected {:?}", other),
        }

        channels.to_mqtt.send(ChannelData::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn last_snapshot_is_queued_before_mqtt_shutdown() {
        let channels = Channels::new();
        let mut rx = channels.to_mqtt.subscribe();

        let components = crate::Components {
            publisher: Some(Publisher::new(mqtt_config(), channels.clone(), vec![bms_registry()])),
            mqtt: Some(Mqtt::new(mqtt_config(), channels.clone())),
            ..Default::default()
        };
        components.stop();

        match rx.recv().await.unwrap() {
            ChannelData::Message(m) => assert!(m.payload.contains("\"BatVol\":53.1")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), ChannelData::Shutdown));
    }
}
