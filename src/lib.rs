pub mod channels;
pub mod config;
pub mod device;
pub mod error;
pub mod jk;
pub mod modbus;
pub mod mqtt;
pub mod options;
pub mod poller;
pub mod prelude;
pub mod register;
pub mod store;
pub mod utils;
pub mod xanbus;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use crate::jk::SerialSniffer;
use crate::mqtt::{Mqtt, Publisher};
use crate::poller::Poller;
use crate::xanbus::CanSniffer;

use std::sync::Arc;
use tokio::task::JoinHandle;

/// Every running component, so they can be stopped together.
#[derive(Clone, Default)]
pub struct Components {
    pub jk_sniffer: Option<SerialSniffer>,
    pub can_sniffer: Option<CanSniffer>,
    pub poller: Option<Poller>,
    pub publisher: Option<Publisher>,
    pub mqtt: Option<Mqtt>,
}

impl Components {
    /// Bus readers go first, then one last snapshot is queued ahead of the
    /// MQTT shutdown.
    pub fn stop(&self) {
        info!("Stopping all components...");

        if let Some(sniffer) = &self.jk_sniffer {
            sniffer.stop();
        }
        if let Some(sniffer) = &self.can_sniffer {
            sniffer.stop();
        }
        if let Some(poller) = &self.poller {
            poller.stop();
        }
        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish() {
                warn!("final publish failed: {}", e);
            }
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.stop();
        }
    }
}

fn spawn<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!("{} task failed: {}", name, e);
        }
    })
}

/// Starts everything the configuration enables and runs until `shutdown_rx`
/// fires.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, config: ConfigWrapper) -> Result<()> {
    info!("powerbus-bridge {} starting", CARGO_PKG_VERSION);

    let channels = Channels::new();
    let mut components = Components::default();
    let mut registries = Vec::new();
    let mut handles = Vec::new();

    if config.jk_sniffer().is_some() {
        info!("  Creating JK BMS sniffer...");
        let registry = Arc::new(DeviceRegistry::new());
        registries.push(registry.clone());
        let sniffer = SerialSniffer::new(config.clone(), channels.clone(), registry);
        let task = sniffer.clone();
        handles.push(spawn("jk sniffer", async move { task.start().await }));
        components.jk_sniffer = Some(sniffer);
    }

    if config.xanbus_sniffer().is_some() {
        info!("  Creating Xanbus sniffer...");
        let registry = Arc::new(DeviceRegistry::new());
        registries.push(registry.clone());
        let sniffer = CanSniffer::new(config.clone(), channels.clone(), registry);
        let task = sniffer.clone();
        handles.push(spawn("xanbus sniffer", async move { task.start().await }));
        components.can_sniffer = Some(sniffer);
    }

    if config.have_pollers() {
        info!("  Creating Modbus poller...");
        let bms = Arc::new(DeviceRegistry::new());
        let gateway = Arc::new(DeviceRegistry::new());
        registries.push(bms.clone());
        registries.push(gateway.clone());
        let poller = Poller::new(config.clone(), channels.clone(), bms, gateway);
        let task = poller.clone();
        handles.push(spawn("poller", async move { task.start().await }));
        components.poller = Some(poller);
    }

    if registries.is_empty() {
        warn!("nothing to watch, enable a sniffer, a bms or insighthome in the config");
    }

    if config.mqtt().enabled() {
        info!("  Creating MQTT client...");
        let mqtt = Mqtt::new(config.clone(), channels.clone());
        let task = mqtt.clone();
        handles.push(spawn("mqtt", async move { task.start().await }));
        components.mqtt = Some(mqtt);

        let publisher = Publisher::new(config.clone(), channels.clone(), registries);
        let task = publisher.clone();
        handles.push(spawn("publisher", async move { task.start().await }));
        components.publisher = Some(publisher);
    }

    info!("Waiting for shutdown signal...");
    let _ = shutdown_rx.recv().await;

    info!("Shutdown signal received, stopping components...");
    components.stop();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Error waiting for task: {}", e);
        }
    }

    info!("Application shutdown complete");
    Ok(())
}
