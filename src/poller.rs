use crate::prelude::*;

use crate::modbus::{ModbusBus, RegisterIo};
use crate::register::WordOrder;

use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelData {
    Shutdown,
}

const BMS_TIMEOUT_SECS: u64 = 1;

/// Figures across every battery pack read in one cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BankStatistics {
    packs: usize,
    voltage_sum: f64,
    soc_sum: f64,
    used_capacity: f64,
    lowest: Option<(u8, i64)>,
    highest: Option<(u8, i64)>,
}

impl BankStatistics {
    pub fn add(&mut self, device: &Device) {
        let values = device.values();
        let soc = values.get_i64("SOCStateOfcharge").unwrap_or(0);

        self.packs += 1;
        self.voltage_sum += values.get_f64_or("BatVol", 0.0);
        self.soc_sum += soc as f64;
        self.used_capacity +=
            values.get_f64_or("SOCFullChargeCap", 0.0) - values.get_f64_or("SOCCapRemain", 0.0);

        if self.lowest.map_or(true, |(_, low)| soc < low) {
            self.lowest = Some((device.address(), soc));
        }
        if self.highest.map_or(true, |(_, high)| soc > high) {
            self.highest = Some((device.address(), soc));
        }
    }

    pub fn packs(&self) -> usize {
        self.packs
    }

    pub fn average_voltage(&self) -> Option<f64> {
        (self.packs > 0).then(|| self.voltage_sum / self.packs as f64)
    }

    pub fn average_soc(&self) -> Option<f64> {
        (self.packs > 0).then(|| self.soc_sum / self.packs as f64)
    }

    /// Ah drawn from the bank since it was last full.
    pub fn used_capacity(&self) -> f64 {
        self.used_capacity
    }

    pub fn used_energy_kwh(&self) -> f64 {
        self.used_capacity * self.average_voltage().unwrap_or(0.0) / 1000.0
    }

    pub fn lowest(&self) -> Option<(u8, i64)> {
        self.lowest
    }

    pub fn highest(&self) -> Option<(u8, i64)> {
        self.highest
    }

    pub fn print_summary(&self) {
        if self.packs == 0 {
            info!("== Global Statistics == no battery pack answered");
            return;
        }

        let (low_id, low_soc) = self.lowest.unwrap_or_default();
        let (high_id, high_soc) = self.highest.unwrap_or_default();
        info!("== Global Statistics ==");
        info!("Average BMS Voltage:\t\t{:.2}v", self.average_voltage().unwrap_or(0.0));
        info!("Average BMS SOC:\t\t{:.1}%", self.average_soc().unwrap_or(0.0));
        info!(
            "Total BMS used capacity:\t{:.2} Ah (~ {:.2} KWh)",
            self.used_capacity,
            self.used_energy_kwh()
        );
        info!(
            "BMS Lowest SOC:\t\t\t{} ({}%)  Highest: {} ({}%)",
            low_id, low_soc, high_id, high_soc
        );
    }
}

/// Polls battery packs over Modbus RTU and the devices behind an InsightHome
/// gateway over Modbus TCP, once every `update_interval`.
#[derive(Clone)]
pub struct Poller {
    config: ConfigWrapper,
    channels: Channels,
    bms: Arc<DeviceRegistry>,
    gateway: Arc<DeviceRegistry>,
}

impl Poller {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        bms: Arc<DeviceRegistry>,
        gateway: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            config,
            channels,
            bms,
            gateway,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut shutdown = self.channels.to_poller.subscribe();

        loop {
            let stats = self.poll_bms().await;
            if let Err(e) = self.poll_gateway().await {
                error!("insighthome: {}", e);
            }
            stats.print_summary();

            let interval = self.config.update_interval();
            debug!("next poll in {}s", interval.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                msg = shutdown.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                        Err(e) => warn!("poller channel: {}", e),
                    }
                }
            }
        }

        info!("poller exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_poller.send(ChannelData::Shutdown);
    }

    pub async fn poll_bms(&self) -> BankStatistics {
        let mut stats = BankStatistics::default();

        for bms in self.config.enabled_bms() {
            let bus = match ModbusBus::rtu(bms.port(), bms.baudrate(), Duration::from_secs(BMS_TIMEOUT_SECS)) {
                Ok(bus) => bus,
                Err(e) => {
                    warn!("cannot connect to bms {}: {}", bms.id(), e);
                    continue;
                }
            };

            let mut io = RegisterIo::new(bus, WordOrder::Little);
            let device = self.bms.get_or_insert(bms.id(), DeviceKind::BatteryPack);

            match io.read_all(&device).await {
                Ok(0) => warn!("bms {}: no register answered", bms.id()),
                Ok(n) => {
                    debug!("bms {}: {} registers", bms.id(), n);
                    info!("\n{}\n", device.summary());
                    stats.add(&device);
                }
                Err(e) => warn!("bms {}: {}", bms.id(), e),
            }

            io.into_bus().disconnect().await;
        }

        stats
    }

    pub async fn poll_gateway(&self) -> Result<()> {
        let gateway = match self.config.insighthome() {
            Some(gateway) => gateway,
            None => return Ok(()),
        };

        let bus = ModbusBus::tcp(gateway.host(), gateway.port(), gateway.timeout()).await?;
        let mut io = RegisterIo::new(bus, gateway.word_order());

        let result = self.read_gateway(&mut io, &gateway).await;
        io.into_bus().disconnect().await;
        result
    }

    async fn read_gateway(
        &self,
        io: &mut RegisterIo<ModbusBus>,
        gateway: &config::InsightHome,
    ) -> Result<()> {
        let found = io
            .discover(&gateway.ids(), gateway.serial_numbers(), &self.gateway)
            .await?;
        debug!("insighthome: {} devices identified", found);

        for device in self.gateway.devices() {
            match io.read_all(&device).await {
                Ok(_) => info!("\n{}\n", device.summary()),
                Err(e) if crate::error::is_fatal(&e) => return Err(e),
                Err(e) => warn!("{} {}: {}", device.kind(), device.address(), e),
            }
        }

        Ok(())
    }
}
