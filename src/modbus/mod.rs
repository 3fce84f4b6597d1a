pub mod bus;
pub mod insight_home;

pub use bus::{ModbusBus, RegisterBus};

use crate::device::jkbms;
use crate::device::GeneratorMode;
use crate::prelude::*;
use crate::register::{Register, WordOrder};

use std::time::Duration;

// the bus needs a breather after every transaction
#[cfg(not(feature = "mocks"))]
const SETTLE_MS: u64 = 50;

#[cfg(feature = "mocks")]
const SETTLE_MS: u64 = 0;

/// Typed, cached register access on top of a `RegisterBus`.
pub struct RegisterIo<B> {
    bus: B,
    order: WordOrder,
    settle: Duration,
}

impl<B: RegisterBus> RegisterIo<B> {
    pub fn new(bus: B, order: WordOrder) -> Self {
        Self {
            bus,
            order,
            settle: Duration::from_millis(SETTLE_MS),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    async fn settle(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }

    /// One read transaction, decoded but not cached. `None` if the unit
    /// didn't answer.
    pub async fn fetch(&mut self, unit: u8, register: &Register) -> Result<Option<Value>> {
        let words = self
            .bus
            .read_holding(unit, register.address, register.word_len())
            .await;
        self.settle().await;

        match words? {
            Some(words) => Ok(Some(register.decode(&words, self.order)?)),
            None => Ok(None),
        }
    }

    /// Cached value of `register` unless `force_reload`, else one bus read.
    ///
    /// A missing reply leaves any cached value alone and returns
    /// `BusError::NoResponse`.
    pub async fn read(
        &mut self,
        device: &Device,
        register: &Register,
        force_reload: bool,
    ) -> Result<Value> {
        if !force_reload {
            if let Some(value) = device.cache(register.name) {
                return Ok(value);
            }
        }

        match self.fetch(device.address(), register).await? {
            Some(value) => {
                let value = device.normalize(register.name, value);
                trace!("{} {}: {} = {}", device.kind(), device.address(), register.name, value);
                device.values().set(register.name, value.clone());
                Ok(value)
            }
            None => Err(BusError::NoResponse {
                device: device.address(),
                register: register.name.to_string(),
            }
            .into()),
        }
    }

    pub async fn read_named(&mut self, device: &Device, name: &str, force_reload: bool) -> Result<Value> {
        let register = device
            .register(name)
            .ok_or_else(|| anyhow!("{} has no register {}", device.kind(), name))?;
        self.read(device, register, force_reload).await
    }

    /// Encodes `value` per the register and writes it in one transaction.
    pub async fn write(&mut self, device: &Device, register: &Register, value: Value) -> Result<()> {
        let words = register.encode(&value, self.order)?;
        let result = self
            .bus
            .write_multiple(device.address(), register.address, &words)
            .await;
        self.settle().await;

        match result? {
            Some(()) => {
                info!(
                    "{} {}: wrote {} = {}",
                    device.kind(),
                    device.address(),
                    register.name,
                    value
                );
                device.values().set(register.name, value);
                Ok(())
            }
            None => Err(BusError::NoResponse {
                device: device.address(),
                register: register.name.to_string(),
            }
            .into()),
        }
    }

    pub async fn write_named(&mut self, device: &Device, name: &str, value: Value) -> Result<()> {
        let register = device
            .register(name)
            .ok_or_else(|| anyhow!("{} has no register {}", device.kind(), name))?;
        self.write(device, register, value).await
    }

    /// Reloads every register of `device`. Registers that don't answer are
    /// skipped; returns how many were read.
    pub async fn read_all(&mut self, device: &Device) -> Result<usize> {
        let mut read = 0;

        for register in device.registers() {
            match self.read(device, register, true).await {
                Ok(_) => read += 1,
                Err(e) if crate::error::is_fatal(&e) => return Err(e),
                Err(e) => debug!("{}", e),
            }
        }

        if device.kind() == DeviceKind::BatteryPack {
            if let Err(e) = self.read_cell_voltages(device, true).await {
                if crate::error::is_fatal(&e) {
                    return Err(e);
                }
                warn!("bms {}: cell voltages: {}", device.address(), e);
            }
        }

        Ok(read)
    }

    /// Reads `CellCount` consecutive cell voltage words of a battery pack.
    pub async fn read_cell_voltages(&mut self, device: &Device, force_reload: bool) -> Result<Vec<f64>> {
        if !force_reload {
            let cached = jkbms::cell_voltages(device.values());
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let count = self
            .read_named(device, "CellCount", false)
            .await?
            .as_i64()
            .unwrap_or(0);
        if !(1..=32).contains(&count) {
            bail!("bms {}: implausible cell count {}", device.address(), count);
        }

        let words = self
            .bus
            .read_holding(device.address(), jkbms::CELL_VOLTAGE_BASE, count as u16)
            .await;
        self.settle().await;

        let words = words?.ok_or_else(|| BusError::NoResponse {
            device: device.address(),
            register: "CellVol".to_string(),
        })?;

        let voltages: Vec<f64> = words
            .iter()
            .map(|w| Utils::round(f64::from(*w) * jkbms::CELL_VOLTAGE_SCALE, 3))
            .collect();
        for (i, v) in voltages.iter().enumerate() {
            device.values().set(&jkbms::cell_field(i), *v);
        }

        Ok(voltages)
    }

    /// Writes the generator mode, only when it differs from what the
    /// controller reports right now. Returns whether a write happened.
    pub async fn set_generator_mode(&mut self, device: &Device, mode: GeneratorMode) -> Result<bool> {
        if device.kind() != DeviceKind::GeneratorController {
            bail!("{} {} has no generator", device.kind(), device.address());
        }

        let current = self.read_named(device, "GeneratorMode", true).await?;
        if current.as_i64() == Some(i64::from(u16::from(mode))) {
            debug!("generator already in mode {:?}", mode);
            return Ok(false);
        }

        info!("setting generator mode {:?} (was {})", mode, GeneratorMode::label(current.as_i64().unwrap_or(-1)));
        self.write_named(device, "GeneratorMode", Value::from(u16::from(mode)))
            .await?;
        Ok(true)
    }

    pub async fn set_charge_enabled(&mut self, device: &Device, enabled: bool) -> Result<()> {
        self.write_named(device, "BatChargeEN", Value::from(u32::from(enabled)))
            .await
    }

    pub async fn set_discharge_enabled(&mut self, device: &Device, enabled: bool) -> Result<()> {
        self.write_named(device, "BatDisChargeEN", Value::from(u32::from(enabled)))
            .await
    }
}
