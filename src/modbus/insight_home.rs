//! Device discovery behind a Modbus gateway.
//!
//! Every unit id is probed for its product id; known products are then
//! identified by hardware serial number (or a configured override, for
//! units that refuse to report one).

use crate::prelude::*;
use crate::register::Register;

use super::{RegisterBus, RegisterIo};
use std::collections::BTreeMap;

pub static PRODUCT_ID: Register = Register::text("FGANumber", 0x000A, 10);
pub static HARDWARE_SERIAL: Register = Register::text("HardwareSerialNumber", 0x002B, 10);

pub fn default_ids() -> Vec<u8> {
    (1..=246).collect()
}

impl<B: RegisterBus> RegisterIo<B> {
    /// Probes `ids` and records what answers in `registry`. Returns how many
    /// devices were identified.
    pub async fn discover(
        &mut self,
        ids: &[u8],
        serial_overrides: &BTreeMap<u8, String>,
        registry: &DeviceRegistry,
    ) -> Result<usize> {
        let mut found = 0;

        for &id in ids {
            let product_id = match self.fetch(id, &PRODUCT_ID).await? {
                Some(Value::Text(p)) if !p.is_empty() => p,
                _ => {
                    trace!("no device at id {}", id);
                    continue;
                }
            };

            let kind = match DeviceKind::classify(&product_id) {
                Some(kind) => kind,
                None => {
                    if registry.mark_unidentified(id, &product_id) {
                        warn!("unknown device {} at id {}", product_id, id);
                    }
                    continue;
                }
            };

            let serial = match serial_overrides.get(&id) {
                Some(serial) => serial.clone(),
                None => match self.fetch(id, &HARDWARE_SERIAL).await? {
                    Some(Value::Text(s)) if !s.is_empty() => s,
                    _ => {
                        warn!("no hardware serial number for id {} ({})", id, kind);
                        continue;
                    }
                },
            };

            match registry.get(id) {
                Some(device) if device.kind() == kind => device.set_serial(serial),
                _ => {
                    info!("found {} {} at id {} (serial {})", kind, product_id, id, serial);
                    registry.insert(Device::with_serial(id, kind, serial));
                }
            }
            found += 1;
        }

        Ok(found)
    }
}
