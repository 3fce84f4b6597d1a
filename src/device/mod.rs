pub mod ags;
pub mod battmon;
pub mod jkbms;
pub mod mppt;
pub mod scp;
pub mod xw;

use crate::prelude::*;
use crate::register::Register;

use enum_dispatch::enum_dispatch;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use ags::{Ags, GeneratorMode};
pub use battmon::BattMon;
pub use jkbms::JkBms;
pub use mppt::Mppt;
pub use scp::Scp;
pub use xw::Xw;

/// Field map of every published device, keyed by topic.
pub type Snapshot = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DeviceKind {
    BatteryMonitor,
    Mppt,
    Inverter,
    GeneratorController,
    SystemControlPanel,
    BatteryPack,
}

impl DeviceKind {
    /// Maps a vendor product id to a device kind. `None` means unknown.
    pub fn classify(product_id: &str) -> Option<Self> {
        match product_id.trim() {
            "865-1032" => Some(Self::Mppt),
            "865-1050" | "865-1050-01" => Some(Self::SystemControlPanel),
            "865-1060-01" => Some(Self::GeneratorController),
            "865-1080-01" => Some(Self::BatteryMonitor),
            "865-6848-01" => Some(Self::Inverter),
            _ => None,
        }
    }

    /// Generator controllers and control panels are never published.
    pub fn topic_prefix(&self) -> Option<&'static str> {
        match self {
            Self::BatteryMonitor => Some("battmon"),
            Self::Mppt => Some("mppt"),
            Self::Inverter => Some("xw"),
            Self::BatteryPack => Some("bms"),
            Self::GeneratorController | Self::SystemControlPanel => None,
        }
    }

    fn profile(&self) -> DeviceProfile {
        match self {
            Self::BatteryMonitor => BattMon.into(),
            Self::Mppt => Mppt.into(),
            Self::Inverter => Xw.into(),
            Self::GeneratorController => Ags.into(),
            Self::SystemControlPanel => Scp.into(),
            Self::BatteryPack => JkBms.into(),
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Per-kind behaviour: register map and human readable summary.
#[enum_dispatch]
pub trait Profile {
    fn registers(&self) -> &'static [Register];

    fn summary(&self, address: u8, values: &ValueStore) -> String;

    /// Adjusts a freshly decoded register value before it is stored.
    fn normalize(&self, _name: &str, value: Value) -> Value {
        value
    }
}

#[enum_dispatch(Profile)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceProfile {
    BattMon,
    Mppt,
    Xw,
    Ags,
    Scp,
    JkBms,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Device {
    address: u8,
    kind: DeviceKind,
    profile: DeviceProfile,
    name: Mutex<Option<String>>,
    serial: Mutex<Option<String>>,
    values: ValueStore,
}

impl Device {
    pub fn new(address: u8, kind: DeviceKind) -> Self {
        Self {
            address,
            kind,
            profile: kind.profile(),
            name: Mutex::new(None),
            serial: Mutex::new(None),
            values: ValueStore::new(),
        }
    }

    pub fn with_serial(address: u8, kind: DeviceKind, serial: impl Into<String>) -> Self {
        let device = Self::new(address, kind);
        device.set_serial(serial);
        device
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn registers(&self) -> &'static [Register] {
        self.profile.registers()
    }

    pub fn register(&self, name: &str) -> Option<&'static Register> {
        self.registers().iter().find(|r| r.name == name)
    }

    pub fn normalize(&self, name: &str, value: Value) -> Value {
        self.profile.normalize(name, value)
    }

    pub fn serial(&self) -> Option<String> {
        lock(&self.serial).clone()
    }

    pub fn set_serial(&self, serial: impl Into<String>) {
        *lock(&self.serial) = Some(serial.into());
    }

    pub fn name(&self) -> Option<String> {
        lock(&self.name).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *lock(&self.name) = Some(name.into());
    }

    /// Last decoded value of `name`, without touching any bus.
    pub fn cache(&self, name: &str) -> Option<Value> {
        self.values.get(name)
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.snapshot()
    }

    pub fn topic(&self) -> Option<String> {
        self.kind
            .topic_prefix()
            .map(|prefix| format!("{}-{}", prefix, self.address))
    }

    /// Bus-discovered devices become visible once their serial is known;
    /// battery packs are addressed by id alone.
    pub fn is_publishable(&self) -> bool {
        self.topic().is_some()
            && (self.kind == DeviceKind::BatteryPack || lock(&self.serial).is_some())
    }

    pub fn summary(&self) -> String {
        self.profile.summary(self.address, &self.values)
    }
}

#[derive(Clone, Debug)]
pub enum Slot {
    /// Identification requested, waiting for the product info reply.
    Discovering,
    /// Replied with a product id nothing here knows how to handle.
    Unidentified(String),
    Identified(Arc<Device>),
}

/// Bus address to device, for one bus.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    slots: Mutex<BTreeMap<u8, Slot>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, address: u8) -> Option<Slot> {
        lock(&self.slots).get(&address).cloned()
    }

    pub fn get(&self, address: u8) -> Option<Arc<Device>> {
        match lock(&self.slots).get(&address) {
            Some(Slot::Identified(device)) => Some(device.clone()),
            _ => None,
        }
    }

    /// Returns false when the address already had a slot.
    pub fn begin_discovery(&self, address: u8) -> bool {
        let mut slots = lock(&self.slots);
        if slots.contains_key(&address) {
            return false;
        }
        slots.insert(address, Slot::Discovering);
        true
    }

    /// Returns false when the address was already recorded as unidentified.
    pub fn mark_unidentified(&self, address: u8, product_id: &str) -> bool {
        let mut slots = lock(&self.slots);
        if let Some(Slot::Unidentified(_)) = slots.get(&address) {
            return false;
        }
        slots.insert(address, Slot::Unidentified(product_id.to_string()));
        true
    }

    pub fn insert(&self, device: Device) -> Arc<Device> {
        let device = Arc::new(device);
        lock(&self.slots).insert(device.address(), Slot::Identified(device.clone()));
        device
    }

    /// The device at `address`, created as `kind` on first sight.
    pub fn get_or_insert(&self, address: u8, kind: DeviceKind) -> Arc<Device> {
        let mut slots = lock(&self.slots);
        if let Some(Slot::Identified(device)) = slots.get(&address) {
            return device.clone();
        }
        let device = Arc::new(Device::new(address, kind));
        slots.insert(address, Slot::Identified(device.clone()));
        device
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        lock(&self.slots)
            .values()
            .filter_map(|slot| match slot {
                Slot::Identified(device) => Some(device.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Snapshot {
        self.devices()
            .iter()
            .filter(|d| d.is_publishable())
            .filter_map(|d| d.topic().map(|topic| (topic, d.snapshot())))
            .collect()
    }
}
