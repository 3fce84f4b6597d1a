use crate::file_error;
use crate::prelude::*;
use crate::register::WordOrder;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_publish_interval")]
    pub publish_interval: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_update_interval")]
    pub update_interval: Duration,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    pub insighthome: Option<InsightHome>,

    #[serde(default = "Vec::new")]
    pub bms: Vec<Bms>,

    pub jk_sniffer: Option<JkSniffer>,

    pub xanbus_sniffer: Option<XanbusSniffer>,
}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// InsightHome {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct InsightHome {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_insighthome_port")]
    pub port: u16,

    /// unit ids to probe; every valid id when absent
    pub ids: Option<Vec<u8>>,

    #[serde(default)]
    pub word_order: WordOrder,

    #[serde(default)]
    pub serial_numbers: BTreeMap<u8, String>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub timeout: Option<Duration>,
}
impl InsightHome {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ids(&self) -> Vec<u8> {
        self.ids
            .clone()
            .unwrap_or_else(crate::modbus::insight_home::default_ids)
    }

    pub fn word_order(&self) -> WordOrder {
        self.word_order
    }

    pub fn serial_numbers(&self) -> &BTreeMap<u8, String> {
        &self.serial_numbers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(1))
    }
} // }}}

// Bms {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Bms {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub id: u8,
    pub port: String,
    #[serde(default = "Config::default_baudrate")]
    pub baudrate: u32,
}
impl Bms {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }
} // }}}

// JkSniffer {{{
#[derive(Clone, Debug, Deserialize)]
pub struct JkSniffer {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub port: String,
    #[serde(default = "Config::default_baudrate")]
    pub baudrate: u32,

    /// decoded frames between two discovery commands, 0 turns discovery off
    #[serde(default = "Config::default_discovery_every")]
    pub discovery_every: usize,
}
impl JkSniffer {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    pub fn discovery_every(&self) -> usize {
        self.discovery_every
    }
} // }}}

// XanbusSniffer {{{
#[derive(Clone, Debug, Deserialize)]
pub struct XanbusSniffer {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_can_channel")]
    pub channel: String,

    #[serde(default)]
    pub serial_numbers: BTreeMap<u8, String>,

    /// source address our requests go out with; the target's own address
    /// when unset
    pub request_source: Option<u8>,
}
impl XanbusSniffer {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn serial_numbers(&self) -> &BTreeMap<u8, String> {
        &self.serial_numbers
    }

    pub fn request_source(&self) -> Option<u8> {
        self.request_source
    }
} // }}}

fn lock(config: &Mutex<Config>) -> MutexGuard<'_, Config> {
    config.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn loglevel(&self) -> String {
        lock(&self.config).loglevel.clone()
    }

    pub fn publish_interval(&self) -> Duration {
        lock(&self.config).publish_interval
    }

    pub fn update_interval(&self) -> Duration {
        lock(&self.config).update_interval
    }

    pub fn mqtt(&self) -> Mqtt {
        lock(&self.config).mqtt.clone()
    }

    pub fn insighthome(&self) -> Option<InsightHome> {
        lock(&self.config)
            .insighthome
            .clone()
            .filter(|i| i.enabled())
    }

    pub fn bms(&self) -> Vec<Bms> {
        lock(&self.config).bms.clone()
    }

    pub fn enabled_bms(&self) -> Vec<Bms> {
        self.bms().into_iter().filter(|b| b.enabled()).collect()
    }

    pub fn jk_sniffer(&self) -> Option<JkSniffer> {
        lock(&self.config).jk_sniffer.clone().filter(|j| j.enabled())
    }

    pub fn xanbus_sniffer(&self) -> Option<XanbusSniffer> {
        lock(&self.config)
            .xanbus_sniffer
            .clone()
            .filter(|x| x.enabled())
    }

    /// Something to poll over Modbus every `update_interval`.
    pub fn have_pollers(&self) -> bool {
        self.insighthome().is_some() || !self.enabled_bms().is_empty()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| file_error!("error reading {}: {}", file, err))?;

        let config = Self::from_yaml(&content)?;
        config.log_summary();
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Publish interval: {}s", self.publish_interval.as_secs());
        info!("  Update interval: {}s", self.update_interval.as_secs());

        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
        }

        match &self.insighthome {
            Some(ih) if ih.enabled => {
                info!("  InsightHome: {}:{}", ih.host, ih.port);
                info!("    Word order: {:?}", ih.word_order);
                info!("    Ids: {}", ih.ids.as_ref().map(|ids| ids.len()).unwrap_or(246));
                for (id, serial) in &ih.serial_numbers {
                    info!("    Serial override: {} => {}", id, serial);
                }
            }
            _ => info!("  InsightHome: disabled"),
        }

        info!(
            "  BMS: {} configured, {} enabled",
            self.bms.len(),
            self.bms.iter().filter(|b| b.enabled).count()
        );
        for bms in &self.bms {
            info!("    BMS[{}]: {} @ {} baud", bms.id, bms.port, bms.baudrate);
        }

        match &self.jk_sniffer {
            Some(jk) if jk.enabled => info!(
                "  JK sniffer: {} @ {} baud, discovery every {} frames",
                jk.port, jk.baudrate, jk.discovery_every
            ),
            _ => info!("  JK sniffer: disabled"),
        }

        match &self.xanbus_sniffer {
            Some(xb) if xb.enabled => {
                info!("  Xanbus sniffer: {}", xb.channel);
                for (address, serial) in &xb.serial_numbers {
                    info!("    Serial override: {} => {}", address, serial);
                }
            }
            _ => info!("  Xanbus sniffer: disabled"),
        }

        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                bail!("mqtt.host cannot be empty");
            }
            if self.mqtt.namespace.is_empty() {
                bail!("mqtt.namespace cannot be empty");
            }
        }

        if self.publish_interval.is_zero() {
            bail!("publish_interval must be at least 1 second");
        }
        if self.update_interval.is_zero() {
            bail!("update_interval must be at least 1 second");
        }

        if let Some(ih) = &self.insighthome {
            if ih.enabled {
                if ih.host.is_empty() {
                    bail!("insighthome.host cannot be empty");
                }
                if ih.port == 0 {
                    bail!("insighthome.port must be between 1 and 65535");
                }
                if let Some(id) = ih.ids.iter().flatten().find(|id| !(1..=246).contains(*id)) {
                    bail!("insighthome.ids: {} is not a valid unit id", id);
                }
            }
        }

        for (i, bms) in self.bms.iter().enumerate() {
            if bms.enabled && bms.port.is_empty() {
                bail!("bms[{}].port cannot be empty", i);
            }
        }

        if let Some(jk) = &self.jk_sniffer {
            if jk.enabled && jk.port.is_empty() {
                bail!("jk_sniffer.port cannot be empty");
            }
        }

        if let Some(xb) = &self.xanbus_sniffer {
            if xb.enabled && xb.channel.is_empty() {
                bail!("xanbus_sniffer.channel cannot be empty");
            }
        }

        Ok(())
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_publish_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_update_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: false,
            host: Self::default_mqtt_host(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Self::default_mqtt_namespace(),
        }
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "powerbus".to_string()
    }

    fn default_insighthome_port() -> u16 {
        503
    }

    fn default_baudrate() -> u32 {
        115200
    }

    fn default_discovery_every() -> usize {
        10
    }

    fn default_can_channel() -> String {
        "can0".to_string()
    }

    fn default_enabled() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_yaml("loglevel: debug\n").unwrap();
        assert_eq!(config.loglevel, "debug");
        assert_eq!(config.publish_interval, Duration::from_secs(5));
        assert_eq!(config.update_interval, Duration::from_secs(30));
        assert!(!config.mqtt.enabled);
        assert_eq!(config.mqtt.namespace, "powerbus");
        assert!(config.bms.is_empty());
        assert!(config.jk_sniffer.is_none());
    }

    #[test]
    fn rejects_bad_unit_ids() {
        let yaml = "insighthome:\n  host: 10.0.0.1\n  ids: [10, 247]\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("247"));
    }

    #[test]
    fn disabled_sections_are_hidden() {
        let yaml = "jk_sniffer:\n  enabled: false\n  port: /dev/ttyUSB1\n";
        let config = ConfigWrapper::from_config(Config::from_yaml(yaml).unwrap());
        assert!(config.jk_sniffer().is_none());
        assert!(!config.have_pollers());
    }
}
