mod common;
use common::*;

use powerbus_bridge::prelude::*;
use powerbus_bridge::register::WordOrder;

use std::io::Write as _;
use std::time::Duration;

const FULL: &str = r#"
loglevel: debug
publish_interval: 10
update_interval: 60

mqtt:
  enabled: true
  host: broker.lan
  username: solar
  password: hunter2
  namespace: cabin

insighthome:
  host: 192.168.1.20
  ids: [1, 10, 30]
  word_order: big
  timeout: 3
  serial_numbers:
    30: "AGS-0001"

bms:
  - id: 1
    port: /dev/ttyUSB0
  - id: 2
    port: /dev/ttyUSB1
    baudrate: 9600
    enabled: false

jk_sniffer:
  port: /dev/ttyUSB2
  discovery_every: 0

xanbus_sniffer:
  channel: can1
  request_source: 0x22
  serial_numbers:
    7: "MPPT-7"
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
fn full_config_from_file() -> Result<()> {
    common_setup();
    let file = write_config(FULL);
    let config = ConfigWrapper::new(file.path().to_string_lossy().to_string())?;

    assert_eq!(config.loglevel(), "debug");
    assert_eq!(config.publish_interval(), Duration::from_secs(10));
    assert_eq!(config.update_interval(), Duration::from_secs(60));

    let mqtt = config.mqtt();
    assert!(mqtt.enabled());
    assert_eq!(mqtt.host(), "broker.lan");
    assert_eq!(mqtt.port(), 1883);
    assert_eq!(mqtt.username().as_deref(), Some("solar"));
    assert_eq!(mqtt.namespace(), "cabin");

    let ih = config.insighthome().expect("insighthome enabled");
    assert_eq!(ih.port(), 503);
    assert_eq!(ih.ids(), vec![1, 10, 30]);
    assert_eq!(ih.word_order(), WordOrder::Big);
    assert_eq!(ih.timeout(), Duration::from_secs(3));
    assert_eq!(ih.serial_numbers().get(&30).map(String::as_str), Some("AGS-0001"));

    assert_eq!(config.bms().len(), 2);
    let enabled = config.enabled_bms();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].baudrate(), 115200);

    let jk = config.jk_sniffer().expect("jk sniffer enabled");
    assert_eq!(jk.discovery_every(), 0);
    assert_eq!(jk.baudrate(), 115200);

    let xb = config.xanbus_sniffer().expect("xanbus sniffer enabled");
    assert_eq!(xb.channel(), "can1");
    assert_eq!(xb.request_source(), Some(0x22));
    assert_eq!(xb.serial_numbers().get(&7).map(String::as_str), Some("MPPT-7"));

    assert!(config.have_pollers());

    Ok(())
}

#[test]
fn insighthome_probes_every_unit_by_default() -> Result<()> {
    let config = ConfigWrapper::from_config(Config::from_yaml("insighthome:\n  host: gw\n")?);
    let ih = config.insighthome().expect("insighthome enabled");
    assert_eq!(ih.ids().len(), 246);
    assert_eq!(ih.ids().first(), Some(&1));
    assert_eq!(ih.word_order(), WordOrder::Little);
    assert_eq!(ih.timeout(), Duration::from_secs(1));

    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    common_setup();
    let err = ConfigWrapper::new("/nonexistent/powerbus.yaml".to_string()).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/powerbus.yaml"));
}

#[test]
fn invalid_values_are_rejected() {
    assert!(Config::from_yaml("update_interval: 0\n").is_err());
    assert!(Config::from_yaml("mqtt:\n  enabled: true\n  namespace: \"\"\n").is_err());
    assert!(Config::from_yaml("bms:\n  - id: 1\n    port: \"\"\n").is_err());
    assert!(Config::from_yaml("xanbus_sniffer:\n  channel: \"\"\n").is_err());
}
