mod common;
use common::*;

use powerbus_bridge::jk::{JkSniffer, Request};
use powerbus_bridge::prelude::*;

use bytes::BytesMut;
use std::sync::Arc;

fn sniffer(discovery_every: usize) -> (JkSniffer, Arc<DeviceRegistry>) {
    common_setup();
    let registry = Arc::new(DeviceRegistry::new());
    (JkSniffer::new(registry.clone(), discovery_every), registry)
}

#[test]
fn about_frame_after_master_command() -> Result<()> {
    let (mut sniffer, registry) = sniffer(10);

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&Factory::jk_master_command(3));
    buf.extend_from_slice(&Factory::jk_about(3));

    let commands = sniffer.feed(&mut buf)?;
    assert!(commands.is_empty());

    let device = registry.get(3).expect("bms 3 registered");
    assert_eq!(device.kind(), DeviceKind::BatteryPack);

    let values = device.values();
    assert_eq!(values.len(), 3);
    assert_eq!(values.get_text("ManufacturerDeviceID").as_deref(), Some("JK_B2A24S15P"));
    assert_eq!(values.get_text("HardwareVersion").as_deref(), Some("11.XW"));
    assert_eq!(values.get_text("SoftwareVersion").as_deref(), Some("11.26"));

    assert_eq!(sniffer.stats().frames, 1);
    assert_eq!(sniffer.stats().about, 1);

    Ok(())
}

#[test]
fn status_frame_fields() -> Result<()> {
    let (mut sniffer, registry) = sniffer(10);

    let mut buf = BytesMut::from(&Factory::jk_status(1)[..]);
    sniffer.feed(&mut buf)?;

    let device = registry.get(1).expect("bms 1 registered");
    let values = device.values();
    assert_eq!(values.get_f64("BatVol"), Some(52.8));
    assert_eq!(values.get_f64("BatCurrent"), Some(-10.5));
    assert_eq!(values.get_f64("CellVolAve"), Some(3.3));
    assert_eq!(values.get_i64("SOCStateOfcharge"), Some(80));
    assert_eq!(values.get_f64("SOCCapRemain"), Some(224.0));
    assert_eq!(values.get_f64("SOCFullChargeCap"), Some(280.0));
    assert_eq!(values.get_i64("SOCCycleCount"), Some(12));
    assert_eq!(values.get_i64("Alarms"), Some(4));
    assert_eq!(values.get_f64("CellVol0"), Some(3.3));
    assert_eq!(values.get_f64("CellVol15"), Some(3.3));
    assert!(!values.contains("CellVol16"));

    Ok(())
}

#[test]
fn frame_split_across_reads() -> Result<()> {
    let (mut sniffer, registry) = sniffer(10);
    let settings = Factory::jk_settings(2, 16);

    let mut buf = BytesMut::from(&settings[..200]);
    sniffer.feed(&mut buf)?;
    assert!(registry.is_empty());

    buf.extend_from_slice(&settings[200..]);
    sniffer.feed(&mut buf)?;

    let device = registry.get(2).expect("bms 2 registered");
    assert_eq!(device.values().get_i64("CellCount"), Some(16));
    assert_eq!(device.values().get_i64("BatChargeEN"), Some(1));

    Ok(())
}

#[test]
fn bad_checksum_is_dropped() -> Result<()> {
    let (mut sniffer, registry) = sniffer(10);

    let mut corrupt = Factory::jk_about(4);
    corrupt[100] ^= 0x01;

    let mut buf = BytesMut::from(&corrupt[..]);
    sniffer.feed(&mut buf)?;
    assert!(registry.is_empty());
    assert_eq!(sniffer.stats().corrupt, 1);

    // the next good frame still gets through
    buf.extend_from_slice(&Factory::jk_about(4));
    sniffer.feed(&mut buf)?;
    assert!(registry.get(4).is_some());

    Ok(())
}

#[test]
fn out_of_range_address_is_rejected() -> Result<()> {
    let (mut sniffer, registry) = sniffer(10);

    let mut buf = BytesMut::from(&Factory::jk_about(16)[..]);
    sniffer.feed(&mut buf)?;

    assert!(registry.is_empty());
    assert_eq!(sniffer.stats().rejected, 1);

    Ok(())
}

#[test]
fn discovery_command_after_enough_frames() -> Result<()> {
    let (mut sniffer, _registry) = sniffer(2);

    let mut buf = BytesMut::from(&Factory::jk_about(3)[..]);
    assert!(sniffer.feed(&mut buf)?.is_empty());

    buf.extend_from_slice(&Factory::jk_about(3));
    let commands = sniffer.feed(&mut buf)?;
    assert_eq!(commands, vec![Request::Settings.command(3)]);

    Ok(())
}

#[test]
fn rejected_frames_do_not_bring_discovery_forward() -> Result<()> {
    let (mut sniffer, registry) = sniffer(2);

    let mut buf = BytesMut::new();
    for _ in 0..3 {
        buf.extend_from_slice(&Factory::jk_about(16));
    }
    assert!(sniffer.feed(&mut buf)?.is_empty());
    assert_eq!(sniffer.stats().rejected, 3);
    assert!(registry.is_empty());

    buf.extend_from_slice(&Factory::jk_about(3));
    assert!(sniffer.feed(&mut buf)?.is_empty());

    buf.extend_from_slice(&Factory::jk_about(3));
    assert_eq!(sniffer.feed(&mut buf)?, vec![Request::Settings.command(3)]);

    Ok(())
}

#[test]
fn discovery_disabled() -> Result<()> {
    let (mut sniffer, _registry) = sniffer(0);

    for _ in 0..5 {
        let mut buf = BytesMut::from(&Factory::jk_about(3)[..]);
        assert!(sniffer.feed(&mut buf)?.is_empty());
    }

    Ok(())
}
