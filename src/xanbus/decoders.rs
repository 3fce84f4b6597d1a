//! Payload layouts of the Xanbus status groups, and what each one sets on
//! the device that sent it.
//!
//! Every payload starts with a status byte and, for most groups, an
//! association byte telling which port or phase the numbers belong to.

use crate::prelude::*;

use chrono::{DateTime, Utc};
use nom_derive::{Nom, Parse};

/// AC association: AC2 input (generator).
pub const ASSOC_AC2_IN: u8 = 0x13;
/// AC association: AC output (loads).
pub const ASSOC_AC_OUT: u8 = 0x33;
/// DC association: battery side.
pub const ASSOC_DC_BATTERY: u8 = 0x03;
/// DC association: PV input.
pub const ASSOC_DC_PV: u8 = 0x15;

const AC_STS_RMS_LEN: usize = 55;

fn parse<'a, T: Parse<&'a [u8]>>(what: &str, bytes: &'a [u8]) -> Result<T> {
    T::parse(bytes).map(|(_, v)| v).map_err(|e| {
        BusError::Decode(format!("{} ({} bytes): {:?}", what, bytes.len(), e)).into()
    })
}

// BattMonSts {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct BattMonSts {
    pub status: u8,
    pub assoc: u8,
    pub voltage_mv: u32,
    pub current_ma: i32,
    pub temperature: u16,
    pub capacity_removed: u16,
    pub capacity_remaining: u16,
    pub soc: i8,
}

impl BattMonSts {
    pub fn apply(bytes: &[u8], device: &Device) -> Result<()> {
        let s: Self = parse("BattMonSts", bytes)?;
        let values = device.values();
        values.set("BatteryVoltage", f64::from(s.voltage_mv) / 1000.0);
        values.set("BatteryCurrent", f64::from(s.current_ma) / 1000.0);
        values.set("BatteryCapacityRemoved", s.capacity_removed);
        values.set("BatteryCapacityRemaining", s.capacity_remaining);
        values.set("BatterySOC", s.soc);
        Ok(())
    }
} // }}}

// DC readings (BattSts2, DcSrcSts2) {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct DcReading {
    pub status: u8,
    pub assoc: u8,
    pub voltage_mv: u32,
    pub current_ma: i32,
    pub power: i32,
}

impl DcReading {
    fn volts(&self) -> f64 {
        f64::from(self.voltage_mv) / 1000.0
    }

    fn amps(&self) -> f64 {
        f64::from(self.current_ma) / 1000.0
    }

    /// BattSts2: battery terminal readings, used from inverters only.
    pub fn apply_battery(bytes: &[u8], device: &Device) -> Result<()> {
        let r: Self = parse("BattSts2", bytes)?;
        if device.kind() == DeviceKind::Inverter {
            let values = device.values();
            values.set("BatteryVoltage", r.volts());
            values.set("BatteryCurrent", r.amps());
            values.set("BatteryPower", r.power);
        }
        Ok(())
    }

    /// DcSrcSts2: battery-side output, or PV input for charge controllers.
    ///
    /// Signs are stored as the devices report them: an inverter's power is
    /// positive while discharging and an MPPT's current is negative.
    pub fn apply_source(bytes: &[u8], device: &Device) -> Result<()> {
        let r: Self = parse("DcSrcSts2", bytes)?;
        let values = device.values();

        match r.assoc {
            ASSOC_DC_BATTERY if device.kind() == DeviceKind::Inverter => {
                values.set("ChargeDCCurrent", r.amps());
                values.set("ChargeDCPower", -r.power);
            }
            ASSOC_DC_BATTERY => {
                values.set("DCOutputVoltage", r.volts());
                values.set("DCOutputCurrent", r.amps().abs());
                values.set("DCOutputPower", r.power);
            }
            ASSOC_DC_PV => {
                values.set("PVVoltage", r.volts());
                values.set("PVCurrent", r.amps().abs());
                values.set("PVPower", r.power);
            }
            other => trace!("DcSrcSts2 from {}: association {:#04x}", device.address(), other),
        }
        Ok(())
    }
} // }}}

// AcStsRms {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct AcStsRms {
    pub status: u8,
    pub assoc: u8,
    #[nom(SkipBefore(16))]
    pub p11: i16,
    #[nom(SkipBefore(2))]
    pub p15: i16,
    #[nom(SkipBefore(19))]
    pub p28: u16,
}

impl AcStsRms {
    /// 55 byte replies cover one AC port; longer ones are the AC1 (grid)
    /// association with extra data we don't use.
    pub fn apply(bytes: &[u8], device: &Device) -> Result<()> {
        if bytes.len() < AC_STS_RMS_LEN {
            return Err(BusError::Decode(format!("AcStsRms: {} bytes", bytes.len())).into());
        }
        let s: Self = parse("AcStsRms", &bytes[..AC_STS_RMS_LEN])?;
        let values = device.values();

        if bytes.len() == AC_STS_RMS_LEN {
            let power = i32::from(s.p11) + i32::from(s.p28);
            match s.assoc {
                ASSOC_AC_OUT => values.set("LoadACPowerApparent", power),
                ASSOC_AC2_IN => values.set("GeneratorACPowerApparent", power),
                _ => {}
            }
        } else {
            values.set("GridACInputPower", i32::from(s.p11) + i32::from(s.p15));
        }
        Ok(())
    }
} // }}}

// ChgSts {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct ChgSts {
    pub status: u8,
    pub assoc: u8,
    #[nom(SkipBefore(10))]
    pub charger_status: u16,
    pub charge_mode: u8,
}

impl ChgSts {
    pub fn apply(bytes: &[u8], device: &Device) -> Result<()> {
        let s: Self = parse("ChgSts", bytes)?;
        device.values().set("ChargerStatus", s.charger_status);
        Ok(())
    }
} // }}}

// InvSts2 {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct InvSts2 {
    pub status: u8,
    pub assoc: u8,
    pub inverter_status: u16,
    #[nom(SkipBefore(1))]
    pub configuration: u8,
}

impl InvSts2 {
    pub fn apply(bytes: &[u8], device: &Device) -> Result<()> {
        let s: Self = parse("InvSts2", bytes)?;
        let values = device.values();
        values.set("InverterStatus", s.inverter_status);
        values.set("InverterConfiguration", s.configuration);
        Ok(())
    }
} // }}}

// AgsSts {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct AgsSts {
    pub status: u8,
    pub assoc: u8,
    #[nom(SkipBefore(2))]
    pub action: u8,
    pub on_reason: u8,
    pub off_reason: u8,
}

impl AgsSts {
    pub fn apply(bytes: &[u8], device: &Device) -> Result<()> {
        let s: Self = parse("AgsSts", bytes)?;
        let values = device.values();
        values.set("GeneratorAction", s.action);
        values.set("GeneratorOnReason", s.on_reason);
        values.set("GeneratorOffReason", s.off_reason);
        Ok(())
    }
} // }}}

// DateTimeSts {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct DateTimeSts {
    pub status: u8,
    pub seconds: u32,
    /// minutes to add to get local time
    pub offset: i16,
}

impl DateTimeSts {
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        let seconds = i64::from(self.seconds) + i64::from(self.offset) * 60;
        DateTime::<Utc>::from_timestamp(seconds, 0)
            .ok_or_else(|| BusError::Decode(format!("DateTimeSts: bad time {}", seconds)).into())
    }

    pub fn apply(bytes: &[u8], device: &Device) -> Result<()> {
        let s: Self = parse("DateTimeSts", bytes)?;
        device.values().set("CurrentDateTime", s.timestamp()?);
        Ok(())
    }
} // }}}

// SpsSts {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct SpsSts {
    pub status: u8,
    pub assoc: u8,
}

impl SpsSts {
    pub fn check(bytes: &[u8]) -> Result<()> {
        let _: Self = parse("SpsSts", bytes)?;
        Ok(())
    }
} // }}}

// Identification {{{
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProdInfo {
    pub name: String,
    pub product_id: String,
}

impl ProdInfo {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 29 {
            return Err(BusError::Decode(format!("ProdInfoSts: {} bytes", bytes.len())).into());
        }
        Ok(Self {
            name: Utils::text(&bytes[1..17]),
            product_id: Utils::text(&bytes[17..29]),
        })
    }
}

/// Hardware serial number: from byte 6 up to the first NUL.
pub fn hw_rev_serial(bytes: &[u8]) -> Result<String> {
    Utils::nul_terminated(bytes, 6)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BusError::Decode(format!("HwRevSts: no serial in {}", Utils::hex(bytes))).into())
}

#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct SwVer {
    #[nom(SkipBefore(3))]
    pub version: u16,
    #[nom(SkipBefore(2))]
    pub build: u8,
}

impl SwVer {
    /// 20700 reads as 2.07.00
    pub fn version_string(&self) -> String {
        let v = self.version;
        format!("{}.{:02}.{:02}", v / 10000, (v / 100) % 100, v % 100)
    }

    pub fn apply(bytes: &[u8], device: &Device) -> Result<()> {
        let s: Self = parse("SwVerSts", bytes)?;
        let values = device.values();
        values.set("FirmwareVersion", s.version_string());
        values.set("FirmwareBuild", s.build);
        Ok(())
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        let s: String = s.split_whitespace().collect();
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn battmon_status() {
        let bytes = hex("0303 d6d30000 f4640100 6874 9500 2f04 58 ff 8504 fffffffffffcff0000000000000000ffffff7fffff");
        let device = Device::new(5, DeviceKind::BatteryMonitor);
        BattMonSts::apply(&bytes, &device).unwrap();

        let values = device.values();
        assert_eq!(values.get_f64("BatteryVoltage"), Some(54.230));
        assert_eq!(values.get_f64("BatteryCurrent"), Some(91.38));
        assert_eq!(values.get_i64("BatteryCapacityRemoved"), Some(149));
        assert_eq!(values.get_i64("BatteryCapacityRemaining"), Some(1071));
        assert_eq!(values.get_i64("BatterySOC"), Some(88));
    }

    #[test]
    fn pv_input() {
        let bytes = hex("0315 40110400 e2130000 4c050000 9f03 0000 fc0000ffffffffffff");
        let device = Device::new(2, DeviceKind::Mppt);
        DcReading::apply_source(&bytes, &device).unwrap();

        assert_eq!(device.values().get_f64("PVVoltage"), Some(266.56));
        assert_eq!(device.values().get_f64("PVCurrent"), Some(5.09));
        assert_eq!(device.values().get_i64("PVPower"), Some(1356));
    }

    #[test]
    fn inverter_charge_power_is_negated() {
        let mut bytes = vec![0x03, ASSOC_DC_BATTERY];
        bytes.extend_from_slice(&54000u32.to_le_bytes());
        bytes.extend_from_slice(&(-20500i32).to_le_bytes());
        bytes.extend_from_slice(&1100i32.to_le_bytes());
        bytes.extend_from_slice(&[0xFF; 13]);

        let xw = Device::new(1, DeviceKind::Inverter);
        DcReading::apply_source(&bytes, &xw).unwrap();
        assert_eq!(xw.values().get_f64("ChargeDCCurrent"), Some(-20.5));
        assert_eq!(xw.values().get_i64("ChargeDCPower"), Some(-1100));

        let mppt = Device::new(2, DeviceKind::Mppt);
        DcReading::apply_source(&bytes, &mppt).unwrap();
        assert_eq!(mppt.values().get_f64("DCOutputCurrent"), Some(20.5));
        assert_eq!(mppt.values().get_i64("DCOutputPower"), Some(1100));
    }

    #[test]
    fn load_power() {
        let bytes = hex(
            "03 33 fc 01 ff 58d80100 be05 00 00 04 6f17 ffff 1601 00 00 1601 00 00 04 7f 02 ff 58d80100 e812 00 00 10 6f17 ffff 9f02 0000 9f02 0000 0a 7fffff",
        );
        assert_eq!(bytes.len(), 55);

        let xw = Device::new(1, DeviceKind::Inverter);
        AcStsRms::apply(&bytes, &xw).unwrap();
        assert_eq!(xw.values().get_i64("LoadACPowerApparent"), Some(0x116 + 0x29f));
    }

    #[test]
    fn grid_power_from_long_replies() {
        let mut bytes = hex(
            "03 43 fc 01 01 0000000000000000ff000070170000000000000000ff7f02010000000000000000ff000070170000000000000000ff7f030100000000ffffff7fff00007017ffffffffffffffffff7fffffffffff",
        );
        assert_eq!(bytes.len(), 83);
        bytes[18..20].copy_from_slice(&320i16.to_le_bytes());
        bytes[22..24].copy_from_slice(&(-40i16).to_le_bytes());

        let xw = Device::new(1, DeviceKind::Inverter);
        AcStsRms::apply(&bytes, &xw).unwrap();
        assert_eq!(xw.values().get_i64("GridACInputPower"), Some(280));
        assert!(!xw.values().contains("LoadACPowerApparent"));
    }

    #[test]
    fn generator_power() {
        let bytes = hex(
            "03 13 fc 01 04 52c00100 4269 ff ff ff 6d17 7017 abee ff ff 85ee ff ff ff 7f 02 04 58bf0100 8869 ff ff ff ffff 7017 c9ee ffff b6ee ffff ff 7fffff",
        );
        assert_eq!(bytes.len(), 55);

        let xw = Device::new(1, DeviceKind::Inverter);
        AcStsRms::apply(&bytes, &xw).unwrap();
        assert_eq!(
            xw.values().get_i64("GeneratorACPowerApparent"),
            Some(i64::from(0xeeabu16 as i16) + i64::from(0xeec9u16 as i16))
        );
    }

    #[test]
    fn unknown_association_sets_nothing() {
        let mut bytes = vec![0x03, 0x43];
        bytes.resize(55, 0x01);

        let xw = Device::new(1, DeviceKind::Inverter);
        AcStsRms::apply(&bytes, &xw).unwrap();
        assert!(xw.values().is_empty());
    }

    #[test]
    fn ac_reply_too_short_for_load_power() {
        let xw = Device::new(1, DeviceKind::Inverter);
        let mut bytes = vec![0x03, ASSOC_AC_OUT];
        bytes.resize(43, 0x10);

        let err = AcStsRms::apply(&bytes, &xw).unwrap_err();
        assert!(matches!(err.downcast_ref::<BusError>(), Some(BusError::Decode(_))));
        assert!(xw.values().is_empty());
    }

    #[test]
    fn date_time() {
        let bytes = hex("03 da4d9267 d4fefd");
        let device = Device::new(0, DeviceKind::SystemControlPanel);
        DateTimeSts::apply(&bytes, &device).unwrap();

        let expected = DateTime::<Utc>::from_timestamp(0x67924dda - 300 * 60, 0).unwrap();
        assert_eq!(device.values().get("CurrentDateTime"), Some(Value::Timestamp(expected)));
    }

    #[test]
    fn product_info() {
        let bytes = hex("07 5857204d505054383000000000000000 3836352d3130333200000000 c012 0000 2c93 0900 80bb 0000 ffffffffffffff");
        let info = ProdInfo::parse(&bytes).unwrap();
        assert_eq!(info.name, "XW MPPT80");
        assert_eq!(info.product_id, "865-1032");
    }

    #[test]
    fn hardware_serial() {
        let bytes = hex("07 ff ff e0 05 00 30303030313542363232434200 000000 ffffffffff");
        assert_eq!(hw_rev_serial(&bytes).unwrap(), "00015B622CB");
    }

    #[test]
    fn software_version() {
        let bytes = hex("07 f0 02 dc 50 00 00 04 00 f0 00 a1 28 00 00 b403 f003 10 2700 0006 00 ff ff");
        let device = Device::new(1, DeviceKind::Inverter);
        SwVer::apply(&bytes, &device).unwrap();
        assert_eq!(device.values().get_text("FirmwareVersion"), Some("2.07.00".to_string()));
        assert_eq!(device.values().get_i64("FirmwareBuild"), Some(4));
    }

    #[test]
    fn short_payloads_are_decode_errors() {
        let device = Device::new(5, DeviceKind::BatteryMonitor);
        let err = BattMonSts::apply(&[0x03, 0x03, 0x00], &device).unwrap_err();
        assert!(matches!(err.downcast_ref::<BusError>(), Some(BusError::Decode(_))));
        assert!(AcStsRms::apply(&[0u8; 20], &device).is_err());
    }
}
