use crate::prelude::*;
use crate::register::Register;

use super::Profile;

/// First cell voltage register; `CellCount` words follow.
pub const CELL_VOLTAGE_BASE: u16 = 0x1200;
pub const CELL_VOLTAGE_SCALE: f64 = 0.001;

static REGISTERS: &[Register] = &[
    Register::u32("BatChargeEN", 0x1070),
    Register::i32("BatCurrent", 0x1298).scaled(0.001),
    Register::u32("BatDisChargeEN", 0x1074),
    Register::u16("BatVol", 0x12E4).scaled(0.01),
    Register::u32("CellCount", 0x106C),
    Register::u16("CellVolAve", 0x1244).scaled(0.001),
    Register::text("HardwareVersion", 0x1410, 4),
    Register::text("ManufacturerDeviceID", 0x1400, 8),
    Register::i32("SOCCapRemain", 0x12A8).scaled(0.001),
    Register::u32("SOCCycleCount", 0x12B0),
    Register::u32("SOCFullChargeCap", 0x12AC).scaled(0.001),
    Register::u16("SOCStateOfcharge", 0x12A6),
    Register::text("SoftwareVersion", 0x1418, 4),
    Register::u32("Alarms", 0x12A0),
];

pub fn cell_field(index: usize) -> String {
    format!("CellVol{}", index)
}

/// Active cell voltages, in order, up to the first missing cell.
pub fn cell_voltages(values: &ValueStore) -> Vec<f64> {
    (0..)
        .map_while(|i| values.get_f64(&cell_field(i)))
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JkBms;

impl Profile for JkBms {
    fn registers(&self) -> &'static [Register] {
        REGISTERS
    }

    fn normalize(&self, name: &str, value: Value) -> Value {
        match (name, &value) {
            ("SOCStateOfcharge", Value::Int(raw)) => {
                Value::from(Utils::soc_from_raw(*raw as u16))
            }
            _ => value,
        }
    }

    fn summary(&self, address: u8, values: &ValueStore) -> String {
        let text = |name| values.get_text(name).unwrap_or_default();
        let v = |name| values.get_f64_or(name, 0.0);

        let voltage = v("BatVol");
        let current = v("BatCurrent");
        let cells: Vec<String> = cell_voltages(values)
            .iter()
            .map(|c| format!("{:.3}", c))
            .collect();

        format!(
            "== JK BMS (id {}) - {} (v{}) - sw v{} ==\n\
             Alarms?\t\t\t{}\n\
             SOC:\t\t\t{} ({} cycle(s))\n\
             Voltage:\t\t{:.2}v\n\
             Cell voltages:\t\t[{}]\n\
             Cell average voltage:\t{:.3} ({} cells)\n\
             Battery current:\t{:.3} ({} {:.2} Wh)\n\
             Discharge enabled?\t{}\n\
             Remaining Ah capacity:\t{:.2} ({} Ah capacity)",
            address,
            text("ManufacturerDeviceID"),
            text("HardwareVersion"),
            text("SoftwareVersion"),
            v("Alarms"),
            v("SOCStateOfcharge"),
            v("SOCCycleCount"),
            voltage,
            cells.join(", "),
            v("CellVolAve"),
            v("CellCount"),
            current,
            if current > 0.0 { "charging" } else { "discharging" },
            voltage * current,
            v("BatDisChargeEN"),
            v("SOCCapRemain"),
            v("SOCFullChargeCap"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soc_is_masked_on_the_way_in() {
        assert_eq!(
            JkBms.normalize("SOCStateOfcharge", Value::Int(0x0164)),
            Value::Int(100)
        );
        assert_eq!(JkBms.normalize("BatVol", Value::Float(53.1)), Value::Float(53.1));
    }

    #[test]
    fn cell_voltages_stop_at_first_gap() {
        let values = ValueStore::new();
        values.set("CellVol0", 3.301);
        values.set("CellVol1", 3.302);
        values.set("CellVol3", 3.304);
        assert_eq!(cell_voltages(&values), vec![3.301, 3.302]);
    }
}
