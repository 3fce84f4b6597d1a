use crate::prelude::*;
use crate::register::Register;

use super::Profile;

static REGISTERS: &[Register] = &[
    Register::u32("PVVoltage", 0x004C).scaled(0.001),
    Register::u32("PVCurrent", 0x004E).scaled(0.001),
    Register::u32("PVPower", 0x0050),
    Register::i32("DCOutputVoltage", 0x0058).scaled(0.001),
    Register::i32("DCOutputCurrent", 0x005A).scaled(0.001),
    Register::u32("DCOutputPower", 0x005C),
    Register::u32("EnergyFromPVThisHour", 0x0070).scaled(0.001),
    Register::u32("EnergyFromPVToday", 0x0074).scaled(0.001),
    Register::u32("PVInputActiveToday", 0x0076),
    Register::u32("EnergyFromPVThisWeek", 0x0078).scaled(0.001),
    Register::u32("EnergyFromPVThisMonth", 0x007C).scaled(0.001),
    Register::u32("EnergyFromPVThisYear", 0x0080).scaled(0.001),
    Register::u32("EnergyToBatteryThisHour", 0x0088).scaled(0.001),
    Register::u32("EnergyToBatteryToday", 0x008C).scaled(0.001),
    Register::u32("EnergyToBatteryThisWeek", 0x0090).scaled(0.001),
    Register::u32("EnergyToBatteryThisMonth", 0x0094).scaled(0.001),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mppt;

impl Profile for Mppt {
    fn registers(&self) -> &'static [Register] {
        REGISTERS
    }

    fn summary(&self, address: u8, values: &ValueStore) -> String {
        let v = |name| values.get_f64_or(name, 0.0);

        format!(
            "== MPPT (id {}) ==\n\
             PV Input:\t\t{}W - {:.2}v / {:.2}A\n\
             DC Output Power:\t{}W - {:.2}v / {:.2}A\n\
             PV Energy\t\tHour: {:.2}Wh\tToday: {:.2}Wh\tWeek: {:.2}Wh\t Month: {:.2}Wh",
            address,
            v("PVPower"),
            v("PVVoltage"),
            v("PVCurrent"),
            v("DCOutputPower"),
            v("DCOutputVoltage"),
            v("DCOutputCurrent"),
            v("EnergyFromPVThisHour"),
            v("EnergyFromPVToday"),
            v("EnergyFromPVThisWeek"),
            v("EnergyFromPVThisMonth"),
        )
    }
}
