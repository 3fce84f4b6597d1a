use crate::prelude::*;
use crate::register::Register;

use super::Profile;

static REGISTERS: &[Register] = &[
    Register::u32("EnergyFromBatteryThisHour", 0x00D0).scaled(0.001),
    Register::u32("EnergyFromBatteryToday", 0x00D4).scaled(0.001),
    Register::u32("BatteryDischargeActiveToday", 0x00D6),
    Register::u32("EnergyFromBatteryThisWeek", 0x00D8).scaled(0.001),
    Register::u32("EnergyFromBatteryThisMonth", 0x00DC).scaled(0.001),
    Register::u32("EnergyToBatteryThisHour", 0x00E8).scaled(0.001),
    Register::u32("EnergyToBatteryToday", 0x00EC).scaled(0.001),
    Register::u32("BatteryChargeActiveToday", 0x00EE),
    Register::u32("EnergyToBatteryThisWeek", 0x00F0).scaled(0.001),
    Register::u32("EnergyToBatteryThisMonth", 0x00F4).scaled(0.001),
    Register::u32("LoadOutputEnergyThisHour", 0x0130).scaled(0.001),
    Register::u32("LoadOutputEnergyToday", 0x0134).scaled(0.001),
    Register::u32("LoadOutputEnergyThisWeek", 0x0138).scaled(0.001),
    Register::u32("LoadOutputEnergyThisMonth", 0x013C).scaled(0.001),
    Register::u32("BatteryVoltage", 0x0050).scaled(0.001),
    Register::i32("BatteryCurrent", 0x0052).scaled(0.001),
    Register::i32("BatteryPower", 0x0054),
    Register::u32("ChargeDCCurrent", 0x005C).scaled(0.001),
    Register::u32("ChargeDCPower", 0x005E),
    Register::u32("GridACInputPower", 0x006C),
    Register::u32("GeneratorACPowerApparent", 0x00BA),
    Register::u32("LoadACPowerApparent", 0x00A0),
    Register::u32("GridInputEnergyThisHour", 0x0100).scaled(0.001),
    Register::u32("GridInputEnergyToday", 0x0104).scaled(0.001),
    Register::u32("GridInputActiveToday", 0x0106),
    Register::u32("GridInputEnergyThisWeek", 0x0108).scaled(0.001),
    Register::u32("GridInputEnergyThisMonth", 0x010C).scaled(0.001),
    Register::u32("GeneratorInputEnergyThisHour", 0x0148).scaled(0.001),
    Register::u32("GeneratorInputEnergyToday", 0x014C).scaled(0.001),
    Register::u32("GeneratorInputActiveToday", 0x014E),
    Register::u32("GeneratorInputEnergyThisWeek", 0x0150).scaled(0.001),
    Register::u32("GeneratorInputEnergyThisMonth", 0x0154).scaled(0.001),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Xw;

impl Xw {
    /// DC charge power over the net AC power coming in, 0 with no AC input.
    pub fn efficiency(values: &ValueStore) -> f64 {
        let load = values.get_f64_or("LoadACPowerApparent", 0.0);
        let grid = values.get_f64_or("GridACInputPower", 0.0);
        let generator = values.get_f64_or("GeneratorACPowerApparent", 0.0);
        let charge = values.get_f64_or("ChargeDCPower", 0.0);

        let net = grid + generator - load;
        if (grid > 0.0 || generator > 0.0) && net != 0.0 {
            charge / net
        } else {
            0.0
        }
    }
}

impl Profile for Xw {
    fn registers(&self) -> &'static [Register] {
        REGISTERS
    }

    fn summary(&self, address: u8, values: &ValueStore) -> String {
        let v = |name| values.get_f64_or(name, 0.0);

        format!(
            "== Inverter/charger (id {}) ==\n\
             Active Power:\t\t{:.2}W\n\
             Input Power\t\tGrid: {}W\tGenerator: {}W\n\
             Charge DC Power:\t{:.2}W\n\
             Efficiency\t\t{:.2}%",
            address,
            v("LoadACPowerApparent"),
            v("GridACInputPower"),
            v("GeneratorACPowerApparent"),
            v("ChargeDCPower"),
            Self::efficiency(values) * 100.0,
        )
    }
}
