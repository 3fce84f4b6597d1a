use crate::prelude::*;
use crate::register::Register;

use super::Profile;

static REGISTERS: &[Register] = &[
    Register::u32("BatteryVoltage", 0x0046).scaled(0.001),
    Register::u16("BatteryCapacity", 0x0092),
    Register::u32("BatteryCapacityRemaining", 0x0058),
    Register::u32("BatteryCapacityRemoved", 0x005A),
    Register::i32("BatteryCurrent", 0x0048).scaled(0.001),
    Register::u32("BatteryMidpoint1Voltage", 0x0052).scaled(0.001),
    Register::u32("BatteryMidpoint2Voltage", 0x0054).scaled(0.001),
    Register::u32("BatteryMidpoint3Voltage", 0x0056).scaled(0.001),
    Register::u32("BatterySOC", 0x004C),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BattMon;

impl Profile for BattMon {
    fn registers(&self) -> &'static [Register] {
        REGISTERS
    }

    fn summary(&self, address: u8, values: &ValueStore) -> String {
        let v = |name| values.get_f64_or(name, 0.0);

        format!(
            "== Battery monitor (id {}) ==\n\
             Capacity:\t\t{}Ah of {}Ah ({}Ah removed)\n\
             Active Power:\t\t{:.2}v / {}A\n\
             SOC:\t\t\t{}%",
            address,
            v("BatteryCapacityRemaining"),
            v("BatteryCapacity"),
            v("BatteryCapacityRemoved"),
            v("BatteryVoltage"),
            v("BatteryCurrent"),
            v("BatterySOC"),
        )
    }
}
