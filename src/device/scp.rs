use crate::prelude::*;
use crate::register::Register;

use super::Profile;

/// System control panel. Identified on the bus, but it exposes nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Scp;

impl Profile for Scp {
    fn registers(&self) -> &'static [Register] {
        &[]
    }

    fn summary(&self, address: u8, values: &ValueStore) -> String {
        match values.get("CurrentDateTime") {
            Some(t) => format!("== System control panel (id {}) ==\nClock:\t\t\t{}", address, t),
            None => String::new(),
        }
    }
}
