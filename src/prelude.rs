pub use std::convert::TryFrom;
pub use std::io::Write;
pub use std::str::FromStr;

pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use serde::{Deserialize, Serialize};
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::device::{Device, DeviceKind, DeviceRegistry};
pub use crate::error::BusError;
pub use crate::options::Options;
pub use crate::store::{Value, ValueStore};
pub use crate::utils::Utils;
