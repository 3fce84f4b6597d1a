//! JK BMS RS485 bus sniffer.
//!
//! A master polls the packs on a shared RS485 bus; each pack answers with a
//! 308 byte frame. We decode whatever goes past and occasionally send our own
//! request for a pack we haven't heard everything from yet.

pub mod frame;
pub mod sniffer;

pub use frame::{Decoded, Frame, FrameDecoder, FrameType};
pub use sniffer::{ChannelData, FrameStats, JkSniffer, Request, SerialSniffer};
