//! Xanbus (NMEA 2000 flavoured CAN) sniffer.

pub mod decoders;
pub mod id;
pub mod message;
pub mod pgn;
pub mod sniffer;
pub mod transport;

pub use id::Identifier;
pub use message::{Message, Reassembler};
pub use pgn::Pgn;
pub use sniffer::{OutFrame, XanbusSniffer, XanbusStats};
pub use transport::{CanSniffer, ChannelData};
