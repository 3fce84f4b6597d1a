use crate::prelude::*;

use bytes::{Buf, BytesMut};
use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio_util::codec::Decoder;

pub const HEADER: [u8; 4] = [0x55, 0xAA, 0xEB, 0x90];
pub const FRAME_LEN: usize = 308;
pub const CHECKSUM_AT: usize = 299;
pub const PAYLOAD_AT: usize = 6;
pub const MAX_ADDRESS: u8 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Settings = 0x01,
    Status = 0x02,
    About = 0x03,
}

/// Low byte of the sum of everything before the checksum byte.
pub fn checksum(frame: &[u8]) -> u8 {
    Utils::sum8(&frame[..CHECKSUM_AT.min(frame.len())])
}

pub fn is_valid(frame: &[u8]) -> bool {
    frame.len() == FRAME_LEN && frame.starts_with(&HEADER) && checksum(frame) == frame[CHECKSUM_AT]
}

/// One checksummed 308 byte response frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    raw: Vec<u8>,
}

impl Frame {
    pub fn new(raw: &[u8]) -> Result<Self> {
        if raw.len() != FRAME_LEN {
            return Err(BusError::Framing(format!("frame is {} bytes, not {}", raw.len(), FRAME_LEN)).into());
        }
        if !is_valid(raw) {
            return Err(BusError::Framing(format!(
                "checksum {:#04x} != {:#04x}",
                checksum(raw),
                raw[CHECKSUM_AT]
            ))
            .into());
        }
        Ok(Self { raw: raw.to_vec() })
    }

    pub fn type_byte(&self) -> u8 {
        self.raw[4]
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::try_from(self.type_byte()).ok()
    }

    /// Source address; settings frames carry it somewhere else.
    pub fn address(&self) -> u8 {
        match self.frame_type() {
            Some(FrameType::Settings) => self.raw[270],
            _ => self.raw[300],
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[PAYLOAD_AT..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

#[derive(Debug, PartialEq)]
pub enum Decoded {
    Frame(Frame),
    /// A header-aligned candidate failed its checksum and was dropped.
    Corrupt { expected: u8, got: u8 },
}

/// Finds response frames in the raw byte stream of the RS485 bus.
///
/// Anything before a header is master command traffic and is dropped. After
/// a corrupt candidate the decoder yields nothing more until new bytes
/// arrive.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    wait_for_more: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_header(buf: &[u8]) -> Option<usize> {
        buf.windows(HEADER.len()).position(|w| w == HEADER)
    }
}

impl Decoder for FrameDecoder {
    type Item = Decoded;
    type Error = anyhow::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(len) = self.wait_for_more {
            if buf.len() <= len {
                return Ok(None);
            }
            self.wait_for_more = None;
        }

        if buf.len() < FRAME_LEN {
            return Ok(None);
        }

        let start = match Self::find_header(buf) {
            Some(start) => start,
            None => {
                // keep a possible partial header at the tail
                let keep = HEADER.len() - 1;
                buf.advance(buf.len() - keep);
                return Ok(None);
            }
        };

        if buf.len() - start < FRAME_LEN {
            buf.advance(start);
            return Ok(None);
        }

        buf.advance(start);
        let candidate = buf.split_to(FRAME_LEN);

        let got = checksum(&candidate);
        let expected = candidate[CHECKSUM_AT];
        if got != expected {
            self.wait_for_more = Some(buf.len());
            return Ok(Some(Decoded::Corrupt { expected, got }));
        }

        Ok(Some(Decoded::Frame(Frame {
            raw: candidate.to_vec(),
        })))
    }
}

// Payload layouts, offsets relative to the payload start {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct Settings {
    #[nom(SkipBefore(108))]
    pub cell_count: u32,
    pub charge_enabled: u32,
    pub discharge_enabled: u32,
}

#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(LittleEndian)]
pub struct Status {
    #[nom(Count = "32")]
    pub cells_mv: Vec<u16>,
    #[nom(SkipBefore(4))]
    #[nom(Parse = "Utils::le_u16_div1000")]
    pub cell_average: f64,
    #[nom(SkipBefore(74))]
    #[nom(Parse = "Utils::le_u32_div1000")]
    pub voltage: f64,
    #[nom(Parse = "Utils::le_u32_div1000")]
    pub power: f64,
    #[nom(Parse = "Utils::le_i32_div1000")]
    pub current: f64,
    #[nom(SkipBefore(4))]
    pub alarm: u32,
    #[nom(SkipBefore(2))]
    pub balance_state: u8,
    pub soc: u8,
    #[nom(Parse = "Utils::le_i32_div1000")]
    pub capacity_remaining: f64,
    #[nom(Parse = "Utils::le_u32_div1000")]
    pub capacity_full: f64,
    pub cycle_count: u32,
}

impl Status {
    /// Cell voltages in volts, up to the first empty (zero) cell.
    pub fn cell_voltages(&self) -> Vec<f64> {
        self.cells_mv
            .iter()
            .take_while(|mv| **mv != 0)
            .map(|mv| f64::from(*mv) / 1000.0)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct About {
    pub model: String,
    pub hardware_version: String,
    pub software_version: String,
}

impl About {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 31 {
            return Err(BusError::Decode(format!("about payload is {} bytes", payload.len())).into());
        }
        Ok(Self {
            model: Utils::text(&payload[0..15]),
            hardware_version: Utils::text(&payload[16..23]),
            software_version: Utils::text(&payload[24..31]),
        })
    }
}

pub fn parse_settings(payload: &[u8]) -> Result<Settings> {
    Settings::parse(payload)
        .map(|(_, s)| s)
        .map_err(|e| BusError::Decode(format!("settings: {:?}", e)).into())
}

pub fn parse_status(payload: &[u8]) -> Result<Status> {
    Status::parse(payload)
        .map(|(_, s)| s)
        .map_err(|e| BusError::Decode(format!("status: {:?}", e)).into())
}
// }}}
