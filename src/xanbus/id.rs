/// A 29-bit ISO 11783 / J1939 CAN identifier, split into its parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub pgn: u32,
    pub source: u8,
    pub destination: u8,
    pub priority: u8,
}

/// Destination of PDU2 (broadcast) messages.
pub const GLOBAL: u8 = 0xFF;

impl Identifier {
    pub fn decode(raw: u32) -> Self {
        let priority = ((raw >> 26) & 0x07) as u8;
        let data_page = (raw >> 24) & 0x03;
        let pdu_format = (raw >> 16) & 0xFF;
        let pdu_specific = (raw >> 8) & 0xFF;
        let source = (raw & 0xFF) as u8;

        // PDU1: PS is a destination address; PDU2: PS is part of the PGN
        let (pgn, destination) = if pdu_format < 240 {
            (data_page << 16 | pdu_format << 8, pdu_specific as u8)
        } else {
            (data_page << 16 | pdu_format << 8 | pdu_specific, GLOBAL)
        };

        Self {
            pgn,
            source,
            destination,
            priority,
        }
    }

    pub fn encode(&self) -> u32 {
        let data_page = (self.pgn >> 16) & 0x03;
        let pdu_format = (self.pgn >> 8) & 0xFF;
        let pdu_specific = if pdu_format < 240 {
            u32::from(self.destination)
        } else {
            self.pgn & 0xFF
        };

        u32::from(self.priority & 0x07) << 26
            | data_page << 24
            | pdu_format << 16
            | pdu_specific << 8
            | u32::from(self.source)
    }
}
