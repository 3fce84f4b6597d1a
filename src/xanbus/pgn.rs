use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Parameter groups seen on a Xanbus network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Pgn {
    IsoAcknowledgement = 0xE800,
    IsoRequest = 0xEA00,
    IsoAddressClaim = 0xEE00,
    AssocCfg = 0x12500,
    Xw6848Pro = 0x1DC00,
    ProdInfoSts = 0x1F014,
    ChgSts = 0x1F00E,
    Sts = 0x1F00F,
    MpptUnknown1 = 0x1F00D,
    AgsSts = 0x1F011,
    AcStsRms = 0x1F016,
    BattMonSts = 0x1F01B,
    ScpUnknown = 0x1F01C,
    XwUnknown = 0x1F01D,
    InvSts2 = 0x1F0BD,
    MpptData = 0x1F0BE,
    AcXferSwSts = 0x1F0BF,
    BattSts2 = 0x1F0C4,
    DcSrcSts2 = 0x1F0C5,
    SpsSts = 0x1F0C6,
    MpptUnknown2 = 0x1F0C9,
    DateTimeSts = 0x1F809,
    SwVerSts = 0x1F80E,
    HwRevSts = 0x1F810,
}

impl Pgn {
    /// Messages longer than one frame, sent with the fast-packet scheme.
    pub fn is_fast_packet(pgn: u32) -> bool {
        matches!(
            Self::try_from(pgn),
            Ok(Self::AcStsRms
                | Self::DcSrcSts2
                | Self::BattSts2
                | Self::SpsSts
                | Self::ChgSts
                | Self::BattMonSts
                | Self::AgsSts
                | Self::MpptData
                | Self::ProdInfoSts
                | Self::HwRevSts
                | Self::SwVerSts)
        )
    }

    /// Known groups that carry nothing we use.
    pub fn is_ignored(&self) -> bool {
        matches!(
            self,
            Self::Sts
                | Self::AcXferSwSts
                | Self::MpptUnknown1
                | Self::XwUnknown
                | Self::MpptUnknown2
                | Self::ScpUnknown
                | Self::Xw6848Pro
                | Self::AssocCfg
                | Self::IsoAcknowledgement
                | Self::IsoRequest
                | Self::IsoAddressClaim
        )
    }

    /// Payload of an ISO request asking for this group: the PGN, 3 bytes LE.
    pub fn request_payload(&self) -> [u8; 3] {
        let pgn = u32::from(*self);
        [pgn as u8, (pgn >> 8) as u8, (pgn >> 16) as u8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_packet_set() {
        assert!(Pgn::is_fast_packet(0x1F01B));
        assert!(Pgn::is_fast_packet(0x1F80E));
        assert!(!Pgn::is_fast_packet(0x1F809));
        assert!(!Pgn::is_fast_packet(0x1F0BD));
        assert!(!Pgn::is_fast_packet(0x1FFFF));
    }

    #[test]
    fn request_payloads() {
        assert_eq!(Pgn::ProdInfoSts.request_payload(), [0x14, 0xF0, 0x01]);
        assert_eq!(Pgn::HwRevSts.request_payload(), [0x10, 0xF8, 0x01]);
        assert_eq!(Pgn::SwVerSts.request_payload(), [0x0E, 0xF8, 0x01]);
    }
}
