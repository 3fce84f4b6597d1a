use crate::prelude::*;

use super::decoders::{
    self, AcStsRms, AgsSts, BattMonSts, ChgSts, DateTimeSts, DcReading, InvSts2, ProdInfo, SpsSts,
    SwVer,
};
use super::id::Identifier;
use super::message::{Message, Reassembler};
use super::pgn::Pgn;
use crate::device::Slot;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

const REQUEST_PRIORITY: u8 = 6;

/// A frame we want on the bus: raw extended identifier and payload.
pub type OutFrame = (u32, Vec<u8>);

#[derive(Clone, Debug, Default)]
pub struct XanbusStats {
    pub frames: u64,
    pub messages: u64,
    pub requests_sent: u64,
    pub decode_errors: u64,
    pub unknown_pgns: u64,
    pub unknown_devices: u64,
    pub bogus_messages: u64,
    pub pending_messages: usize,
}

impl XanbusStats {
    pub fn print_summary(&self) {
        info!("Xanbus statistics:");
        info!("  CAN frames: {}", self.frames);
        info!("  Messages processed: {}", self.messages);
        info!("  Discovery requests sent: {}", self.requests_sent);
        info!("  Decode errors: {}", self.decode_errors);
        info!("  Unknown PGNs: {}", self.unknown_pgns);
        info!("  Unknown devices: {}", self.unknown_devices);
        info!("  Bogus messages: {}", self.bogus_messages);
        info!("  Incomplete messages: {}", self.pending_messages);
    }
}

/// Turns the CAN traffic of a Xanbus network into device values.
///
/// Every source address is asked to identify itself the first time it is
/// heard; until it has, everything else it sends is dropped.
pub struct XanbusSniffer {
    registry: Arc<DeviceRegistry>,
    reassembler: Reassembler,
    serial_overrides: BTreeMap<u8, String>,
    request_source: Option<u8>,
    unknown_pgns: HashSet<u32>,
    mppt_data: HashMap<u8, Vec<u8>>,
    outgoing: Vec<OutFrame>,
    stats: XanbusStats,
}

impl XanbusSniffer {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            reassembler: Reassembler::new(),
            serial_overrides: BTreeMap::new(),
            request_source: None,
            unknown_pgns: HashSet::new(),
            mppt_data: HashMap::new(),
            outgoing: Vec::new(),
            stats: XanbusStats::default(),
        }
    }

    pub fn with_serial_overrides(mut self, overrides: BTreeMap<u8, String>) -> Self {
        self.serial_overrides = overrides;
        self
    }

    pub fn with_request_source(mut self, source: Option<u8>) -> Self {
        self.request_source = source;
        self
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &XanbusStats {
        &self.stats
    }

    /// Handles one received frame. Returns the frames to send in reply.
    pub fn handle_frame(&mut self, raw_id: u32, data: &[u8]) -> Vec<OutFrame> {
        self.stats.frames += 1;
        let id = Identifier::decode(raw_id);

        if self.registry.begin_discovery(id.source) {
            info!("new xanbus device at {}, asking who it is", id.source);
            self.outgoing = self.discovery_requests(id.source);
            return self.take_outgoing();
        }

        self.reassembler.push(raw_id, data);

        for message in self.reassembler.take_ready() {
            self.stats.messages += 1;
            if let Err(e) = self.process(&message) {
                self.stats.decode_errors += 1;
                warn!(
                    "xanbus pgn {:#x} from {}: {} [{}]",
                    message.id.pgn,
                    message.id.source,
                    e,
                    Utils::hex(message.bytes())
                );
            }
        }

        self.stats.bogus_messages = self.reassembler.bogus();
        self.stats.pending_messages = self.reassembler.pending();
        self.take_outgoing()
    }

    fn take_outgoing(&mut self) -> Vec<OutFrame> {
        self.stats.requests_sent += self.outgoing.len() as u64;
        std::mem::take(&mut self.outgoing)
    }

    /// ISO requests for product info and hardware revision.
    pub fn discovery_requests(&self, target: u8) -> Vec<OutFrame> {
        vec![
            self.request(target, Pgn::ProdInfoSts),
            self.request(target, Pgn::HwRevSts),
        ]
    }

    /// ISO request asking `target` to send `pgn`.
    pub fn request(&self, target: u8, pgn: Pgn) -> OutFrame {
        let id = Identifier {
            pgn: u32::from(Pgn::IsoRequest),
            source: self.request_source.unwrap_or(target),
            destination: target,
            priority: REQUEST_PRIORITY,
        }
        .encode();

        (id, pgn.request_payload().to_vec())
    }

    fn process(&mut self, message: &Message) -> Result<()> {
        let source = message.id.source;
        let bytes = message.bytes();

        let device = match self.registry.slot(source) {
            Some(Slot::Identified(device)) => device,
            Some(Slot::Discovering) if message.id.pgn == u32::from(Pgn::ProdInfoSts) => {
                return self.identify(source, bytes);
            }
            _ => return Ok(()),
        };

        let pgn = match Pgn::try_from(message.id.pgn) {
            Ok(pgn) => pgn,
            Err(_) => {
                if self.unknown_pgns.insert(message.id.pgn) {
                    self.stats.unknown_pgns += 1;
                    warn!(
                        "unknown pgn {:#x} from {} (dst {}, pri {}): {}",
                        message.id.pgn,
                        source,
                        message.id.destination,
                        message.id.priority,
                        Utils::hex(bytes)
                    );
                }
                return Ok(());
            }
        };

        if pgn.is_ignored() {
            return Ok(());
        }

        trace!("{:?} from {}: {}", pgn, source, Utils::hex(bytes));

        match pgn {
            Pgn::AcStsRms => AcStsRms::apply(bytes, &device),
            Pgn::InvSts2 => InvSts2::apply(bytes, &device),
            Pgn::DcSrcSts2 => DcReading::apply_source(bytes, &device),
            Pgn::BattSts2 => DcReading::apply_battery(bytes, &device),
            Pgn::SpsSts => SpsSts::check(bytes),
            Pgn::ChgSts => ChgSts::apply(bytes, &device),
            Pgn::BattMonSts => BattMonSts::apply(bytes, &device),
            Pgn::AgsSts => AgsSts::apply(bytes, &device),
            Pgn::DateTimeSts => DateTimeSts::apply(bytes, &device),
            Pgn::ProdInfoSts => {
                let info = ProdInfo::parse(bytes)?;
                device.set_name(info.name);
                Ok(())
            }
            Pgn::HwRevSts => {
                let serial = decoders::hw_rev_serial(bytes)?;
                if !self.serial_overrides.contains_key(&source) {
                    device.set_serial(serial);
                }
                Ok(())
            }
            Pgn::SwVerSts => SwVer::apply(bytes, &device),
            Pgn::MpptData => {
                if self.mppt_data.get(&source).map(Vec::as_slice) != Some(bytes) {
                    trace!("mppt data from {} changed: {}", source, Utils::hex(bytes));
                    self.mppt_data.insert(source, bytes.to_vec());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn identify(&mut self, source: u8, bytes: &[u8]) -> Result<()> {
        let info = ProdInfo::parse(bytes)?;

        let kind = match DeviceKind::classify(&info.product_id) {
            Some(kind) => kind,
            None => {
                if self.registry.mark_unidentified(source, &info.product_id) {
                    self.stats.unknown_devices += 1;
                    warn!(
                        "unknown xanbus device {} ({}) at {}",
                        info.product_id, info.name, source
                    );
                }
                return Ok(());
            }
        };

        let device = Device::new(source, kind);
        device.set_name(info.name.as_str());
        if let Some(serial) = self.serial_overrides.get(&source) {
            device.set_serial(serial.as_str());
        } else {
            // the hardware revision may have come in while we were still discovering
            let request = self.request(source, Pgn::HwRevSts);
            self.outgoing.push(request);
        }

        info!("xanbus device {} is a {} ({}, {})", source, kind, info.name, info.product_id);
        self.registry.insert(device);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: u8 = 5;

    fn battmon_id() -> u32 {
        Identifier {
            pgn: 0x1F01B,
            source: SOURCE,
            destination: 0xFF,
            priority: 6,
        }
        .encode()
    }

    #[test]
    fn first_frame_triggers_discovery() {
        let registry = Arc::new(DeviceRegistry::new());
        let mut sniffer = XanbusSniffer::new(registry.clone());

        let out = sniffer.handle_frame(battmon_id(), &[0x40, 41, 1, 2, 3, 4, 5, 6]);
        assert_eq!(
            out,
            vec![
                (0x18EA0505, vec![0x14, 0xF0, 0x01]),
                (0x18EA0505, vec![0x10, 0xF8, 0x01]),
            ]
        );
        assert!(matches!(registry.slot(SOURCE), Some(Slot::Discovering)));

        let out = sniffer.handle_frame(battmon_id(), &[0x40, 41, 1, 2, 3, 4, 5, 6]);
        assert!(out.is_empty());
        assert_eq!(sniffer.stats().requests_sent, 2);
    }

    #[test]
    fn configured_request_source() {
        let sniffer = XanbusSniffer::new(Arc::new(DeviceRegistry::new())).with_request_source(Some(0x22));
        let out = sniffer.discovery_requests(3);
        assert_eq!(out[0].0, 0x18EA0322);
    }

    #[test]
    fn unknown_pgn_reported_once() {
        let registry = Arc::new(DeviceRegistry::new());
        registry.insert(Device::new(SOURCE, DeviceKind::Mppt));
        let mut sniffer = XanbusSniffer::new(registry);

        let id = Identifier {
            pgn: 0x1FFAA,
            source: SOURCE,
            destination: 0xFF,
            priority: 6,
        }
        .encode();
        sniffer.handle_frame(id, &[1, 2, 3]);
        sniffer.handle_frame(id, &[1, 2, 3]);
        assert_eq!(sniffer.stats().unknown_pgns, 1);
        assert_eq!(sniffer.stats().messages, 2);
    }
}
