use crate::prelude::*;

use super::frame::{self, Decoded, Frame, FrameDecoder, FrameType};
use crate::device::jkbms;

use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::codec::Decoder;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelData {
    Shutdown,
}

const RECONNECT_DELAY_SECS: u64 = 5;
const MAX_BUFFER_SIZE: usize = 8192;

/// What the master asks a pack for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Settings,
    Status,
    About,
}

impl Request {
    pub fn opcode(&self) -> [u8; 8] {
        match self {
            Self::Settings => [0x10, 0x16, 0x1E, 0x00, 0x01, 0x02, 0x00, 0x00],
            Self::Status => [0x10, 0x16, 0x20, 0x00, 0x01, 0x02, 0x00, 0x00],
            Self::About => [0x10, 0x16, 0x1C, 0x00, 0x01, 0x02, 0x00, 0x00],
        }
    }

    /// `[address] + opcode + CRC-16/MODBUS`, CRC low byte first.
    pub fn command(&self, address: u8) -> Vec<u8> {
        let mut command = Vec::with_capacity(11);
        command.push(address);
        command.extend_from_slice(&self.opcode());
        let crc = Utils::modbus_crc(&command);
        command.extend_from_slice(&crc);
        command
    }

    /// The next thing `device` is missing, in settings, status, about order.
    pub fn missing_for(device: &Device) -> Option<Self> {
        let values = device.values();
        if !values.contains("CellCount") {
            Some(Self::Settings)
        } else if !values.contains("SOCStateOfcharge") {
            Some(Self::Status)
        } else if !values.contains("ManufacturerDeviceID") {
            Some(Self::About)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameStats {
    pub frames: u64,
    pub settings: u64,
    pub status: u64,
    pub about: u64,
    pub corrupt: u64,
    pub rejected: u64,
    pub commands_sent: u64,
}

impl FrameStats {
    pub fn print_summary(&self) {
        info!("JK BMS frame statistics:");
        info!("  Valid frames: {}", self.frames);
        info!("    settings: {}", self.settings);
        info!("    status: {}", self.status);
        info!("    about: {}", self.about);
        info!("  Checksum failures: {}", self.corrupt);
        info!("  Rejected frames: {}", self.rejected);
        info!("  Discovery commands sent: {}", self.commands_sent);
    }
}

/// Listens to the traffic between a JK BMS master and its packs, and nudges
/// packs that haven't told us everything yet.
pub struct JkSniffer {
    registry: Arc<DeviceRegistry>,
    decoder: FrameDecoder,
    discovery_every: usize,
    since_discovery: usize,
    stats: FrameStats,
}

impl JkSniffer {
    pub fn new(registry: Arc<DeviceRegistry>, discovery_every: usize) -> Self {
        Self {
            registry,
            decoder: FrameDecoder::new(),
            discovery_every,
            since_discovery: 0,
            stats: FrameStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Consumes every complete frame in `buf`. Returns the discovery
    /// commands that are due, to be written back onto the bus.
    pub fn feed(&mut self, buf: &mut BytesMut) -> Result<Vec<Vec<u8>>> {
        let mut commands = Vec::new();

        while let Some(decoded) = self.decoder.decode(buf)? {
            match decoded {
                Decoded::Corrupt { expected, got } => {
                    self.stats.corrupt += 1;
                    warn!("bms frame checksum mismatch: expected {:#04x}, got {:#04x}", expected, got);
                }
                Decoded::Frame(frame) => {
                    if let Err(e) = self.handle_frame(&frame) {
                        self.stats.rejected += 1;
                        warn!("{}", e);
                        continue;
                    }

                    self.since_discovery += 1;
                    if self.discovery_every > 0 && self.since_discovery >= self.discovery_every {
                        self.since_discovery = 0;
                        if let Some(command) = self.next_command() {
                            commands.push(command);
                        }
                    }
                }
            }
        }

        Ok(commands)
    }

    pub fn handle_frame(&mut self, frame: &Frame) -> Result<()> {
        let address = frame.address();
        if address > frame::MAX_ADDRESS {
            return Err(BusError::UnknownIdentifier(format!("bms address {}", address)).into());
        }

        let frame_type = frame.frame_type().ok_or_else(|| {
            BusError::UnknownIdentifier(format!(
                "frame type {:#04x} from bms {}",
                frame.type_byte(),
                address
            ))
        })?;

        let payload = frame.payload();
        // parse before the device exists, so a bad frame doesn't create one
        let update = match frame_type {
            FrameType::Settings => Update::Settings(frame::parse_settings(payload)?),
            FrameType::Status => Update::Status(frame::parse_status(payload)?),
            FrameType::About => Update::About(frame::About::parse(payload)?),
        };

        let is_new = self.registry.get(address).is_none();
        let device = self.registry.get_or_insert(address, DeviceKind::BatteryPack);
        if is_new {
            info!("found bms {}", address);
        }

        self.stats.frames += 1;
        match update {
            Update::Settings(settings) => {
                self.stats.settings += 1;
                apply_settings(&device, &settings);
            }
            Update::Status(status) => {
                self.stats.status += 1;
                apply_status(&device, &status);
            }
            Update::About(about) => {
                self.stats.about += 1;
                apply_about(&device, &about);
            }
        }
        debug!("bms {}: {:?} frame", address, frame_type);

        Ok(())
    }

    /// One command for the lowest-addressed pack still missing data.
    pub fn next_command(&self) -> Option<Vec<u8>> {
        self.registry
            .devices()
            .iter()
            .filter(|d| d.kind() == DeviceKind::BatteryPack)
            .find_map(|d| {
                Request::missing_for(d).map(|request| {
                    debug!("bms {}: requesting {:?}", d.address(), request);
                    request.command(d.address())
                })
            })
    }

    /// Reads the port until shutdown. Only transport errors end this early.
    pub async fn run(
        &mut self,
        port: &str,
        baudrate: u32,
        shutdown: &mut broadcast::Receiver<ChannelData>,
    ) -> Result<()> {
        let builder = tokio_serial::new(port, baudrate)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .data_bits(tokio_serial::DataBits::Eight);
        let mut stream = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| BusError::Transport(format!("open {}: {}", port, e)))?;
        info!("listening for bms traffic on {} at {} baud", port, baudrate);

        let mut buf = BytesMut::with_capacity(MAX_BUFFER_SIZE);

        loop {
            tokio::select! {
                msg = shutdown.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                        Err(e) => warn!("bms sniffer channel: {}", e),
                    }
                }

                read = stream.read_buf(&mut buf) => {
                    let n = read.map_err(|e| BusError::Transport(format!("{}: {}", port, e)))?;
                    if n == 0 {
                        return Err(BusError::Transport(format!("{}: closed", port)).into());
                    }

                    for command in self.feed(&mut buf)? {
                        trace!("bms TX {}", Utils::hex(&command));
                        stream
                            .write_all(&command)
                            .await
                            .map_err(|e| BusError::Transport(format!("{}: {}", port, e)))?;
                        self.stats.commands_sent += 1;
                    }
                }
            }
        }

        info!("bms sniffer on {} exiting", port);
        Ok(())
    }
}

enum Update {
    Settings(frame::Settings),
    Status(frame::Status),
    About(frame::About),
}

fn apply_settings(device: &Device, settings: &frame::Settings) {
    let values = device.values();
    values.set("CellCount", settings.cell_count);
    values.set("BatChargeEN", settings.charge_enabled);
    values.set("BatDisChargeEN", settings.discharge_enabled);
}

fn apply_status(device: &Device, status: &frame::Status) {
    let values = device.values();
    for (i, v) in status.cell_voltages().into_iter().enumerate() {
        values.set(&jkbms::cell_field(i), v);
    }
    values.set("CellVolAve", status.cell_average);
    values.set("BatVol", status.voltage);
    values.set("BatWatt", status.power);
    values.set("BatCurrent", status.current);
    values.set("Alarms", status.alarm);
    values.set("BalanSta", status.balance_state);
    values.set("SOCStateOfcharge", Utils::soc_from_raw(u16::from(status.soc)));
    values.set("SOCCapRemain", status.capacity_remaining);
    values.set("SOCFullChargeCap", status.capacity_full);
    values.set("SOCCycleCount", status.cycle_count);
}

fn apply_about(device: &Device, about: &frame::About) {
    let values = device.values();
    values.set("ManufacturerDeviceID", about.model.as_str());
    values.set("HardwareVersion", about.hardware_version.as_str());
    values.set("SoftwareVersion", about.software_version.as_str());
}

/// The long-lived sniffer task: reopens the port after transport loss.
#[derive(Clone)]
pub struct SerialSniffer {
    config: ConfigWrapper,
    channels: Channels,
    registry: Arc<DeviceRegistry>,
}

impl SerialSniffer {
    pub fn new(config: ConfigWrapper, channels: Channels, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            config,
            channels,
            registry,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let sniffer_config = self
            .config
            .jk_sniffer()
            .ok_or_else(|| anyhow!("jk sniffer is not configured"))?;
        let mut shutdown = self.channels.to_jk_sniffer.subscribe();
        let mut sniffer = JkSniffer::new(self.registry.clone(), sniffer_config.discovery_every());

        loop {
            match sniffer
                .run(sniffer_config.port(), sniffer_config.baudrate(), &mut shutdown)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    error!("bms sniffer: {}", e);
                    info!("bms sniffer: reopening in {}s", RECONNECT_DELAY_SECS);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                _ = shutdown.recv() => break,
            }
        }

        sniffer.stats().print_summary();
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_jk_sniffer.send(ChannelData::Shutdown);
    }
}
