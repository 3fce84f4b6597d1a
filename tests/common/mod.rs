#![allow(dead_code)]

use powerbus_bridge::jk::frame::{self, FRAME_LEN, HEADER};
use powerbus_bridge::modbus::RegisterBus;
use powerbus_bridge::prelude::*;
use powerbus_bridge::xanbus::Identifier;

use async_trait::async_trait;
use std::collections::HashMap;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;

impl Factory {
    fn jk_frame(frame_type: u8, address: u8, payload: &[(usize, &[u8])]) -> Vec<u8> {
        let mut raw = vec![0u8; FRAME_LEN];
        raw[..4].copy_from_slice(&HEADER);
        raw[4] = frame_type;
        for (offset, bytes) in payload {
            let at = frame::PAYLOAD_AT + offset;
            raw[at..at + bytes.len()].copy_from_slice(bytes);
        }
        raw[270] = address;
        raw[300] = address;
        raw[frame::CHECKSUM_AT] = frame::checksum(&raw);
        raw
    }

    pub fn jk_about(address: u8) -> Vec<u8> {
        Self::jk_frame(
            0x03,
            address,
            &[(0, b"JK_B2A24S15P"), (16, b"11.XW"), (24, b"11.26")],
        )
    }

    pub fn jk_settings(address: u8, cells: u32) -> Vec<u8> {
        Self::jk_frame(
            0x01,
            address,
            &[
                (108, &cells.to_le_bytes()),
                (112, &1u32.to_le_bytes()),
                (116, &1u32.to_le_bytes()),
            ],
        )
    }

    /// 16 cells at 3.300V, 52.8V, -10.5A, 80% of 280Ah.
    pub fn jk_status(address: u8) -> Vec<u8> {
        let cells: Vec<u8> = (0..16).flat_map(|_| 3300u16.to_le_bytes()).collect();
        Self::jk_frame(
            0x02,
            address,
            &[
                (0, &cells),
                (68, &3300u16.to_le_bytes()),
                (144, &52800u32.to_le_bytes()),
                (148, &554400u32.to_le_bytes()),
                (152, &(-10500i32).to_le_bytes()),
                (160, &0x0004u32.to_le_bytes()),
                (167, &[80]),
                (168, &224000i32.to_le_bytes()),
                (172, &280000u32.to_le_bytes()),
                (176, &12u32.to_le_bytes()),
            ],
        )
    }

    /// A master command as it appears on the wire before a reply.
    pub fn jk_master_command(address: u8) -> Vec<u8> {
        powerbus_bridge::jk::Request::Status.command(address)
    }

    pub fn can_id(pgn: u32, source: u8) -> u32 {
        Identifier {
            pgn,
            source,
            destination: 0xFF,
            priority: 6,
        }
        .encode()
    }

    /// Splits `payload` into fast-packet frames with sequence id `sequence`.
    pub fn fast_packet(sequence: u8, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        let mut first = vec![sequence << 4, payload.len() as u8];
        let head = payload.len().min(6);
        first.extend_from_slice(&payload[..head]);
        frames.push(first);

        for (i, chunk) in payload[head..].chunks(7).enumerate() {
            let mut frame = vec![(sequence << 4) | (i as u8 + 1)];
            frame.extend_from_slice(chunk);
            frames.push(frame);
        }

        frames
    }

    /// AcStsRms of `len` bytes with the power words at offsets 18, 22 and 43.
    pub fn ac_sts_rms(assoc: u8, len: usize, p11: i16, p15: i16, p28: i16) -> Vec<u8> {
        let mut bytes = vec![0x03, assoc];
        bytes.resize(len.max(45), 0xFF);
        bytes[18..20].copy_from_slice(&p11.to_le_bytes());
        bytes[22..24].copy_from_slice(&p15.to_le_bytes());
        bytes[43..45].copy_from_slice(&p28.to_le_bytes());
        bytes.truncate(len);
        bytes
    }

    /// ProdInfoSts: one status byte, 16 byte name, 12 byte product id.
    pub fn prod_info(name: &str, product_id: &str) -> Vec<u8> {
        let mut bytes = vec![0x01];
        bytes.extend(Self::padded(name, 16));
        bytes.extend(Self::padded(product_id, 12));
        bytes
    }

    pub fn hw_rev(serial: &str) -> Vec<u8> {
        let mut bytes = vec![0x07, 0xFF, 0xFF, 0xE0, 0x05, 0x00];
        bytes.extend_from_slice(serial.as_bytes());
        bytes.extend_from_slice(&[0, 0, 0]);
        bytes
    }

    pub fn battmon_sts(voltage_mv: u32, current_ma: i32, soc: i8) -> Vec<u8> {
        let mut bytes = vec![0x03, 0x03];
        bytes.extend_from_slice(&voltage_mv.to_le_bytes());
        bytes.extend_from_slice(&current_ma.to_le_bytes());
        bytes.extend_from_slice(&0x7468u16.to_le_bytes());
        bytes.extend_from_slice(&149u16.to_le_bytes());
        bytes.extend_from_slice(&1071u16.to_le_bytes());
        bytes.push(soc as u8);
        bytes.extend_from_slice(&[0xFF; 8]);
        bytes
    }

    fn padded(s: &str, len: usize) -> Vec<u8> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(len, 0);
        bytes
    }
}

/// A register bus backed by a map. Unset registers don't answer.
#[derive(Debug, Default)]
pub struct MemoryBus {
    pub registers: HashMap<(u8, u16), u16>,
    pub reads: usize,
    pub writes: Vec<(u8, u16, Vec<u16>)>,
    pub broken: bool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, unit: u8, address: u16, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            self.registers.insert((unit, address + i as u16), *word);
        }
    }

    /// Text registers hold two characters per word, high byte first.
    pub fn set_text(&mut self, unit: u8, address: u16, text: &str, words: usize) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(words * 2, 0);
        let words: Vec<u16> = bytes
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        self.set(unit, address, &words);
    }
}

#[async_trait]
impl RegisterBus for MemoryBus {
    async fn read_holding(&mut self, unit: u8, address: u16, count: u16) -> Result<Option<Vec<u16>>> {
        if self.broken {
            return Err(BusError::Transport("memory bus unplugged".to_string()).into());
        }
        self.reads += 1;

        Ok((0..count)
            .map(|i| self.registers.get(&(unit, address + i)).copied())
            .collect())
    }

    async fn write_multiple(&mut self, unit: u8, address: u16, words: &[u16]) -> Result<Option<()>> {
        if self.broken {
            return Err(BusError::Transport("memory bus unplugged".to_string()).into());
        }
        if !self.registers.contains_key(&(unit, address)) {
            return Ok(None);
        }
        self.writes.push((unit, address, words.to_vec()));
        self.set(unit, address, words);
        Ok(Some(()))
    }
}
