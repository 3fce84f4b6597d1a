use super::id::Identifier;
use super::pgn::Pgn;

use std::collections::HashMap;

/// One message being put back together from its CAN frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: Identifier,
    fast_packet: bool,
    data: Option<Vec<u8>>,
    sequence_id: u8,
    total_length: usize,
    ready: bool,
    bogus: bool,
}

impl Message {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            fast_packet: Pgn::is_fast_packet(id.pgn),
            data: None,
            sequence_id: 0,
            total_length: 0,
            ready: false,
            bogus: false,
        }
    }

    /// Adds one frame's payload.
    ///
    /// Fast-packet frames start with a byte holding the sequence id (high
    /// nibble) and the frame index (low nibble); frame 0 also carries the
    /// total length. Continuation sequence ids are not checked.
    pub fn append(&mut self, frame: &[u8]) {
        if !self.fast_packet {
            self.data = Some(frame.to_vec());
            self.ready = true;
            return;
        }

        let first = match frame.first() {
            Some(first) => *first,
            None => {
                self.bogus = true;
                return;
            }
        };
        let sequence_id = first >> 4;
        let index = first & 0x0F;

        if index == 0 {
            // a fresh first frame restarts whatever was pending
            self.sequence_id = sequence_id;
            self.total_length = frame.get(1).copied().unwrap_or(0) as usize;
            self.ready = false;
            if self.total_length == 0 {
                self.data = None;
                self.bogus = true;
                return;
            }
            self.data = Some(frame.get(2..).unwrap_or_default().to_vec());
        } else {
            match &mut self.data {
                Some(data) => data.extend_from_slice(&frame[1..]),
                None => {
                    self.bogus = true;
                    return;
                }
            }
        }

        if let Some(data) = &mut self.data {
            if data.len() >= self.total_length {
                data.truncate(self.total_length);
                self.ready = true;
            }
        }
    }

    pub fn is_fast_packet(&self) -> bool {
        self.fast_packet
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_bogus(&self) -> bool {
        self.bogus
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}

/// Pending messages keyed by raw CAN identifier.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<u32, Message>,
    bogus: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, raw_id: u32, frame: &[u8]) {
        self.pending
            .entry(raw_id)
            .or_insert_with(|| Message::new(Identifier::decode(raw_id)))
            .append(frame);
    }

    /// Removes and returns every complete message; bogus ones are dropped.
    pub fn take_ready(&mut self) -> Vec<Message> {
        let done: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, m)| m.is_ready() || m.is_bogus())
            .map(|(id, _)| *id)
            .collect();

        let mut ready = Vec::new();
        for id in done {
            if let Some(message) = self.pending.remove(&id) {
                if message.is_bogus() {
                    self.bogus += 1;
                } else {
                    ready.push(message);
                }
            }
        }
        ready
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn bogus(&self) -> u64 {
        self.bogus
    }
}
