use crate::prelude::*;

/// How a register's raw words map onto a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Uint16,
    Int16,
    Uint32,
    Int32,
    /// Fixed-length text of N words, two characters per word.
    Text(u16),
}

impl Encoding {
    pub const fn word_len(&self) -> u16 {
        match self {
            Self::Uint16 | Self::Int16 => 1,
            Self::Uint32 | Self::Int32 => 2,
            Self::Text(n) => *n,
        }
    }
}

/// Order of the two words making up a 32-bit register pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    /// low word first
    #[default]
    Little,
    /// high word first
    Big,
}

impl WordOrder {
    fn join(&self, words: &[u16]) -> u32 {
        let (lo, hi) = match self {
            Self::Little => (words[0], words[1]),
            Self::Big => (words[1], words[0]),
        };
        u32::from(hi) << 16 | u32::from(lo)
    }

    fn split(&self, raw: u32) -> Vec<u16> {
        let (lo, hi) = ((raw & 0xFFFF) as u16, (raw >> 16) as u16);
        match self {
            Self::Little => vec![lo, hi],
            Self::Big => vec![hi, lo],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Register {
    pub name: &'static str,
    pub address: u16,
    pub encoding: Encoding,
    pub scale: Option<f64>,
}

impl Register {
    pub const fn new(name: &'static str, address: u16, encoding: Encoding) -> Self {
        Self {
            name,
            address,
            encoding,
            scale: None,
        }
    }

    pub const fn u16(name: &'static str, address: u16) -> Self {
        Self::new(name, address, Encoding::Uint16)
    }

    pub const fn u32(name: &'static str, address: u16) -> Self {
        Self::new(name, address, Encoding::Uint32)
    }

    pub const fn i32(name: &'static str, address: u16) -> Self {
        Self::new(name, address, Encoding::Int32)
    }

    pub const fn text(name: &'static str, address: u16, words: u16) -> Self {
        Self::new(name, address, Encoding::Text(words))
    }

    pub const fn scaled(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub const fn word_len(&self) -> u16 {
        self.encoding.word_len()
    }

    pub fn decode(&self, words: &[u16], order: WordOrder) -> Result<Value> {
        decode_ordered(words, self.encoding, self.scale, order)
    }

    pub fn encode(&self, value: &Value, order: WordOrder) -> Result<Vec<u16>> {
        encode_ordered(value, self.encoding, self.scale, order)
    }
}

/// Decodes raw words, low word first.
pub fn decode(words: &[u16], encoding: Encoding, scale: Option<f64>) -> Result<Value> {
    decode_ordered(words, encoding, scale, WordOrder::Little)
}

/// Encodes a value into raw words, low word first.
pub fn encode(value: &Value, encoding: Encoding, scale: Option<f64>) -> Result<Vec<u16>> {
    encode_ordered(value, encoding, scale, WordOrder::Little)
}

pub fn decode_ordered(
    words: &[u16],
    encoding: Encoding,
    scale: Option<f64>,
    order: WordOrder,
) -> Result<Value> {
    if words.len() != encoding.word_len() as usize {
        return Err(BusError::Decode(format!(
            "{:?} needs {} words, got {}",
            encoding,
            encoding.word_len(),
            words.len()
        ))
        .into());
    }

    let raw: i64 = match encoding {
        Encoding::Uint16 => i64::from(words[0]),
        Encoding::Int16 => i64::from(words[0] as i16),
        Encoding::Uint32 => i64::from(order.join(words)),
        Encoding::Int32 => i64::from(order.join(words) as i32),
        // scale never applies to text
        Encoding::Text(_) => return Ok(Value::Text(Utils::text_from_words(words))),
    };

    Ok(match scale {
        Some(scale) => Value::Float(Utils::round(raw as f64 * scale, 6)),
        None => Value::Int(raw),
    })
}

pub fn encode_ordered(
    value: &Value,
    encoding: Encoding,
    scale: Option<f64>,
    order: WordOrder,
) -> Result<Vec<u16>> {
    if let Encoding::Text(n) = encoding {
        let text = value
            .as_str()
            .ok_or_else(|| anyhow!("{:?} can't hold {}", encoding, value))?;
        let mut bytes = text.as_bytes().to_vec();
        if bytes.len() > n as usize * 2 {
            bail!("{:?} too long for {} words", text, n);
        }
        bytes.resize(n as usize * 2, 0);
        return Ok(bytes
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect());
    }

    let v = value
        .as_f64()
        .ok_or_else(|| anyhow!("{:?} can't hold {}", encoding, value))?;
    let raw = (v / scale.unwrap_or(1.0)).round() as i64;

    let (min, max) = match encoding {
        Encoding::Uint16 => (0, i64::from(u16::MAX)),
        Encoding::Int16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
        Encoding::Uint32 => (0, i64::from(u32::MAX)),
        Encoding::Int32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        Encoding::Text(_) => bail!("text handled above"),
    };
    if raw < min || raw > max {
        bail!("{} out of range for {:?}", value, encoding);
    }

    Ok(match encoding {
        Encoding::Uint16 | Encoding::Int16 => vec![raw as u16],
        _ => order.split(raw as u32),
    })
}
