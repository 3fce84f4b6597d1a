use nom::number::complete::{le_i32, le_u16, le_u32};
use nom::IResult;

pub struct Utils;

impl Utils {
    /// CRC-16/MODBUS of `data`, low byte first as it goes on the wire.
    pub fn modbus_crc(data: &[u8]) -> [u8; 2] {
        crc16::State::<crc16::MODBUS>::calculate(data).to_le_bytes()
    }

    /// Low byte of the plain sum of `data`.
    pub fn sum8(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    /// State of charge lives in the low byte; the high byte carries flags.
    pub fn soc_from_raw(raw: u16) -> u8 {
        (raw & 0xFF) as u8
    }

    /// Decodes a NUL-padded ASCII/UTF-8 field.
    pub fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes)
            .replace('\0', "")
            .trim()
            .to_string()
    }

    /// Decodes text carried in register words, high byte first.
    pub fn text_from_words(words: &[u16]) -> String {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        Self::text(&bytes)
    }

    /// Bytes from `start` up to (not including) the first NUL.
    pub fn nul_terminated(bytes: &[u8], start: usize) -> Option<String> {
        let tail = bytes.get(start..)?;
        let end = tail.iter().position(|b| *b == 0)?;
        Some(String::from_utf8_lossy(&tail[..end]).to_string())
    }

    pub fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn round(value: f64, places: i32) -> f64 {
        let factor = 10f64.powi(places);
        (value * factor).round() / factor
    }

    // nom helpers, used with #[nom(Parse = "...")] {{{
    pub fn le_u16_div1000(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, v) = le_u16(input)?;
        Ok((input, Self::round(f64::from(v) / 1000.0, 3)))
    }

    pub fn le_u32_div1000(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, v) = le_u32(input)?;
        Ok((input, Self::round(f64::from(v) / 1000.0, 3)))
    }

    pub fn le_i32_div1000(input: &[u8]) -> IResult<&[u8], f64> {
        let (input, v) = le_i32(input)?;
        Ok((input, Self::round(f64::from(v) / 1000.0, 3)))
    }
    // }}}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_is_little_endian_modbus() {
        // standard check value for CRC-16/MODBUS is 0x4B37
        assert_eq!(Utils::modbus_crc(b"123456789"), [0x37, 0x4B]);
    }

    #[test]
    fn soc_masks_flags() {
        assert_eq!(Utils::soc_from_raw(0x0164), 100);
        assert_eq!(Utils::soc_from_raw(0x0264), 100);
        assert_eq!(Utils::soc_from_raw(57), 57);
    }

    #[test]
    fn text_strips_padding() {
        assert_eq!(Utils::text(b"JK_B2A24S\0\0\0"), "JK_B2A24S");
        assert_eq!(Utils::text_from_words(&[0x3836, 0x352d, 0x3130, 0x3332, 0]), "865-1032");
    }

    #[test]
    fn nul_terminated_from_offset() {
        let bytes = b"\x07\xff\xff\xe0\x05\x0000015B6225\0\0\0";
        assert_eq!(Utils::nul_terminated(bytes, 6), Some("00015B6225".to_string()));
        assert_eq!(Utils::nul_terminated(b"abc", 6), None);
    }
}
