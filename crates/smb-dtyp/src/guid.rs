//! GUID (MS-DTYP 2.3.4), encoded in the mixed-endian packet representation.

use binrw::prelude::*;
use rand::RngCore;

#[binrw::binrw]
#[brw(little)]
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl Guid {
    pub const GUID_SIZE: usize = 16;
    pub const ZERO: Guid = Guid { data1: 0, data2: 0, data3: 0, data4: [0; 8] };

    /// Generates a random (version 4) GUID.
    pub fn generate() -> Guid {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes[7] = (bytes[7] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Guid::from(bytes)
    }

    /// The packet representation of this GUID.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.data1.to_le_bytes());
        out[4..6].copy_from_slice(&self.data2.to_le_bytes());
        out[6..8].copy_from_slice(&self.data3.to_le_bytes());
        out[8..16].copy_from_slice(&self.data4);
        out
    }
}

impl From<[u8; 16]> for Guid {
    fn from(b: [u8; 16]) -> Self {
        Guid {
            data1: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            data2: u16::from_le_bytes(b[4..6].try_into().unwrap()),
            data3: u16::from_le_bytes(b[6..8].try_into().unwrap()),
            data4: b[8..16].try_into().unwrap(),
        }
    }
}

impl From<Guid> for [u8; 16] {
    fn from(guid: Guid) -> Self {
        guid.to_bytes()
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl std::fmt::Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guid({})", self)
    }
}

impl std::str::FromStr for Guid {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches('{').trim_end_matches('}');
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 5
            || parts[0].len() != 8
            || parts[1].len() != 4
            || parts[2].len() != 4
            || parts[3].len() != 4
            || parts[4].len() != 12
        {
            return Err(GuidParseError(s.to_string()));
        }
        let err = |_| GuidParseError(s.to_string());
        let mut data4 = [0u8; 8];
        for (i, byte) in data4.iter_mut().enumerate() {
            let hex = if i < 2 { &parts[3][i * 2..i * 2 + 2] } else { &parts[4][(i - 2) * 2..(i - 2) * 2 + 2] };
            *byte = u8::from_str_radix(hex, 16).map_err(err)?;
        }
        Ok(Guid {
            data1: u32::from_str_radix(parts[0], 16).map_err(err)?,
            data2: u16::from_str_radix(parts[1], 16).map_err(err)?,
            data3: u16::from_str_radix(parts[2], 16).map_err(err)?,
            data4,
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid GUID string: {0}")]
pub struct GuidParseError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_and_display_round_trip() {
        let text = "c12e0ddf-43dd-11f0-8b87-000c29801682";
        let guid: Guid = text.parse().unwrap();
        assert_eq!(guid.to_string(), text);
    }

    #[test]
    fn wire_encoding_is_mixed_endian() {
        let guid: Guid = "c12e0ddf-43dd-11f0-8b87-000c29801682".parse().unwrap();
        let mut cursor = Cursor::new(Vec::new());
        guid.write_le(&mut cursor).unwrap();
        assert_eq!(
            cursor.into_inner(),
            [0xdf, 0x0d, 0x2e, 0xc1, 0xdd, 0x43, 0xf0, 0x11, 0x8b, 0x87, 0x00, 0x0c, 0x29, 0x80, 0x16, 0x82]
        );
    }
}
