//! UTF-16LE strings with an out-of-band byte length.

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite, Endian};

/// A UTF-16 string whose byte length is carried by a separate field of the
/// surrounding structure. Reading takes the byte length as an argument;
/// writing emits the code units with no prefix or terminator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WideString(pub String);

impl WideString {
    /// Encoded size in bytes (two per UTF-16 code unit).
    pub fn size(&self) -> u64 {
        self.0.encode_utf16().count() as u64 * 2
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl BinRead for WideString {
    type Args<'a> = (u64,);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        (byte_len,): Self::Args<'_>,
    ) -> BinResult<Self> {
        let count = (byte_len / 2) as usize;
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            units.push(u16::read_options(reader, endian, ())?);
        }
        Ok(Self(String::from_utf16_lossy(&units)))
    }
}

impl BinWrite for WideString {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        for unit in self.0.encode_utf16() {
            unit.write_options(writer, endian, ())?;
        }
        Ok(())
    }
}

impl From<&str> for WideString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WideString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for WideString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::ops::Deref for WideString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let value = WideString::from("b.txt");
        let mut cursor = Cursor::new(Vec::new());
        value.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(bytes, b"b\0.\0t\0x\0t\0");

        let mut cursor = Cursor::new(bytes);
        let read = WideString::read_le_args(&mut cursor, (10,)).unwrap();
        assert_eq!(read, value);
    }
}
