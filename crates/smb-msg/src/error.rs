//! The SMB2 ERROR response body (MS-SMB2 2.2.2).

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite, Endian};

/// Error response: 8 fixed bytes plus error data. With no error data a
/// single padding byte is emitted, making the canonical encoding 9 bytes.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct ErrorResponse {
    pub error_data: Vec<u8>,
}

impl BinRead for ErrorResponse {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let structure_size = u16::read_options(reader, endian, ())?;
        if structure_size != 9 {
            return Err(binrw::Error::AssertFail {
                pos,
                message: format!("bad error response structure size {structure_size}"),
            });
        }
        let _error_context_count = u8::read_options(reader, endian, ())?;
        let _reserved = u8::read_options(reader, endian, ())?;
        let byte_count = u32::read_options(reader, endian, ())?;
        let mut error_data = vec![0u8; byte_count as usize];
        reader.read_exact(&mut error_data)?;
        Ok(ErrorResponse { error_data })
    }
}

impl BinWrite for ErrorResponse {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        9u16.write_options(writer, endian, ())?;
        0u8.write_options(writer, endian, ())?;
        0u8.write_options(writer, endian, ())?;
        (self.error_data.len() as u32).write_options(writer, endian, ())?;
        if self.error_data.is_empty() {
            0u8.write_options(writer, endian, ())?;
        } else {
            self.error_data.write_options(writer, endian, ())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;

    test_binrw_write! {
        empty_error: ErrorResponse::default() => "0900000000000000 00"
    }
}
