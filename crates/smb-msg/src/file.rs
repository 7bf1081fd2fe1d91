//! FLUSH, READ and WRITE (MS-SMB2 2.2.17 – 2.2.22).

use std::io::SeekFrom;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;

use crate::create::FileId;

/// FLUSH request (MS-SMB2 2.2.17).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FlushRequest {
    #[bw(calc = 24)]
    #[br(temp)]
    #[br(assert(_structure_size == 24))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved1: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved2: u32,
    pub file_id: FileId,
}

/// FLUSH response (MS-SMB2 2.2.18).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FlushResponse {
    #[bw(calc = 4)]
    #[br(temp)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}

/// READ request (MS-SMB2 2.2.19). The RDMA channel fields are parsed and
/// ignored; this server serves in-band reads only.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct ReadRequest {
    #[bw(calc = 49)]
    #[br(temp)]
    #[br(assert(_structure_size == 49))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _padding: u8,
    pub flags: ReadFlags,
    pub length: u32,
    pub offset: u64,
    pub file_id: FileId,
    pub minimum_count: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _channel: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _remaining_bytes: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _read_channel_info_offset: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _read_channel_info_length: u16,
    // The structure size counts one blob byte even though no blob is sent.
    #[bw(calc = 0)]
    #[br(temp)]
    _blob_placeholder: u8,
}

/// Flags for read operations (MS-SMB2 2.2.19).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct ReadFlags {
    pub read_unbuffered: bool,
    pub read_compressed: bool,
    #[skip]
    __: B6,
}

/// READ response (MS-SMB2 2.2.20). Data lands at offset 0x50 from the
/// header.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct ReadResponse {
    #[bw(calc = 17)]
    #[br(temp)]
    #[br(assert(_structure_size == 17))]
    _structure_size: u16,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    data_offset: PosMarker<u8>,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u8,
    #[bw(try_calc = buffer.len().try_into())]
    #[br(temp)]
    data_length: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _data_remaining: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved2: u32,
    #[br(seek_before = SeekFrom::Start(data_offset.value as u64))]
    #[br(count = data_length)]
    #[bw(write_with = PosMarker::write_aoff, args(&data_offset))]
    pub buffer: Vec<u8>,
}

/// WRITE request (MS-SMB2 2.2.21). The payload is located through the data
/// offset, which is header-relative like every other buffer offset.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct WriteRequest {
    #[bw(calc = 49)]
    #[br(temp)]
    #[br(assert(_structure_size == 49))]
    _structure_size: u16,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    data_offset: PosMarker<u16>,
    #[bw(try_calc = data.len().try_into())]
    #[br(temp)]
    length: u32,
    pub offset: u64,
    pub file_id: FileId,
    #[bw(calc = 0)]
    #[br(temp)]
    _channel: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _remaining_bytes: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _write_channel_info_offset: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _write_channel_info_length: u16,
    pub flags: WriteFlags,
    #[br(seek_before = SeekFrom::Start(data_offset.value as u64))]
    #[br(count = length)]
    #[bw(write_with = PosMarker::write_aoff, args(&data_offset))]
    pub data: Vec<u8>,
}

/// WRITE response (MS-SMB2 2.2.22).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct WriteResponse {
    #[bw(calc = 17)]
    #[br(temp)]
    #[br(assert(_structure_size == 17))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
    /// Bytes written.
    pub count: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _remaining: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _write_channel_info_offset: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _write_channel_info_length: u16,
}

/// Flags for write operations (MS-SMB2 2.2.21).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct WriteFlags {
    pub write_unbuffered: bool,
    /// Data must reach stable storage before the response.
    pub write_through: bool,
    #[skip]
    __: B30,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;
    use std::io::Cursor;

    test_binrw! {
        flush_request: FlushRequest {
            file_id: FileId { persistent: 0xc00000414, volatile: 0xc00100051 },
        } => "1800000000000000140400000c000000510010000c000000"
    }

    test_binrw_write! {
        write_response: WriteResponse { count: 0xbeefbaaf } => "11000000afbaefbe0000000000000000"
    }

    #[test]
    fn read_response_data_lands_at_0x50() {
        let resp = ReadResponse { buffer: b"bbbbbb".to_vec() };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        resp.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(&bytes[64..80], &hex_to_bytes("11005000060000000000000000000000")[..]);
        assert_eq!(&bytes[80..], b"bbbbbb");
    }

    #[test]
    fn write_request_round_trips_at_header_offset() {
        let req = WriteRequest {
            offset: 0x1234abcd,
            file_id: FileId { persistent: 1, volatile: 2 },
            flags: WriteFlags::new(),
            data: b"MeFriend!THIS IS FINE!".to_vec(),
        };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        req.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(64);
        let read = WriteRequest::read_le(&mut cursor).unwrap();
        assert_eq!(read, req);
    }
}
