//! QUERY_INFO and SET_INFO (MS-SMB2 2.2.37 – 2.2.40).
//!
//! The information buffers are kept raw at this layer; the handler decodes
//! them against the requested class so that an unknown class yields a clean
//! NT status instead of a parse failure.

use std::io::SeekFrom;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;

use crate::create::FileId;

/// Info type selector (MS-SMB2 2.2.37): file, filesystem, security, quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InfoType {
    File = 0x1,
    FileSystem = 0x2,
    Security = 0x3,
    Quota = 0x4,
}

impl InfoType {
    pub fn from_u8(value: u8) -> Option<InfoType> {
        Some(match value {
            0x1 => InfoType::File,
            0x2 => InfoType::FileSystem,
            0x3 => InfoType::Security,
            0x4 => InfoType::Quota,
            _ => return None,
        })
    }
}

/// Security-descriptor section selector used by security queries and sets
/// (MS-DTYP 2.4.7 / MS-SMB2 2.2.37 AdditionalInformation).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct AdditionalInfo {
    pub owner_security_information: bool,
    pub group_security_information: bool,
    pub dacl_security_information: bool,
    pub sacl_security_information: bool,

    pub label_security_information: bool,
    pub attribute_security_information: bool,
    pub scope_security_information: bool,
    #[skip]
    __: B9,

    pub backup_security_information: bool,
    #[skip]
    __: B15,
}

/// QUERY_INFO request; 40 fixed bytes plus an optional input buffer.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct QueryInfoRequest {
    #[bw(calc = 41)]
    #[br(temp)]
    #[br(assert(_structure_size == 41))]
    _structure_size: u16,
    /// Raw info type; see [`InfoType::from_u8`].
    pub info_type: u8,
    /// Raw information class within the info type.
    pub info_class: u8,
    /// Maximum bytes the response buffer may occupy.
    pub output_buffer_length: u32,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    input_buffer_offset: PosMarker<u16>,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
    #[bw(try_calc = input_buffer.len().try_into())]
    #[br(temp)]
    input_buffer_length: u32,
    pub additional_information: AdditionalInfo,
    pub flags: u32,
    pub file_id: FileId,
    /// Input data for quota/EA queries; empty otherwise.
    #[br(if(input_buffer_length > 0))]
    #[br(seek_before = SeekFrom::Start(input_buffer_offset.value as u64))]
    #[br(count = input_buffer_length)]
    #[bw(write_with = PosMarker::write_aoff, args(&input_buffer_offset))]
    pub input_buffer: Vec<u8>,
}

/// QUERY_INFO response: the encoded information class at offset 72.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct QueryInfoResponse {
    #[bw(calc = 9)]
    #[br(temp)]
    #[br(assert(_structure_size == 9))]
    _structure_size: u16,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    output_buffer_offset: PosMarker<u16>,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    output_buffer_length: PosMarker<u32>,
    #[br(seek_before = SeekFrom::Start(output_buffer_offset.value as u64))]
    #[br(count = output_buffer_length.value)]
    #[bw(write_with = PosMarker::write_aoff_size, args(&output_buffer_offset, &output_buffer_length))]
    pub data: Vec<u8>,
}

/// SET_INFO request; 32 fixed bytes plus the information buffer.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct SetInfoRequest {
    #[bw(calc = 33)]
    #[br(temp)]
    #[br(assert(_structure_size == 33))]
    _structure_size: u16,
    pub info_type: u8,
    pub info_class: u8,
    #[bw(try_calc = buffer.len().try_into())]
    #[br(temp)]
    buffer_length: u32,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    buffer_offset: PosMarker<u16>,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
    pub additional_information: AdditionalInfo,
    pub file_id: FileId,
    #[br(seek_before = SeekFrom::Start(buffer_offset.value as u64))]
    #[br(count = buffer_length)]
    #[bw(write_with = PosMarker::write_aoff, args(&buffer_offset))]
    pub buffer: Vec<u8>,
}

/// SET_INFO response: just the structure size.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct SetInfoResponse {
    #[bw(calc = 2)]
    #[br(temp)]
    #[br(assert(_structure_size == 2))]
    _structure_size: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;
    use std::io::Cursor;

    test_binrw_write! {
        set_info_response: SetInfoResponse::default() => "0200"
    }

    #[test]
    fn query_info_request_round_trips_at_header_offset() {
        let req = QueryInfoRequest {
            info_type: InfoType::File as u8,
            info_class: 34,
            output_buffer_length: 56,
            additional_information: AdditionalInfo::new(),
            flags: 0,
            file_id: FileId { persistent: 0x577, volatile: 0x100c5 },
            input_buffer: Vec::new(),
        };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        req.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(64);
        let read = QueryInfoRequest::read_le(&mut cursor).unwrap();
        assert_eq!(read, req);
    }

    #[test]
    fn query_info_response_buffer_at_72() {
        let resp = QueryInfoResponse { data: hex_to_bytes("aabbccdd") };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        resp.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(&bytes[64..72], &[9, 0, 72, 0, 4, 0, 0, 0]);
        assert_eq!(&bytes[72..], &[0xaa, 0xbb, 0xcc, 0xdd]);
    }
}
