//! QUERY_DIRECTORY request and response (MS-SMB2 2.2.33, 2.2.34).

use std::io::SeekFrom;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;

use crate::create::FileId;

/// QUERY_DIRECTORY request; the buffer is the search pattern (usually `*`).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct QueryDirectoryRequest {
    #[bw(calc = 33)]
    #[br(temp)]
    #[br(assert(_structure_size == 33))]
    _structure_size: u16,
    /// Raw directory information class.
    pub info_class: u8,
    pub flags: QueryDirectoryFlags,
    pub file_index: u32,
    pub file_id: FileId,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    name_offset: PosMarker<u16>,
    #[bw(try_calc = u16::try_from(pattern.size()))]
    #[br(temp)]
    name_length: u16,
    pub output_buffer_length: u32,
    /// Search pattern; empty means "everything".
    #[br(if(name_length > 0))]
    #[br(seek_before = SeekFrom::Start(name_offset.value as u64))]
    #[br(args(name_length as u64))]
    #[bw(write_with = PosMarker::write_aoff, args(&name_offset))]
    pub pattern: WideString,
}

/// Enumeration control flags (MS-SMB2 2.2.33).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct QueryDirectoryFlags {
    /// Restart the enumeration from the beginning.
    pub restart_scans: bool,
    /// Return only the first matching entry.
    pub return_single_entry: bool,
    /// Resume from `file_index`.
    pub index_specified: bool,
    #[skip]
    __: bool,
    /// The handle was reopened; reset server-side enumeration state.
    pub reopen: bool,
    #[skip]
    __: B3,
}

/// QUERY_DIRECTORY response: the pre-encoded information-class entries.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct QueryDirectoryResponse {
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
    pub buffer: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn request_round_trips_at_header_offset() {
        let req = QueryDirectoryRequest {
            info_class: 37,
            flags: QueryDirectoryFlags::new().with_restart_scans(true),
            file_index: 0,
            file_id: FileId { persistent: 3, volatile: 9 },
            output_buffer_length: 0x10000,
            pattern: "*".into(),
        };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        req.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(64);
        let read = QueryDirectoryRequest::read_le(&mut cursor).unwrap();
        assert_eq!(read, req);
    }
}
