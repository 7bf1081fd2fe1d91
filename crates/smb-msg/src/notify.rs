//! CHANGE_NOTIFY request and response (MS-SMB2 2.2.35, 2.2.36).

use std::io::SeekFrom;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;
use smb_fscc::FileNotifyInformationList;

use crate::create::FileId;

/// CHANGE_NOTIFY request; 32 bytes.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct ChangeNotifyRequest {
    #[bw(calc = 32)]
    #[br(temp)]
    #[br(assert(_structure_size == 32))]
    _structure_size: u16,
    pub flags: NotifyFlags,
    pub output_buffer_length: u32,
    pub file_id: FileId,
    pub completion_filter: NotifyFilter,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
}

/// Whether the watch covers the whole subtree.
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct NotifyFlags {
    pub watch_tree: bool,
    #[skip]
    __: B15,
}

/// Change classes to monitor (MS-SMB2 2.2.35).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct NotifyFilter {
    pub file_name: bool,
    pub dir_name: bool,
    pub attributes: bool,
    pub size: bool,

    pub last_write: bool,
    pub last_access: bool,
    pub creation: bool,
    pub ea: bool,

    pub security: bool,
    pub stream_name: bool,
    pub stream_size: bool,
    pub stream_write: bool,

    #[skip]
    __: B20,
}

/// CHANGE_NOTIFY response: FILE_NOTIFY_INFORMATION records.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct ChangeNotifyResponse {
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
    #[br(if(output_buffer_length.value > 0))]
    #[br(seek_before = SeekFrom::Start(output_buffer_offset.value as u64))]
    #[br(map_stream = |s| binrw::io::TakeSeekExt::take_seek(s, output_buffer_length.value as u64))]
    #[bw(if(!buffer.is_empty()))]
    #[bw(write_with = PosMarker::write_aoff_size, args(&output_buffer_offset, &output_buffer_length))]
    pub buffer: FileNotifyInformationList,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_fscc::{FileNotifyInformation, NotifyAction};
    use std::io::Cursor;

    #[test]
    fn response_with_rename_pair_round_trips() {
        let resp = ChangeNotifyResponse {
            buffer: vec![
                FileNotifyInformation {
                    action: NotifyAction::RenamedOldName,
                    file_name: "a.txt".into(),
                },
                FileNotifyInformation {
                    action: NotifyAction::RenamedNewName,
                    file_name: "b.txt".into(),
                },
            ]
            .into(),
        };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        resp.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(&bytes[66..68], &72u16.to_le_bytes());

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(64);
        let read = ChangeNotifyResponse::read_le(&mut cursor).unwrap();
        assert_eq!(read, resp);
    }

    #[test]
    fn empty_response_has_zero_offsets() {
        let mut cursor = Cursor::new(Vec::new());
        ChangeNotifyResponse::default().write_le(&mut cursor).unwrap();
        assert_eq!(cursor.into_inner(), [9, 0, 0, 0, 0, 0, 0, 0]);
    }
}
