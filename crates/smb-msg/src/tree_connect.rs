//! TREE_CONNECT and TREE_DISCONNECT (MS-SMB2 2.2.9 – 2.2.12).

use std::io::SeekFrom;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;

/// TREE_CONNECT request: the UNC path of the share (`\\server\share`).
///
/// The remoted-identity extension is not supported; its flag is parsed and
/// rejected by the handler.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct TreeConnectRequest {
    #[bw(calc = 9)]
    #[br(temp)]
    #[br(assert(_structure_size == 9))]
    _structure_size: u16,
    pub flags: TreeConnectRequestFlags,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    path_offset: PosMarker<u16>,
    #[bw(try_calc = u16::try_from(path.size()))]
    #[br(temp)]
    path_length: u16,
    #[br(seek_before = SeekFrom::Start(path_offset.value as u64))]
    #[br(args(path_length as u64))]
    #[bw(write_with = PosMarker::write_aoff, args(&path_offset))]
    pub path: WideString,
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct TreeConnectRequestFlags {
    pub cluster_reconnect: bool,
    pub redirect_to_owner: bool,
    pub extension_present: bool,
    #[skip]
    __: B13,
}

/// Share types (MS-SMB2 2.2.10).
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u8))]
pub enum ShareType {
    Disk = 0x1,
    Pipe = 0x2,
    Print = 0x3,
}

/// TREE_CONNECT response; 16 bytes.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct TreeConnectResponse {
    #[bw(calc = 16)]
    #[br(temp)]
    #[br(assert(_structure_size == 16))]
    _structure_size: u16,
    pub share_type: ShareType,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u8,
    pub share_flags: u32,
    pub capabilities: u32,
    pub maximal_access: u32,
}

/// TREE_DISCONNECT request (MS-SMB2 2.2.11).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct TreeDisconnectRequest {
    #[bw(calc = 4)]
    #[br(temp)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}

/// TREE_DISCONNECT response (MS-SMB2 2.2.12).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct TreeDisconnectResponse {
    #[bw(calc = 4)]
    #[br(temp)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;

    test_binrw! {
        tree_connect_response: TreeConnectResponse {
            share_type: ShareType::Disk,
            share_flags: 0,
            capabilities: 0,
            maximal_access: 0x001f01ff,
        } => "100001000000000000000000ff011f00"
    }

    #[test]
    fn request_parses_unc_path() {
        use binrw::prelude::*;
        use std::io::Cursor;

        // Path offset is header-relative; serialize at position 64.
        let req = TreeConnectRequest {
            flags: TreeConnectRequestFlags::new(),
            path: r"\\gw\IPC$".into(),
        };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        req.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(&bytes[68..72], &[72, 0, 18, 0]);

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(64);
        let read = TreeConnectRequest::read_le(&mut cursor).unwrap();
        assert_eq!(read, req);
    }
}
