//! IOCTL/FSCTL (MS-SMB2 2.2.31, 2.2.32) and the FSCTL payloads the server
//! implements.

use std::io::SeekFrom;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;
use smb_dtyp::guid::Guid;

use crate::create::FileId;
use crate::negotiate::NegotiateSecurityMode;

/// FSCTL control codes handled by the dispatch table (MS-FSCC 2.3).
pub const FSCTL_DFS_GET_REFERRALS: u32 = 0x0006_0194;
pub const FSCTL_GET_NTFS_VOLUME_DATA: u32 = 0x0009_0064;
pub const FSCTL_GET_REPARSE_POINT: u32 = 0x0009_00A8;
pub const FSCTL_READ_FILE_USN_DATA: u32 = 0x0009_00EB;
pub const FSCTL_PIPE_TRANSCEIVE: u32 = 0x0011_C017;
pub const FSCTL_QUERY_NETWORK_INTERFACE_INFO: u32 = 0x0014_01FC;
pub const FSCTL_SRV_ENUMERATE_SNAPSHOTS: u32 = 0x0014_4064;
pub const FSCTL_VALIDATE_NEGOTIATE_INFO: u32 = 0x0014_0204;

/// IOCTL request; 56 fixed bytes plus the input buffer.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct IoctlRequest {
    #[bw(calc = 57)]
    #[br(temp)]
    #[br(assert(_structure_size == 57))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
    pub ctl_code: u32,
    pub file_id: FileId,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    input_offset: PosMarker<u32>,
    #[bw(try_calc = input.len().try_into())]
    #[br(temp)]
    input_count: u32,
    pub max_input_response: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _output_offset: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _output_count: u32,
    pub max_output_response: u32,
    pub flags: IoctlRequestFlags,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved2: u32,
    #[br(if(input_count > 0))]
    #[br(seek_before = SeekFrom::Start(input_offset.value as u64))]
    #[br(count = input_count)]
    #[bw(write_with = PosMarker::write_aoff, args(&input_offset))]
    pub input: Vec<u8>,
}

/// Whether the operation is an FSCTL or a pass-through IOCTL.
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct IoctlRequestFlags {
    pub is_fsctl: bool,
    #[skip]
    __: B31,
}

/// IOCTL response; 48 fixed bytes plus the output buffer.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct IoctlResponse {
    #[bw(calc = 49)]
    #[br(temp)]
    #[br(assert(_structure_size == 49))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
    pub ctl_code: u32,
    pub file_id: FileId,
    // Input echo is always empty; its offset may be zero (MS-SMB2 2.2.32).
    #[bw(calc = 0)]
    #[br(temp)]
    _input_offset: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _input_count: u32,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    output_offset: PosMarker<u32>,
    #[bw(try_calc = output.len().try_into())]
    #[br(temp)]
    output_count: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _flags: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved2: u32,
    #[br(if(output_count > 0))]
    #[br(seek_before = SeekFrom::Start(output_offset.value as u64))]
    #[br(count = output_count)]
    #[bw(write_with = PosMarker::write_aoff, args(&output_offset))]
    pub output: Vec<u8>,
}

/// FSCTL_VALIDATE_NEGOTIATE_INFO input (MS-SMB2 2.2.31.4).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct ValidateNegotiateInfoRequest {
    pub capabilities: u32,
    pub guid: Guid,
    pub security_mode: NegotiateSecurityMode,
    #[bw(try_calc = dialects.len().try_into())]
    #[br(temp)]
    dialect_count: u16,
    #[br(count = dialect_count)]
    pub dialects: Vec<u16>,
}

/// FSCTL_VALIDATE_NEGOTIATE_INFO output (MS-SMB2 2.2.32.6).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct ValidateNegotiateInfoResponse {
    pub capabilities: u32,
    pub guid: Guid,
    pub security_mode: NegotiateSecurityMode,
    pub dialect: u16,
}

/// FSCTL_SRV_ENUMERATE_SNAPSHOTS output (MS-SMB2 2.2.32.2). This server
/// has no previous versions, so the array is always empty.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct SrvSnapshotArray {
    pub number_of_snapshots: u32,
    pub number_of_snapshots_returned: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _snapshot_array_size: u32,
}

/// The symbolic-link reparse data buffer returned by
/// FSCTL_GET_REPARSE_POINT (MS-FSCC 2.1.2.4).
#[derive(Debug, PartialEq, Eq)]
pub struct SymlinkReparseBuffer {
    pub target: String,
    /// SYMLINK_FLAG_RELATIVE when the target is not absolute.
    pub flags: u32,
}

pub const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

impl SymlinkReparseBuffer {
    /// Serializes the reparse buffer; the substitute and print names carry
    /// the same path.
    pub fn to_bytes(&self) -> Vec<u8> {
        let path: Vec<u8> = self
            .target
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let name_len = path.len() as u16;
        let data_length = 12 + 2 * path.len() as u16;
        let mut out = Vec::with_capacity(8 + data_length as usize);
        out.extend_from_slice(&smb_fscc::IO_REPARSE_TAG_SYMLINK.to_le_bytes());
        out.extend_from_slice(&data_length.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // substitute name offset
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes()); // print name offset
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&path);
        out.extend_from_slice(&path);
        out
    }
}

/// NTFS_VOLUME_DATA_BUFFER for FSCTL_GET_NTFS_VOLUME_DATA; 96 bytes of
/// synthetic geometry.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct NtfsVolumeData {
    pub volume_serial_number: u64,
    pub number_sectors: u64,
    pub total_clusters: u64,
    pub free_clusters: u64,
    pub total_reserved: u64,
    pub bytes_per_sector: u32,
    pub bytes_per_cluster: u32,
    pub bytes_per_file_record_segment: u32,
    pub clusters_per_file_record_segment: u32,
    pub mft_valid_data_length: u64,
    pub mft_start_lcn: u64,
    pub mft2_start_lcn: u64,
    pub mft_zone_start: u64,
    pub mft_zone_end: u64,
}

/// USN_RECORD_V2 returned by FSCTL_READ_FILE_USN_DATA (MS-FSCC 2.5.3).
#[derive(Debug, PartialEq, Eq)]
pub struct UsnRecord {
    pub file_reference_number: u64,
    pub parent_file_reference_number: u64,
    pub timestamp: FileTime,
    pub file_attributes: u32,
    pub file_name: String,
}

impl UsnRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let name: Vec<u8> = self
            .file_name
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let record_length = ((60 + name.len() as u32) + 7) & !7;
        let mut out = Vec::with_capacity(record_length as usize);
        out.extend_from_slice(&record_length.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes()); // major version
        out.extend_from_slice(&0u16.to_le_bytes()); // minor version
        out.extend_from_slice(&self.file_reference_number.to_le_bytes());
        out.extend_from_slice(&self.parent_file_reference_number.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // usn
        out.extend_from_slice(&self.timestamp.value.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // reason
        out.extend_from_slice(&0u32.to_le_bytes()); // source info
        out.extend_from_slice(&0u32.to_le_bytes()); // security id
        out.extend_from_slice(&self.file_attributes.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&60u16.to_le_bytes()); // file name offset
        out.extend_from_slice(&name);
        out.resize(record_length as usize, 0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn ioctl_round_trips_at_header_offset() {
        let req = IoctlRequest {
            ctl_code: FSCTL_VALIDATE_NEGOTIATE_INFO,
            file_id: FileId::FULL,
            max_input_response: 0,
            max_output_response: 24,
            flags: IoctlRequestFlags::new().with_is_fsctl(true),
            input: vec![1, 2, 3, 4],
        };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        req.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        // Input buffer directly follows the 56-byte fixed part.
        assert_eq!(&bytes[88..92], &120u32.to_le_bytes());

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(64);
        let read = IoctlRequest::read_le(&mut cursor).unwrap();
        assert_eq!(read, req);
    }

    #[test]
    fn symlink_reparse_buffer_layout() {
        let buf = SymlinkReparseBuffer { target: "ab".into(), flags: SYMLINK_FLAG_RELATIVE }
            .to_bytes();
        assert_eq!(&buf[0..4], &0xA000000Cu32.to_le_bytes());
        // data length = 12 + 2 * 4 bytes of path
        assert_eq!(&buf[4..6], &20u16.to_le_bytes());
        assert_eq!(buf.len(), 8 + 20);
    }

    #[test]
    fn usn_record_is_eight_aligned() {
        let rec = UsnRecord {
            file_reference_number: 5,
            parent_file_reference_number: 2,
            timestamp: FileTime::ZERO,
            file_attributes: 0x20,
            file_name: "a.txt".into(),
        };
        let bytes = rec.to_bytes();
        assert_eq!(bytes.len() % 8, 0);
        assert_eq!(&bytes[0..4], &(bytes.len() as u32).to_le_bytes());
    }
}
