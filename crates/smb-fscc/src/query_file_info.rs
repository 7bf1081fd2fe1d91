//! File information classes served by QUERY_INFO.
//!
//! MS-FSCC 2.4

use binrw::prelude::*;
use smb_dtyp::binrw_util::prelude::*;

use crate::{
    ChainedItemList, FileAccessMask, FileAttributes, FileBasicInformation, FileNameInformation,
    FilePositionInformation, FileStandardInformation,
};

/// File information class codes accepted on the QUERY_INFO file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryFileInfoClass {
    Basic = 4,
    Standard = 5,
    Internal = 6,
    Ea = 7,
    Access = 8,
    Name = 9,
    Position = 14,
    FullEa = 15,
    Mode = 16,
    Alignment = 17,
    All = 18,
    AlternateName = 21,
    Stream = 22,
    Compression = 28,
    NetworkOpen = 34,
    AttributeTag = 35,
    NormalizedName = 48,
    Id = 59,
}

impl QueryFileInfoClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            4 => Self::Basic,
            5 => Self::Standard,
            6 => Self::Internal,
            7 => Self::Ea,
            8 => Self::Access,
            9 => Self::Name,
            14 => Self::Position,
            15 => Self::FullEa,
            16 => Self::Mode,
            17 => Self::Alignment,
            18 => Self::All,
            21 => Self::AlternateName,
            22 => Self::Stream,
            28 => Self::Compression,
            34 => Self::NetworkOpen,
            35 => Self::AttributeTag,
            48 => Self::NormalizedName,
            59 => Self::Id,
            _ => return None,
        })
    }

    /// Fixed (minimum) encoded size of the class, used for the
    /// INFO_LENGTH_MISMATCH check on undersized output buffers.
    pub fn fixed_size(&self) -> usize {
        match self {
            Self::Basic => FileBasicInformation::SIZE,
            Self::Standard => FileStandardInformation::SIZE,
            Self::Internal => 8,
            Self::Ea => 4,
            Self::Access => 4,
            Self::Name | Self::NormalizedName | Self::AlternateName => 4,
            Self::Position => 8,
            Self::FullEa => 4,
            Self::Mode => 4,
            Self::Alignment => 4,
            Self::All => 100,
            Self::Stream => 24,
            Self::Compression => 16,
            Self::NetworkOpen => 56,
            Self::AttributeTag => 8,
            Self::Id => 24,
        }
    }
}

/// FileInternalInformation (class 6, MS-FSCC 2.4.27).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileInternalInformation {
    pub index_number: u64,
}

/// FileEaInformation (class 7, MS-FSCC 2.4.13). The gateway stores no
/// extended attributes, so the size is always zero.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileEaInformation {
    pub ea_size: u32,
}

/// FileAccessInformation (class 8, MS-FSCC 2.4.1).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileAccessInformation {
    pub access_flags: FileAccessMask,
}

/// FileModeInformation (class 16, MS-FSCC 2.4.31).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileModeInformation {
    pub mode: u32,
}

/// FileAlignmentInformation (class 17, MS-FSCC 2.4.3).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileAlignmentInformation {
    pub alignment_requirement: u32,
}

/// FileAllInformation (class 18, MS-FSCC 2.4.2): the aggregate of the basic
/// classes followed by the name.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileAllInformation {
    pub basic: FileBasicInformation,
    pub standard: FileStandardInformation,
    pub internal: FileInternalInformation,
    pub ea: FileEaInformation,
    pub access: FileAccessInformation,
    pub position: FilePositionInformation,
    pub mode: FileModeInformation,
    pub alignment: FileAlignmentInformation,
    pub name: FileNameInformation,
}

impl FileAllInformation {
    /// Byte offset of the FileNameLength field within the encoding. A
    /// truncated response patches the length at this offset to the number of
    /// name bytes that actually fit.
    pub const NAME_LENGTH_OFFSET: usize = 96;
}

/// FileNetworkOpenInformation (class 34, MS-FSCC 2.4.34), 56 bytes.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileNetworkOpenInformation {
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
}

/// FileAttributeTagInformation (class 35, MS-FSCC 2.4.6).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileAttributeTagInformation {
    pub file_attributes: FileAttributes,
    /// IO_REPARSE_TAG_SYMLINK for symlinks, zero otherwise.
    pub reparse_tag: u32,
}

/// The reparse tag reported for symbolic links (MS-FSCC 2.1.2.1).
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

/// FileCompressionInformation (class 28, MS-FSCC 2.4.9). Always reports an
/// uncompressed file.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileCompressionInformation {
    pub compressed_file_size: u64,
    pub compression_format: u16,
    pub compression_unit: u8,
    pub chunk_shift: u8,
    pub cluster_shift: u8,
    #[bw(calc = [0; 3])]
    #[br(temp)]
    _reserved: [u8; 3],
}

/// FileIdInformation (class 59, MS-FSCC 2.4.26): volume serial plus the
/// 16-byte file identifier.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileIdInformation {
    pub volume_serial_number: u64,
    pub file_id: [u8; 16],
}

/// One stream entry for FileStreamInformation (class 22, MS-FSCC 2.4.49).
/// Served inside a [`FileStreamInformation`] chained list.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FileStreamInformationInner {
    #[bw(try_calc = u32::try_from(stream_name.size()))]
    #[br(temp)]
    stream_name_length: u32,
    pub stream_size: u64,
    pub stream_allocation_size: u64,
    #[br(args(stream_name_length as u64))]
    pub stream_name: WideString,
}

pub type FileStreamInformation = ChainedItemList<FileStreamInformationInner, 8>;

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;
    use time::macros::datetime;

    test_binrw! {
        file_network_open_information: FileNetworkOpenInformation {
            creation_time: datetime!(2025-10-17 12:44:04.747034 UTC).into(),
            last_access_time: datetime!(2025-10-17 12:44:04.747034 UTC).into(),
            last_write_time: datetime!(2025-10-17 12:44:04.747034 UTC).into(),
            change_time: datetime!(2025-10-17 12:44:04.747034 UTC).into(),
            allocation_size: 4096,
            end_of_file: 13,
            file_attributes: FileAttributes::new().with_archive(true),
        } => "043fb5b8633fdc01043fb5b8633fdc01043fb5b8633fdc01043fb5b8633fdc0100100000000000000d000000000000002000000000000000"
    }

    test_binrw! {
        file_stream_information: FileStreamInformation::from(vec![
            FileStreamInformationInner {
                stream_size: 13,
                stream_allocation_size: 4096,
                stream_name: "::$DATA".into(),
            },
        ]) => "000000000e000000 0d00000000000000 0010000000000000 3a003a0024004400410054004100"
    }

    #[test]
    fn all_information_name_length_offset() {
        // basic 40 + standard 24 + internal 8 + ea 4 + access 4 + position 8
        // + mode 4 + alignment 4 = 96.
        assert_eq!(FileAllInformation::NAME_LENGTH_OFFSET, 96);
    }

    #[test]
    fn class_codes_round_trip() {
        for class in [
            QueryFileInfoClass::Basic,
            QueryFileInfoClass::Standard,
            QueryFileInfoClass::All,
            QueryFileInfoClass::Id,
        ] {
            assert_eq!(QueryFileInfoClass::from_u8(class as u8), Some(class));
        }
        assert_eq!(QueryFileInfoClass::from_u8(200), None);
    }
}
