//! File information classes accepted by SET_INFO.
//!
//! MS-FSCC 2.4

use binrw::prelude::*;
use smb_dtyp::binrw_util::prelude::*;

/// File information class codes accepted on the SET_INFO file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetFileInfoClass {
    Basic = 4,
    Rename = 10,
    Link = 11,
    Disposition = 13,
    Position = 14,
    FullEa = 15,
    Mode = 16,
    Allocation = 19,
    EndOfFile = 20,
    DispositionEx = 64,
}

impl SetFileInfoClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            4 => Self::Basic,
            10 => Self::Rename,
            11 => Self::Link,
            13 => Self::Disposition,
            14 => Self::Position,
            15 => Self::FullEa,
            16 => Self::Mode,
            19 => Self::Allocation,
            20 => Self::EndOfFile,
            64 => Self::DispositionEx,
            _ => return None,
        })
    }
}

/// FileRenameInformation for SMB2 (MS-FSCC 2.4.42.2).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FileRenameInformation {
    pub replace_if_exists: Boolean,
    #[bw(calc = [0; 7])]
    #[br(temp)]
    _reserved: [u8; 7],
    /// A handle to the destination parent directory; zero means the new name
    /// is a full share-relative path.
    pub root_directory: u64,
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

/// FileDispositionInformation (MS-FSCC 2.4.11).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FileDispositionInformation {
    pub delete_pending: Boolean,
}

/// FileDispositionInformationEx (MS-FSCC 2.4.12): flag word form of the
/// disposition; only the DELETE bit is honored.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FileDispositionInformationEx {
    pub flags: u32,
}

impl FileDispositionInformationEx {
    pub const FLAG_DELETE: u32 = 0x0000_0001;
}

/// FileEndOfFileInformation (MS-FSCC 2.4.14).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FileEndOfFileInformation {
    pub end_of_file: u64,
}

/// FileAllocationInformation (MS-FSCC 2.4.4). Accepted and ignored; the
/// gateway does not preallocate.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FileAllocationInformation {
    pub allocation_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;

    test_binrw_write! {
        file_rename_information: FileRenameInformation {
            replace_if_exists: false.into(),
            root_directory: 0,
            file_name: "b.txt".into(),
        } => "000000000000000000000000000000000a00000062002e00740078007400"
    }

    test_binrw_read! {
        file_rename_information_read: FileRenameInformation {
            replace_if_exists: false.into(),
            root_directory: 0,
            file_name: "b.txt".into(),
        } => "0002750062006c0000000000000000000a00000062002e00740078007400"
    }

    test_binrw! {
        file_end_of_file_information: FileEndOfFileInformation { end_of_file: 777 } => "0903000000000000"
    }

    test_binrw! {
        file_disposition_information: FileDispositionInformation { delete_pending: true.into() } => "01"
    }
}
