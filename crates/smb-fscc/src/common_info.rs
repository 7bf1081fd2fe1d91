//! Information structures shared between the query and set paths.
//!
//! MS-FSCC 2.4

use binrw::prelude::*;
use smb_dtyp::binrw_util::prelude::*;

use crate::FileAttributes;

/// FileBasicInformation (class 4, MS-FSCC 2.4.7): four timestamps plus
/// attributes, 40 bytes.
///
/// On the set path, each FILETIME may carry a sentinel: 0 and the two
/// top values (-1, -2) mean "do not change"; the server additionally
/// interprets -1 as "freeze" and -2 as "thaw".
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct FileBasicInformation {
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub file_attributes: FileAttributes,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
}

impl FileBasicInformation {
    pub const SIZE: usize = 40;
}

/// FileStandardInformation (class 5, MS-FSCC 2.4.47), 24 bytes.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileStandardInformation {
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub number_of_links: u32,
    pub delete_pending: Boolean,
    pub directory: Boolean,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}

impl FileStandardInformation {
    pub const SIZE: usize = 24;
}

/// FilePositionInformation (class 14, MS-FSCC 2.4.40).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FilePositionInformation {
    pub current_byte_offset: u64,
}

/// FileNameInformation (MS-FSCC 2.4.32): length-prefixed UTF-16 path.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileNameInformation {
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

impl From<&str> for FileNameInformation {
    fn from(value: &str) -> Self {
        Self { file_name: value.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;
    use time::macros::datetime;

    test_binrw! {
        file_basic_information: FileBasicInformation {
            creation_time: datetime!(2025-04-11 17:24:47.489599300 UTC).into(),
            last_access_time: FileTime::ZERO,
            last_write_time: datetime!(2025-04-11 17:24:47.489599300 UTC).into(),
            change_time: datetime!(2025-04-11 17:24:47.489599300 UTC).into(),
            file_attributes: FileAttributes::new().with_archive(true),
        } => "790eb19f06abdb010000000000000000790eb19f06abdb01790eb19f06abdb012000000000000000"
    }

    test_binrw! {
        file_standard_information: FileStandardInformation {
            allocation_size: 4096,
            end_of_file: 13,
            number_of_links: 1,
            delete_pending: true.into(),
            directory: false.into(),
        } => "00100000000000000d000000000000000100000001000000"
    }

    test_binrw! {
        file_name_information: FileNameInformation::from("\\a\\b.txt") => "100000005c0061005c0062002e00740078007400"
    }
}
