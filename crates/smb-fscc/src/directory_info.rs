//! Directory enumeration information classes (MS-FSCC 2.4).
//!
//! Entries are served inside [`ChainedItemList`]s with 8-byte alignment;
//! the next-entry offsets are handled by the list wrapper.

use binrw::prelude::*;
use smb_dtyp::binrw_util::prelude::*;

use crate::{ChainedItemList, FileAttributes};

/// Directory information class codes accepted on QUERY_DIRECTORY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DirectoryInfoClass {
    Directory = 1,
    FullDirectory = 2,
    BothDirectory = 3,
    Names = 12,
    IdBothDirectory = 37,
    IdFullDirectory = 38,
}

impl DirectoryInfoClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Directory,
            2 => Self::FullDirectory,
            3 => Self::BothDirectory,
            12 => Self::Names,
            37 => Self::IdBothDirectory,
            38 => Self::IdFullDirectory,
            _ => return None,
        })
    }
}

/// FileDirectoryInformation (class 1, MS-FSCC 2.4.10).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileDirectoryInformation {
    pub file_index: u32,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub file_attributes: FileAttributes,
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

/// FileFullDirectoryInformation (class 2, MS-FSCC 2.4.17).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileFullDirectoryInformation {
    pub file_index: u32,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub file_attributes: FileAttributes,
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    pub ea_size: u32,
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

/// FileBothDirectoryInformation (class 3, MS-FSCC 2.4.8).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileBothDirectoryInformation {
    pub file_index: u32,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub file_attributes: FileAttributes,
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    pub ea_size: u32,
    pub short_name_length: u8,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u8,
    pub short_name: [u8; 24],
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

/// FileIdBothDirectoryInformation (class 37, MS-FSCC 2.4.25).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileIdBothDirectoryInformation {
    pub file_index: u32,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub file_attributes: FileAttributes,
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    pub ea_size: u32,
    pub short_name_length: u8,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u8,
    pub short_name: [u8; 24],
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved2: u16,
    pub file_id: u64,
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

/// FileIdFullDirectoryInformation (class 38, MS-FSCC 2.4.24).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileIdFullDirectoryInformation {
    pub file_index: u32,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub file_attributes: FileAttributes,
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    pub ea_size: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
    pub file_id: u64,
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

/// FileNamesInformation (class 12, MS-FSCC 2.4.33).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileNamesInformation {
    pub file_index: u32,
    #[bw(try_calc = u32::try_from(file_name.size()))]
    #[br(temp)]
    file_name_length: u32,
    #[br(args(file_name_length as u64))]
    pub file_name: WideString,
}

pub type FileDirectoryInformationList = ChainedItemList<FileDirectoryInformation, 8>;
pub type FileFullDirectoryInformationList = ChainedItemList<FileFullDirectoryInformation, 8>;
pub type FileBothDirectoryInformationList = ChainedItemList<FileBothDirectoryInformation, 8>;
pub type FileIdBothDirectoryInformationList = ChainedItemList<FileIdBothDirectoryInformation, 8>;
pub type FileIdFullDirectoryInformationList = ChainedItemList<FileIdFullDirectoryInformation, 8>;
pub type FileNamesInformationList = ChainedItemList<FileNamesInformation, 8>;

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::prelude::*;
    use std::io::Cursor;

    #[test]
    fn id_both_directory_entry_round_trips_in_list() {
        let list: FileIdBothDirectoryInformationList = vec![
            FileIdBothDirectoryInformation {
                file_index: 0,
                end_of_file: 5,
                allocation_size: 4096,
                file_attributes: FileAttributes::new().with_archive(true),
                file_id: 42,
                file_name: "a.txt".into(),
                ..Default::default()
            },
            FileIdBothDirectoryInformation {
                file_index: 1,
                file_attributes: FileAttributes::new().with_directory(true),
                file_id: 43,
                file_name: "subdir".into(),
                ..Default::default()
            },
        ]
        .into();

        let mut cursor = Cursor::new(Vec::new());
        list.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        let read = FileIdBothDirectoryInformationList::read_le(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, list);
    }
}
