//! File system information classes (MS-FSCC 2.5).

use binrw::prelude::*;
use modular_bitfield::prelude::*;
use smb_dtyp::binrw_util::prelude::*;
use smb_dtyp::guid::Guid;

/// Filesystem information class codes accepted on QUERY_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryFsInfoClass {
    Volume = 1,
    Label = 2,
    Size = 3,
    Device = 4,
    Attribute = 5,
    FullSize = 7,
    ObjectId = 8,
    SectorSize = 11,
}

impl QueryFsInfoClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Volume,
            2 => Self::Label,
            3 => Self::Size,
            4 => Self::Device,
            5 => Self::Attribute,
            7 => Self::FullSize,
            8 => Self::ObjectId,
            11 => Self::SectorSize,
            _ => return None,
        })
    }

    pub fn fixed_size(&self) -> usize {
        match self {
            Self::Volume => 18,
            Self::Label => 4,
            Self::Size => 24,
            Self::Device => 8,
            Self::Attribute => 12,
            Self::FullSize => 32,
            Self::ObjectId => 64,
            Self::SectorSize => 28,
        }
    }
}

/// FileFsVolumeInformation (MS-FSCC 2.5.9).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileFsVolumeInformation {
    pub volume_creation_time: FileTime,
    pub volume_serial_number: u32,
    #[bw(try_calc = u32::try_from(volume_label.size()))]
    #[br(temp)]
    volume_label_length: u32,
    pub supports_objects: Boolean,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u8,
    #[br(args(volume_label_length as u64))]
    pub volume_label: WideString,
}

/// FileFsLabelInformation (MS-FSCC 2.5.5).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileFsLabelInformation {
    #[bw(try_calc = u32::try_from(volume_label.size()))]
    #[br(temp)]
    volume_label_length: u32,
    #[br(args(volume_label_length as u64))]
    pub volume_label: WideString,
}

/// FileFsSizeInformation (MS-FSCC 2.5.8).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileFsSizeInformation {
    pub total_allocation_units: u64,
    pub available_allocation_units: u64,
    pub sectors_per_allocation_unit: u32,
    pub bytes_per_sector: u32,
}

/// FileFsFullSizeInformation (MS-FSCC 2.5.4).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileFsFullSizeInformation {
    pub total_allocation_units: u64,
    pub caller_available_allocation_units: u64,
    pub actual_available_allocation_units: u64,
    pub sectors_per_allocation_unit: u32,
    pub bytes_per_sector: u32,
}

/// FileFsDeviceInformation (MS-FSCC 2.5.10).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FileFsDeviceInformation {
    /// FILE_DEVICE_DISK.
    pub device_type: u32,
    pub characteristics: u32,
}

pub const FILE_DEVICE_DISK: u32 = 0x0000_0007;
/// FILE_DEVICE_IS_MOUNTED.
pub const FILE_DEVICE_IS_MOUNTED: u32 = 0x0000_0020;

/// FileFsAttributeInformation (MS-FSCC 2.5.1).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileFsAttributeInformation {
    pub attributes: FileSystemAttributes,
    pub maximum_component_name_length: u32,
    #[bw(try_calc = u32::try_from(file_system_name.size()))]
    #[br(temp)]
    file_system_name_length: u32,
    #[br(args(file_system_name_length as u64))]
    pub file_system_name: WideString,
}

/// Filesystem attribute flags for [`FileFsAttributeInformation`].
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct FileSystemAttributes {
    pub case_sensitive_search: bool,
    pub case_preserved_names: bool,
    pub unicode_on_disk: bool,
    pub persistent_acls: bool,

    pub file_compression: bool,
    pub volume_quotas: bool,
    pub supports_sparse_files: bool,
    pub supports_reparse_points: bool,

    pub supports_remote_storage: bool,
    #[skip]
    __: B6,
    pub volume_is_compressed: bool,

    pub supports_object_ids: bool,
    pub supports_encryption: bool,
    pub named_streams: bool,
    pub read_only_volume: bool,

    pub sequential_write_once: bool,
    pub supports_transactions: bool,
    pub supports_hard_links: bool,
    pub supports_extended_attributes: bool,

    pub supports_open_by_file_id: bool,
    pub supports_usn_journal: bool,
    #[skip]
    __: B6,
}

/// FileFsObjectIdInformation (MS-FSCC 2.5.6).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct FileFsObjectIdInformation {
    pub object_id: Guid,
    pub extended_info: [u8; 48],
}

impl Default for FileFsObjectIdInformation {
    fn default() -> Self {
        Self {
            object_id: Guid::default(),
            extended_info: [0; 48],
        }
    }
}

/// FileFsSectorSizeInformation (MS-FSCC 2.5.7).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct FileFsSectorSizeInformation {
    pub logical_bytes_per_sector: u32,
    pub physical_bytes_per_sector: u32,
    pub physical_bytes_per_sector_for_performance: u32,
    pub effective_physical_bytes_per_sector_for_atomicity: u32,
    pub flags: u32,
    pub byte_offset_for_sector_alignment: u32,
    pub byte_offset_for_partition_alignment: u32,
}

/// SSINFO_FLAGS_ALIGNED_DEVICE | SSINFO_FLAGS_PARTITION_ALIGNED_ON_DEVICE.
pub const SSINFO_FLAGS_ALIGNED: u32 = 0x0000_0003;

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;
    use time::macros::datetime;

    test_binrw! {
        file_fs_volume_information: FileFsVolumeInformation {
            volume_creation_time: datetime!(2025-10-13 12:35:04.593237 UTC).into(),
            volume_serial_number: 0x529d2cf4,
            supports_objects: false.into(),
            volume_label: "MyShare".into(),
        } => "525119cd3d3cdc01f42c9d520e00000000004d00790053006800610072006500"
    }

    test_binrw! {
        file_fs_attribute_information: FileFsAttributeInformation {
            attributes: FileSystemAttributes::new()
                .with_case_sensitive_search(true)
                .with_case_preserved_names(true)
                .with_unicode_on_disk(true)
                .with_persistent_acls(true)
                .with_volume_quotas(true)
                .with_supports_sparse_files(true)
                .with_supports_object_ids(true)
                .with_named_streams(true),
            maximum_component_name_length: 255,
            file_system_name: "NTFS".into(),
        } => "6f000500ff000000080000004e00540046005300"
    }

    test_binrw! {
        file_fs_size_information: FileFsSizeInformation {
            total_allocation_units: 61202244,
            available_allocation_units: 45713576,
            sectors_per_allocation_unit: 2,
            bytes_per_sector: 512,
        } => "44dfa50300000000a888b902000000000200000000020000"
    }
}
