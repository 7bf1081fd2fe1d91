//! The file/directory access mask (MS-SMB2 2.2.13.1).

use binrw::prelude::*;
use modular_bitfield::prelude::*;

/// Access rights requested on CREATE and reported by maximal-access queries.
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct FileAccessMask {
    pub file_read_data: bool,
    pub file_write_data: bool,
    pub file_append_data: bool,
    pub file_read_ea: bool,

    pub file_write_ea: bool,
    pub file_execute: bool,
    pub file_delete_child: bool,
    pub file_read_attributes: bool,

    pub file_write_attributes: bool,
    #[skip]
    __: B7,

    pub delete: bool,
    pub read_control: bool,
    pub write_dacl: bool,
    pub write_owner: bool,

    pub synchronize: bool,
    #[skip]
    __: B3,

    pub access_system_security: bool,
    pub maximum_allowed: bool,
    #[skip]
    __: B2,

    pub generic_all: bool,
    pub generic_execute: bool,
    pub generic_write: bool,
    pub generic_read: bool,
}

impl FileAccessMask {
    /// Builds the mask from its raw wire value.
    pub fn from_raw(value: u32) -> Self {
        Self::from_bytes(value.to_le_bytes())
    }

    /// The raw wire value of this mask.
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(Self::into_bytes(self))
    }

    /// Whether any write-class right is requested.
    pub fn wants_write(&self) -> bool {
        self.file_write_data()
            || self.file_append_data()
            || self.file_write_ea()
            || self.file_write_attributes()
            || self.delete()
            || self.write_dacl()
            || self.write_owner()
            || self.generic_write()
            || self.generic_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_access_raw_value() {
        let mask = FileAccessMask::new()
            .with_file_read_data(true)
            .with_file_write_data(true)
            .with_file_append_data(true)
            .with_file_read_ea(true)
            .with_file_write_ea(true)
            .with_file_execute(true)
            .with_file_delete_child(true)
            .with_file_read_attributes(true)
            .with_file_write_attributes(true)
            .with_delete(true)
            .with_read_control(true)
            .with_write_dacl(true)
            .with_write_owner(true)
            .with_synchronize(true);
        assert_eq!(mask.to_raw(), 0x001f_01ff);
    }

    #[test]
    fn read_only_raw_value() {
        let mask = FileAccessMask::new()
            .with_file_read_data(true)
            .with_file_read_ea(true)
            .with_file_read_attributes(true)
            .with_read_control(true)
            .with_synchronize(true);
        assert_eq!(mask.to_raw(), 0x0012_0089);
    }
}
