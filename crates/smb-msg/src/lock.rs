//! Byte-range LOCK request and response (MS-SMB2 2.2.26, 2.2.27).

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use crate::create::FileId;

/// LOCK request: one or more ranges to lock or unlock within a single file.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct LockRequest {
    #[bw(calc = 48)]
    #[br(temp)]
    #[br(assert(_structure_size == 48))]
    _structure_size: u16,
    #[bw(try_calc = locks.len().try_into())]
    #[br(temp)]
    #[br(assert(lock_count >= 1))]
    lock_count: u16,
    /// Lock sequence number/index; unused by this server.
    pub lock_sequence: u32,
    pub file_id: FileId,
    #[br(count = lock_count)]
    pub locks: Vec<LockElement>,
}

/// A single range (MS-SMB2 2.2.26.1).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct LockElement {
    pub offset: u64,
    pub length: u64,
    pub flags: LockFlags,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
}

/// How the range is locked or unlocked.
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct LockFlags {
    pub shared: bool,
    pub exclusive: bool,
    pub unlock: bool,
    pub fail_immediately: bool,
    #[skip]
    __: B28,
}

/// LOCK response (MS-SMB2 2.2.27).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct LockResponse {
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
        exclusive_then_unlock: LockRequest {
            lock_sequence: 0,
            file_id: FileId { persistent: 1, volatile: 2 },
            locks: vec![LockElement {
                offset: 0x100,
                length: 0x10,
                flags: LockFlags::new().with_exclusive(true).with_fail_immediately(true),
            }],
        } => "300001000000000001000000000000000200000000000000 0001000000000000 1000000000000000 0a000000 00000000"
    }
}
