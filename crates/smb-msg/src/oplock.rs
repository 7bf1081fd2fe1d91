//! Oplock and lease break messages (MS-SMB2 2.2.23 – 2.2.25).

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use crate::create::FileId;

/// Oplock levels (MS-SMB2 2.2.13).
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[repr(u8)]
pub enum OplockLevel {
    #[default]
    None = 0x00,
    II = 0x01,
    Exclusive = 0x08,
    Batch = 0x09,
    /// A lease is requested through the RqLs create context instead.
    Lease = 0xFF,
}

impl OplockLevel {
    pub fn from_u8(value: u8) -> Option<OplockLevel> {
        Some(match value {
            0x00 => OplockLevel::None,
            0x01 => OplockLevel::II,
            0x08 => OplockLevel::Exclusive,
            0x09 => OplockLevel::Batch,
            0xFF => OplockLevel::Lease,
            _ => return None,
        })
    }
}

/// Lease state bits (MS-SMB2 2.2.13.2.8).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct LeaseState {
    pub read_caching: bool,
    pub handle_caching: bool,
    pub write_caching: bool,
    #[skip]
    __: B29,
}

/// Oplock break notification, acknowledgment and response share one 24-byte
/// layout (MS-SMB2 2.2.23.1, 2.2.24.1, 2.2.25.1).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct OplockBreakMsg {
    #[bw(calc = 24)]
    #[br(temp)]
    #[br(assert(_structure_size == 24))]
    _structure_size: u16,
    /// The oplock level being notified, acknowledged, or granted.
    pub oplock_level: u8,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u8,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved2: u32,
    pub file_id: FileId,
}

pub type OplockBreakNotify = OplockBreakMsg;
pub type OplockBreakAck = OplockBreakMsg;
pub type OplockBreakResponse = OplockBreakMsg;

/// Lease break notification (MS-SMB2 2.2.23.2); 44 bytes.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct LeaseBreakNotify {
    #[bw(calc = 44)]
    #[br(temp)]
    #[br(assert(_structure_size == 44))]
    _structure_size: u16,
    /// Lease epoch after the break (3.x only).
    pub new_epoch: u16,
    /// Nonzero when a break acknowledgment is required.
    pub ack_required: u32,
    pub lease_key: u128,
    pub current_lease_state: LeaseState,
    pub new_lease_state: LeaseState,
    #[bw(calc = 0)]
    #[br(temp)]
    _break_reason: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _access_mask_hint: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _share_mask_hint: u32,
}

/// Lease break acknowledgment and response share one 36-byte layout
/// (MS-SMB2 2.2.24.2, 2.2.25.2).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct LeaseBreakAckResponse {
    #[bw(calc = 36)]
    #[br(temp)]
    #[br(assert(_structure_size == 36))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _flags: u32,
    pub lease_key: u128,
    pub lease_state: LeaseState,
    #[bw(calc = 0)]
    #[br(temp)]
    _lease_duration: u64,
}

pub type LeaseBreakAck = LeaseBreakAckResponse;
pub type LeaseBreakResponse = LeaseBreakAckResponse;

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;

    test_binrw! {
        lease_break_ack: LeaseBreakAck {
            lease_key: u128::from_le_bytes([
                0x9e, 0x61, 0xc8, 0x70, 0x5d, 0x16, 0x5e, 0x31, 0xd4, 0x92, 0xa0, 0x1b, 0x0c,
                0xbb, 0x3a, 0xf2,
            ]),
            lease_state: LeaseState::new(),
        } => "24000000000000009e61c8705d165e31d492a01b0cbb3af2000000000000000000000000"
    }

    test_binrw! {
        oplock_break_notify: OplockBreakMsg {
            oplock_level: OplockLevel::II as u8,
            file_id: FileId { persistent: 0x11, volatile: 0x22 },
        } => "180001000000000011000000000000002200000000000000"
    }
}
