//! SESSION_SETUP and LOGOFF (MS-SMB2 2.2.5 – 2.2.8).

use std::io::SeekFrom;

use binrw::prelude::*;
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;

/// SESSION_SETUP request. The security buffer carries either an SPNEGO
/// token or a raw NTLMSSP message; the authenticator distinguishes them by
/// the leading tag byte.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct SessionSetupRequest {
    #[bw(calc = 25)]
    #[br(temp)]
    #[br(assert(_structure_size == 25))]
    _structure_size: u16,
    pub flags: SetupRequestFlags,
    pub security_mode: SessionSecurityMode,
    pub capabilities: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _channel: u32,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    security_buffer_offset: PosMarker<u16>,
    #[bw(try_calc = buffer.len().try_into())]
    #[br(temp)]
    security_buffer_length: u16,
    pub previous_session_id: u64,
    #[br(seek_before = SeekFrom::Start(security_buffer_offset.value as u64))]
    #[br(count = security_buffer_length)]
    #[bw(write_with = PosMarker::write_aoff, args(&security_buffer_offset))]
    pub buffer: Vec<u8>,
}

/// Client signing posture (MS-SMB2 2.2.5).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct SessionSecurityMode {
    pub signing_enabled: bool,
    pub signing_required: bool,
    #[skip]
    __: B6,
}

/// Request flags; only session binding is defined (MS-SMB2 2.2.5).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct SetupRequestFlags {
    pub binding: bool,
    #[skip]
    __: B7,
}

/// SESSION_SETUP response. Carries the next SPNEGO token while the
/// handshake is in flight (`MORE_PROCESSING_REQUIRED`).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct SessionSetupResponse {
    #[bw(calc = 9)]
    #[br(temp)]
    #[br(assert(_structure_size == 9))]
    _structure_size: u16,
    pub session_flags: SessionFlags,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    security_buffer_offset: PosMarker<u16>,
    #[bw(try_calc = buffer.len().try_into())]
    #[br(temp)]
    security_buffer_length: u16,
    #[br(seek_before = SeekFrom::Start(security_buffer_offset.value as u64))]
    #[br(count = security_buffer_length)]
    #[bw(write_with = PosMarker::write_aoff, args(&security_buffer_offset))]
    pub buffer: Vec<u8>,
}

/// Session flags (MS-SMB2 2.2.6).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct SessionFlags {
    /// Authenticated as guest.
    pub is_guest: bool,
    /// Authenticated as the anonymous (null) user.
    pub is_null_session: bool,
    /// Server requires encryption on this session (3.x).
    pub encrypt_data: bool,
    #[skip]
    __: B13,
}

/// LOGOFF request (MS-SMB2 2.2.7).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct LogoffRequest {
    #[bw(calc = 4)]
    #[br(temp)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}

/// LOGOFF response (MS-SMB2 2.2.8).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct LogoffResponse {
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

    test_binrw_write! {
        logoff_request: LogoffRequest::default() => "04000000"
    }

    #[test]
    fn response_buffer_offset_accounts_for_header() {
        use binrw::prelude::*;
        use std::io::Cursor;

        // Serialize at position 64, as the dispatcher does after the header.
        let resp = SessionSetupResponse {
            session_flags: SessionFlags::new().with_is_guest(true),
            buffer: vec![0xa1, 0x07],
        };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        resp.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        // Structure size 9, flags 1, offset 72, length 2.
        assert_eq!(&bytes[64..72], &[9, 0, 1, 0, 72, 0, 2, 0]);
        assert_eq!(&bytes[72..], &[0xa1, 0x07]);
    }
}
