//! NEGOTIATE request and response (MS-SMB2 2.2.3, 2.2.4).

use std::io::SeekFrom;

use binrw::io::TakeSeekExt;
use binrw::prelude::*;
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;
use smb_dtyp::guid::Guid;

/// SMB2/SMB3 dialect revisions supported by the server.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone)]
#[repr(u16)]
pub enum Dialect {
    Smb0202 = 0x0202,
    Smb021 = 0x0210,
    Smb030 = 0x0300,
    Smb0302 = 0x0302,
    Smb0311 = 0x0311,
}

/// The 2.xx wildcard revision a multi-protocol-capable client may offer and
/// the server echoes when no dialect above 2.0.2 was selected.
pub const DIALECT_SMB2_WILDCARD: u16 = 0x02FF;

impl Dialect {
    pub const MIN: Dialect = Dialect::Smb0202;
    pub const MAX: Dialect = Dialect::Smb0311;
    pub const ALL: [Dialect; 5] = [
        Dialect::Smb0202,
        Dialect::Smb021,
        Dialect::Smb030,
        Dialect::Smb0302,
        Dialect::Smb0311,
    ];

    pub fn from_u16(value: u16) -> Option<Dialect> {
        Some(match value {
            0x0202 => Dialect::Smb0202,
            0x0210 => Dialect::Smb021,
            0x0300 => Dialect::Smb030,
            0x0302 => Dialect::Smb0302,
            0x0311 => Dialect::Smb0311,
            _ => return None,
        })
    }

    /// Whether this is an SMB3 dialect.
    #[inline]
    pub fn is_smb3(&self) -> bool {
        self >= &Dialect::Smb030
    }
}

/// Signing negotiation flags (MS-SMB2 2.2.3).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct NegotiateSecurityMode {
    pub signing_enabled: bool,
    pub signing_required: bool,
    #[skip]
    __: B14,
}

/// Global capability flags (MS-SMB2 2.2.3).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct GlobalCapabilities {
    pub dfs: bool,
    pub leasing: bool,
    pub large_mtu: bool,
    pub multi_channel: bool,

    pub persistent_handles: bool,
    pub directory_leasing: bool,
    pub encryption: bool,
    pub notifications: bool,

    #[skip]
    __: B24,
}

/// NEGOTIATE request. Dialects are kept as raw codes: the list may contain
/// the wildcard revision or dialects this server does not implement.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct NegotiateRequest {
    #[bw(calc = 36)]
    #[br(temp)]
    #[br(assert(_structure_size == 36))]
    _structure_size: u16,
    #[bw(try_calc = dialects.len().try_into())]
    #[br(temp)]
    dialect_count: u16,
    pub security_mode: NegotiateSecurityMode,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
    pub capabilities: GlobalCapabilities,
    pub client_guid: Guid,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    negotiate_context_offset: PosMarker<u32>,
    #[bw(try_calc = negotiate_contexts.len().try_into())]
    #[br(temp)]
    negotiate_context_count: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved2: u16,
    #[br(count = dialect_count)]
    pub dialects: Vec<u16>,
    /// Negotiate contexts, present only when 3.1.1 is offered.
    #[br(if(dialects.contains(&(Dialect::Smb0311 as u16))))]
    #[br(seek_before = SeekFrom::Start(negotiate_context_offset.value as u64))]
    #[br(count = negotiate_context_count)]
    #[bw(if(!negotiate_contexts.is_empty()))]
    #[brw(align_before = 8)]
    #[bw(write_with = PosMarker::write_aoff, args(&negotiate_context_offset))]
    pub negotiate_contexts: Vec<NegotiateContext>,
}

impl NegotiateRequest {
    /// First context of the given type, if present.
    pub fn find_context(&self, context_type: u16) -> Option<&NegotiateContextValue> {
        self.negotiate_contexts
            .iter()
            .find(|c| c.data.context_type() == context_type)
            .map(|c| &c.data)
    }
}

/// NEGOTIATE response; 65-byte fixed body.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct NegotiateResponse {
    #[bw(calc = 65)]
    #[br(temp)]
    #[br(assert(_structure_size == 65))]
    _structure_size: u16,
    pub security_mode: NegotiateSecurityMode,
    /// Selected dialect, or the 2.xx wildcard.
    pub dialect_revision: u16,
    #[bw(try_calc = negotiate_contexts.len().try_into())]
    #[br(temp)]
    negotiate_context_count: u16,
    pub server_guid: Guid,
    pub capabilities: GlobalCapabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: FileTime,
    pub server_start_time: FileTime,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    security_buffer_offset: PosMarker<u16>,
    #[bw(try_calc = security_buffer.len().try_into())]
    #[br(temp)]
    security_buffer_length: u16,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    negotiate_context_offset: PosMarker<u32>,
    /// GSS-API hint token; may be empty.
    #[br(seek_before = SeekFrom::Start(security_buffer_offset.value as u64))]
    #[br(count = security_buffer_length)]
    #[bw(write_with = PosMarker::write_aoff, args(&security_buffer_offset))]
    pub security_buffer: Vec<u8>,
    /// Negotiate contexts (3.1.1 only).
    #[br(if(dialect_revision == Dialect::Smb0311 as u16))]
    #[br(seek_before = SeekFrom::Start(negotiate_context_offset.value as u64))]
    #[br(count = negotiate_context_count)]
    #[bw(if(!negotiate_contexts.is_empty()))]
    #[brw(align_before = 8)]
    #[bw(write_with = PosMarker::write_aoff, args(&negotiate_context_offset))]
    pub negotiate_contexts: Vec<NegotiateContext>,
}

/// Negotiate context type codes (MS-SMB2 2.2.3.1).
pub const CTX_PREAUTH_INTEGRITY_CAPABILITIES: u16 = 0x0001;
pub const CTX_ENCRYPTION_CAPABILITIES: u16 = 0x0002;
pub const CTX_NETNAME_NEGOTIATE_CONTEXT_ID: u16 = 0x0005;
pub const CTX_SIGNING_CAPABILITIES: u16 = 0x0008;

/// Preauth-integrity hash algorithm: SHA-512 is the only defined value.
pub const HASH_ALGORITHM_SHA512: u16 = 0x0001;

/// Encryption cipher identifiers (MS-SMB2 2.2.3.1.2).
pub const CIPHER_AES_128_CCM: u16 = 0x0001;
pub const CIPHER_AES_128_GCM: u16 = 0x0002;
pub const CIPHER_AES_256_CCM: u16 = 0x0003;
pub const CIPHER_AES_256_GCM: u16 = 0x0004;

/// Signing algorithm identifiers (MS-SMB2 2.2.3.1.7).
pub const SIGNING_HMAC_SHA256: u16 = 0x0000;
pub const SIGNING_AES_CMAC: u16 = 0x0001;
pub const SIGNING_AES_GMAC: u16 = 0x0002;

/// A single negotiate context: an 8-aligned type/length header and a typed
/// payload.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct NegotiateContext {
    #[brw(align_before = 8)]
    #[bw(calc = data.context_type())]
    #[br(temp)]
    context_type: u16,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    data_length: PosMarker<u16>,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
    #[br(args(context_type))]
    #[br(map_stream = |s| s.take_seek(data_length.value as u64))]
    #[bw(write_with = PosMarker::write_size, args(&data_length))]
    pub data: NegotiateContextValue,
}

/// Context payloads. Unrecognized context types are preserved as raw bytes
/// and ignored by the server.
#[binrw::binrw]
#[brw(little)]
#[br(import(context_type: u16))]
#[derive(Debug, PartialEq, Eq)]
pub enum NegotiateContextValue {
    #[br(pre_assert(context_type == CTX_PREAUTH_INTEGRITY_CAPABILITIES))]
    PreauthIntegrity(PreauthIntegrityCapabilities),
    #[br(pre_assert(context_type == CTX_ENCRYPTION_CAPABILITIES))]
    Encryption(EncryptionCapabilities),
    #[br(pre_assert(context_type == CTX_SIGNING_CAPABILITIES))]
    Signing(SigningCapabilities),
    #[br(pre_assert(context_type == CTX_NETNAME_NEGOTIATE_CONTEXT_ID))]
    Netname(NetnameContext),
    /// A context type this server does not interpret; the payload is kept
    /// verbatim. Never produced on the write path.
    Unknown(#[br(parse_with = binrw::helpers::until_eof)] Vec<u8>),
}

impl NegotiateContextValue {
    pub fn context_type(&self) -> u16 {
        match self {
            Self::PreauthIntegrity(_) => CTX_PREAUTH_INTEGRITY_CAPABILITIES,
            Self::Encryption(_) => CTX_ENCRYPTION_CAPABILITIES,
            Self::Signing(_) => CTX_SIGNING_CAPABILITIES,
            Self::Netname(_) => CTX_NETNAME_NEGOTIATE_CONTEXT_ID,
            Self::Unknown(_) => 0xffff,
        }
    }
}

impl From<NegotiateContextValue> for NegotiateContext {
    fn from(data: NegotiateContextValue) -> Self {
        NegotiateContext { data }
    }
}

/// Preauth integrity: hash algorithm list and salt (MS-SMB2 2.2.3.1.1).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct PreauthIntegrityCapabilities {
    #[bw(try_calc = hash_algorithms.len().try_into())]
    #[br(temp)]
    hash_algorithm_count: u16,
    #[bw(try_calc = salt.len().try_into())]
    #[br(temp)]
    salt_length: u16,
    #[br(count = hash_algorithm_count)]
    pub hash_algorithms: Vec<u16>,
    #[br(count = salt_length)]
    pub salt: Vec<u8>,
}

/// Cipher list in preference order (MS-SMB2 2.2.3.1.2).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct EncryptionCapabilities {
    #[bw(try_calc = ciphers.len().try_into())]
    #[br(temp)]
    cipher_count: u16,
    #[br(count = cipher_count)]
    pub ciphers: Vec<u16>,
}

/// Signing algorithm list in preference order (MS-SMB2 2.2.3.1.7).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct SigningCapabilities {
    #[bw(try_calc = signing_algorithms.len().try_into())]
    #[br(temp)]
    signing_algorithm_count: u16,
    #[br(count = signing_algorithm_count)]
    pub signing_algorithms: Vec<u16>,
}

/// The server name the client intends to reach (MS-SMB2 2.2.3.1.4).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct NetnameContext {
    #[br(parse_with = binrw::helpers::until_eof)]
    raw: Vec<u8>,
}

impl NetnameContext {
    /// Decodes the UTF-16LE netname.
    pub fn name(&self) -> String {
        let units: Vec<u16> = self
            .raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::prelude::*;
    use smb_tests::*;
    use std::io::Cursor;

    #[test]
    fn parses_simple_21_request() {
        // Offered dialects: 2.0.2 and 2.1; no contexts.
        let bytes = hex_to_bytes(
            "24000200010000000000000021866025f95bcb11871405ede933cd76000000000000000002021002",
        );
        // The body begins at a simulated header boundary so absolute offsets
        // resolve; a plain cursor at 0 works for context-free requests.
        let req = NegotiateRequest::read_le(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(req.dialects, vec![0x0202, 0x0210]);
        assert!(req.security_mode.signing_enabled());
        assert!(req.negotiate_contexts.is_empty());
    }

    #[test]
    fn context_list_round_trips() {
        let contexts = vec![
            NegotiateContextValue::PreauthIntegrity(PreauthIntegrityCapabilities {
                hash_algorithms: vec![HASH_ALGORITHM_SHA512],
                salt: vec![0xab; 32],
            })
            .into(),
            NegotiateContextValue::Encryption(EncryptionCapabilities {
                ciphers: vec![CIPHER_AES_128_GCM, CIPHER_AES_128_CCM],
            })
            .into(),
            NegotiateContextValue::Signing(SigningCapabilities {
                signing_algorithms: vec![SIGNING_AES_CMAC],
            })
            .into(),
        ];
        let mut cursor = Cursor::new(Vec::new());
        contexts.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();

        let mut cursor = Cursor::new(bytes);
        let read = Vec::<NegotiateContext>::read_le_args(
            &mut cursor,
            binrw::VecArgs::builder().count(3).finalize(),
        )
        .unwrap();
        assert_eq!(read, contexts);
    }

    #[test]
    fn unknown_context_is_preserved() {
        // Type 0x77 with 4 bytes of payload.
        let bytes = hex_to_bytes("770000040000000001020304");
        let ctx = NegotiateContext::read_le(&mut Cursor::new(bytes)).unwrap();
        match &ctx.data {
            NegotiateContextValue::Unknown(data) => assert_eq!(data, &vec![1, 2, 3, 4]),
            other => panic!("expected unknown context, got {other:?}"),
        }
    }
}
