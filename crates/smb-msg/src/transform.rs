//! The SMB2 TRANSFORM_HEADER carrying encrypted 3.x messages
//! (MS-SMB2 2.2.41).

use binrw::prelude::*;

/// 52-byte transform header. The signature is the AEAD tag; the bytes from
/// the nonce to the end of the header are the associated data.
#[binrw::binrw]
#[brw(little, magic(b"\xfdSMB"))]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TransformHeader {
    pub signature: [u8; 16],
    pub nonce: [u8; 16],
    pub original_message_size: u32,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
    /// 1 = encrypted (the only defined value; in 3.1.1 terms, "flags").
    pub flags: u16,
    pub session_id: u64,
}

impl TransformHeader {
    pub const STRUCT_SIZE: usize = 52;
    pub const ENCRYPTED: u16 = 0x0001;

    /// The associated data authenticated alongside the payload: the header
    /// from the nonce field onward.
    pub fn aead_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..16].copy_from_slice(&self.nonce);
        out[16..20].copy_from_slice(&self.original_message_size.to_le_bytes());
        // reserved
        out[22..24].copy_from_slice(&self.flags.to_le_bytes());
        out[24..32].copy_from_slice(&self.session_id.to_le_bytes());
        out
    }
}

/// A full encrypted message: transform header plus ciphertext.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EncryptedMessage {
    pub header: TransformHeader,
    #[br(parse_with = binrw::helpers::until_eof)]
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_is_fifty_two_bytes() {
        let header = TransformHeader {
            signature: [0xaa; 16],
            nonce: [0xbb; 16],
            original_message_size: 0x70,
            flags: TransformHeader::ENCRYPTED,
            session_id: 0x1122334455667788,
        };
        let mut cursor = Cursor::new(Vec::new());
        header.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(bytes.len(), TransformHeader::STRUCT_SIZE);
        assert_eq!(&bytes[0..4], b"\xfdSMB");
        // AAD covers bytes 20..52.
        assert_eq!(&header.aead_bytes()[..], &bytes[20..52]);
    }
}
