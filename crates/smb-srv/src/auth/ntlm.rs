//! NTLMSSP messages and NTLMv2 validation (MS-NLMP).
//!
//! The three-leg handshake is driven by the SESSION_SETUP handler; this
//! module builds the CHALLENGE, parses NEGOTIATE/AUTHENTICATE, and checks
//! the NTLMv2 response against a stored NT hash, yielding the session base
//! key.

use hmac::{Hmac, Mac};
use md5::Md5;
use rc4::{KeyInit, Rc4, StreamCipher, consts::U16};

use smb_dtyp::binrw_util::prelude::FileTime;

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const MSG_NEGOTIATE: u32 = 1;
const MSG_CHALLENGE: u32 = 2;
const MSG_AUTHENTICATE: u32 = 3;

pub const FLAG_UNICODE: u32 = 0x0000_0001;
pub const FLAG_REQUEST_TARGET: u32 = 0x0000_0004;
pub const FLAG_NTLM: u32 = 0x0000_0200;
pub const FLAG_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const FLAG_TARGET_TYPE_SERVER: u32 = 0x0002_0000;
pub const FLAG_EXTENDED_SECURITY: u32 = 0x0008_0000;
pub const FLAG_TARGET_INFO: u32 = 0x0080_0000;
pub const FLAG_128BIT: u32 = 0x2000_0000;
pub const FLAG_KEY_EXCH: u32 = 0x4000_0000;

/// Malformed NTLM message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed NTLM message")]
pub struct NtlmError;

/// True when the buffer leads with the NTLMSSP signature (as opposed to a
/// GSS/SPNEGO tag byte).
pub fn is_raw_ntlm(buffer: &[u8]) -> bool {
    buffer.len() >= 8 && &buffer[0..8] == SIGNATURE
}

fn message_type(buffer: &[u8]) -> Option<u32> {
    if !is_raw_ntlm(buffer) || buffer.len() < 12 {
        return None;
    }
    Some(u32::from_le_bytes(buffer[8..12].try_into().unwrap()))
}

pub fn is_negotiate(buffer: &[u8]) -> bool {
    message_type(buffer) == Some(MSG_NEGOTIATE)
}

pub fn is_authenticate(buffer: &[u8]) -> bool {
    message_type(buffer) == Some(MSG_AUTHENTICATE)
}

pub fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> =
        data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    String::from_utf16_lossy(&units)
}

fn hmac_md5(key: &[u8], data: &[&[u8]]) -> [u8; 16] {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
    for chunk in data {
        mac.update(chunk);
    }
    mac.finalize().into_bytes().into()
}

/// An (offset, length) payload field within an NTLM message.
fn read_field(buffer: &[u8], at: usize) -> Result<&[u8], NtlmError> {
    if at + 8 > buffer.len() {
        return Err(NtlmError);
    }
    let len = u16::from_le_bytes(buffer[at..at + 2].try_into().unwrap()) as usize;
    let offset = u32::from_le_bytes(buffer[at + 4..at + 8].try_into().unwrap()) as usize;
    if offset + len > buffer.len() {
        return Err(NtlmError);
    }
    Ok(&buffer[offset..offset + len])
}

fn push_field(header: &mut Vec<u8>, payload: &mut Vec<u8>, base: usize, data: &[u8]) {
    let offset = base + payload.len();
    header.extend_from_slice(&(data.len() as u16).to_le_bytes());
    header.extend_from_slice(&(data.len() as u16).to_le_bytes());
    header.extend_from_slice(&(offset as u32).to_le_bytes());
    payload.extend_from_slice(data);
}

/// Builds the Type-2 CHALLENGE message: flags, the server challenge, and a
/// target-info block naming this server.
pub fn build_challenge(server_name: &str, challenge: &[u8; 8]) -> Vec<u8> {
    let flags = FLAG_UNICODE
        | FLAG_REQUEST_TARGET
        | FLAG_NTLM
        | FLAG_ALWAYS_SIGN
        | FLAG_TARGET_TYPE_SERVER
        | FLAG_EXTENDED_SECURITY
        | FLAG_TARGET_INFO
        | FLAG_128BIT
        | FLAG_KEY_EXCH;

    let target = utf16le(&server_name.to_uppercase());
    // AV pairs: NetBIOS computer name, NetBIOS domain name, timestamp, end.
    let mut target_info = Vec::new();
    for (av_id, value) in [(1u16, target.clone()), (2u16, target.clone())] {
        target_info.extend_from_slice(&av_id.to_le_bytes());
        target_info.extend_from_slice(&(value.len() as u16).to_le_bytes());
        target_info.extend_from_slice(&value);
    }
    target_info.extend_from_slice(&7u16.to_le_bytes());
    target_info.extend_from_slice(&8u16.to_le_bytes());
    target_info.extend_from_slice(&FileTime::now().value.to_le_bytes());
    target_info.extend_from_slice(&[0u8; 4]); // MsvAvEOL

    const HEADER_LEN: usize = 48;
    let mut header = Vec::with_capacity(HEADER_LEN);
    let mut payload = Vec::new();
    header.extend_from_slice(SIGNATURE);
    header.extend_from_slice(&MSG_CHALLENGE.to_le_bytes());
    push_field(&mut header, &mut payload, HEADER_LEN, &target);
    header.extend_from_slice(&flags.to_le_bytes());
    header.extend_from_slice(challenge);
    header.extend_from_slice(&[0u8; 8]); // reserved
    push_field(&mut header, &mut payload, HEADER_LEN, &target_info);
    debug_assert_eq!(header.len(), HEADER_LEN);
    header.extend_from_slice(&payload);
    header
}

/// The fields of a Type-3 AUTHENTICATE message the server acts on.
#[derive(Debug, Clone)]
pub struct NtlmAuthenticate {
    pub domain: String,
    pub user: String,
    pub workstation: String,
    pub nt_response: Vec<u8>,
    pub encrypted_session_key: Vec<u8>,
    pub flags: u32,
}

/// Parses a Type-3 AUTHENTICATE message.
pub fn parse_authenticate(buffer: &[u8]) -> Result<NtlmAuthenticate, NtlmError> {
    if !is_authenticate(buffer) || buffer.len() < 64 {
        return Err(NtlmError);
    }
    let _lm_response = read_field(buffer, 12)?;
    let nt_response = read_field(buffer, 20)?.to_vec();
    let domain = decode_utf16le(read_field(buffer, 28)?);
    let user = decode_utf16le(read_field(buffer, 36)?);
    let workstation = decode_utf16le(read_field(buffer, 44)?);
    let encrypted_session_key = read_field(buffer, 52)?.to_vec();
    let flags = u32::from_le_bytes(buffer[60..64].try_into().unwrap());
    Ok(NtlmAuthenticate { domain, user, workstation, nt_response, encrypted_session_key, flags })
}

/// Validates an NTLMv2 response against the stored NT hash for one
/// candidate domain. On a match, returns the session base key.
pub fn validate_ntlmv2(
    nt_hash: &[u8; 16],
    user: &str,
    domain: &str,
    server_challenge: &[u8; 8],
    nt_response: &[u8],
) -> Option<[u8; 16]> {
    if nt_response.len() < 16 {
        return None;
    }
    let identity = utf16le(&(user.to_uppercase() + domain));
    let ntlmv2_hash = hmac_md5(nt_hash, &[&identity]);

    let proof = &nt_response[0..16];
    let blob = &nt_response[16..];
    let expected = hmac_md5(&ntlmv2_hash, &[server_challenge, blob]);
    if expected[..] != *proof {
        return None;
    }
    Some(hmac_md5(&ntlmv2_hash, &[proof]))
}

/// The session key actually used for signing: with key exchange, the client
/// sends it RC4-sealed under the session base key.
pub fn session_key(base_key: [u8; 16], auth: &NtlmAuthenticate) -> [u8; 16] {
    if auth.flags & FLAG_KEY_EXCH != 0 && auth.encrypted_session_key.len() == 16 {
        let mut key: [u8; 16] = auth.encrypted_session_key[..].try_into().unwrap();
        let mut cipher = Rc4::<U16>::new((&base_key).into());
        cipher.apply_keystream(&mut key);
        key
    } else {
        base_key
    }
}

/// Computes an NTLMv2 response the way a client would. Test and tooling
/// helper; the validation path is [`validate_ntlmv2`].
pub fn compute_ntlmv2_response(
    nt_hash: &[u8; 16],
    user: &str,
    domain: &str,
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: FileTime,
) -> Vec<u8> {
    let identity = utf16le(&(user.to_uppercase() + domain));
    let ntlmv2_hash = hmac_md5(nt_hash, &[&identity]);

    let mut blob = Vec::new();
    blob.extend_from_slice(&[1, 1, 0, 0]); // blob signature
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&timestamp.value.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&[0u8; 4]); // empty AV pairs (EOL)

    let proof = hmac_md5(&ntlmv2_hash, &[server_challenge, &blob]);
    let mut out = proof.to_vec();
    out.extend_from_slice(&blob);
    out
}

/// The MD4 of the UTF-16LE password: the stored NT hash. The server only
/// consumes hashes from the user store; this is for tests and provisioning
/// tools.
pub fn nt_hash(password: &str) -> [u8; 16] {
    use md4::{Digest, Md4};
    Md4::digest(utf16le(password)).into()
}

/// Builds a minimal Type-1 NEGOTIATE message (client side; used by tests).
pub fn build_negotiate() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&MSG_NEGOTIATE.to_le_bytes());
    out.extend_from_slice(
        &(FLAG_UNICODE | FLAG_NTLM | FLAG_EXTENDED_SECURITY | FLAG_KEY_EXCH).to_le_bytes(),
    );
    out.extend_from_slice(&[0u8; 16]); // empty domain and workstation fields
    out
}

/// Builds a Type-3 AUTHENTICATE message (client side; used by tests).
#[allow(clippy::too_many_arguments)]
pub fn build_authenticate(
    user: &str,
    domain: &str,
    workstation: &str,
    nt_response: &[u8],
    encrypted_session_key: &[u8],
    flags: u32,
) -> Vec<u8> {
    const HEADER_LEN: usize = 64;
    let mut header = Vec::with_capacity(HEADER_LEN);
    let mut payload = Vec::new();
    header.extend_from_slice(SIGNATURE);
    header.extend_from_slice(&MSG_AUTHENTICATE.to_le_bytes());
    push_field(&mut header, &mut payload, HEADER_LEN, &[]); // LM response
    push_field(&mut header, &mut payload, HEADER_LEN, nt_response);
    push_field(&mut header, &mut payload, HEADER_LEN, &utf16le(domain));
    push_field(&mut header, &mut payload, HEADER_LEN, &utf16le(user));
    push_field(&mut header, &mut payload, HEADER_LEN, &utf16le(workstation));
    push_field(&mut header, &mut payload, HEADER_LEN, encrypted_session_key);
    header.extend_from_slice(&flags.to_le_bytes());
    debug_assert_eq!(header.len(), HEADER_LEN);
    header.extend_from_slice(&payload);
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nt_hash_known_vector() {
        // The canonical "password" NT hash.
        assert_eq!(
            nt_hash("password"),
            [
                0x88, 0x46, 0xf7, 0xea, 0xee, 0x8f, 0xb1, 0x17, 0xad, 0x06, 0xbd, 0xd8, 0x30,
                0xb7, 0x58, 0x6c
            ]
        );
    }

    #[test]
    fn ntlmv2_round_trip_validates() {
        let hash = nt_hash("s3cret!");
        let server_challenge = [1, 2, 3, 4, 5, 6, 7, 8];
        let client_challenge = [9, 9, 9, 9, 9, 9, 9, 9];
        let response = compute_ntlmv2_response(
            &hash,
            "alice",
            "WORKGROUP",
            &server_challenge,
            &client_challenge,
            FileTime::from(0x01db6b510da18f04u64),
        );
        let base = validate_ntlmv2(&hash, "alice", "WORKGROUP", &server_challenge, &response);
        assert!(base.is_some());
        // Wrong domain fails.
        assert!(validate_ntlmv2(&hash, "alice", "OTHER", &server_challenge, &response).is_none());
        // Tampered proof fails.
        let mut bad = response.clone();
        bad[0] ^= 1;
        assert!(validate_ntlmv2(&hash, "alice", "WORKGROUP", &server_challenge, &bad).is_none());
    }

    #[test]
    fn authenticate_message_round_trips() {
        let message = build_authenticate(
            "alice",
            "WORKGROUP",
            "PC1",
            &[0xaa; 40],
            &[0xbb; 16],
            FLAG_UNICODE | FLAG_KEY_EXCH,
        );
        assert!(is_authenticate(&message));
        let parsed = parse_authenticate(&message).unwrap();
        assert_eq!(parsed.user, "alice");
        assert_eq!(parsed.domain, "WORKGROUP");
        assert_eq!(parsed.workstation, "PC1");
        assert_eq!(parsed.nt_response, vec![0xaa; 40]);
        assert_eq!(parsed.encrypted_session_key, vec![0xbb; 16]);
        assert!(parsed.flags & FLAG_KEY_EXCH != 0);
    }

    #[test]
    fn session_key_unseals_with_key_exchange() {
        let base = [7u8; 16];
        let plain_key = [3u8; 16];
        let mut sealed = plain_key;
        let mut cipher = Rc4::<U16>::new((&base).into());
        cipher.apply_keystream(&mut sealed);

        let auth = NtlmAuthenticate {
            domain: String::new(),
            user: "u".into(),
            workstation: String::new(),
            nt_response: Vec::new(),
            encrypted_session_key: sealed.to_vec(),
            flags: FLAG_KEY_EXCH,
        };
        assert_eq!(session_key(base, &auth), plain_key);
    }
}
