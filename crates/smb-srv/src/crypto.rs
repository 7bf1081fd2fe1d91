//! Connection and session cryptography.
//!
//! Per-connection: the negotiated dialect, cipher, signing algorithm, and
//! the 3.1.1 preauth-integrity running hash. Per-session: the signing,
//! encryption, decryption and application keys derived from the
//! authentication session key (SP800-108 counter-mode KDF for 3.x, the raw
//! key for 2.x), plus the signing and transform primitives themselves.

use aead::generic_array::GenericArray;
use aead::{Aead, KeyInit, Payload};
use aes::{Aes128, Aes256};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use ccm::Ccm;
use ccm::consts::{U11, U16};
use cmac::Cmac;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};

use smb_dtyp::guid::Guid;
use smb_msg::{
    CIPHER_AES_128_CCM, CIPHER_AES_128_GCM, CIPHER_AES_256_CCM, CIPHER_AES_256_GCM, Command,
    Dialect, EncryptedMessage, Header, SIGNING_AES_CMAC, SIGNING_AES_GMAC, SIGNING_HMAC_SHA256,
    Status, TransformHeader,
};

type HmacSha256 = Hmac<Sha256>;
type Aes128Ccm = Ccm<Aes128, U16, U11>;
type Aes256Ccm = Ccm<Aes256, U16, U11>;

/// Negotiated state of one connection.
#[derive(Debug, Clone)]
pub struct ConnCrypto {
    pub dialect: Option<Dialect>,
    pub client_guid: Guid,
    pub client_dialects: Vec<u16>,
    pub client_security_mode: u16,
    pub capabilities: u32,
    /// Selected 3.1.1 cipher, if encryption was negotiated.
    pub cipher: Option<u16>,
    /// Selected 3.1.1 signing algorithm.
    pub signing_algorithm: u16,
    /// SHA-512 preauth-integrity running hash (3.1.1 only).
    pub preauth_hash: [u8; 64],
}

impl Default for ConnCrypto {
    fn default() -> Self {
        ConnCrypto {
            dialect: None,
            client_guid: Guid::ZERO,
            client_dialects: Vec::new(),
            client_security_mode: 0,
            capabilities: 0,
            cipher: None,
            signing_algorithm: SIGNING_HMAC_SHA256,
            preauth_hash: [0u8; 64],
        }
    }
}

impl ConnCrypto {
    /// Folds one full message into the preauth-integrity hash.
    pub fn update_preauth(&mut self, message: &[u8]) {
        if self.dialect != Some(Dialect::Smb0311) {
            return;
        }
        let mut sha = Sha512::new();
        sha.update(self.preauth_hash);
        sha.update(message);
        self.preauth_hash.copy_from_slice(&sha.finalize());
    }
}

/// Keys and algorithms of one authenticated session.
#[derive(Clone)]
pub struct SessionCrypto {
    pub dialect: Dialect,
    pub signing_enabled: bool,
    pub signing_algorithm: u16,
    pub cipher: Option<u16>,
    pub signing_key: [u8; 16],
    /// Server-to-client transform key.
    pub encryption_key: Vec<u8>,
    /// Client-to-server transform key.
    pub decryption_key: Vec<u8>,
    pub application_key: [u8; 16],
}

impl std::fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log key material.
        f.debug_struct("SessionCrypto")
            .field("dialect", &self.dialect)
            .field("signing_enabled", &self.signing_enabled)
            .field("signing_algorithm", &self.signing_algorithm)
            .field("cipher", &self.cipher)
            .finish()
    }
}

/// SP800-108 KDF in counter mode with HMAC-SHA256:
/// `K(i) = HMAC(key, i || label || 0x00 || context || L)`.
fn kdf(key: &[u8], label: &[u8], context: &[u8], bits: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let rounds = bits.div_ceil(256);
    for i in 1..=rounds {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(key).expect("hmac accepts any key length");
        mac.update(&i.to_be_bytes());
        mac.update(label);
        mac.update(&[0]);
        mac.update(context);
        mac.update(&bits.to_be_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes());
    }
    out.truncate((bits / 8) as usize);
    out
}

fn cipher_key_bits(cipher: u16) -> u32 {
    match cipher {
        CIPHER_AES_256_CCM | CIPHER_AES_256_GCM => 256,
        _ => 128,
    }
}

impl SessionCrypto {
    /// Derives the per-session keys after a successful SESSION_SETUP.
    ///
    /// 2.x uses the session key directly for HMAC-SHA256 signing. 3.0.x
    /// derives with fixed labels, 3.1.1 with the preauth-integrity hash as
    /// context.
    pub fn derive(
        dialect: Dialect,
        session_key: &[u8; 16],
        preauth_hash: &[u8; 64],
        cipher: Option<u16>,
        signing_algorithm: u16,
        signing_enabled: bool,
    ) -> SessionCrypto {
        let mut crypto = SessionCrypto {
            dialect,
            signing_enabled,
            signing_algorithm,
            cipher,
            signing_key: *session_key,
            encryption_key: Vec::new(),
            decryption_key: Vec::new(),
            application_key: *session_key,
        };
        if !dialect.is_smb3() {
            crypto.signing_algorithm = SIGNING_HMAC_SHA256;
            return crypto;
        }

        let enc_bits = cipher.map_or(128, cipher_key_bits);
        if dialect == Dialect::Smb0311 {
            crypto
                .signing_key
                .copy_from_slice(&kdf(session_key, b"SMBSigningKey\0", preauth_hash, 128));
            crypto.encryption_key = kdf(session_key, b"SMBS2CCipherKey\0", preauth_hash, enc_bits);
            crypto.decryption_key = kdf(session_key, b"SMBC2SCipherKey\0", preauth_hash, enc_bits);
            crypto
                .application_key
                .copy_from_slice(&kdf(session_key, b"SMBAppKey\0", preauth_hash, 128));
        } else {
            crypto
                .signing_key
                .copy_from_slice(&kdf(session_key, b"SMB2AESCMAC\0", b"SmbSign\0", 128));
            crypto.encryption_key = kdf(session_key, b"SMB2AESCCM\0", b"ServerOut\0", 128);
            crypto.decryption_key = kdf(session_key, b"SMB2AESCCM\0", b"ServerIn \0", 128);
            crypto
                .application_key
                .copy_from_slice(&kdf(session_key, b"SMB2APP\0", b"SmbRpc\0", 128));
            crypto.signing_algorithm = SIGNING_AES_CMAC;
        }
        crypto
    }

    /// Computes the signature over a full message whose signature field has
    /// been zeroed.
    fn compute_signature(&self, message: &[u8]) -> [u8; 16] {
        let mut signature = [0u8; 16];
        match self.signing_algorithm {
            SIGNING_AES_CMAC => {
                let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&self.signing_key)
                    .expect("cmac accepts 16-byte keys");
                mac.update(message);
                signature.copy_from_slice(&mac.finalize().into_bytes());
            }
            SIGNING_AES_GMAC => {
                // Nonce per MS-SMB2 3.1.4.1: message ID, then a word with
                // bit 0 = response, bit 1 = cancel.
                let flags = u32::from_le_bytes(message[16..20].try_into().unwrap());
                let command = u16::from_le_bytes(message[12..14].try_into().unwrap());
                let message_id = u64::from_le_bytes(message[24..32].try_into().unwrap());
                let mut nonce = [0u8; 12];
                nonce[0..8].copy_from_slice(&message_id.to_le_bytes());
                let mut role = 0u32;
                if flags & 0x1 != 0 {
                    role |= 0x1;
                }
                if command == Command::Cancel as u16 {
                    role |= 0x2;
                }
                nonce[8..12].copy_from_slice(&role.to_le_bytes());

                let gcm = Aes128Gcm::new_from_slice(&self.signing_key)
                    .expect("gcm accepts 16-byte keys");
                let tag = gcm
                    .encrypt(
                        GenericArray::from_slice(&nonce),
                        Payload { msg: &[], aad: message },
                    )
                    .expect("gmac over in-memory buffer");
                signature.copy_from_slice(&tag);
            }
            _ => {
                let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
                    .expect("hmac accepts any key length");
                mac.update(message);
                signature.copy_from_slice(&mac.finalize().into_bytes()[0..16]);
            }
        }
        signature
    }

    /// Signs a serialized message in place.
    pub fn sign_message(&self, message: &mut [u8]) {
        message[Header::SIGNATURE_RANGE].fill(0);
        let signature = self.compute_signature(message);
        message[Header::SIGNATURE_RANGE].copy_from_slice(&signature);
    }

    /// Verifies a received message's signature.
    pub fn verify_message(&self, message: &[u8]) -> bool {
        if message.len() < Header::STRUCT_SIZE {
            return false;
        }
        let mut copy = message.to_vec();
        copy[Header::SIGNATURE_RANGE].fill(0);
        let expected = self.compute_signature(&copy);
        expected == message[Header::SIGNATURE_RANGE]
    }

    fn nonce_size(cipher: u16) -> usize {
        match cipher {
            CIPHER_AES_128_GCM | CIPHER_AES_256_GCM => 12,
            _ => 11,
        }
    }

    /// Encrypts a plain serialized message for this session.
    pub fn encrypt_message(&self, plain: &[u8], session_id: u64) -> Option<EncryptedMessage> {
        let cipher = self.cipher?;
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce[..Self::nonce_size(cipher)]);
        let mut header = TransformHeader {
            signature: [0u8; 16],
            nonce,
            original_message_size: plain.len() as u32,
            flags: TransformHeader::ENCRYPTED,
            session_id,
        };
        let aad = header.aead_bytes();
        let payload = Payload { msg: plain, aad: &aad };
        let mut sealed = match cipher {
            CIPHER_AES_128_GCM => Aes128Gcm::new_from_slice(&self.encryption_key)
                .ok()?
                .encrypt(GenericArray::from_slice(&nonce[..12]), payload)
                .ok()?,
            CIPHER_AES_256_GCM => Aes256Gcm::new_from_slice(&self.encryption_key)
                .ok()?
                .encrypt(GenericArray::from_slice(&nonce[..12]), payload)
                .ok()?,
            CIPHER_AES_128_CCM => Aes128Ccm::new_from_slice(&self.encryption_key)
                .ok()?
                .encrypt(GenericArray::from_slice(&nonce[..11]), payload)
                .ok()?,
            CIPHER_AES_256_CCM => Aes256Ccm::new_from_slice(&self.encryption_key)
                .ok()?
                .encrypt(GenericArray::from_slice(&nonce[..11]), payload)
                .ok()?,
            _ => return None,
        };
        // AEAD output is ciphertext followed by the 16-byte tag.
        let tag = sealed.split_off(sealed.len() - 16);
        header.signature.copy_from_slice(&tag);
        Some(EncryptedMessage { header, payload: sealed })
    }

    /// Decrypts a transform-wrapped message from this session.
    pub fn decrypt_message(&self, message: &EncryptedMessage) -> Result<Vec<u8>, Status> {
        let cipher = self.cipher.ok_or(Status::AccessDenied)?;
        let mut sealed = message.payload.clone();
        sealed.extend_from_slice(&message.header.signature);
        let aad = message.header.aead_bytes();
        let payload = Payload { msg: &sealed, aad: &aad };
        let nonce = &message.header.nonce;
        let plain = match cipher {
            CIPHER_AES_128_GCM => Aes128Gcm::new_from_slice(&self.decryption_key)
                .map_err(|_| Status::InternalError)?
                .decrypt(GenericArray::from_slice(&nonce[..12]), payload),
            CIPHER_AES_256_GCM => Aes256Gcm::new_from_slice(&self.decryption_key)
                .map_err(|_| Status::InternalError)?
                .decrypt(GenericArray::from_slice(&nonce[..12]), payload),
            CIPHER_AES_128_CCM => Aes128Ccm::new_from_slice(&self.decryption_key)
                .map_err(|_| Status::InternalError)?
                .decrypt(GenericArray::from_slice(&nonce[..11]), payload),
            CIPHER_AES_256_CCM => Aes256Ccm::new_from_slice(&self.decryption_key)
                .map_err(|_| Status::InternalError)?
                .decrypt(GenericArray::from_slice(&nonce[..11]), payload),
            _ => return Err(Status::AccessDenied),
        };
        plain.map_err(|_| Status::AccessDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(dialect: Dialect, cipher: Option<u16>) -> SessionCrypto {
        SessionCrypto::derive(dialect, &[0x11; 16], &[0x22; 64], cipher, SIGNING_AES_CMAC, true)
    }

    #[test]
    fn kdf_output_lengths() {
        assert_eq!(kdf(&[1; 16], b"L\0", b"C\0", 128).len(), 16);
        assert_eq!(kdf(&[1; 16], b"L\0", b"C\0", 256).len(), 32);
    }

    #[test]
    fn smb2_signing_uses_session_key_directly() {
        let crypto = SessionCrypto::derive(
            Dialect::Smb021,
            &[0x42; 16],
            &[0; 64],
            None,
            SIGNING_HMAC_SHA256,
            true,
        );
        assert_eq!(crypto.signing_key, [0x42; 16]);
        assert_eq!(crypto.signing_algorithm, SIGNING_HMAC_SHA256);
    }

    #[test]
    fn smb3_keys_differ_from_session_key() {
        let crypto = session(Dialect::Smb0311, Some(CIPHER_AES_128_GCM));
        assert_ne!(crypto.signing_key, [0x11; 16]);
        assert_ne!(crypto.encryption_key, crypto.decryption_key);
        assert_eq!(crypto.encryption_key.len(), 16);

        let crypto256 = session(Dialect::Smb0311, Some(CIPHER_AES_256_GCM));
        assert_eq!(crypto256.encryption_key.len(), 32);
    }

    #[test]
    fn sign_verify_round_trip() {
        for algorithm in [SIGNING_HMAC_SHA256, SIGNING_AES_CMAC, SIGNING_AES_GMAC] {
            let crypto = SessionCrypto::derive(
                Dialect::Smb0311,
                &[0x33; 16],
                &[0x44; 64],
                None,
                algorithm,
                true,
            );
            let mut message = vec![0u8; 96];
            message[12] = Command::Write as u16 as u8;
            message[24] = 7; // message id
            crypto.sign_message(&mut message);
            assert!(crypto.verify_message(&message));
            message[70] ^= 1;
            assert!(!crypto.verify_message(&message));
        }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        for cipher in [
            CIPHER_AES_128_GCM,
            CIPHER_AES_128_CCM,
            CIPHER_AES_256_GCM,
            CIPHER_AES_256_CCM,
        ] {
            let server = session(Dialect::Smb0311, Some(cipher));
            // The peer's encryption is the server's decryption: swap keys.
            let mut client = server.clone();
            std::mem::swap(&mut client.encryption_key, &mut client.decryption_key);

            let plain = b"\xfeSMBplain message payload".to_vec();
            let sealed = client.encrypt_message(&plain, 0x1000).unwrap();
            assert_eq!(sealed.header.original_message_size as usize, plain.len());
            let opened = server.decrypt_message(&sealed).unwrap();
            assert_eq!(opened, plain);

            // A flipped ciphertext bit must not decrypt.
            let mut tampered = sealed.clone();
            tampered.payload[0] ^= 1;
            assert!(server.decrypt_message(&tampered).is_err());
        }
    }

    #[test]
    fn preauth_hash_changes_with_each_message() {
        let mut conn = ConnCrypto { dialect: Some(Dialect::Smb0311), ..Default::default() };
        let zero = conn.preauth_hash;
        conn.update_preauth(b"negotiate request");
        let first = conn.preauth_hash;
        conn.update_preauth(b"negotiate response");
        assert_ne!(zero, first);
        assert_ne!(first, conn.preauth_hash);
    }
}
