//! NEGOTIATE: dialect selection, capability computation, and 3.1.1
//! negotiate contexts.

use rand::RngCore;

use smb_dtyp::binrw_util::prelude::FileTime;
use smb_msg::{
    CIPHER_AES_128_CCM, CIPHER_AES_128_GCM, CIPHER_AES_256_CCM, CIPHER_AES_256_GCM,
    DIALECT_SMB2_WILDCARD, Dialect, EncryptionCapabilities, GlobalCapabilities,
    HASH_ALGORITHM_SHA512, Header, NegotiateContextValue, NegotiateRequest, NegotiateResponse,
    NegotiateSecurityMode, PreauthIntegrityCapabilities, SIGNING_AES_CMAC, SIGNING_AES_GMAC,
    SIGNING_HMAC_SHA256, SigningCapabilities, Status,
};

use super::Reply;
use crate::MAX_TRANSACT_SIZE;
use crate::connection::Connection;

/// Server cipher preference: GCM first for throughput, 128-bit first for
/// compatibility.
const CIPHER_PREFERENCE: [u16; 4] =
    [CIPHER_AES_128_GCM, CIPHER_AES_128_CCM, CIPHER_AES_256_GCM, CIPHER_AES_256_CCM];

/// Server signing-algorithm preference.
const SIGNING_PREFERENCE: [u16; 3] = [SIGNING_AES_CMAC, SIGNING_HMAC_SHA256, SIGNING_AES_GMAC];

pub(crate) async fn handle(
    conn: &mut Connection,
    _header: &Header,
    request: NegotiateRequest,
) -> Reply {
    if request.dialects.is_empty() {
        return Reply::Error(Status::NotSupported);
    }

    // Highest offered dialect within the configured window. The 2.xx
    // wildcard signals a multi-protocol negotiate and stands in for 2.0.2.
    let config = &conn.ctx.config;
    let offered_wildcard = request.dialects.contains(&DIALECT_SMB2_WILDCARD);
    let in_window = |d: &Dialect| *d >= config.min_dialect && *d <= config.max_dialect;
    let selected = request
        .dialects
        .iter()
        .filter_map(|code| Dialect::from_u16(*code))
        .filter(in_window)
        .max()
        .or_else(|| {
            (offered_wildcard && in_window(&Dialect::Smb0202)).then_some(Dialect::Smb0202)
        });
    let Some(dialect) = selected else {
        return Reply::Error(Status::NotSupported);
    };

    // Echo the wildcard unless something above 2.0.2 was picked.
    let dialect_revision = if offered_wildcard && dialect <= Dialect::Smb0202 {
        DIALECT_SMB2_WILDCARD
    } else {
        dialect as u16
    };

    let mut capabilities = GlobalCapabilities::new();
    if dialect >= Dialect::Smb021 {
        capabilities.set_leasing(true);
        capabilities.set_large_mtu(true);
    }
    if dialect >= Dialect::Smb030 {
        capabilities.set_directory_leasing(true);
    }
    if matches!(dialect, Dialect::Smb030 | Dialect::Smb0302) {
        // 3.0.x encryption is a capability bit; 3.1.1 uses contexts.
        capabilities.set_encryption(true);
    }

    // 3.1.1 contexts: preauth integrity is mandatory, the rest optional.
    let mut response_contexts = Vec::new();
    let mut selected_cipher = None;
    let mut selected_signing = SIGNING_HMAC_SHA256;
    if dialect == Dialect::Smb0311 {
        let preauth_ok = matches!(
            request.find_context(smb_msg::CTX_PREAUTH_INTEGRITY_CAPABILITIES),
            Some(NegotiateContextValue::PreauthIntegrity(caps))
                if caps.hash_algorithms.contains(&HASH_ALGORITHM_SHA512)
        );
        if preauth_ok {
            let mut salt = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut salt);
            response_contexts.push(
                NegotiateContextValue::PreauthIntegrity(PreauthIntegrityCapabilities {
                    hash_algorithms: vec![HASH_ALGORITHM_SHA512],
                    salt,
                })
                .into(),
            );
        }

        if let Some(NegotiateContextValue::Encryption(caps)) =
            request.find_context(smb_msg::CTX_ENCRYPTION_CAPABILITIES)
        {
            selected_cipher =
                CIPHER_PREFERENCE.iter().copied().find(|c| caps.ciphers.contains(c));
            response_contexts.push(
                NegotiateContextValue::Encryption(EncryptionCapabilities {
                    ciphers: vec![selected_cipher.unwrap_or(0)],
                })
                .into(),
            );
        }

        if let Some(NegotiateContextValue::Signing(caps)) =
            request.find_context(smb_msg::CTX_SIGNING_CAPABILITIES)
        {
            selected_signing = SIGNING_PREFERENCE
                .iter()
                .copied()
                .find(|alg| caps.signing_algorithms.contains(alg))
                .unwrap_or(SIGNING_HMAC_SHA256);
            response_contexts.push(
                NegotiateContextValue::Signing(SigningCapabilities {
                    signing_algorithms: vec![selected_signing],
                })
                .into(),
            );
        }
    }

    // Record the connection's negotiated parameters; the preauth hash
    // restarts from zero in the dispatcher once 3.1.1 is selected.
    conn.crypto.dialect = Some(dialect);
    conn.crypto.client_guid = request.client_guid;
    conn.crypto.client_dialects = request.dialects.clone();
    conn.crypto.client_security_mode =
        u16::from_le_bytes(NegotiateSecurityMode::into_bytes(request.security_mode));
    conn.crypto.capabilities = u32::from_le_bytes(GlobalCapabilities::into_bytes(capabilities));
    conn.crypto.cipher = selected_cipher;
    conn.crypto.signing_algorithm = selected_signing;

    let security_mode = NegotiateSecurityMode::new()
        .with_signing_enabled(true)
        .with_signing_required(conn.ctx.config.require_signing);

    log::debug!(
        "negotiated dialect {dialect:?} (revision {dialect_revision:#06x}) with {}",
        conn.client_addr
    );

    Reply::Ok(
        NegotiateResponse {
            security_mode,
            dialect_revision,
            server_guid: conn.ctx.server_guid,
            capabilities,
            max_transact_size: MAX_TRANSACT_SIZE,
            max_read_size: MAX_TRANSACT_SIZE,
            max_write_size: MAX_TRANSACT_SIZE,
            system_time: FileTime::now(),
            server_start_time: conn.ctx.start_time,
            // No GSS hint token: clients negotiate mechanisms in
            // SESSION_SETUP directly.
            security_buffer: Vec::new(),
            negotiate_contexts: response_contexts,
        }
        .into(),
    )
}
