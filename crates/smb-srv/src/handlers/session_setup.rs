//! SESSION_SETUP: the NTLM multi-step handshake, the Kerberos single round
//! trip, guest fallback, and LOGOFF.
//!
//! The NTLM state machine is explicit: the CHALLENGE leg stores a
//! `PendingAuth` record keyed by the freshly issued session ID; the
//! AUTHENTICATE leg consumes it. Nothing is suspended across legs.

use std::sync::OnceLock;
use std::time::Instant;

use rand::RngCore;
use smb_msg::{Header, SessionFlags, SessionSetupRequest, SessionSetupResponse, Status};
use time::OffsetDateTime;

use super::Reply;
use crate::auth::{kerberos, ntlm, spnego};
use crate::connection::Connection;
use crate::crypto::SessionCrypto;
use crate::state::{PendingAuth, SessionEntry};
use crate::vfs::User;

/// How the security blob was packaged.
#[derive(Clone, Copy, PartialEq)]
enum Wrapping {
    Spnego,
    Raw,
}

pub(crate) async fn handle(
    conn: &mut Connection,
    header: &Header,
    request: SessionSetupRequest,
) -> Reply {
    conn.ctx.state.expire_pending_auth(conn.ctx.config.auth_timeout);

    let buffer = request.buffer;
    match buffer.first().copied() {
        // Raw NTLMSSP.
        _ if ntlm::is_raw_ntlm(&buffer) => process_ntlm(conn, header, &buffer, Wrapping::Raw).await,
        // GSS-API initial token: NegTokenInit carrying NTLM or Kerberos.
        Some(0x60) => {
            let Ok(init) = spnego::parse_initial_token(&buffer) else {
                return Reply::Error(Status::LogonFailure);
            };
            match init.mech_token {
                Some(token) if ntlm::is_raw_ntlm(&token) => {
                    process_ntlm(conn, header, &token, Wrapping::Spnego).await
                }
                Some(token) if init.offers_kerberos() => {
                    process_kerberos(conn, header, &token).await
                }
                // No optimistic token: answer as if an NTLM NEGOTIATE had
                // been sent, so the client continues with NTLM.
                None if init.offers_ntlm() => {
                    process_ntlm(conn, header, &ntlm::build_negotiate(), Wrapping::Spnego).await
                }
                _ => Reply::Error(Status::LogonFailure),
            }
        }
        // NegTokenResp: the second NTLM leg inside SPNEGO.
        Some(0xa1) => {
            let Ok(token) = spnego::parse_token_resp(&buffer) else {
                return Reply::Error(Status::LogonFailure);
            };
            process_ntlm(conn, header, &token, Wrapping::Spnego).await
        }
        _ => Reply::Error(Status::LogonFailure),
    }
}

async fn process_ntlm(
    conn: &mut Connection,
    header: &Header,
    token: &[u8],
    wrapping: Wrapping,
) -> Reply {
    if ntlm::is_negotiate(token) {
        return ntlm_challenge(conn, wrapping);
    }
    if ntlm::is_authenticate(token) {
        return ntlm_authenticate(conn, header, token, wrapping).await;
    }
    Reply::Error(Status::LogonFailure)
}

/// NTLM leg one: issue a fresh session ID and an 8-byte challenge.
fn ntlm_challenge(conn: &mut Connection, wrapping: Wrapping) -> Reply {
    let session_id = conn.ctx.state.allocate_session_id();
    let mut challenge = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut challenge);

    conn.ctx.state.insert_pending_auth(PendingAuth {
        session_id,
        challenge,
        client_addr: conn.client_addr,
        created_at: Instant::now(),
        spnego: wrapping == Wrapping::Spnego,
    });

    let challenge_msg = ntlm::build_challenge(&conn.ctx.config.server_name, &challenge);
    let buffer = match wrapping {
        Wrapping::Spnego => spnego::wrap_challenge(&challenge_msg),
        Wrapping::Raw => challenge_msg,
    };
    conn.reply_session_id = Some(session_id);
    Reply::WithStatus(
        Status::MoreProcessingRequired,
        SessionSetupResponse { session_flags: SessionFlags::new(), buffer }.into(),
    )
}

/// NTLM leg two: consume the pending record, validate the NTLMv2 response
/// across the domain fallback order, and establish the session.
async fn ntlm_authenticate(
    conn: &mut Connection,
    header: &Header,
    token: &[u8],
    wrapping: Wrapping,
) -> Reply {
    let Some(pending) = conn.ctx.state.take_pending_auth(header.session_id) else {
        return Reply::Error(Status::LogonFailure);
    };
    let Ok(auth) = ntlm::parse_authenticate(token) else {
        return Reply::Error(Status::LogonFailure);
    };

    // Anonymous or empty user: a guest session.
    if auth.user.is_empty() {
        return establish_session(conn, header.session_id, None, String::new(), None, wrapping);
    }

    let Some(user) = conn.ctx.users.get_user(&auth.user).await else {
        return Reply::Error(Status::LogonFailure);
    };
    if !user.enabled {
        return Reply::Error(Status::LogonFailure);
    }
    let Some(nt_hash) = user.get_nt_hash().copied() else {
        return Reply::Error(Status::LogonFailure);
    };

    // Domain fallback order: the client's claim, empty, the server name,
    // and the classic workgroup. First match wins.
    let hostname = conn.ctx.config.server_name.to_uppercase();
    let candidates = [auth.domain.as_str(), "", hostname.as_str(), "WORKGROUP"];
    let base_key = candidates.iter().find_map(|domain| {
        ntlm::validate_ntlmv2(&nt_hash, &auth.user, domain, &pending.challenge, &auth.nt_response)
    });
    let Some(base_key) = base_key else {
        log::warn!("NTLMv2 validation failed for {} from {}", auth.user, conn.client_addr);
        return Reply::Error(Status::LogonFailure);
    };

    let signing_key = ntlm::session_key(base_key, &auth);
    establish_session(
        conn,
        header.session_id,
        Some(user),
        auth.domain.clone(),
        Some(signing_key),
        wrapping,
    )
}

/// Kerberos: validate the AP-REQ against the keytab and map the principal.
async fn process_kerberos(conn: &mut Connection, header: &Header, token: &[u8]) -> Reply {
    let Some(provider) = conn.ctx.kerberos.clone() else {
        return Reply::Error(Status::LogonFailure);
    };
    let identity = match kerberos::validate_ap_req(
        provider.as_ref(),
        token,
        OffsetDateTime::now_utc(),
    ) {
        Ok(identity) => identity,
        Err(err) => {
            log::warn!("Kerberos AP-REQ rejected from {}: {err}", conn.client_addr);
            return Reply::Error(Status::LogonFailure);
        }
    };

    let Some(user) = conn.ctx.users.get_user(identity.account_name()).await else {
        return Reply::Error(Status::LogonFailure);
    };
    if !user.enabled {
        return Reply::Error(Status::LogonFailure);
    }

    let mut signing_key = [0u8; 16];
    let take = identity.session_key.len().min(16);
    signing_key[..take].copy_from_slice(&identity.session_key[..take]);

    // Kerberos is one round trip: the session ID is allocated here.
    let session_id = if header.session_id != 0 {
        header.session_id
    } else {
        conn.ctx.state.allocate_session_id()
    };
    establish_session(
        conn,
        session_id,
        Some(user),
        identity.realm,
        Some(signing_key),
        Wrapping::Spnego,
    )
}

fn establish_session(
    conn: &mut Connection,
    session_id: u64,
    user: Option<User>,
    domain: String,
    signing_key: Option<[u8; 16]>,
    wrapping: Wrapping,
) -> Reply {
    let guest = user.is_none();
    let entry = SessionEntry {
        id: session_id,
        client_addr: conn.client_addr,
        user,
        guest,
        domain,
        created_at: Instant::now(),
        crypto: OnceLock::new(),
    };

    // Signing is only configured when a derived key exists; guest sessions
    // stay unsigned.
    if let Some(key) = signing_key {
        let dialect = conn.crypto.dialect.unwrap_or(smb_msg::Dialect::Smb0202);
        let crypto = SessionCrypto::derive(
            dialect,
            &key,
            &conn.crypto.preauth_hash,
            conn.crypto.cipher,
            conn.crypto.signing_algorithm,
            true,
        );
        let _ = entry.crypto.set(crypto);
    }
    conn.ctx.state.insert_session(entry);
    conn.sessions.push(session_id);
    conn.reply_session_id = Some(session_id);

    let session_flags = SessionFlags::new().with_is_guest(guest);
    let buffer = match wrapping {
        Wrapping::Spnego => spnego::accept_complete(),
        Wrapping::Raw => Vec::new(),
    };
    log::debug!(
        "session {session_id:#x} established ({}) from {}",
        if guest { "guest" } else { "authenticated" },
        conn.client_addr
    );
    Reply::Ok(SessionSetupResponse { session_flags, buffer }.into())
}

/// LOGOFF: tear the session down, cascading to trees and handles.
pub(crate) async fn handle_logoff(conn: &mut Connection, header: &Header) -> Reply {
    if conn.ctx.state.session(header.session_id).is_none() {
        return Reply::Error(Status::UserSessionDeleted);
    }
    conn.teardown_session(header.session_id).await;
    Reply::Ok(smb_msg::LogoffResponse::default().into())
}
