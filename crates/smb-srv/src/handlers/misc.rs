//! ECHO, CANCEL, byte-range LOCK, and oplock/lease break acknowledgments.

use smb_msg::{
    EchoResponse, Header, LeaseBreakAck, LeaseBreakResponse, LockRequest, LockResponse,
    OplockBreakAck, OplockBreakResponse, OplockLevel, ResponseContent, Status,
};

use super::{Reply, require_session, require_tree, resolve_open};
use crate::connection::Connection;
use crate::oplocks::{lease_state_bits, lease_state_from_bits};

pub(crate) async fn handle_echo(_conn: &mut Connection, _header: &Header) -> Reply {
    Reply::Ok(EchoResponse::default().into())
}

/// CANCEL completes a parked CHANGE_NOTIFY with STATUS_CANCELLED; the
/// cancel itself has no response.
pub(crate) async fn handle_cancel(conn: &mut Connection, header: &Header) -> Reply {
    if !conn.ctx.notifications.cancel(header.session_id, header.message_id) {
        log::debug!(
            "cancel for message {} from {} matched nothing",
            header.message_id,
            conn.client_addr
        );
    }
    Reply::NoResponse
}

/// LOCK: lock/unlock elements applied through the metadata store's lock
/// table. Blocking waits are not implemented; conflicting lock requests
/// fail immediately.
pub(crate) async fn handle_lock(
    conn: &mut Connection,
    header: &Header,
    request: LockRequest,
) -> Reply {
    if require_session(conn, header).is_err() {
        return Reply::Error(Status::UserSessionDeleted);
    }
    if require_tree(conn, header).is_err() {
        return Reply::Error(Status::NetworkNameDeleted);
    }
    let open = match resolve_open(conn, header, request.file_id) {
        Ok(open) => open,
        Err(status) => return Reply::Error(status),
    };
    let open = open.lock().await;
    if open.is_pipe || open.is_directory {
        return Reply::Error(Status::InvalidDeviceRequest);
    }

    for element in &request.locks {
        let flags = element.flags;
        let unlock = flags.unlock();
        let exclusive = flags.exclusive();
        let shared = flags.shared();
        if (unlock && (exclusive || shared)) || (exclusive && shared) || (!unlock && !exclusive && !shared)
        {
            return Reply::Error(Status::InvalidParameter);
        }

        let result = if unlock {
            conn.ctx
                .metadata
                .unlock_range(&open.handle, open.session_id, element.offset, element.length)
                .await
        } else {
            conn.ctx
                .metadata
                .lock_range(
                    &open.handle,
                    open.session_id,
                    element.offset,
                    element.length,
                    exclusive,
                )
                .await
        };
        if let Err(err) = result {
            return Reply::Error(err.to_status());
        }
    }
    Reply::Ok(LockResponse::default().into())
}

/// A client acknowledging an oplock break: record the lowered level and
/// confirm it.
pub(crate) async fn handle_oplock_break_ack(
    conn: &mut Connection,
    header: &Header,
    request: OplockBreakAck,
) -> Reply {
    if require_session(conn, header).is_err() {
        return Reply::Error(Status::UserSessionDeleted);
    }
    let open = match resolve_open(conn, header, request.file_id) {
        Ok(open) => open,
        Err(status) => return Reply::Error(status),
    };
    let mut open = open.lock().await;
    let Some(level) = OplockLevel::from_u8(request.oplock_level) else {
        return Reply::Error(Status::InvalidParameter);
    };
    conn.ctx.oplocks.ack_oplock_break(open.file_id, level);
    open.oplock_level = level as u8;
    Reply::Ok(ResponseContent::OplockBreakNotify(OplockBreakResponse {
        oplock_level: level as u8,
        file_id: open.file_id,
    }))
}

/// A client acknowledging a lease break: lower the recorded lease state.
pub(crate) async fn handle_lease_break_ack(
    conn: &mut Connection,
    header: &Header,
    request: LeaseBreakAck,
) -> Reply {
    if require_session(conn, header).is_err() {
        return Reply::Error(Status::UserSessionDeleted);
    }
    let new_state = lease_state_bits(request.lease_state);
    match conn.ctx.oplocks.ack_lease_break(request.lease_key, new_state) {
        Some(_epoch) => Reply::Ok(ResponseContent::LeaseBreak(LeaseBreakResponse {
            lease_key: request.lease_key,
            lease_state: lease_state_from_bits(new_state),
        })),
        None => Reply::Error(Status::InvalidParameter),
    }
}
