//! Per-opcode command handlers.
//!
//! Every handler is a pure transform over the shared state and the
//! collaborator services: it receives the (possibly chain-adjusted) header
//! and the parsed body, and returns a [`Reply`]. Resolution failures short
//! circuit before any store call is made.

use std::sync::Arc;

use smb_msg::{FileId, Header, RequestContent, ResponseContent, Status};
use tokio::sync::oneshot;

use crate::connection::Connection;
use crate::notify::NotifyOutcome;
use crate::state::{OpenFile, SessionEntry, TreeEntry};

pub(crate) mod close;
pub(crate) mod create;
pub(crate) mod file;
pub(crate) mod ioctl;
pub(crate) mod misc;
pub(crate) mod negotiate;
pub(crate) mod notify_change;
pub(crate) mod query_dir;
pub(crate) mod query_info;
pub(crate) mod session_setup;
pub(crate) mod set_info;
pub(crate) mod tree_connect;

/// What a handler produced.
pub(crate) enum Reply {
    /// SUCCESS with this body.
    Ok(ResponseContent),
    /// A non-success status that still carries a body
    /// (MORE_PROCESSING_REQUIRED, BUFFER_OVERFLOW).
    WithStatus(Status, ResponseContent),
    /// An error with an empty error body.
    Error(Status),
    /// The request is parked; an interim goes out now and the final
    /// response is delivered through the channel.
    Async(oneshot::Receiver<NotifyOutcome>),
    /// No response at all (CANCEL).
    NoResponse,
}

/// Routes a parsed request to its handler.
pub(crate) async fn dispatch(
    conn: &mut Connection,
    header: &Header,
    content: RequestContent,
) -> Reply {
    match content {
        RequestContent::Negotiate(req) => negotiate::handle(conn, header, req).await,
        RequestContent::SessionSetup(req) => session_setup::handle(conn, header, req).await,
        RequestContent::Logoff(_) => session_setup::handle_logoff(conn, header).await,
        RequestContent::TreeConnect(req) => tree_connect::handle(conn, header, req).await,
        RequestContent::TreeDisconnect(_) => tree_connect::handle_disconnect(conn, header).await,
        RequestContent::Create(req) => create::handle(conn, header, req).await,
        RequestContent::Close(req) => close::handle(conn, header, req).await,
        RequestContent::Flush(req) => file::handle_flush(conn, header, req).await,
        RequestContent::Read(req) => file::handle_read(conn, header, req).await,
        RequestContent::Write(req) => file::handle_write(conn, header, req).await,
        RequestContent::Lock(req) => misc::handle_lock(conn, header, req).await,
        RequestContent::Ioctl(req) => ioctl::handle(conn, header, req).await,
        RequestContent::Cancel(_) => misc::handle_cancel(conn, header).await,
        RequestContent::Echo(_) => misc::handle_echo(conn, header).await,
        RequestContent::QueryDirectory(req) => query_dir::handle(conn, header, req).await,
        RequestContent::ChangeNotify(req) => notify_change::handle(conn, header, req).await,
        RequestContent::QueryInfo(req) => query_info::handle(conn, header, req).await,
        RequestContent::SetInfo(req) => set_info::handle(conn, header, req).await,
        RequestContent::OplockBreakAck(req) => misc::handle_oplock_break_ack(conn, header, req).await,
        RequestContent::LeaseBreakAck(req) => misc::handle_lease_break_ack(conn, header, req).await,
    }
}

/// Resolves the header's session or fails with USER_SESSION_DELETED.
pub(crate) fn require_session(
    conn: &Connection,
    header: &Header,
) -> Result<Arc<SessionEntry>, Status> {
    conn.ctx.state.session(header.session_id).ok_or(Status::UserSessionDeleted)
}

/// Resolves the header's tree connection within its session.
pub(crate) fn require_tree(conn: &Connection, header: &Header) -> Result<Arc<TreeEntry>, Status> {
    let tree_id = header.tree_id.ok_or(Status::NetworkNameDeleted)?;
    conn.ctx
        .state
        .tree(header.session_id, tree_id)
        .ok_or(Status::NetworkNameDeleted)
}

/// Resolves a FileId to a live open, honoring the all-ones chain reference.
/// A FileId from another engine incarnation or session does not resolve.
pub(crate) fn resolve_open(
    conn: &Connection,
    header: &Header,
    file_id: FileId,
) -> Result<Arc<tokio::sync::Mutex<OpenFile>>, Status> {
    let file_id = if file_id == FileId::FULL {
        conn.chain_file_id.ok_or(Status::FileClosed)?
    } else {
        file_id
    };
    let open = conn.ctx.state.open(file_id).ok_or(Status::FileClosed)?;
    // Ownership check without await: the session id is immutable.
    {
        let guard = open.try_lock();
        if let Ok(guard) = guard {
            if guard.session_id != header.session_id {
                return Err(Status::FileClosed);
            }
        }
    }
    Ok(open)
}
