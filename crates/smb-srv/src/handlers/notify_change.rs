//! CHANGE_NOTIFY: one-shot directory watch registration.

use smb_msg::{ChangeNotifyRequest, Header, Status};

use super::{Reply, require_session, require_tree, resolve_open};
use crate::connection::Connection;

pub(crate) async fn handle(
    conn: &mut Connection,
    header: &Header,
    request: ChangeNotifyRequest,
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
    if !open.is_directory {
        return Reply::Error(Status::InvalidParameter);
    }

    let receiver = conn.ctx.notifications.register(
        open.file_id,
        header.message_id,
        header.session_id,
        &open.share,
        &open.path,
        request.completion_filter,
        request.flags.watch_tree(),
    );
    log::debug!(
        "watch registered on {}/{} (message {})",
        open.share,
        open.path,
        header.message_id
    );
    Reply::Async(receiver)
}
