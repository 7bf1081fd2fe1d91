//! CLOSE: the ordered cleanup list. The handle is always released, whatever
//! fails along the way.

use smb_msg::{CloseRequest, CloseResponse, Header, Status};
use smb_fscc::NotifyAction;

use super::create::{effective_size, node_attributes};
use super::{Reply, require_session};
use crate::allocation_size;
use crate::connection::Connection;
use crate::mfsymlink;
use crate::notify::ChangeEvent;
use crate::server::ServerContext;
use crate::state::OpenFile;
use crate::vfs::{AuthContext, FileNode, SetAttrs};

pub(crate) async fn handle(conn: &mut Connection, header: &Header, request: CloseRequest) -> Reply {
    let session = match require_session(conn, header) {
        Ok(session) => session,
        Err(status) => return Reply::Error(status),
    };
    let file_id = if request.file_id == smb_msg::FileId::FULL {
        match conn.chain_file_id {
            Some(id) => id,
            None => return Reply::Error(Status::FileClosed),
        }
    } else {
        request.file_id
    };

    // Removing the entry first makes CLOSE exclusive against concurrent
    // operations on the same handle.
    let Some(open) = conn.ctx.state.remove_open(file_id) else {
        return Reply::Error(Status::FileClosed);
    };
    let open = open.lock().await;
    if open.session_id != header.session_id {
        return Reply::Error(Status::FileClosed);
    }

    if open.is_pipe {
        conn.ctx.state.remove_pipe(file_id);
        return Reply::Ok(CloseResponse::default().into());
    }

    let auth = session.auth_context();
    let ctx = conn.ctx.clone();

    flush_for_close(&ctx, &auth, &open).await;

    // Capture final attributes before any conversion or deletion can
    // invalidate the handle.
    let final_node = ctx.metadata.get_file(&auth, &open.handle).await.ok();

    convert_mfsymlink(&ctx, &auth, &open).await;
    release_for_close(&ctx, &auth, &open).await;

    let mut response = CloseResponse::default();
    if request.flags.postquery_attrib() {
        if let Some(mut node) = final_node {
            apply_frozen_to_node(&open, &mut node);
            let end_of_file = effective_size(&node);
            response = CloseResponse {
                flags: request.flags,
                creation_time: node.crtime,
                last_access_time: node.atime,
                last_write_time: node.mtime,
                change_time: node.ctime,
                allocation_size: allocation_size(end_of_file),
                end_of_file,
                file_attributes: node_attributes(&node),
            };
        }
    }
    Reply::Ok(response.into())
}

/// Frozen timestamps override whatever the store reports.
pub(crate) fn apply_frozen_to_node(open: &OpenFile, node: &mut FileNode) {
    if let Some(atime) = open.frozen.atime {
        node.atime = atime;
    }
    if let Some(mtime) = open.frozen.mtime {
        node.mtime = mtime;
    }
    if let Some(ctime) = open.frozen.ctime {
        node.ctime = ctime;
    }
}

/// Steps 1–2: make the payload durable, then write back pending metadata.
/// A content failure is fatal for durability but still must not leak the
/// handle, so failures are only logged here.
async fn flush_for_close(ctx: &ServerContext, auth: &AuthContext, open: &OpenFile) {
    if !open.is_directory && !open.payload_id.is_empty() {
        if let Err(err) = ctx.content.flush(&open.payload_id).await {
            log::warn!("close: content flush failed for {}: {err}", open.path);
        }
    }
    if let Err(err) = ctx.metadata.flush_pending_write_for_file(auth, &open.handle).await {
        log::warn!("close: metadata flush failed for {}: {err}", open.path);
    }
}

/// Step 3: a 1067-byte regular file carrying the XSym signature becomes a
/// real symlink in the metadata store.
async fn convert_mfsymlink(ctx: &ServerContext, auth: &AuthContext, open: &OpenFile) {
    if open.is_directory || open.is_symlink || open.payload_id.is_empty() || open.name.is_empty() {
        return;
    }
    let Ok(node) = ctx.metadata.get_file(auth, &open.handle).await else {
        return;
    };
    if node.is_symlink() || node.size != mfsymlink::MFSYMLINK_SIZE as u64 {
        return;
    }
    let mut buffer = vec![0u8; mfsymlink::MFSYMLINK_SIZE];
    match ctx.content.read_at(&open.payload_id, &mut buffer, 0).await {
        Ok(n) if n == mfsymlink::MFSYMLINK_SIZE => {}
        _ => return,
    }
    let Some(target) = mfsymlink::decode(&buffer) else {
        return;
    };

    log::debug!("close: converting {} to a symlink -> {target}", open.path);
    if let Err(err) = ctx.metadata.remove_file(auth, &open.parent, &open.name).await {
        log::warn!("close: removing MFsymlink file {} failed: {err}", open.path);
        return;
    }
    if let Err(err) = ctx.content.delete(&open.payload_id).await {
        log::warn!("close: deleting MFsymlink payload of {} failed: {err}", open.path);
    }
    let attrs = SetAttrs {
        mode: Some(0o777),
        uid: Some(node.uid),
        gid: Some(node.gid),
        ..SetAttrs::default()
    };
    if let Err(err) =
        ctx.metadata.create_symlink(auth, &open.parent, &open.name, &target, &attrs).await
    {
        log::warn!("close: creating symlink {} failed: {err}", open.path);
    }
}

/// Steps 5–8: release byte-range locks, honor delete-on-close, release the
/// oplock and drop any pending change-notify registration.
async fn release_for_close(ctx: &ServerContext, auth: &AuthContext, open: &OpenFile) {
    if let Err(err) = ctx.metadata.unlock_all_for_session(&open.handle, open.session_id).await {
        log::debug!("close: releasing locks for {} failed: {err}", open.path);
    }

    if open.delete_pending && !open.name.is_empty() {
        let removed = if open.is_directory {
            ctx.metadata.remove_directory(auth, &open.parent, &open.name).await.map(|_| ())
        } else {
            ctx.metadata.remove_file(auth, &open.parent, &open.name).await.map(|_| ())
        };
        match removed {
            Ok(()) => {
                let parent_path = match open.path.rsplit_once('/') {
                    Some((parent, _)) => parent.to_string(),
                    None => String::new(),
                };
                ctx.notifications.post(
                    &open.share,
                    &parent_path,
                    &[ChangeEvent { action: NotifyAction::Removed, name: open.name.clone() }],
                );
            }
            Err(err) => {
                log::warn!("close: delete-on-close of {} failed: {err}", open.path);
            }
        }
    }

    ctx.oplocks.release(&open.share, &open.path, open.file_id);
    ctx.notifications.unregister(open.file_id);
}

/// The whole cleanup list, used when a session or connection goes away with
/// handles still open.
pub(crate) async fn cleanup_open(ctx: &ServerContext, auth: &AuthContext, open: &OpenFile) {
    if open.is_pipe {
        ctx.state.remove_pipe(open.file_id);
        return;
    }
    flush_for_close(ctx, auth, open).await;
    convert_mfsymlink(ctx, auth, open).await;
    release_for_close(ctx, auth, open).await;
}
