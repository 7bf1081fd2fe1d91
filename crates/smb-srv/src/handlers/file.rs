//! READ, WRITE and FLUSH.

use smb_dtyp::binrw_util::prelude::FileTime;
use smb_msg::{
    FlushRequest, FlushResponse, Header, ReadRequest, ReadResponse, Status, WriteRequest,
    WriteResponse,
};

use super::{Reply, require_session, require_tree, resolve_open};
use crate::connection::Connection;
use crate::mfsymlink;
use crate::rpc;
use crate::vfs::SetAttrs;

pub(crate) async fn handle_read(
    conn: &mut Connection,
    header: &Header,
    request: ReadRequest,
) -> Reply {
    let session = match require_session(conn, header) {
        Ok(session) => session,
        Err(status) => return Reply::Error(status),
    };
    if require_tree(conn, header).is_err() {
        return Reply::Error(Status::NetworkNameDeleted);
    }
    let open = match resolve_open(conn, header, request.file_id) {
        Ok(open) => open,
        Err(status) => return Reply::Error(status),
    };
    let open = open.lock().await;

    // Pipes serve the buffered RPC response.
    if open.is_pipe {
        let Some(pipe) = conn.ctx.state.pipe(open.file_id) else {
            return Reply::Error(Status::FileClosed);
        };
        let mut pipe = pipe.lock().await;
        let data = pipe.read(request.length as usize);
        if data.is_empty() {
            return Reply::Error(Status::EndOfFile);
        }
        return Reply::Ok(ReadResponse { buffer: data }.into());
    }

    if open.is_directory {
        return Reply::Error(Status::InvalidDeviceRequest);
    }

    let auth = session.auth_context();
    if let Err(err) = conn
        .ctx
        .metadata
        .check_lock_for_io(&open.handle, open.session_id, request.offset, request.length as u64, false)
        .await
    {
        return Reply::Error(err.to_status());
    }

    // Symlinks are served as MFsymlink content generated on the fly.
    if open.is_symlink {
        let node = match conn.ctx.metadata.get_file(&auth, &open.handle).await {
            Ok(node) => node,
            Err(err) => return Reply::Error(err.to_status()),
        };
        let target = node.symlink_target.unwrap_or_default();
        let Some(content) = mfsymlink::encode(&target) else {
            return Reply::Error(Status::UnexpectedIoError);
        };
        let offset = request.offset as usize;
        if offset >= content.len() {
            return Reply::Error(Status::EndOfFile);
        }
        let end = (offset + request.length as usize).min(content.len());
        return Reply::Ok(ReadResponse { buffer: content[offset..end].to_vec() }.into());
    }

    let meta = match conn.ctx.metadata.prepare_read(&auth, &open.handle).await {
        Ok(meta) => meta,
        Err(err) => return Reply::Error(err.to_status()),
    };
    if request.offset >= meta.node.size {
        return Reply::Error(Status::EndOfFile);
    }
    let want = (request.length as u64).min(meta.node.size - request.offset) as usize;
    let mut buffer = vec![0u8; want];
    if !meta.payload_id.is_empty() && want > 0 {
        match conn.ctx.content.read_at(&meta.payload_id, &mut buffer, request.offset).await {
            Ok(n) => buffer.truncate(n),
            Err(err) => return Reply::Error(err.to_status()),
        }
    }
    if buffer.is_empty() {
        return Reply::Error(Status::EndOfFile);
    }
    Reply::Ok(ReadResponse { buffer }.into())
}

pub(crate) async fn handle_write(
    conn: &mut Connection,
    header: &Header,
    request: WriteRequest,
) -> Reply {
    let session = match require_session(conn, header) {
        Ok(session) => session,
        Err(status) => return Reply::Error(status),
    };
    let tree = match require_tree(conn, header) {
        Ok(tree) => tree,
        Err(status) => return Reply::Error(status),
    };
    let open = match resolve_open(conn, header, request.file_id) {
        Ok(open) => open,
        Err(status) => return Reply::Error(status),
    };
    let open = open.lock().await;

    // Pipe writes feed the RPC layer; the reply waits for the next READ.
    if open.is_pipe {
        let Some(pipe) = conn.ctx.state.pipe(open.file_id) else {
            return Reply::Error(Status::FileClosed);
        };
        let shares = rpc_share_list(conn);
        let mut pipe = pipe.lock().await;
        if let Some(response) = rpc::handle_pdu(&request.data, &shares) {
            pipe.set_response(response);
        }
        return Reply::Ok(WriteResponse { count: request.data.len() as u32 }.into());
    }

    if open.is_directory {
        return Reply::Error(Status::InvalidDeviceRequest);
    }
    if !tree.writable() {
        return Reply::Error(Status::AccessDenied);
    }

    let auth = session.auth_context();
    if let Err(err) = conn
        .ctx
        .metadata
        .check_lock_for_io(
            &open.handle,
            open.session_id,
            request.offset,
            request.data.len() as u64,
            true,
        )
        .await
    {
        return Reply::Error(err.to_status());
    }

    let meta = match conn.ctx.metadata.prepare_read(&auth, &open.handle).await {
        Ok(meta) => meta,
        Err(err) => return Reply::Error(err.to_status()),
    };
    if meta.payload_id.is_empty() {
        return Reply::Error(Status::UnexpectedIoError);
    }
    let written = match conn
        .ctx
        .content
        .write_at(&meta.payload_id, &request.data, request.offset)
        .await
    {
        Ok(written) => written,
        Err(err) => return Reply::Error(err.to_status()),
    };

    // Grow the recorded size when the write extended the file, then restore
    // frozen timestamps that the write would otherwise have bumped.
    let end = request.offset + written as u64;
    if end > meta.node.size {
        let update = conn
            .ctx
            .metadata
            .set_file_attributes(&auth, &open.handle, &SetAttrs::size(end))
            .await;
        if let Err(err) = update {
            return Reply::Error(err.to_status());
        }
    }
    reapply_frozen_times(conn, &auth, &open).await;

    Reply::Ok(WriteResponse { count: written as u32 }.into())
}

/// Re-stamps frozen mtime/ctime after an operation that auto-updates them;
/// otherwise records a pending mtime update.
pub(crate) async fn reapply_frozen_times(
    conn: &Connection,
    auth: &crate::vfs::AuthContext,
    open: &crate::state::OpenFile,
) {
    if open.frozen.mtime.is_some() || open.frozen.ctime.is_some() {
        let attrs = SetAttrs {
            mtime: open.frozen.mtime,
            ctime: open.frozen.ctime,
            ..SetAttrs::default()
        };
        if let Err(err) = conn.ctx.metadata.set_file_attributes(auth, &open.handle, &attrs).await {
            log::debug!("re-applying frozen timestamps on {} failed: {err}", open.path);
        }
    } else if let Err(err) =
        conn.ctx.metadata.update_pending_mtime(&open.handle, FileTime::now()).await
    {
        log::debug!("recording pending mtime on {} failed: {err}", open.path);
    }
}

pub(crate) async fn handle_flush(
    conn: &mut Connection,
    header: &Header,
    request: FlushRequest,
) -> Reply {
    let session = match require_session(conn, header) {
        Ok(session) => session,
        Err(status) => return Reply::Error(status),
    };
    let open = match resolve_open(conn, header, request.file_id) {
        Ok(open) => open,
        Err(_) => return Reply::Error(Status::FileClosed),
    };
    let open = open.lock().await;
    if open.is_pipe {
        return Reply::Ok(FlushResponse::default().into());
    }

    // Content durability is blocking and fatal on failure; the metadata
    // write-back failing is only a warning once the payload is durable.
    if !open.is_directory && !open.payload_id.is_empty() {
        if let Err(err) = conn.ctx.content.flush(&open.payload_id).await {
            log::warn!("flush: content flush failed for {}: {err}", open.path);
            return Reply::Error(Status::UnexpectedIoError);
        }
    }
    let auth = session.auth_context();
    if let Err(err) = conn.ctx.metadata.flush_pending_write_for_file(&auth, &open.handle).await {
        log::warn!("flush: metadata flush failed for {}: {err}", open.path);
    }
    Reply::Ok(FlushResponse::default().into())
}

/// The share list advertised over srvsvc.
fn rpc_share_list(conn: &Connection) -> Vec<rpc::RpcShare> {
    let mut shares: Vec<rpc::RpcShare> = conn
        .ctx
        .config
        .shares
        .iter()
        .map(|share| rpc::RpcShare {
            name: share.name.clone(),
            is_ipc: false,
            remark: String::new(),
        })
        .collect();
    shares.push(rpc::RpcShare {
        name: "IPC$".to_string(),
        is_ipc: true,
        remark: "IPC Service".to_string(),
    });
    shares
}
