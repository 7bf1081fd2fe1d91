//! CREATE: path walking, disposition handling, create contexts and
//! oplock/lease grants.

use smb_dtyp::binrw_util::prelude::FileTime;
use smb_fscc::FileAttributes;
use smb_msg::{
    CTX_NAME_LEASE, CTX_NAME_MAXIMAL_ACCESS, CTX_NAME_QUERY_ON_DISK_ID, CreateAction,
    CreateContext, CreateRequest, CreateResponse, Dialect, FileId, Header, MaximalAccessResponse,
    OplockLevel, QueryOnDiskIdResponse, RequestLeaseV1, RequestLeaseV2, Status,
};
use smb_fscc::NotifyAction;

use super::{Reply, require_session, require_tree};
use crate::connection::Connection;
use crate::mfsymlink::MFSYMLINK_SIZE;
use crate::notify::ChangeEvent;
use crate::oplocks::{lease_state_bits, lease_state_from_bits};
use crate::pipes::{self, PipeState};
use crate::sd;
use crate::state::{FrozenTimes, OpenFile, TreeEntry};
use crate::vfs::{AuthContext, FileHandle, FileNode, SetAttrs, VfsError};
use crate::{CLUSTER_SIZE, allocation_size};

/// Normalizes a CREATE name: backslashes to forward slashes, no leading
/// slash, NTFS default-stream suffixes stripped.
pub(crate) fn normalize_name(name: &str) -> String {
    let mut name = name.replace('\\', "/");
    while name.starts_with('/') {
        name.remove(0);
    }
    for suffix in ["::$DATA", "::$INDEX_ALLOCATION"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped.to_string();
            break;
        }
    }
    name
}

/// The effective end-of-file: symlinks report the MFsymlink wire size.
pub(crate) fn effective_size(node: &FileNode) -> u64 {
    if node.is_symlink() { MFSYMLINK_SIZE as u64 } else { node.size }
}

/// Wire attributes for a node.
pub(crate) fn node_attributes(node: &FileNode) -> FileAttributes {
    let mut attributes = FileAttributes::new();
    if node.is_directory() {
        attributes.set_directory(true);
    } else {
        attributes.set_archive(true);
    }
    if node.is_symlink() {
        attributes.set_reparse_point(true);
    }
    if node.hidden {
        attributes.set_hidden(true);
    }
    if node.mode & 0o200 == 0 {
        attributes.set_readonly(true);
    }
    attributes
}

/// Walks from the share root to the parent directory of `path`, returning
/// the parent handle, the parent's share-relative path, and the final name
/// component. `.` is a no-op, `..` climbs (clamped at the root), missing
/// intermediate components yield OBJECT_PATH_NOT_FOUND.
pub(crate) async fn walk_to_parent(
    conn: &Connection,
    auth: &AuthContext,
    share: &str,
    path: &str,
) -> Result<(FileHandle, String, String), Status> {
    let root = conn
        .ctx
        .metadata
        .get_root_handle(share)
        .await
        .map_err(|e| e.to_status())?;

    let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let name = components.pop().unwrap_or_default().to_string();

    let mut stack: Vec<(FileHandle, String)> = vec![(root, String::new())];
    for component in components {
        match component {
            "." => {}
            ".." => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            other => {
                let (parent, parent_path) = stack.last().unwrap();
                let node = match conn.ctx.metadata.lookup(auth, parent, other).await {
                    Ok(node) => node,
                    Err(VfsError::NotFound) => return Err(Status::ObjectPathNotFound),
                    Err(err) => return Err(err.to_status()),
                };
                if !node.is_directory() {
                    return Err(Status::NotADirectory);
                }
                let child_path = if parent_path.is_empty() {
                    other.to_string()
                } else {
                    format!("{parent_path}/{other}")
                };
                let handle = conn.ctx.metadata.encode_file_handle(&node);
                stack.push((handle, child_path));
            }
        }
    }
    let (parent, parent_path) = stack.pop().unwrap();
    Ok((parent, parent_path, name))
}

pub(crate) async fn handle(
    conn: &mut Connection,
    header: &Header,
    request: CreateRequest,
) -> Reply {
    let session = match require_session(conn, header) {
        Ok(session) => session,
        Err(status) => return Reply::Error(status),
    };
    let tree = match require_tree(conn, header) {
        Ok(tree) => tree,
        Err(status) => return Reply::Error(status),
    };
    if tree.is_pipe() {
        return pipe_create(conn, header, &tree, &request);
    }

    let auth = session.auth_context();
    let path = normalize_name(request.name.as_str());
    let (parent, parent_path, name) =
        match walk_to_parent(conn, &auth, &tree.share, &path).await {
            Ok(walked) => walked,
            Err(status) => return Reply::Error(status),
        };

    // Existence check; an empty name opens the share root itself.
    let existing = if name.is_empty() {
        match conn.ctx.metadata.get_file(&auth, &parent).await {
            Ok(node) => Some(node),
            Err(err) => return Reply::Error(err.to_status()),
        }
    } else {
        match conn.ctx.metadata.lookup(&auth, &parent, &name).await {
            Ok(node) => Some(node),
            Err(VfsError::NotFound) => None,
            Err(err) => return Reply::Error(err.to_status()),
        }
    };

    // Directory/file intent must agree with what exists.
    if let Some(node) = &existing {
        if node.is_directory() && request.create_options.non_directory_file() {
            return Reply::Error(Status::FileIsADirectory);
        }
        if !node.is_directory() && request.create_options.directory_file() {
            return Reply::Error(Status::NotADirectory);
        }
    }

    use smb_msg::CreateDisposition as D;
    let action = match (request.create_disposition, existing.is_some()) {
        (D::Open, true) => CreateAction::Opened,
        (D::Open, false) => return Reply::Error(Status::ObjectNameNotFound),
        (D::Create, true) => return Reply::Error(Status::ObjectNameCollision),
        (D::Create, false) => CreateAction::Created,
        (D::OpenIf, true) => CreateAction::Opened,
        (D::OpenIf, false) => CreateAction::Created,
        (D::Overwrite, true) => CreateAction::Overwritten,
        (D::Overwrite, false) => return Reply::Error(Status::ObjectNameNotFound),
        (D::OverwriteIf, true) => CreateAction::Overwritten,
        (D::OverwriteIf, false) => CreateAction::Created,
        (D::Supersede, true) => CreateAction::Superseded,
        (D::Supersede, false) => CreateAction::Created,
    };

    // Anything but a plain open mutates the tree.
    if action != CreateAction::Opened && !tree.writable() {
        return Reply::Error(Status::AccessDenied);
    }

    let node = match action {
        CreateAction::Opened => existing.unwrap(),
        CreateAction::Created => {
            let is_directory = request.create_options.directory_file();
            let mut mode = if is_directory { 0o755 } else { 0o644 };
            if request.file_attributes.readonly() {
                mode &= !0o222;
            }
            let attrs = SetAttrs {
                mode: Some(mode),
                uid: Some(auth.uid),
                gid: Some(auth.gid),
                hidden: Some(request.file_attributes.hidden()),
                ..SetAttrs::default()
            };
            let created = if is_directory {
                conn.ctx.metadata.create_directory(&auth, &parent, &name, &attrs).await
            } else {
                conn.ctx.metadata.create_file(&auth, &parent, &name, &attrs).await
            };
            match created {
                Ok(node) => node,
                Err(err) => return Reply::Error(err.to_status()),
            }
        }
        CreateAction::Overwritten | CreateAction::Superseded => {
            let node = existing.unwrap();
            if node.is_directory() {
                return Reply::Error(Status::FileIsADirectory);
            }
            match conn
                .ctx
                .metadata
                .set_file_attributes(&auth, &node.handle, &SetAttrs::size(0))
                .await
            {
                Ok(node) => node,
                Err(err) => return Reply::Error(err.to_status()),
            }
        }
    };

    let file_id = conn.ctx.state.allocate_file_id(conn.ctx.engine_tag);
    let full_path =
        if parent_path.is_empty() { name.clone() } else { format!("{parent_path}/{name}") };

    // Create contexts: lease request first (it decides the oplock level),
    // then maximal access and on-disk ID.
    let mut response_contexts: Vec<CreateContext> = Vec::new();
    let mut granted_oplock = OplockLevel::None;
    let mut lease_key = None;

    let dialect = conn.crypto.dialect.unwrap_or(Dialect::Smb0202);
    let lease_ctx = request.contexts.find(CTX_NAME_LEASE);
    if let Some(ctx) = lease_ctx.filter(|_| dialect >= Dialect::Smb021) {
        if let Some(reply_ctx) = process_lease_request(conn, &tree, &full_path, &node, file_id, ctx)
        {
            response_contexts.push(reply_ctx);
            granted_oplock = OplockLevel::Lease;
            lease_key = ctx
                .parse_data::<RequestLeaseV2>()
                .ok()
                .map(|l| l.lease_key)
                .or_else(|| ctx.parse_data::<RequestLeaseV1>().ok().map(|l| l.lease_key));
        }
    }
    if granted_oplock == OplockLevel::None {
        if let Some(requested) = OplockLevel::from_u8(request.requested_oplock_level) {
            if requested != OplockLevel::None && requested != OplockLevel::Lease {
                granted_oplock =
                    conn.ctx.oplocks.request_oplock(&tree.share, &full_path, requested, file_id);
            }
        }
    }

    if request.contexts.find(CTX_NAME_MAXIMAL_ACCESS).is_some() {
        let maximal = sd::maximal_access(&node, auth.uid, auth.gid, &auth.gids);
        response_contexts.push(CreateContext::from_value(
            CTX_NAME_MAXIMAL_ACCESS,
            &MaximalAccessResponse {
                query_status: Status::Success as u32,
                maximal_access: smb_fscc::FileAccessMask::from_raw(maximal),
            },
        ));
    }
    if request.contexts.find(CTX_NAME_QUERY_ON_DISK_ID).is_some() {
        response_contexts.push(CreateContext::from_value(
            CTX_NAME_QUERY_ON_DISK_ID,
            &QueryOnDiskIdResponse {
                disk_file_id: node.file_uuid,
                volume_id: conn.ctx.server_guid.to_bytes(),
            },
        ));
    }

    let open = OpenFile {
        file_id,
        session_id: session.id,
        tree_id: tree.tree_id,
        share: tree.share.clone(),
        path: full_path.clone(),
        name: name.clone(),
        parent,
        handle: node.handle.clone(),
        payload_id: node.payload_id.clone(),
        is_directory: node.is_directory(),
        is_pipe: false,
        is_symlink: node.is_symlink(),
        desired_access: request.desired_access.to_raw(),
        create_options: request.create_options.to_raw(),
        delete_pending: request.create_options.delete_on_close(),
        oplock_level: granted_oplock as u8,
        lease_key,
        frozen: FrozenTimes::default(),
        dir_cursor: None,
    };
    conn.ctx.state.insert_open(open);
    conn.chain_file_id = Some(file_id);

    // Watchers on the parent directory learn about the outcome.
    if !name.is_empty() {
        let event_action = match action {
            CreateAction::Created => Some(NotifyAction::Added),
            CreateAction::Overwritten | CreateAction::Superseded => Some(NotifyAction::Modified),
            _ => None,
        };
        if let Some(event_action) = event_action {
            conn.ctx.notifications.post(
                &tree.share,
                &parent_path,
                &[ChangeEvent { action: event_action, name: name.clone() }],
            );
        }
    }

    let end_of_file = effective_size(&node);
    Reply::Ok(
        CreateResponse {
            oplock_level: granted_oplock as u8,
            flags: 0,
            create_action: action,
            creation_time: node.crtime,
            last_access_time: node.atime,
            last_write_time: node.mtime,
            change_time: node.ctime,
            allocation_size: allocation_size(end_of_file),
            end_of_file,
            file_attributes: node_attributes(&node),
            file_id,
            contexts: response_contexts.into(),
        }
        .into(),
    )
}

/// Handles the RqLs context: asks the lease manager for a grant and builds
/// the response context in the same (v1/v2) shape the client used.
fn process_lease_request(
    conn: &Connection,
    tree: &TreeEntry,
    path: &str,
    node: &FileNode,
    file_id: FileId,
    ctx: &CreateContext,
) -> Option<CreateContext> {
    if ctx.data.len() >= 52 {
        let lease: RequestLeaseV2 = ctx.parse_data().ok()?;
        let grant = conn.ctx.oplocks.request_lease(
            &tree.share,
            path,
            lease.lease_key,
            lease_state_bits(lease.lease_state),
            node.is_directory(),
            file_id,
        );
        let mut flags = lease.lease_flags & smb_msg::LEASE_FLAG_PARENT_LEASE_KEY_SET;
        if grant.break_in_progress {
            flags |= smb_msg::LEASE_FLAG_BREAK_IN_PROGRESS;
        }
        Some(CreateContext::from_value(
            CTX_NAME_LEASE,
            &RequestLeaseV2 {
                lease_key: lease.lease_key,
                lease_state: lease_state_from_bits(grant.state),
                lease_flags: flags,
                lease_duration: 0,
                parent_lease_key: lease.parent_lease_key,
                epoch: grant.epoch,
            },
        ))
    } else {
        let lease: RequestLeaseV1 = ctx.parse_data().ok()?;
        let grant = conn.ctx.oplocks.request_lease(
            &tree.share,
            path,
            lease.lease_key,
            lease_state_bits(lease.lease_state),
            node.is_directory(),
            file_id,
        );
        let mut flags = 0;
        if grant.break_in_progress {
            flags |= smb_msg::LEASE_FLAG_BREAK_IN_PROGRESS;
        }
        Some(CreateContext::from_value(
            CTX_NAME_LEASE,
            &RequestLeaseV1 {
                lease_key: lease.lease_key,
                lease_state: lease_state_from_bits(grant.state),
                lease_flags: flags,
                lease_duration: 0,
            },
        ))
    }
}

/// CREATE on the IPC$ tree: allocate pipe state for a supported pipe.
fn pipe_create(
    conn: &mut Connection,
    header: &Header,
    tree: &TreeEntry,
    request: &CreateRequest,
) -> Reply {
    let pipe_name = pipes::normalize_pipe_name(&normalize_name(request.name.as_str()));
    if !pipes::is_supported_pipe(&pipe_name) {
        return Reply::Error(Status::ObjectNameNotFound);
    }

    let file_id = conn.ctx.state.allocate_file_id(conn.ctx.engine_tag);
    conn.ctx.state.insert_open(OpenFile {
        file_id,
        session_id: header.session_id,
        tree_id: tree.tree_id,
        share: tree.share.clone(),
        path: pipe_name.clone(),
        name: pipe_name.clone(),
        parent: FileHandle(Vec::new()),
        handle: FileHandle(Vec::new()),
        payload_id: String::new(),
        is_directory: false,
        is_pipe: true,
        is_symlink: false,
        desired_access: request.desired_access.to_raw(),
        create_options: request.create_options.to_raw(),
        delete_pending: false,
        oplock_level: OplockLevel::None as u8,
        lease_key: None,
        frozen: FrozenTimes::default(),
        dir_cursor: None,
    });
    conn.ctx.state.insert_pipe(file_id, PipeState::new(pipe_name));
    conn.chain_file_id = Some(file_id);

    let now = FileTime::now();
    let mut attributes = FileAttributes::new();
    attributes.set_normal(true);
    Reply::Ok(
        CreateResponse {
            oplock_level: OplockLevel::None as u8,
            flags: 0,
            create_action: CreateAction::Opened,
            creation_time: now,
            last_access_time: now,
            last_write_time: now,
            change_time: now,
            allocation_size: CLUSTER_SIZE,
            end_of_file: 0,
            file_attributes: attributes,
            file_id,
            contexts: Default::default(),
        }
        .into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_normalize() {
        assert_eq!(normalize_name("a\\b.txt"), "a/b.txt");
        assert_eq!(normalize_name("\\a\\b.txt"), "a/b.txt");
        assert_eq!(normalize_name("a\\b.txt::$DATA"), "a/b.txt");
        assert_eq!(normalize_name("dir::$INDEX_ALLOCATION"), "dir");
        assert_eq!(normalize_name(""), "");
    }
}
