//! TREE_CONNECT and TREE_DISCONNECT: share resolution and permission
//! capping.

use smb_msg::{
    Header, ShareType, Status, TreeConnectRequest, TreeConnectResponse, TreeDisconnectResponse,
};

use super::{Reply, require_session};
use crate::connection::Connection;
use crate::sd::ACCESS_FULL;
use crate::state::TreeEntry;
use crate::vfs::SharePermission;

/// MaximalAccess reported for IPC$: READ/WRITE/APPEND DATA + READ/WRITE EA.
const IPC_MAXIMAL_ACCESS: u32 = 0x0000_001f;
/// MaximalAccess for read-only tree connects.
const READ_MAXIMAL_ACCESS: u32 = 0x0012_0089;

/// Extracts the share component of `\\server\share` and normalizes it.
fn share_from_unc(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches(['\\', '/']);
    let share = trimmed.split(['\\', '/']).nth(1)?;
    if share.is_empty() {
        return None;
    }
    Some(share.to_ascii_lowercase())
}

pub(crate) async fn handle(
    conn: &mut Connection,
    header: &Header,
    request: TreeConnectRequest,
) -> Reply {
    if request.flags.extension_present() {
        return Reply::Error(Status::NotSupported);
    }
    let session = match require_session(conn, header) {
        Ok(session) => session,
        Err(status) => return Reply::Error(status),
    };
    let Some(share) = share_from_unc(request.path.as_str()) else {
        return Reply::Error(Status::BadNetworkName);
    };

    // IPC$ is a virtual pipe share available to any live session.
    if share == "ipc$" {
        let tree_id = conn.ctx.state.allocate_tree_id();
        conn.ctx.state.insert_tree(TreeEntry {
            tree_id,
            session_id: session.id,
            share: share.clone(),
            share_type: ShareType::Pipe,
            permission: SharePermission::ReadWrite,
        });
        conn.reply_tree_id = Some(tree_id);
        return Reply::Ok(
            TreeConnectResponse {
                share_type: ShareType::Pipe,
                share_flags: 0,
                capabilities: 0,
                maximal_access: IPC_MAXIMAL_ACCESS,
            }
            .into(),
        );
    }

    let Some(config) = conn.ctx.config.share(&share).cloned() else {
        return Reply::Error(Status::BadNetworkName);
    };

    // Root gets administrative access when the squash mode permits;
    // otherwise the user store decides, falling back to the share default.
    let mut permission = match &session.user {
        Some(user) if user.uid == 0 && config.squash.admin_for_root() => SharePermission::Admin,
        Some(user) => conn
            .ctx
            .users
            .resolve_share_permission(user, &share)
            .await
            .unwrap_or(config.default_permission),
        None => config.default_permission,
    };
    if config.read_only {
        permission = permission.min(SharePermission::Read);
    }
    if permission == SharePermission::None {
        return Reply::Error(Status::AccessDenied);
    }

    let maximal_access = match permission {
        SharePermission::Admin | SharePermission::ReadWrite => ACCESS_FULL,
        _ => READ_MAXIMAL_ACCESS,
    };
    let tree_id = conn.ctx.state.allocate_tree_id();
    conn.ctx.state.insert_tree(TreeEntry {
        tree_id,
        session_id: session.id,
        share: share.clone(),
        share_type: ShareType::Disk,
        permission,
    });
    conn.reply_tree_id = Some(tree_id);
    log::debug!("session {:#x} connected to {share} as tree {tree_id}", session.id);
    Reply::Ok(
        TreeConnectResponse {
            share_type: ShareType::Disk,
            share_flags: 0,
            capabilities: 0,
            maximal_access,
        }
        .into(),
    )
}

pub(crate) async fn handle_disconnect(conn: &mut Connection, header: &Header) -> Reply {
    if require_session(conn, header).is_err() {
        return Reply::Error(Status::UserSessionDeleted);
    }
    let Some(tree_id) = header.tree_id else {
        return Reply::Error(Status::NetworkNameDeleted);
    };
    match conn.ctx.state.remove_tree(header.session_id, tree_id) {
        Some(_) => Reply::Ok(TreeDisconnectResponse::default().into()),
        None => Reply::Error(Status::NetworkNameDeleted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unc_parsing() {
        assert_eq!(share_from_unc(r"\\gw\Projects"), Some("projects".into()));
        assert_eq!(share_from_unc(r"\\gw\IPC$"), Some("ipc$".into()));
        assert_eq!(share_from_unc(r"\\gw"), None);
        assert_eq!(share_from_unc(r""), None);
    }
}
