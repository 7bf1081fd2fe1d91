//! SET_INFO: basic attributes with frozen-timestamp sentinels, rename,
//! disposition, truncation, and security descriptors.

use binrw::BinRead;

use smb_dtyp::SecurityDescriptor;
use smb_fscc::{
    FileAllocationInformation, FileBasicInformation, FileDispositionInformation,
    FileDispositionInformationEx, FileEndOfFileInformation, FileRenameInformation,
    SetFileInfoClass,
};
use smb_fscc::NotifyAction;
use smb_msg::{Header, InfoType, SetInfoRequest, SetInfoResponse, Status};

use super::create::{normalize_name, walk_to_parent};
use super::file::reapply_frozen_times;
use super::{Reply, require_session, require_tree, resolve_open};
use crate::connection::Connection;
use crate::notify::ChangeEvent;
use crate::state::OpenFile;
use crate::vfs::{AuthContext, SetAttrs, VfsError};

/// FILETIME sentinels on the set path: all three mean "leave unchanged";
/// the top two additionally freeze/thaw the timestamp for this handle.
const TIME_UNCHANGED: u64 = 0;
const TIME_FREEZE: u64 = u64::MAX;
const TIME_THAW: u64 = u64::MAX - 1;

fn parse<T>(buffer: &[u8]) -> Result<T, Status>
where
    T: for<'a> BinRead<Args<'a> = ()>,
{
    T::read_le(&mut std::io::Cursor::new(buffer)).map_err(|_| Status::InfoLengthMismatch)
}

pub(crate) async fn handle(
    conn: &mut Connection,
    header: &Header,
    request: SetInfoRequest,
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
    let mut open = open.lock().await;
    if open.is_pipe {
        return Reply::Error(Status::NotSupported);
    }
    if !tree.writable() {
        return Reply::Error(Status::AccessDenied);
    }
    let auth = session.auth_context();

    let status = match InfoType::from_u8(request.info_type) {
        Some(InfoType::File) => match SetFileInfoClass::from_u8(request.info_class) {
            Some(SetFileInfoClass::Basic) => {
                set_basic(conn, &auth, &mut open, &request.buffer).await
            }
            Some(SetFileInfoClass::Rename) => {
                set_rename(conn, &auth, &mut open, &request.buffer).await
            }
            Some(SetFileInfoClass::Disposition) => {
                let info: FileDispositionInformation = match parse(&request.buffer) {
                    Ok(info) => info,
                    Err(status) => return Reply::Error(status),
                };
                set_disposition(&mut open, info.delete_pending.into())
            }
            Some(SetFileInfoClass::DispositionEx) => {
                let info: FileDispositionInformationEx = match parse(&request.buffer) {
                    Ok(info) => info,
                    Err(status) => return Reply::Error(status),
                };
                set_disposition(
                    &mut open,
                    info.flags & FileDispositionInformationEx::FLAG_DELETE != 0,
                )
            }
            Some(SetFileInfoClass::EndOfFile) => {
                set_end_of_file(conn, &auth, &open, &request.buffer).await
            }
            Some(SetFileInfoClass::Position) => {
                // The server tracks no offsets; validated and ignored.
                parse::<smb_fscc::FilePositionInformation>(&request.buffer).map(|_| ())
            }
            Some(SetFileInfoClass::Allocation) => {
                parse::<FileAllocationInformation>(&request.buffer).map(|_| ())
            }
            Some(SetFileInfoClass::Link) => Err(Status::NotSupported),
            _ => Err(Status::NotSupported),
        },
        Some(InfoType::Security) => set_security(conn, &auth, &open, &request).await,
        Some(InfoType::FileSystem) | Some(InfoType::Quota) => Err(Status::NotSupported),
        None => Err(Status::InvalidInfoClass),
    };

    match status {
        Ok(()) => Reply::Ok(SetInfoResponse::default().into()),
        Err(status) => Reply::Error(status),
    }
}

/// One FILETIME from the set path: `Ok(None)` means leave unchanged.
fn time_change(value: u64) -> Option<smb_dtyp::binrw_util::prelude::FileTime> {
    match value {
        TIME_UNCHANGED | TIME_FREEZE | TIME_THAW => None,
        other => Some(other.into()),
    }
}

async fn set_basic(
    conn: &Connection,
    auth: &AuthContext,
    open: &mut OpenFile,
    buffer: &[u8],
) -> Result<(), Status> {
    if buffer.len() < FileBasicInformation::SIZE {
        return Err(Status::InfoLengthMismatch);
    }
    let info: FileBasicInformation = parse(buffer)?;

    // Attribute bits must agree with what the handle is.
    if info.file_attributes.directory() && !open.is_directory {
        return Err(Status::InvalidParameter);
    }
    if info.file_attributes.temporary() && open.is_directory {
        return Err(Status::InvalidParameter);
    }

    // An all-zero attribute word means "leave attributes alone".
    let attributes_raw =
        u32::from_le_bytes(smb_fscc::FileAttributes::into_bytes(info.file_attributes));
    let attrs = SetAttrs {
        atime: time_change(info.last_access_time.value),
        mtime: time_change(info.last_write_time.value),
        ctime: time_change(info.change_time.value),
        crtime: time_change(info.creation_time.value),
        hidden: (attributes_raw != 0).then_some(info.file_attributes.hidden()),
        ..SetAttrs::default()
    };
    conn.ctx
        .metadata
        .set_file_attributes(auth, &open.handle, &attrs)
        .await
        .map_err(|e| e.to_status())?;

    // Freeze captures the value as it stands after the other effects of
    // this call; thaw restores the store's behavior.
    let wants_freeze = [
        info.last_access_time.value,
        info.last_write_time.value,
        info.change_time.value,
    ]
    .contains(&TIME_FREEZE);
    let node = if wants_freeze {
        Some(conn.ctx.metadata.get_file(auth, &open.handle).await.map_err(|e| e.to_status())?)
    } else {
        None
    };
    for (value, slot, current) in [
        (info.last_access_time.value, &mut open.frozen.atime, node.as_ref().map(|n| n.atime)),
        (info.last_write_time.value, &mut open.frozen.mtime, node.as_ref().map(|n| n.mtime)),
        (info.change_time.value, &mut open.frozen.ctime, node.as_ref().map(|n| n.ctime)),
    ] {
        match value {
            TIME_FREEZE => *slot = current,
            TIME_THAW => *slot = None,
            _ => {}
        }
    }
    Ok(())
}

async fn set_rename(
    conn: &Connection,
    auth: &AuthContext,
    open: &mut OpenFile,
    buffer: &[u8],
) -> Result<(), Status> {
    let info: FileRenameInformation = parse(buffer)?;
    let replace: bool = info.replace_if_exists.into();
    let target = normalize_name(info.file_name.as_str());
    if target.is_empty() {
        return Err(Status::ObjectNameInvalid);
    }

    // A zero RootDirectory means a full share-relative path; a nonzero one
    // is treated as a rename within the file's current directory.
    let (to_parent, to_parent_path, to_name) = if info.root_directory == 0 {
        walk_to_parent(conn, auth, &open.share, &target).await?
    } else {
        let parent_path = match open.path.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };
        let name = target.rsplit_once('/').map(|(_, n)| n.to_string()).unwrap_or(target.clone());
        (open.parent.clone(), parent_path, name)
    };

    match conn.ctx.metadata.lookup(auth, &to_parent, &to_name).await {
        Ok(_) if !replace => return Err(Status::ObjectNameCollision),
        Ok(_) => {
            conn.ctx
                .metadata
                .remove_file(auth, &to_parent, &to_name)
                .await
                .map_err(|e| e.to_status())?;
        }
        Err(VfsError::NotFound) => {}
        Err(err) => return Err(err.to_status()),
    }

    conn.ctx
        .metadata
        .rename(auth, &open.parent, &open.name, &to_parent, &to_name)
        .await
        .map_err(|e| e.to_status())?;

    let from_parent_path = match open.path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    };
    let from_name = open.name.clone();

    // A successful rename clears any delete-on-close and rebinds the
    // handle.
    open.delete_pending = false;
    open.parent = to_parent;
    open.name = to_name.clone();
    open.path = if to_parent_path.is_empty() {
        to_name.clone()
    } else {
        format!("{to_parent_path}/{to_name}")
    };

    // Watchers get the rename as one old/new pair: registrations are
    // one-shot, so the pair must land in a single response.
    if from_parent_path == to_parent_path {
        conn.ctx.notifications.post(
            &open.share,
            &from_parent_path,
            &[
                ChangeEvent { action: NotifyAction::RenamedOldName, name: from_name },
                ChangeEvent { action: NotifyAction::RenamedNewName, name: to_name },
            ],
        );
    } else {
        conn.ctx.notifications.post(
            &open.share,
            &from_parent_path,
            &[ChangeEvent { action: NotifyAction::Removed, name: from_name }],
        );
        conn.ctx.notifications.post(
            &open.share,
            &to_parent_path,
            &[ChangeEvent { action: NotifyAction::Added, name: to_name }],
        );
    }
    Ok(())
}

fn set_disposition(open: &mut OpenFile, delete: bool) -> Result<(), Status> {
    // The share root cannot be marked for deletion.
    if open.name.is_empty() && delete {
        return Err(Status::AccessDenied);
    }
    open.delete_pending = delete;
    Ok(())
}

async fn set_end_of_file(
    conn: &Connection,
    auth: &AuthContext,
    open: &OpenFile,
    buffer: &[u8],
) -> Result<(), Status> {
    let info: FileEndOfFileInformation = parse(buffer)?;
    if open.is_directory {
        return Err(Status::FileIsADirectory);
    }
    conn.ctx
        .metadata
        .set_file_attributes(auth, &open.handle, &SetAttrs::size(info.end_of_file))
        .await
        .map_err(|e| e.to_status())?;
    reapply_frozen_times(conn, auth, open).await;
    Ok(())
}

async fn set_security(
    conn: &Connection,
    auth: &AuthContext,
    open: &OpenFile,
    request: &SetInfoRequest,
) -> Result<(), Status> {
    let descriptor =
        SecurityDescriptor::parse(&request.buffer).map_err(|_| Status::InvalidParameter)?;
    let attrs = crate::sd::security_descriptor_to_attrs(
        conn.ctx.mapper.as_ref(),
        &descriptor,
        request.additional_information,
    );
    conn.ctx
        .metadata
        .set_file_attributes(auth, &open.handle, &attrs)
        .await
        .map_err(|e| e.to_status())?;
    Ok(())
}
