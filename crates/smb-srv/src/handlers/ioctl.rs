//! IOCTL: the FSCTL dispatch table.

use binrw::{BinRead, BinWrite};

use smb_msg::{
    FSCTL_GET_NTFS_VOLUME_DATA, FSCTL_GET_REPARSE_POINT, FSCTL_PIPE_TRANSCEIVE,
    FSCTL_READ_FILE_USN_DATA, FSCTL_SRV_ENUMERATE_SNAPSHOTS, FSCTL_VALIDATE_NEGOTIATE_INFO,
    Header, IoctlRequest, IoctlResponse, NegotiateSecurityMode, NtfsVolumeData, Status,
    SrvSnapshotArray, SymlinkReparseBuffer, UsnRecord, ValidateNegotiateInfoRequest,
    ValidateNegotiateInfoResponse, SYMLINK_FLAG_RELATIVE,
};

use super::create::node_attributes;
use super::{Reply, require_session, require_tree, resolve_open};
use crate::connection::Connection;
use crate::rpc;
use crate::vfs::FileNode;
use crate::{CLUSTER_SIZE, SECTOR_SIZE, VOLUME_SERIAL};

fn encode<T: for<'a> BinWrite<Args<'a> = ()>>(value: &T) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    value.write_le(&mut cursor).expect("in-memory write");
    cursor.into_inner()
}

pub(crate) async fn handle(
    conn: &mut Connection,
    header: &Header,
    request: IoctlRequest,
) -> Reply {
    let session = match require_session(conn, header) {
        Ok(session) => session,
        Err(status) => return Reply::Error(status),
    };
    if !request.flags.is_fsctl() {
        return Reply::Error(Status::NotSupported);
    }

    let output = match request.ctl_code {
        FSCTL_VALIDATE_NEGOTIATE_INFO => validate_negotiate(conn, &request),
        FSCTL_SRV_ENUMERATE_SNAPSHOTS => Ok(encode(&SrvSnapshotArray::default())),
        FSCTL_PIPE_TRANSCEIVE => pipe_transceive(conn, header, &request).await,
        FSCTL_GET_REPARSE_POINT => get_reparse_point(conn, header, &request, &session).await,
        FSCTL_GET_NTFS_VOLUME_DATA => ntfs_volume_data(conn, header, &request).await,
        FSCTL_READ_FILE_USN_DATA => usn_data(conn, header, &request, &session).await,
        other => {
            log::debug!("unsupported FSCTL {other:#010x}");
            Err(Status::NotSupported)
        }
    };

    match output {
        Ok(mut output) => {
            let truncated = output.len() > request.max_output_response as usize;
            if truncated {
                output.truncate(request.max_output_response as usize);
            }
            let response = IoctlResponse {
                ctl_code: request.ctl_code,
                file_id: request.file_id,
                output,
            };
            if truncated {
                Reply::WithStatus(Status::BufferOverflow, response.into())
            } else {
                Reply::Ok(response.into())
            }
        }
        Err(status) => Reply::Error(status),
    }
}

/// FSCTL_VALIDATE_NEGOTIATE_INFO: the client replays its view of NEGOTIATE;
/// any disagreement with the connection's recorded state is a downgrade
/// attempt.
fn validate_negotiate(conn: &Connection, request: &IoctlRequest) -> Result<Vec<u8>, Status> {
    let info = ValidateNegotiateInfoRequest::read_le(&mut std::io::Cursor::new(&request.input))
        .map_err(|_| Status::InvalidParameter)?;
    let Some(dialect) = conn.crypto.dialect else {
        return Err(Status::AccessDenied);
    };
    let client_mode =
        u16::from_le_bytes(NegotiateSecurityMode::into_bytes(info.security_mode));
    if info.guid != conn.crypto.client_guid
        || client_mode != conn.crypto.client_security_mode
        || info.dialects != conn.crypto.client_dialects
    {
        log::warn!("validate-negotiate mismatch from {}", conn.client_addr);
        return Err(Status::AccessDenied);
    }
    Ok(encode(&ValidateNegotiateInfoResponse {
        capabilities: conn.crypto.capabilities,
        guid: conn.ctx.server_guid,
        security_mode: NegotiateSecurityMode::new().with_signing_enabled(true),
        dialect: dialect as u16,
    }))
}

async fn pipe_transceive(
    conn: &Connection,
    header: &Header,
    request: &IoctlRequest,
) -> Result<Vec<u8>, Status> {
    let open = resolve_open(conn, header, request.file_id)?;
    let open = open.lock().await;
    if !open.is_pipe {
        return Err(Status::InvalidDeviceRequest);
    }
    let Some(pipe) = conn.ctx.state.pipe(open.file_id) else {
        return Err(Status::FileClosed);
    };
    let shares: Vec<rpc::RpcShare> = conn
        .ctx
        .config
        .shares
        .iter()
        .map(|s| rpc::RpcShare { name: s.name.clone(), is_ipc: false, remark: String::new() })
        .chain(std::iter::once(rpc::RpcShare {
            name: "IPC$".into(),
            is_ipc: true,
            remark: "IPC Service".into(),
        }))
        .collect();
    let mut pipe = pipe.lock().await;
    match rpc::handle_pdu(&request.input, &shares) {
        Some(response) => Ok(response),
        None => Ok(pipe.read(request.max_output_response as usize)),
    }
}

async fn open_node(
    conn: &Connection,
    header: &Header,
    request: &IoctlRequest,
    session: &crate::state::SessionEntry,
) -> Result<(FileNode, String), Status> {
    let open = resolve_open(conn, header, request.file_id)?;
    let open = open.lock().await;
    if open.is_pipe {
        return Err(Status::InvalidDeviceRequest);
    }
    let auth = session.auth_context();
    let node = conn.ctx.metadata.get_file(&auth, &open.handle).await.map_err(|e| e.to_status())?;
    Ok((node, open.name.clone()))
}

async fn get_reparse_point(
    conn: &Connection,
    header: &Header,
    request: &IoctlRequest,
    session: &crate::state::SessionEntry,
) -> Result<Vec<u8>, Status> {
    let (node, _) = open_node(conn, header, request, session).await?;
    let Some(target) = node.symlink_target else {
        return Err(Status::NotAReparsePoint);
    };
    let flags = if target.starts_with('/') { 0 } else { SYMLINK_FLAG_RELATIVE };
    Ok(SymlinkReparseBuffer { target: target.replace('/', "\\"), flags }.to_bytes())
}

async fn ntfs_volume_data(
    conn: &Connection,
    header: &Header,
    request: &IoctlRequest,
) -> Result<Vec<u8>, Status> {
    let open = resolve_open(conn, header, request.file_id)?;
    let open = open.lock().await;
    let stats = conn
        .ctx
        .metadata
        .get_filesystem_statistics(&open.handle)
        .await
        .map_err(|e| e.to_status())?;
    let total_clusters = stats.total_bytes / CLUSTER_SIZE;
    let free_clusters = stats.available_bytes / CLUSTER_SIZE;
    Ok(encode(&NtfsVolumeData {
        volume_serial_number: VOLUME_SERIAL,
        number_sectors: stats.total_bytes / SECTOR_SIZE as u64,
        total_clusters,
        free_clusters,
        total_reserved: 0,
        bytes_per_sector: SECTOR_SIZE,
        bytes_per_cluster: CLUSTER_SIZE as u32,
        bytes_per_file_record_segment: 1024,
        clusters_per_file_record_segment: 0,
        mft_valid_data_length: 0,
        mft_start_lcn: 0,
        mft2_start_lcn: 0,
        mft_zone_start: 0,
        mft_zone_end: 0,
    }))
}

async fn usn_data(
    conn: &Connection,
    header: &Header,
    request: &IoctlRequest,
    session: &crate::state::SessionEntry,
) -> Result<Vec<u8>, Status> {
    let (node, name) = open_node(conn, header, request, session).await?;
    let attributes = node_attributes(&node);
    Ok(UsnRecord {
        file_reference_number: node.index_number(),
        parent_file_reference_number: 0,
        timestamp: node.mtime,
        file_attributes: u32::from_le_bytes(smb_fscc::FileAttributes::into_bytes(attributes)),
        file_name: name,
    }
    .to_bytes())
}
