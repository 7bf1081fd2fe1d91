//! QUERY_INFO: file, filesystem and security information classes.

use binrw::BinWrite;

use smb_dtyp::binrw_util::prelude::Boolean;
use smb_fscc::{
    FILE_DEVICE_DISK, FILE_DEVICE_IS_MOUNTED, FileAccessInformation, FileAccessMask,
    FileAllInformation, FileAlignmentInformation, FileAttributeTagInformation,
    FileBasicInformation, FileCompressionInformation, FileEaInformation,
    FileFsAttributeInformation, FileFsDeviceInformation, FileFsFullSizeInformation,
    FileFsLabelInformation, FileFsObjectIdInformation, FileFsSectorSizeInformation,
    FileFsSizeInformation, FileFsVolumeInformation, FileIdInformation, FileInternalInformation,
    FileModeInformation, FileNameInformation, FileNetworkOpenInformation,
    FilePositionInformation, FileStandardInformation, FileStreamInformation,
    FileStreamInformationInner, FileSystemAttributes, IO_REPARSE_TAG_SYMLINK, QueryFileInfoClass,
    QueryFsInfoClass, SSINFO_FLAGS_ALIGNED,
};
use smb_msg::{Header, InfoType, QueryInfoRequest, QueryInfoResponse, Status};

use super::close::apply_frozen_to_node;
use super::create::{effective_size, node_attributes};
use super::{Reply, require_session, require_tree, resolve_open};
use crate::connection::Connection;
use crate::sd;
use crate::state::OpenFile;
use crate::vfs::FileNode;
use crate::{CLUSTER_SIZE, SECTOR_SIZE, SECTORS_PER_UNIT, VOLUME_SERIAL, allocation_size};

fn encode<T: for<'a> BinWrite<Args<'a> = ()>>(value: &T) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    value.write_le(&mut cursor).expect("in-memory write");
    cursor.into_inner()
}

/// The wire path of an open: leading backslash, backslash separators.
fn wire_path(open: &OpenFile) -> String {
    format!("\\{}", open.path.replace('/', "\\"))
}

/// Generates an 8.3 short name: uppercase base truncated to six characters
/// plus `~1`, extension truncated to three.
pub(crate) fn short_name(name: &str) -> String {
    let upper: String = name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '$' | '~'))
        .collect();
    let (base, ext) = match upper.rsplit_once('.') {
        Some((base, ext)) => (base.to_string(), Some(ext.to_string())),
        None => (upper.clone(), None),
    };
    let fits = base.len() <= 8 && ext.as_ref().is_none_or(|e| e.len() <= 3);
    let short = if fits {
        upper
    } else {
        let stem: String = base.chars().take(6).collect();
        match &ext {
            Some(ext) => format!("{stem}~1.{}", ext.chars().take(3).collect::<String>()),
            None => format!("{stem}~1"),
        }
    };
    short
}

pub(crate) async fn handle(
    conn: &mut Connection,
    header: &Header,
    request: QueryInfoRequest,
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

    let Some(info_type) = InfoType::from_u8(request.info_type) else {
        return Reply::Error(Status::InvalidInfoClass);
    };
    let auth = session.auth_context();

    let node = if open.is_pipe {
        None
    } else {
        match conn.ctx.metadata.get_file(&auth, &open.handle).await {
            Ok(mut node) => {
                apply_frozen_to_node(&open, &mut node);
                Some(node)
            }
            Err(err) => return Reply::Error(err.to_status()),
        }
    };

    let encoded = match info_type {
        InfoType::File => {
            let Some(class) = QueryFileInfoClass::from_u8(request.info_class) else {
                return Reply::Error(Status::InvalidInfoClass);
            };
            if (request.output_buffer_length as usize) < class.fixed_size() {
                return Reply::Error(Status::InfoLengthMismatch);
            }
            match &node {
                Some(node) => encode_file_info(&open, node, class),
                // Pipes expose only the always-available classes.
                None => match class {
                    QueryFileInfoClass::Standard => Ok(encode(&FileStandardInformation {
                        number_of_links: 1,
                        delete_pending: Boolean(false),
                        directory: Boolean(false),
                        ..Default::default()
                    })),
                    QueryFileInfoClass::Basic => Ok(encode(&FileBasicInformation::default())),
                    _ => Err(Status::NotSupported),
                },
            }
        }
        InfoType::FileSystem => {
            let Some(class) = QueryFsInfoClass::from_u8(request.info_class) else {
                return Reply::Error(Status::InvalidInfoClass);
            };
            if (request.output_buffer_length as usize) < class.fixed_size() {
                return Reply::Error(Status::InfoLengthMismatch);
            }
            encode_fs_info(conn, &open, &tree.share, class).await
        }
        InfoType::Security => match &node {
            Some(node) => Ok(sd::build_security_descriptor(
                conn.ctx.mapper.as_ref(),
                node,
                request.additional_information,
            )
            .to_bytes()),
            None => Err(Status::NotSupported),
        },
        InfoType::Quota => Err(Status::NotSupported),
    };

    let mut data = match encoded {
        Ok(data) => data,
        Err(status) => return Reply::Error(status),
    };

    // Truncation is silent: Linux CIFS treats BUFFER_OVERFLOW as fatal.
    // The aggregate class keeps its name-length field consistent with the
    // bytes actually returned.
    let limit = request.output_buffer_length as usize;
    if data.len() > limit {
        data.truncate(limit);
        if info_type == InfoType::File
            && request.info_class == QueryFileInfoClass::All as u8
            && limit >= FileAllInformation::NAME_LENGTH_OFFSET + 8
        {
            let available = (limit - FileAllInformation::NAME_LENGTH_OFFSET - 4) as u32;
            data[FileAllInformation::NAME_LENGTH_OFFSET
                ..FileAllInformation::NAME_LENGTH_OFFSET + 4]
                .copy_from_slice(&available.to_le_bytes());
        }
    }
    Reply::Ok(QueryInfoResponse { data }.into())
}

fn basic_info(node: &FileNode) -> FileBasicInformation {
    FileBasicInformation {
        creation_time: node.crtime,
        last_access_time: node.atime,
        last_write_time: node.mtime,
        change_time: node.ctime,
        file_attributes: node_attributes(node),
    }
}

fn standard_info(open: &OpenFile, node: &FileNode) -> FileStandardInformation {
    let end_of_file = effective_size(node);
    FileStandardInformation {
        allocation_size: allocation_size(end_of_file),
        end_of_file,
        number_of_links: node.nlink,
        delete_pending: Boolean(open.delete_pending),
        directory: Boolean(node.is_directory()),
    }
}

/// CreateOptions bits that FileModeInformation mirrors.
const MODE_FROM_CREATE_OPTIONS: u32 = 0x0000_103e;

fn encode_file_info(
    open: &OpenFile,
    node: &FileNode,
    class: QueryFileInfoClass,
) -> Result<Vec<u8>, Status> {
    let end_of_file = effective_size(node);
    Ok(match class {
        QueryFileInfoClass::Basic => encode(&basic_info(node)),
        QueryFileInfoClass::Standard => encode(&standard_info(open, node)),
        QueryFileInfoClass::Internal => {
            encode(&FileInternalInformation { index_number: node.index_number() })
        }
        QueryFileInfoClass::Ea => encode(&FileEaInformation { ea_size: 0 }),
        QueryFileInfoClass::Access => encode(&FileAccessInformation {
            access_flags: FileAccessMask::from_raw(sd::ACCESS_FULL),
        }),
        QueryFileInfoClass::Position => encode(&FilePositionInformation::default()),
        QueryFileInfoClass::FullEa => return Err(Status::NotSupported),
        QueryFileInfoClass::Mode => encode(&FileModeInformation {
            mode: open.create_options & MODE_FROM_CREATE_OPTIONS,
        }),
        QueryFileInfoClass::Alignment => {
            encode(&FileAlignmentInformation { alignment_requirement: 0 })
        }
        QueryFileInfoClass::All => encode(&FileAllInformation {
            basic: basic_info(node),
            standard: standard_info(open, node),
            internal: FileInternalInformation { index_number: node.index_number() },
            ea: FileEaInformation { ea_size: 0 },
            access: FileAccessInformation {
                access_flags: FileAccessMask::from_raw(sd::ACCESS_FULL),
            },
            position: FilePositionInformation::default(),
            mode: FileModeInformation { mode: open.create_options & MODE_FROM_CREATE_OPTIONS },
            alignment: FileAlignmentInformation { alignment_requirement: 0 },
            name: FileNameInformation::from(wire_path(open).as_str()),
        }),
        QueryFileInfoClass::AlternateName => {
            encode(&FileNameInformation::from(short_name(&open.name).as_str()))
        }
        QueryFileInfoClass::Stream => {
            if node.is_directory() {
                Vec::new()
            } else {
                encode(&FileStreamInformation::from(vec![FileStreamInformationInner {
                    stream_size: end_of_file,
                    stream_allocation_size: allocation_size(end_of_file),
                    stream_name: "::$DATA".into(),
                }]))
            }
        }
        QueryFileInfoClass::Compression => encode(&FileCompressionInformation {
            compressed_file_size: end_of_file,
            ..Default::default()
        }),
        QueryFileInfoClass::NetworkOpen => encode(&FileNetworkOpenInformation {
            creation_time: node.crtime,
            last_access_time: node.atime,
            last_write_time: node.mtime,
            change_time: node.ctime,
            allocation_size: allocation_size(end_of_file),
            end_of_file,
            file_attributes: node_attributes(node),
        }),
        QueryFileInfoClass::AttributeTag => encode(&FileAttributeTagInformation {
            file_attributes: node_attributes(node),
            reparse_tag: if node.is_symlink() { IO_REPARSE_TAG_SYMLINK } else { 0 },
        }),
        QueryFileInfoClass::Name | QueryFileInfoClass::NormalizedName => {
            encode(&FileNameInformation::from(wire_path(open).as_str()))
        }
        QueryFileInfoClass::Id => encode(&FileIdInformation {
            volume_serial_number: VOLUME_SERIAL,
            file_id: node.file_uuid,
        }),
    })
}

async fn encode_fs_info(
    conn: &Connection,
    open: &OpenFile,
    share: &str,
    class: QueryFsInfoClass,
) -> Result<Vec<u8>, Status> {
    let stats = conn
        .ctx
        .metadata
        .get_filesystem_statistics(&open.handle)
        .await
        .map_err(|e| e.to_status())?;
    let total_units = stats.total_bytes / CLUSTER_SIZE;
    let available_units = stats.available_bytes / CLUSTER_SIZE;

    Ok(match class {
        QueryFsInfoClass::Volume => encode(&FileFsVolumeInformation {
            volume_creation_time: conn.ctx.start_time,
            volume_serial_number: VOLUME_SERIAL as u32,
            supports_objects: Boolean(false),
            volume_label: share.into(),
        }),
        QueryFsInfoClass::Label => encode(&FileFsLabelInformation { volume_label: share.into() }),
        QueryFsInfoClass::Size => encode(&FileFsSizeInformation {
            total_allocation_units: total_units,
            available_allocation_units: available_units,
            sectors_per_allocation_unit: SECTORS_PER_UNIT,
            bytes_per_sector: SECTOR_SIZE,
        }),
        QueryFsInfoClass::Device => encode(&FileFsDeviceInformation {
            device_type: FILE_DEVICE_DISK,
            characteristics: FILE_DEVICE_IS_MOUNTED,
        }),
        QueryFsInfoClass::Attribute => encode(&FileFsAttributeInformation {
            attributes: FileSystemAttributes::new()
                .with_case_sensitive_search(true)
                .with_case_preserved_names(true)
                .with_unicode_on_disk(true)
                .with_persistent_acls(true)
                .with_supports_sparse_files(true)
                .with_supports_reparse_points(true),
            maximum_component_name_length: 255,
            file_system_name: "NTFS".into(),
        }),
        QueryFsInfoClass::FullSize => encode(&FileFsFullSizeInformation {
            total_allocation_units: total_units,
            caller_available_allocation_units: available_units,
            actual_available_allocation_units: available_units,
            sectors_per_allocation_unit: SECTORS_PER_UNIT,
            bytes_per_sector: SECTOR_SIZE,
        }),
        QueryFsInfoClass::ObjectId => encode(&FileFsObjectIdInformation {
            object_id: conn.ctx.server_guid,
            extended_info: [0; 48],
        }),
        QueryFsInfoClass::SectorSize => encode(&FileFsSectorSizeInformation {
            logical_bytes_per_sector: SECTOR_SIZE,
            physical_bytes_per_sector: SECTOR_SIZE,
            physical_bytes_per_sector_for_performance: SECTOR_SIZE,
            effective_physical_bytes_per_sector_for_atomicity: SECTOR_SIZE,
            flags: SSINFO_FLAGS_ALIGNED,
            byte_offset_for_sector_alignment: 0,
            byte_offset_for_partition_alignment: 0,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names() {
        assert_eq!(short_name("b.txt"), "B.TXT");
        assert_eq!(short_name("averylongfilename.markdown"), "AVERYL~1.MAR");
        assert_eq!(short_name("noextension_butlong"), "NOEXTE~1");
        assert_eq!(short_name("ok.md"), "OK.MD");
    }
}
