//! QUERY_DIRECTORY: enumeration with a per-handle cursor, pattern
//! filtering, and incremental information-class encoding.

use binrw::BinWrite;

use smb_fscc::{
    DirectoryInfoClass, FileBothDirectoryInformation, FileDirectoryInformation,
    FileFullDirectoryInformation, FileIdBothDirectoryInformation,
    FileIdFullDirectoryInformation, FileNamesInformation,
};
use smb_msg::{Header, QueryDirectoryRequest, QueryDirectoryResponse, Status};

use super::create::{effective_size, node_attributes};
use super::{Reply, require_session, require_tree, resolve_open};
use crate::allocation_size;
use crate::connection::Connection;
use crate::state::DirCursor;
use crate::vfs::DirEntryInfo;

/// Simple DOS wildcard match: `*` any run, `?` one character, otherwise
/// case-insensitive comparison.
pub(crate) fn pattern_matches(pattern: &str, name: &str) -> bool {
    fn matches(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some('?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) => {
                pc.eq_ignore_ascii_case(nc) && matches(&p[1..], &n[1..])
            }
            _ => false,
        }
    }
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    matches(&p, &n)
}

fn encode_entry(class: DirectoryInfoClass, entry: &DirEntryInfo, index: u32) -> Vec<u8> {
    let node = &entry.node;
    let end_of_file = effective_size(node);
    let allocation = allocation_size(end_of_file);
    let attributes = node_attributes(node);
    let name = entry.name.as_str();

    let mut cursor = std::io::Cursor::new(Vec::new());
    let write = match class {
        DirectoryInfoClass::Directory => FileDirectoryInformation {
            file_index: index,
            creation_time: node.crtime,
            last_access_time: node.atime,
            last_write_time: node.mtime,
            change_time: node.ctime,
            end_of_file,
            allocation_size: allocation,
            file_attributes: attributes,
            file_name: name.into(),
        }
        .write_le(&mut cursor),
        DirectoryInfoClass::FullDirectory => FileFullDirectoryInformation {
            file_index: index,
            creation_time: node.crtime,
            last_access_time: node.atime,
            last_write_time: node.mtime,
            change_time: node.ctime,
            end_of_file,
            allocation_size: allocation,
            file_attributes: attributes,
            ea_size: 0,
            file_name: name.into(),
        }
        .write_le(&mut cursor),
        DirectoryInfoClass::BothDirectory => FileBothDirectoryInformation {
            file_index: index,
            creation_time: node.crtime,
            last_access_time: node.atime,
            last_write_time: node.mtime,
            change_time: node.ctime,
            end_of_file,
            allocation_size: allocation,
            file_attributes: attributes,
            ea_size: 0,
            short_name_length: 0,
            short_name: [0; 24],
            file_name: name.into(),
        }
        .write_le(&mut cursor),
        DirectoryInfoClass::Names => {
            FileNamesInformation { file_index: index, file_name: name.into() }.write_le(&mut cursor)
        }
        DirectoryInfoClass::IdBothDirectory => FileIdBothDirectoryInformation {
            file_index: index,
            creation_time: node.crtime,
            last_access_time: node.atime,
            last_write_time: node.mtime,
            change_time: node.ctime,
            end_of_file,
            allocation_size: allocation,
            file_attributes: attributes,
            ea_size: 0,
            short_name_length: 0,
            short_name: [0; 24],
            file_id: node.index_number(),
            file_name: name.into(),
        }
        .write_le(&mut cursor),
        DirectoryInfoClass::IdFullDirectory => FileIdFullDirectoryInformation {
            file_index: index,
            creation_time: node.crtime,
            last_access_time: node.atime,
            last_write_time: node.mtime,
            change_time: node.ctime,
            end_of_file,
            allocation_size: allocation,
            file_attributes: attributes,
            ea_size: 0,
            file_id: node.index_number(),
            file_name: name.into(),
        }
        .write_le(&mut cursor),
    };
    write.expect("in-memory write");
    cursor.into_inner()
}

pub(crate) async fn handle(
    conn: &mut Connection,
    header: &Header,
    request: QueryDirectoryRequest,
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
    let mut open = open.lock().await;
    if !open.is_directory {
        return Reply::Error(Status::InvalidParameter);
    }
    let Some(class) = DirectoryInfoClass::from_u8(request.info_class) else {
        return Reply::Error(Status::InvalidInfoClass);
    };
    if request.output_buffer_length < 64 {
        return Reply::Error(Status::InfoLengthMismatch);
    }

    let auth = session.auth_context();
    let pattern = if request.pattern.as_str().is_empty() {
        "*".to_string()
    } else {
        request.pattern.as_str().to_string()
    };

    // (Re)build the cursor on the first call, on a restart, or when the
    // pattern changes.
    let restart = request.flags.restart_scans() || request.flags.reopen();
    let need_scan = restart
        || open.dir_cursor.as_ref().is_none_or(|cursor| cursor.pattern != pattern);
    if need_scan {
        let listing = match conn.ctx.metadata.read_dir(&auth, &open.handle).await {
            Ok(listing) => listing,
            Err(err) => return Reply::Error(err.to_status()),
        };
        // Self and parent entries lead the listing, as on a real volume.
        let mut entries = Vec::with_capacity(listing.len() + 2);
        if let Ok(own) = conn.ctx.metadata.get_file(&auth, &open.handle).await {
            entries.push(DirEntryInfo { name: ".".into(), node: own.clone() });
            entries.push(DirEntryInfo { name: "..".into(), node: own });
        }
        entries.extend(listing);
        entries.retain(|entry| pattern_matches(&pattern, &entry.name));
        open.dir_cursor = Some(DirCursor { entries, next: 0, pattern: pattern.clone() });
    }

    let cursor = open.dir_cursor.as_mut().unwrap();
    if cursor.next >= cursor.entries.len() {
        return Reply::Error(Status::NoMoreFiles);
    }

    // Chain encoded entries until the buffer is full: a four-byte next
    // offset, the entry body, padding to eight bytes between entries.
    let limit = request.output_buffer_length as usize;
    let mut buffer: Vec<u8> = Vec::new();
    let mut last_entry_start: Option<usize> = None;
    while cursor.next < cursor.entries.len() {
        let entry = &cursor.entries[cursor.next];
        let body = encode_entry(class, entry, cursor.next as u32);
        let start = buffer.len().next_multiple_of(8);
        if start + 4 + body.len() > limit {
            break;
        }
        buffer.resize(start, 0);
        if let Some(previous) = last_entry_start {
            let offset = (start - previous) as u32;
            buffer[previous..previous + 4].copy_from_slice(&offset.to_le_bytes());
        }
        last_entry_start = Some(start);
        buffer.extend_from_slice(&0u32.to_le_bytes());
        buffer.extend_from_slice(&body);
        cursor.next += 1;

        if request.flags.return_single_entry() {
            break;
        }
    }

    if buffer.is_empty() {
        // Nothing fit: the buffer is too small for even one entry.
        return Reply::Error(Status::InfoLengthMismatch);
    }
    Reply::Ok(QueryDirectoryResponse { buffer }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("", "anything"));
        assert!(pattern_matches("*.txt", "NOTES.TXT"));
        assert!(pattern_matches("a?c", "abc"));
        assert!(!pattern_matches("*.txt", "notes.md"));
        assert!(pattern_matches("b*", "b"));
        assert!(!pattern_matches("a?c", "ac"));
    }
}
