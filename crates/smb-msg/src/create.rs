//! CREATE and CLOSE (MS-SMB2 2.2.13 – 2.2.16), including create contexts.

use std::io::SeekFrom;

use binrw::io::{Read, Seek, TakeSeekExt, Write};
use binrw::prelude::*;
use binrw::{BinResult, Endian};
use modular_bitfield::prelude::*;

use smb_dtyp::binrw_util::prelude::*;
use smb_fscc::{FileAccessMask, FileAttributes};

use crate::oplock::LeaseState;

/// SMB2_FILEID (MS-SMB2 2.2.14.1).
#[binrw::binrw]
#[brw(little)]
#[derive(PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub const EMPTY: FileId = FileId { persistent: 0, volatile: 0 };
    /// All bits set: refers to the previous handle in a compound chain.
    pub const FULL: FileId = FileId { persistent: u64::MAX, volatile: u64::MAX };
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{:x}|{:x}}}", self.persistent, self.volatile)
    }
}

impl std::fmt::Debug for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileId({})", self)
    }
}

/// The impersonation level requested by the client (MS-SMB2 2.2.13).
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Copy, Clone, Default)]
#[brw(repr(u32))]
pub enum ImpersonationLevel {
    Anonymous = 0x0,
    Identification = 0x1,
    #[default]
    Impersonation = 0x2,
    Delegate = 0x3,
}

/// What to do given the target's existence (MS-SMB2 2.2.13).
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Copy, Clone, Default)]
#[brw(repr(u32))]
pub enum CreateDisposition {
    /// Supersede an existing file, else create.
    Supersede = 0x0,
    /// Open an existing file, else fail.
    #[default]
    Open = 0x1,
    /// Create a new file, else fail.
    Create = 0x2,
    /// Open an existing file, else create.
    OpenIf = 0x3,
    /// Overwrite an existing file, else fail.
    Overwrite = 0x4,
    /// Overwrite an existing file, else create.
    OverwriteIf = 0x5,
}

/// Options applied when creating or opening the file (MS-SMB2 2.2.13).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct CreateOptions {
    /// The target must be a directory.
    pub directory_file: bool,
    pub write_through: bool,
    pub sequential_only: bool,
    pub no_intermediate_buffering: bool,

    pub synchronous_io_alert: bool,
    pub synchronous_io_nonalert: bool,
    /// The target must not be a directory.
    pub non_directory_file: bool,
    #[skip]
    __: bool,

    pub complete_if_oplocked: bool,
    pub no_ea_knowledge: bool,
    pub open_remote_instance: bool,
    pub random_access: bool,

    /// Delete the file when the last handle closes.
    pub delete_on_close: bool,
    pub open_by_file_id: bool,
    pub open_for_backup_intent: bool,
    pub no_compression: bool,

    pub open_requiring_oplock: bool,
    pub disallow_exclusive: bool,
    #[skip]
    __: B2,

    pub reserve_opfilter: bool,
    /// Open the reparse point itself rather than its target.
    pub open_reparse_point: bool,
    pub open_no_recall: bool,
    pub open_for_free_space_query: bool,

    #[skip]
    __: B8,
}

impl CreateOptions {
    pub fn to_raw(self) -> u32 {
        u32::from_le_bytes(Self::into_bytes(self))
    }

    pub fn from_raw(value: u32) -> Self {
        Self::from_bytes(value.to_le_bytes())
    }
}

/// Sharing mode for the open (MS-SMB2 2.2.13).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct ShareAccessFlags {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    #[skip]
    __: B29,
}

/// CREATE request: 56 fixed bytes, the UTF-16 name, then chained create
/// contexts.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct CreateRequest {
    #[bw(calc = 57)]
    #[br(temp)]
    #[br(assert(_structure_size == 57))]
    _structure_size: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _security_flags: u8,
    /// Raw requested oplock level; 0xFF requests a lease via RqLs.
    pub requested_oplock_level: u8,
    pub impersonation_level: ImpersonationLevel,
    #[bw(calc = 0)]
    #[br(temp)]
    _smb_create_flags: u64,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u64,
    pub desired_access: FileAccessMask,
    pub file_attributes: FileAttributes,
    pub share_access: ShareAccessFlags,
    pub create_disposition: CreateDisposition,
    pub create_options: CreateOptions,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    name_offset: PosMarker<u16>,
    #[bw(try_calc = u16::try_from(name.size()))]
    #[br(temp)]
    name_length: u16,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    create_contexts_offset: PosMarker<u32>,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    create_contexts_length: PosMarker<u32>,

    /// The file name, relative to the share root; backslash separated.
    #[br(seek_before = SeekFrom::Start(name_offset.value as u64))]
    #[br(args(name_length as u64))]
    #[bw(write_with = PosMarker::write_aoff, args(&name_offset))]
    pub name: WideString,

    /// Chained create contexts; empty when the offset is zero.
    #[br(if(create_contexts_offset.value != 0))]
    #[br(seek_before = SeekFrom::Start(create_contexts_offset.value as u64))]
    #[br(map_stream = |s| s.take_seek(create_contexts_length.value as u64))]
    #[bw(if(!contexts.is_empty()))]
    #[brw(align_before = 8)]
    #[bw(write_with = PosMarker::write_aoff_size, args(&create_contexts_offset, &create_contexts_length))]
    pub contexts: CreateContextList,
}

/// The action taken by CREATE (MS-SMB2 2.2.14).
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Copy, Clone)]
#[brw(repr(u32))]
pub enum CreateAction {
    Superseded = 0x0,
    Opened = 0x1,
    Created = 0x2,
    Overwritten = 0x3,
}

/// CREATE response: 88 fixed bytes plus response contexts.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct CreateResponse {
    #[bw(calc = 89)]
    #[br(temp)]
    #[br(assert(_structure_size == 89))]
    _structure_size: u16,
    /// The oplock level actually granted.
    pub oplock_level: u8,
    pub flags: u8,
    pub create_action: CreateAction,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
    pub file_id: FileId,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    create_contexts_offset: PosMarker<u32>,
    #[bw(calc = PosMarker::default())]
    #[br(temp)]
    create_contexts_length: PosMarker<u32>,

    #[br(if(create_contexts_offset.value != 0))]
    #[br(seek_before = SeekFrom::Start(create_contexts_offset.value as u64))]
    #[br(map_stream = |s| s.take_seek(create_contexts_length.value as u64))]
    #[bw(if(!contexts.is_empty()))]
    #[brw(align_before = 8)]
    #[bw(write_with = PosMarker::write_aoff_size, args(&create_contexts_offset, &create_contexts_length))]
    pub contexts: CreateContextList,
}

/// Well-known create context names (MS-SMB2 2.2.13.2).
pub const CTX_NAME_LEASE: &[u8] = b"RqLs";
pub const CTX_NAME_MAXIMAL_ACCESS: &[u8] = b"MxAc";
pub const CTX_NAME_QUERY_ON_DISK_ID: &[u8] = b"QFid";
pub const CTX_NAME_DURABLE_HANDLE: &[u8] = b"DHnQ";
pub const CTX_NAME_DURABLE_HANDLE_V2: &[u8] = b"DH2Q";
pub const CTX_NAME_SECURITY_DESCRIPTOR: &[u8] = b"SecD";
pub const CTX_NAME_ALLOCATION_SIZE: &[u8] = b"AlSi";
pub const CTX_NAME_TIMEWARP: &[u8] = b"TWrp";
pub const CTX_NAME_EXTENDED_ATTRIBUTES: &[u8] = b"ExtA";

/// A create context with its raw payload. The handler interprets the
/// payloads it understands and ignores the rest.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CreateContext {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
}

impl CreateContext {
    pub fn new(name: &[u8], data: Vec<u8>) -> Self {
        CreateContext { name: name.to_vec(), data }
    }

    /// Builds a context by serializing a typed payload.
    pub fn from_value<T>(name: &[u8], value: &T) -> Self
    where
        T: for<'a> BinWrite<Args<'a> = ()>,
    {
        let mut cursor = std::io::Cursor::new(Vec::new());
        value.write_le(&mut cursor).expect("in-memory write");
        CreateContext::new(name, cursor.into_inner())
    }

    /// Parses the payload as a typed structure.
    pub fn parse_data<T>(&self) -> BinResult<T>
    where
        T: for<'a> BinRead<Args<'a> = ()>,
    {
        T::read_le(&mut std::io::Cursor::new(&self.data))
    }
}

/// A chain of create contexts: each entry has a next-entry offset and
/// entry-relative name/data offsets, 8-byte aligned.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct CreateContextList {
    pub items: Vec<CreateContext>,
}

impl CreateContextList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First context with the given name, if any.
    pub fn find(&self, name: &[u8]) -> Option<&CreateContext> {
        self.items.iter().find(|c| c.name == name)
    }
}

impl From<Vec<CreateContext>> for CreateContextList {
    fn from(items: Vec<CreateContext>) -> Self {
        CreateContextList { items }
    }
}

const CTX_HEADER_SIZE: u64 = 16;

impl BinRead for CreateContextList {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let here = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(here))?;
        if here == end {
            return Ok(Self::default());
        }

        let mut items = Vec::new();
        loop {
            let entry_start = reader.stream_position()?;
            let next = u32::read_options(reader, endian, ())?;
            let name_offset = u16::read_options(reader, endian, ())?;
            let name_length = u16::read_options(reader, endian, ())?;
            let _reserved = u16::read_options(reader, endian, ())?;
            let data_offset = u16::read_options(reader, endian, ())?;
            let data_length = u32::read_options(reader, endian, ())?;

            reader.seek(SeekFrom::Start(entry_start + name_offset as u64))?;
            let mut name = vec![0u8; name_length as usize];
            reader.read_exact(&mut name)?;

            let mut data = vec![0u8; data_length as usize];
            if data_length > 0 {
                reader.seek(SeekFrom::Start(entry_start + data_offset as u64))?;
                reader.read_exact(&mut data)?;
            }
            items.push(CreateContext { name, data });

            if next == 0 {
                break;
            }
            reader.seek(SeekFrom::Start(entry_start + next as u64))?;
        }
        Ok(Self { items })
    }
}

impl BinWrite for CreateContextList {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        for (i, ctx) in self.items.iter().enumerate() {
            let name_offset = CTX_HEADER_SIZE;
            let name_end = name_offset + ctx.name.len() as u64;
            let data_offset = if ctx.data.is_empty() { 0 } else { name_end.next_multiple_of(8) };
            let entry_end = if ctx.data.is_empty() {
                name_end
            } else {
                data_offset + ctx.data.len() as u64
            };
            let last = i + 1 == self.items.len();
            let next = if last { 0 } else { entry_end.next_multiple_of(8) };

            (next as u32).write_options(writer, endian, ())?;
            (name_offset as u16).write_options(writer, endian, ())?;
            (ctx.name.len() as u16).write_options(writer, endian, ())?;
            0u16.write_options(writer, endian, ())?;
            (data_offset as u16).write_options(writer, endian, ())?;
            (ctx.data.len() as u32).write_options(writer, endian, ())?;
            ctx.name.write_options(writer, endian, ())?;
            if !ctx.data.is_empty() {
                for _ in name_end..data_offset {
                    0u8.write_options(writer, endian, ())?;
                }
                ctx.data.write_options(writer, endian, ())?;
            }
            if !last {
                for _ in entry_end..next {
                    0u8.write_options(writer, endian, ())?;
                }
            }
        }
        Ok(())
    }
}

/// Lease request/response payload, version 1 (MS-SMB2 2.2.13.2.8); 32 bytes.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct RequestLeaseV1 {
    pub lease_key: u128,
    pub lease_state: LeaseState,
    pub lease_flags: u32,
    pub lease_duration: u64,
}

/// Lease request/response payload, version 2 (MS-SMB2 2.2.13.2.10);
/// 52 bytes, 3.x dialects only.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct RequestLeaseV2 {
    pub lease_key: u128,
    pub lease_state: LeaseState,
    pub lease_flags: u32,
    pub lease_duration: u64,
    pub parent_lease_key: u128,
    pub epoch: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u16,
}

pub const LEASE_FLAG_BREAK_IN_PROGRESS: u32 = 0x0000_0002;
pub const LEASE_FLAG_PARENT_LEASE_KEY_SET: u32 = 0x0000_0004;

/// Maximal-access response payload (MS-SMB2 2.2.14.2.5).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct MaximalAccessResponse {
    pub query_status: u32,
    pub maximal_access: FileAccessMask,
}

/// On-disk ID response payload (MS-SMB2 2.2.14.2.9): the file identifier
/// followed by the volume identifier.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct QueryOnDiskIdResponse {
    pub disk_file_id: [u8; 16],
    pub volume_id: [u8; 16],
}

/// CLOSE request (MS-SMB2 2.2.15).
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct CloseRequest {
    #[bw(calc = 24)]
    #[br(temp)]
    #[br(assert(_structure_size == 24))]
    _structure_size: u16,
    pub flags: CloseFlags,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
    pub file_id: FileId,
}

/// CLOSE response (MS-SMB2 2.2.16); 60 bytes.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq, Default)]
pub struct CloseResponse {
    #[bw(calc = 60)]
    #[br(temp)]
    #[br(assert(_structure_size == 60))]
    _structure_size: u16,
    pub flags: CloseFlags,
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: FileAttributes,
}

/// CLOSE flags: only POSTQUERY_ATTRIB is defined.
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct CloseFlags {
    pub postquery_attrib: bool,
    #[skip]
    __: B15,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn create_context_list_round_trips() {
        let list: CreateContextList = vec![
            CreateContext::from_value(
                CTX_NAME_LEASE,
                &RequestLeaseV2 {
                    lease_key: 7,
                    lease_state: LeaseState::new().with_read_caching(true).with_handle_caching(true),
                    lease_flags: 0,
                    lease_duration: 0,
                    parent_lease_key: 0,
                    epoch: 0,
                },
            ),
            CreateContext::new(CTX_NAME_MAXIMAL_ACCESS, Vec::new()),
            CreateContext::new(CTX_NAME_QUERY_ON_DISK_ID, Vec::new()),
        ]
        .into();

        let mut cursor = Cursor::new(Vec::new());
        list.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        let read = CreateContextList::read_le(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, list);
        assert!(read.find(CTX_NAME_MAXIMAL_ACCESS).is_some());
        assert!(read.find(CTX_NAME_DURABLE_HANDLE).is_none());

        let lease: RequestLeaseV2 = read.find(CTX_NAME_LEASE).unwrap().parse_data().unwrap();
        assert_eq!(lease.lease_key, 7);
        assert!(lease.lease_state.read_caching());
    }

    #[test]
    fn create_request_round_trips_at_header_offset() {
        let req = CreateRequest {
            requested_oplock_level: 0,
            impersonation_level: ImpersonationLevel::Impersonation,
            desired_access: FileAccessMask::from_raw(0x0010_0081),
            file_attributes: FileAttributes::new(),
            share_access: ShareAccessFlags::new().with_read(true).with_write(true),
            create_disposition: CreateDisposition::OpenIf,
            create_options: CreateOptions::new(),
            name: "a\\b.txt".into(),
            contexts: vec![CreateContext::new(CTX_NAME_MAXIMAL_ACCESS, Vec::new())].into(),
        };
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.set_position(64);
        req.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();

        let mut cursor = Cursor::new(bytes);
        cursor.set_position(64);
        let read = CreateRequest::read_le(&mut cursor).unwrap();
        assert_eq!(read, req);
    }

    #[test]
    fn close_response_is_sixty_bytes() {
        let mut cursor = Cursor::new(Vec::new());
        CloseResponse::default().write_le(&mut cursor).unwrap();
        assert_eq!(cursor.into_inner().len(), 60);
    }
}
