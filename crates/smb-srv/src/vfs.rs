//! Collaborator interfaces consumed by the engine.
//!
//! The metadata store owns the directory tree, attributes, ACLs and
//! byte-range locks; the content store owns file payloads; the user store
//! resolves credentials and share permissions. All of them may suspend, so
//! the traits are async.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use smb_dtyp::binrw_util::prelude::FileTime;
use smb_msg::Status;

/// An opaque handle to a file or directory in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle(pub Vec<u8>);

/// The identity a request runs as, passed through to the collaborators.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
    /// Authenticated user name; `None` for guest sessions.
    pub user: Option<String>,
    pub client_addr: SocketAddr,
}

impl AuthContext {
    pub fn guest(client_addr: SocketAddr) -> Self {
        AuthContext { uid: 65534, gid: 65534, gids: Vec::new(), user: None, client_addr }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

/// A file's metadata as returned by the store.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub handle: FileHandle,
    /// Stable 16-byte identifier; the first 8 bytes double as the NTFS-style
    /// index number.
    pub file_uuid: [u8; 16],
    pub kind: FileKind,
    pub size: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    /// POSIX permission bits.
    pub mode: u32,
    pub hidden: bool,
    pub atime: FileTime,
    pub mtime: FileTime,
    pub ctime: FileTime,
    pub crtime: FileTime,
    /// Link target for symlinks.
    pub symlink_target: Option<String>,
    /// Content-store payload identifier; empty for directories and empty
    /// files.
    pub payload_id: String,
    /// Explicit ACL, when one has been set; otherwise the DACL is
    /// synthesized from `mode`.
    pub acl: Option<NfsAcl>,
}

impl FileNode {
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// The NTFS-style 64-bit index number: the first half of the UUID.
    pub fn index_number(&self) -> u64 {
        u64::from_le_bytes(self.file_uuid[0..8].try_into().unwrap())
    }
}

/// NFSv4-style ACE as stored by the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsAce {
    pub ace_type: NfsAceType,
    /// NFSv4 ACE flags; 0x80 marks an inherited ACE.
    pub flags: u32,
    /// Access mask; NFSv4 bit positions match the Windows ones.
    pub access_mask: u32,
    /// Principal: `OWNER@`, `GROUP@`, `EVERYONE@`, `SYSTEM@`,
    /// `ADMINISTRATORS@`, or a numeric `uid:`/`gid:` reference.
    pub who: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfsAceType {
    Allow,
    Deny,
    Audit,
}

/// The NFSv4 inherited-ACE flag translated to/from the Windows one.
pub const NFS_ACE_FLAG_INHERITED: u32 = 0x80;

/// An ACL attached to a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NfsAcl {
    pub aces: Vec<NfsAce>,
    /// Set when the ACL came in verbatim over SMB SET_INFO, letting the
    /// store prefer it over POSIX-mode synthesis.
    pub smb_explicit: bool,
    pub auto_inherited: bool,
    pub protected: bool,
}

/// Attribute changes applied through `set_file_attributes`. `None` leaves a
/// field untouched.
#[derive(Debug, Clone, Default)]
pub struct SetAttrs {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    pub hidden: Option<bool>,
    pub atime: Option<FileTime>,
    pub mtime: Option<FileTime>,
    pub ctime: Option<FileTime>,
    pub crtime: Option<FileTime>,
    pub acl: Option<NfsAcl>,
}

impl SetAttrs {
    pub fn size(size: u64) -> Self {
        SetAttrs { size: Some(size), ..Default::default() }
    }
}

/// Result of `prepare_read`: the payload to read plus current attributes.
#[derive(Debug, Clone)]
pub struct ReadMeta {
    pub payload_id: String,
    pub node: FileNode,
}

#[derive(Debug, Clone, Copy)]
pub struct FsStatistics {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// One directory entry from `read_dir`.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub node: FileNode,
}

/// Errors surfaced by the collaborators, mapped onto NT statuses at the
/// protocol boundary by [`VfsError::to_status`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum VfsError {
    #[error("object not found")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("access denied")]
    AccessDenied,
    #[error("no space left")]
    NoSpace,
    #[error("byte range conflict")]
    LockConflict,
    #[error("range was not locked")]
    NotLocked,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("stale file handle")]
    Stale,
    #[error("operation not supported")]
    NotSupported,
    #[error("i/o error: {0}")]
    Io(String),
}

impl VfsError {
    /// The single metadata-to-status mapping.
    pub fn to_status(&self) -> Status {
        match self {
            VfsError::NotFound => Status::ObjectNameNotFound,
            VfsError::NotADirectory => Status::NotADirectory,
            VfsError::IsADirectory => Status::FileIsADirectory,
            VfsError::AlreadyExists => Status::ObjectNameCollision,
            VfsError::NotEmpty => Status::DirectoryNotEmpty,
            VfsError::AccessDenied => Status::AccessDenied,
            VfsError::NoSpace => Status::DiskFull,
            VfsError::LockConflict => Status::LockNotGranted,
            VfsError::NotLocked => Status::RangeNotLocked,
            VfsError::InvalidArgument => Status::InvalidParameter,
            VfsError::Stale => Status::InvalidHandle,
            VfsError::NotSupported => Status::NotSupported,
            VfsError::Io(_) => Status::UnexpectedIoError,
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

/// The metadata collaborator: directory tree, attributes, ACLs, byte-range
/// locks, pending-write bookkeeping.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// The root directory handle of a share.
    async fn get_root_handle(&self, share_name: &str) -> VfsResult<FileHandle>;

    /// Resolves one name within a directory.
    async fn lookup(&self, auth: &AuthContext, parent: &FileHandle, name: &str)
    -> VfsResult<FileNode>;

    /// Current attributes of an open handle.
    async fn get_file(&self, auth: &AuthContext, handle: &FileHandle) -> VfsResult<FileNode>;

    async fn create_file(
        &self,
        auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
        attr: &SetAttrs,
    ) -> VfsResult<FileNode>;

    async fn create_directory(
        &self,
        auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
        attr: &SetAttrs,
    ) -> VfsResult<FileNode>;

    async fn create_symlink(
        &self,
        auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
        target: &str,
        attr: &SetAttrs,
    ) -> VfsResult<FileNode>;

    /// Removes a regular file or symlink, returning its last metadata.
    async fn remove_file(
        &self,
        auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
    ) -> VfsResult<FileNode>;

    async fn remove_directory(
        &self,
        auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
    ) -> VfsResult<()>;

    async fn rename(
        &self,
        auth: &AuthContext,
        from_parent: &FileHandle,
        from_name: &str,
        to_parent: &FileHandle,
        to_name: &str,
    ) -> VfsResult<()>;

    async fn set_file_attributes(
        &self,
        auth: &AuthContext,
        handle: &FileHandle,
        attrs: &SetAttrs,
    ) -> VfsResult<FileNode>;

    /// Flushes metadata updates pending for this file. Returns whether
    /// anything was written back.
    async fn flush_pending_write_for_file(
        &self,
        auth: &AuthContext,
        handle: &FileHandle,
    ) -> VfsResult<bool>;

    /// Records an mtime update to be applied lazily.
    async fn update_pending_mtime(&self, handle: &FileHandle, time: FileTime) -> VfsResult<()>;

    /// Authorizes a read and returns the payload to read from.
    async fn prepare_read(&self, auth: &AuthContext, handle: &FileHandle) -> VfsResult<ReadMeta>;

    /// Lists a directory. Ordering must be stable between calls.
    async fn read_dir(
        &self,
        auth: &AuthContext,
        handle: &FileHandle,
    ) -> VfsResult<Vec<DirEntryInfo>>;

    /// Takes a byte-range lock. The store owns the lock table.
    async fn lock_range(
        &self,
        handle: &FileHandle,
        session_id: u64,
        offset: u64,
        length: u64,
        exclusive: bool,
    ) -> VfsResult<()>;

    async fn unlock_range(
        &self,
        handle: &FileHandle,
        session_id: u64,
        offset: u64,
        length: u64,
    ) -> VfsResult<()>;

    /// Fails with [`VfsError::LockConflict`] when the I/O would collide with
    /// a byte-range lock held by another session.
    async fn check_lock_for_io(
        &self,
        handle: &FileHandle,
        session_id: u64,
        offset: u64,
        length: u64,
        is_write: bool,
    ) -> VfsResult<()>;

    async fn unlock_all_for_session(&self, handle: &FileHandle, session_id: u64) -> VfsResult<()>;

    async fn get_filesystem_statistics(&self, handle: &FileHandle) -> VfsResult<FsStatistics>;

    /// Serializes a node into an opaque handle the engine can hold across
    /// requests (parent-directory references).
    fn encode_file_handle(&self, node: &FileNode) -> FileHandle {
        node.handle.clone()
    }
}

/// The content/block collaborator: payload reads, writes, durability.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn read_at(&self, payload_id: &str, buf: &mut [u8], offset: u64) -> VfsResult<usize>;

    async fn write_at(&self, payload_id: &str, data: &[u8], offset: u64) -> VfsResult<usize>;

    /// Blocks until the payload is durable.
    async fn flush(&self, payload_id: &str) -> VfsResult<()>;

    async fn delete(&self, payload_id: &str) -> VfsResult<()>;
}

/// A user known to the gateway.
#[derive(Clone)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
    pub enabled: bool,
    nt_hash: Option<[u8; 16]>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The NT hash is password-equivalent and never logged.
        f.debug_struct("User")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl User {
    pub fn new(name: &str, uid: u32, gid: u32, nt_hash: Option<[u8; 16]>) -> Self {
        User { name: name.to_string(), uid, gid, gids: Vec::new(), enabled: true, nt_hash }
    }

    /// The MD4 hash of the user's password, when one is stored.
    pub fn get_nt_hash(&self) -> Option<&[u8; 16]> {
        self.nt_hash.as_ref()
    }
}

/// Share access levels, from none to administrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SharePermission {
    None,
    Read,
    ReadWrite,
    Admin,
}

/// The user-store collaborator.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, username: &str) -> Option<User>;

    /// Per-user share permission, when the store has an explicit entry.
    async fn resolve_share_permission(&self, user: &User, share: &str) -> Option<SharePermission>;
}

/// The Kerberos keytab collaborator.
pub trait KerberosProvider: Send + Sync {
    /// Service principal, e.g. `cifs/gw.example.com@EXAMPLE.COM`.
    fn service_principal(&self) -> String;

    /// Raw MIT keytab bytes.
    fn keytab(&self) -> &[u8];

    fn max_clock_skew(&self) -> Duration {
        Duration::from_secs(300)
    }
}
