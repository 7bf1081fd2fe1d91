//! Process-wide session, tree, open-file and pending-auth tables.
//!
//! Each table is a concurrent map guarded by its own lock; entries that
//! handlers mutate across suspension points (open files, pipes) are wrapped
//! in async mutexes. Cross-table teardown (LOGOFF, disconnect) collects IDs
//! under one lock at a time, never nesting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

use smb_dtyp::binrw_util::prelude::FileTime;
use smb_msg::{FileId, ShareType};
use tokio::sync::Mutex;

use crate::crypto::SessionCrypto;
use crate::pipes::PipeState;
use crate::vfs::{AuthContext, DirEntryInfo, FileHandle, SharePermission, User};

/// An authenticated (or guest) session.
#[derive(Debug)]
pub struct SessionEntry {
    pub id: u64,
    pub client_addr: SocketAddr,
    /// `None` for guest sessions.
    pub user: Option<User>,
    pub guest: bool,
    pub domain: String,
    pub created_at: Instant,
    /// Signing/encryption keys; written once after SESSION_SETUP.
    pub crypto: OnceLock<SessionCrypto>,
}

impl SessionEntry {
    /// The identity this session's requests run as.
    pub fn auth_context(&self) -> AuthContext {
        match &self.user {
            Some(user) => AuthContext {
                uid: user.uid,
                gid: user.gid,
                gids: user.gids.clone(),
                user: Some(user.name.clone()),
                client_addr: self.client_addr,
            },
            None => AuthContext::guest(self.client_addr),
        }
    }

    /// Whether messages on this session must be signed and verified.
    pub fn signing_active(&self) -> bool {
        self.crypto.get().is_some_and(|c| c.signing_enabled)
    }
}

/// A tree connection within a session.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub tree_id: u32,
    pub session_id: u64,
    /// Normalized share name (`ipc$` for the pipe share).
    pub share: String,
    pub share_type: ShareType,
    pub permission: SharePermission,
}

impl TreeEntry {
    pub fn is_pipe(&self) -> bool {
        self.share_type == ShareType::Pipe
    }

    pub fn writable(&self) -> bool {
        matches!(self.permission, SharePermission::ReadWrite | SharePermission::Admin)
    }
}

/// Per-timestamp freeze state: a frozen timestamp overrides the store's
/// value until thawed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrozenTimes {
    pub atime: Option<FileTime>,
    pub mtime: Option<FileTime>,
    pub ctime: Option<FileTime>,
}

impl FrozenTimes {
    pub fn any(&self) -> bool {
        self.atime.is_some() || self.mtime.is_some() || self.ctime.is_some()
    }
}

/// Directory enumeration state kept between QUERY_DIRECTORY calls.
#[derive(Debug, Clone)]
pub struct DirCursor {
    pub entries: Vec<DirEntryInfo>,
    pub next: usize,
    pub pattern: String,
}

/// An open file, directory, or pipe handle.
#[derive(Debug)]
pub struct OpenFile {
    pub file_id: FileId,
    pub session_id: u64,
    pub tree_id: u32,
    pub share: String,
    /// Share-relative path, forward slashes, no leading slash.
    pub path: String,
    /// Final path component; empty for the share root.
    pub name: String,
    pub parent: FileHandle,
    pub handle: FileHandle,
    pub payload_id: String,
    pub is_directory: bool,
    pub is_pipe: bool,
    pub is_symlink: bool,
    pub desired_access: u32,
    pub create_options: u32,
    pub delete_pending: bool,
    pub oplock_level: u8,
    pub lease_key: Option<u128>,
    pub frozen: FrozenTimes,
    pub dir_cursor: Option<DirCursor>,
}

/// A half-finished NTLM handshake, keyed by the session ID issued with the
/// challenge.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    pub session_id: u64,
    pub challenge: [u8; 8],
    pub client_addr: SocketAddr,
    pub created_at: Instant,
    /// Whether the exchange is SPNEGO-wrapped (as opposed to raw NTLMSSP).
    pub spnego: bool,
}

/// All server-wide mutable state.
#[derive(Default)]
pub struct ServerState {
    sessions: RwLock<HashMap<u64, Arc<SessionEntry>>>,
    trees: RwLock<HashMap<(u64, u32), Arc<TreeEntry>>>,
    opens: RwLock<HashMap<FileId, Arc<Mutex<OpenFile>>>>,
    pipes: RwLock<HashMap<FileId, Arc<Mutex<PipeState>>>>,
    pending_auth: RwLock<HashMap<u64, PendingAuth>>,
    next_session_id: AtomicU64,
    next_tree_id: AtomicU32,
    next_volatile_id: AtomicU64,
}

impl ServerState {
    pub fn new() -> Self {
        ServerState {
            next_session_id: AtomicU64::new(0x1000),
            next_tree_id: AtomicU32::new(1),
            next_volatile_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    // --- sessions ---

    pub fn allocate_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert_session(&self, session: SessionEntry) -> Arc<SessionEntry> {
        let session = Arc::new(session);
        self.sessions.write().unwrap().insert(session.id, session.clone());
        session
    }

    pub fn session(&self, id: u64) -> Option<Arc<SessionEntry>> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    /// Removes a session and everything it owns, returning the open files
    /// that still need the CLOSE cleanup sequence.
    pub fn remove_session(&self, id: u64) -> Vec<Arc<Mutex<OpenFile>>> {
        self.sessions.write().unwrap().remove(&id);
        self.trees.write().unwrap().retain(|(sid, _), _| *sid != id);
        let mut orphans = Vec::new();
        self.opens.write().unwrap().retain(|_, open| {
            let keep = match open.try_lock() {
                Ok(open) => open.session_id != id,
                Err(_) => true,
            };
            if !keep {
                orphans.push(open.clone());
            }
            keep
        });
        orphans
    }

    // --- trees ---

    pub fn allocate_tree_id(&self) -> u32 {
        self.next_tree_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert_tree(&self, tree: TreeEntry) -> Arc<TreeEntry> {
        let tree = Arc::new(tree);
        self.trees.write().unwrap().insert((tree.session_id, tree.tree_id), tree.clone());
        tree
    }

    pub fn tree(&self, session_id: u64, tree_id: u32) -> Option<Arc<TreeEntry>> {
        self.trees.read().unwrap().get(&(session_id, tree_id)).cloned()
    }

    pub fn remove_tree(&self, session_id: u64, tree_id: u32) -> Option<Arc<TreeEntry>> {
        self.trees.write().unwrap().remove(&(session_id, tree_id))
    }

    // --- open files ---

    /// Builds a fresh FileId; the persistent half carries an engine tag so
    /// stale IDs from other incarnations do not resolve.
    pub fn allocate_file_id(&self, persistent_tag: u64) -> FileId {
        FileId {
            persistent: persistent_tag,
            volatile: self.next_volatile_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn insert_open(&self, open: OpenFile) -> Arc<Mutex<OpenFile>> {
        let id = open.file_id;
        let open = Arc::new(Mutex::new(open));
        self.opens.write().unwrap().insert(id, open.clone());
        open
    }

    pub fn open(&self, id: FileId) -> Option<Arc<Mutex<OpenFile>>> {
        self.opens.read().unwrap().get(&id).cloned()
    }

    pub fn remove_open(&self, id: FileId) -> Option<Arc<Mutex<OpenFile>>> {
        self.opens.write().unwrap().remove(&id)
    }

    // --- pipes ---

    pub fn insert_pipe(&self, id: FileId, pipe: PipeState) {
        self.pipes.write().unwrap().insert(id, Arc::new(Mutex::new(pipe)));
    }

    pub fn pipe(&self, id: FileId) -> Option<Arc<Mutex<PipeState>>> {
        self.pipes.read().unwrap().get(&id).cloned()
    }

    pub fn remove_pipe(&self, id: FileId) {
        self.pipes.write().unwrap().remove(&id);
    }

    // --- pending authentication ---

    pub fn insert_pending_auth(&self, pending: PendingAuth) {
        self.pending_auth.write().unwrap().insert(pending.session_id, pending);
    }

    /// Retrieves and removes the pending record; the handshake is single
    /// shot.
    pub fn take_pending_auth(&self, session_id: u64) -> Option<PendingAuth> {
        self.pending_auth.write().unwrap().remove(&session_id)
    }

    /// Drops challenges older than the configured timeout.
    pub fn expire_pending_auth(&self, max_age: std::time::Duration) {
        self.pending_auth
            .write()
            .unwrap()
            .retain(|_, pending| pending.created_at.elapsed() < max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:445".parse().unwrap()
    }

    fn open_for(session_id: u64, state: &ServerState) -> FileId {
        let file_id = state.allocate_file_id(7);
        state.insert_open(OpenFile {
            file_id,
            session_id,
            tree_id: 1,
            share: "data".into(),
            path: "a.txt".into(),
            name: "a.txt".into(),
            parent: FileHandle(vec![1]),
            handle: FileHandle(vec![2]),
            payload_id: String::new(),
            is_directory: false,
            is_pipe: false,
            is_symlink: false,
            desired_access: 0,
            create_options: 0,
            delete_pending: false,
            oplock_level: 0,
            lease_key: None,
            frozen: FrozenTimes::default(),
            dir_cursor: None,
        });
        file_id
    }

    #[test]
    fn session_teardown_cascades() {
        let state = ServerState::new();
        let sid = state.allocate_session_id();
        state.insert_session(SessionEntry {
            id: sid,
            client_addr: addr(),
            user: None,
            guest: true,
            domain: String::new(),
            created_at: Instant::now(),
            crypto: OnceLock::new(),
        });
        state.insert_tree(TreeEntry {
            tree_id: 1,
            session_id: sid,
            share: "data".into(),
            share_type: ShareType::Disk,
            permission: SharePermission::ReadWrite,
        });
        let fid = open_for(sid, &state);

        let orphans = state.remove_session(sid);
        assert_eq!(orphans.len(), 1);
        assert!(state.session(sid).is_none());
        assert!(state.tree(sid, 1).is_none());
        assert!(state.open(fid).is_none());
    }

    #[test]
    fn pending_auth_expires() {
        let state = ServerState::new();
        state.insert_pending_auth(PendingAuth {
            session_id: 9,
            challenge: [0; 8],
            client_addr: addr(),
            created_at: Instant::now() - std::time::Duration::from_secs(120),
            spnego: false,
        });
        state.expire_pending_auth(std::time::Duration::from_secs(60));
        assert!(state.take_pending_auth(9).is_none());
    }
}
