//! An in-memory reference implementation of the collaborator traits.
//!
//! One tree per share, flat payload map, and a byte-range lock table with
//! the race-free conflict-check/release-all semantics the engine relies
//! on. Used by the integration tests and the `memshare` example; real
//! deployments plug in the gateway's metadata and content services
//! instead.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use smb_dtyp::binrw_util::prelude::FileTime;

use crate::vfs::{
    AuthContext, ContentStore, DirEntryInfo, FileHandle, FileKind, FileNode, FsStatistics,
    MetadataStore, ReadMeta, SetAttrs, SharePermission, User, UserStore, VfsError, VfsResult,
};

const NODE_ROOT: u64 = 1;

#[derive(Debug, Clone)]
struct Node {
    id: u64,
    parent: u64,
    name: String,
    kind: FileKind,
    size: u64,
    uid: u32,
    gid: u32,
    mode: u32,
    hidden: bool,
    atime: FileTime,
    mtime: FileTime,
    ctime: FileTime,
    crtime: FileTime,
    symlink_target: Option<String>,
    payload_id: String,
    acl: Option<crate::vfs::NfsAcl>,
    children: Vec<u64>,
}

impl Node {
    fn new(id: u64, parent: u64, name: &str, kind: FileKind) -> Node {
        let now = FileTime::now();
        Node {
            id,
            parent,
            name: name.to_string(),
            kind,
            size: 0,
            uid: 0,
            gid: 0,
            mode: if kind == FileKind::Directory { 0o755 } else { 0o644 },
            hidden: false,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            symlink_target: None,
            payload_id: String::new(),
            acl: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LockRange {
    node: u64,
    session_id: u64,
    offset: u64,
    length: u64,
    exclusive: bool,
}

impl LockRange {
    fn overlaps(&self, offset: u64, length: u64) -> bool {
        let end = offset.saturating_add(length);
        let lock_end = self.offset.saturating_add(self.length);
        offset < lock_end && self.offset < end
    }
}

#[derive(Default)]
struct Tree {
    nodes: HashMap<u64, Node>,
    next_id: u64,
    /// mtimes recorded via `update_pending_mtime`, flushed on demand.
    pending_mtime: HashMap<u64, FileTime>,
}

/// In-memory metadata + content + user stores.
pub struct MemFs {
    share_name: String,
    tree: Mutex<Tree>,
    locks: Mutex<Vec<LockRange>>,
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    users: Vec<User>,
}

impl MemFs {
    pub fn new(share_name: &str) -> MemFs {
        let mut tree = Tree { next_id: NODE_ROOT + 1, ..Default::default() };
        tree.nodes.insert(NODE_ROOT, Node::new(NODE_ROOT, NODE_ROOT, "", FileKind::Directory));
        MemFs {
            share_name: share_name.to_ascii_lowercase(),
            tree: Mutex::new(tree),
            locks: Mutex::new(Vec::new()),
            payloads: Mutex::new(HashMap::new()),
            users: Vec::new(),
        }
    }

    /// Registers a user for NTLM/Kerberos lookups.
    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    fn handle_of(id: u64) -> FileHandle {
        FileHandle(id.to_le_bytes().to_vec())
    }

    fn id_of(handle: &FileHandle) -> VfsResult<u64> {
        let bytes: [u8; 8] = handle.0.as_slice().try_into().map_err(|_| VfsError::Stale)?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn node_to_file(&self, node: &Node) -> FileNode {
        let mut uuid = [0u8; 16];
        uuid[0..8].copy_from_slice(&node.id.to_le_bytes());
        uuid[8..16].copy_from_slice(&node.id.to_be_bytes());
        FileNode {
            handle: Self::handle_of(node.id),
            file_uuid: uuid,
            kind: node.kind,
            size: node.size,
            nlink: 1,
            uid: node.uid,
            gid: node.gid,
            mode: node.mode,
            hidden: node.hidden,
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
            crtime: node.crtime,
            symlink_target: node.symlink_target.clone(),
            payload_id: node.payload_id.clone(),
            acl: node.acl.clone(),
        }
    }

    fn create_node(
        &self,
        tree: &mut Tree,
        auth: &AuthContext,
        parent: u64,
        name: &str,
        kind: FileKind,
        attr: &SetAttrs,
    ) -> VfsResult<u64> {
        let parent_node = tree.nodes.get(&parent).ok_or(VfsError::Stale)?;
        if parent_node.kind != FileKind::Directory {
            return Err(VfsError::NotADirectory);
        }
        if tree
            .nodes
            .values()
            .any(|n| n.parent == parent && n.id != parent && n.name == name)
        {
            return Err(VfsError::AlreadyExists);
        }
        let id = tree.next_id;
        tree.next_id += 1;
        let mut node = Node::new(id, parent, name, kind);
        node.uid = attr.uid.unwrap_or(auth.uid);
        node.gid = attr.gid.unwrap_or(auth.gid);
        if let Some(mode) = attr.mode {
            node.mode = mode;
        }
        if let Some(hidden) = attr.hidden {
            node.hidden = hidden;
        }
        if kind == FileKind::Regular {
            node.payload_id = format!("mem-{id}");
            self.payloads.lock().unwrap().insert(node.payload_id.clone(), Vec::new());
        }
        tree.nodes.get_mut(&parent).unwrap().children.push(id);
        tree.nodes.insert(id, node);
        Ok(id)
    }

    fn child_by_name(tree: &Tree, parent: u64, name: &str) -> Option<u64> {
        let parent_node = tree.nodes.get(&parent)?;
        parent_node
            .children
            .iter()
            .find(|id| tree.nodes.get(id).is_some_and(|n| n.name == name))
            .copied()
    }
}

#[async_trait]
impl MetadataStore for MemFs {
    async fn get_root_handle(&self, share_name: &str) -> VfsResult<FileHandle> {
        if share_name != self.share_name {
            return Err(VfsError::NotFound);
        }
        Ok(Self::handle_of(NODE_ROOT))
    }

    async fn lookup(
        &self,
        _auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
    ) -> VfsResult<FileNode> {
        let tree = self.tree.lock().unwrap();
        let parent = Self::id_of(parent)?;
        let parent_node = tree.nodes.get(&parent).ok_or(VfsError::Stale)?;
        if parent_node.kind != FileKind::Directory {
            return Err(VfsError::NotADirectory);
        }
        let id = Self::child_by_name(&tree, parent, name).ok_or(VfsError::NotFound)?;
        Ok(self.node_to_file(&tree.nodes[&id]))
    }

    async fn get_file(&self, _auth: &AuthContext, handle: &FileHandle) -> VfsResult<FileNode> {
        let tree = self.tree.lock().unwrap();
        let id = Self::id_of(handle)?;
        tree.nodes.get(&id).map(|n| self.node_to_file(n)).ok_or(VfsError::Stale)
    }

    async fn create_file(
        &self,
        auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
        attr: &SetAttrs,
    ) -> VfsResult<FileNode> {
        let mut tree = self.tree.lock().unwrap();
        let parent = Self::id_of(parent)?;
        let id = self.create_node(&mut tree, auth, parent, name, FileKind::Regular, attr)?;
        Ok(self.node_to_file(&tree.nodes[&id]))
    }

    async fn create_directory(
        &self,
        auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
        attr: &SetAttrs,
    ) -> VfsResult<FileNode> {
        let mut tree = self.tree.lock().unwrap();
        let parent = Self::id_of(parent)?;
        let id = self.create_node(&mut tree, auth, parent, name, FileKind::Directory, attr)?;
        Ok(self.node_to_file(&tree.nodes[&id]))
    }

    async fn create_symlink(
        &self,
        auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
        target: &str,
        attr: &SetAttrs,
    ) -> VfsResult<FileNode> {
        let mut tree = self.tree.lock().unwrap();
        let parent = Self::id_of(parent)?;
        let id = self.create_node(&mut tree, auth, parent, name, FileKind::Symlink, attr)?;
        let node = tree.nodes.get_mut(&id).unwrap();
        node.symlink_target = Some(target.to_string());
        node.size = target.len() as u64;
        Ok(self.node_to_file(&tree.nodes[&id]))
    }

    async fn remove_file(
        &self,
        _auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
    ) -> VfsResult<FileNode> {
        let mut tree = self.tree.lock().unwrap();
        let parent = Self::id_of(parent)?;
        let id = Self::child_by_name(&tree, parent, name).ok_or(VfsError::NotFound)?;
        if tree.nodes[&id].kind == FileKind::Directory {
            return Err(VfsError::IsADirectory);
        }
        let node = tree.nodes.remove(&id).unwrap();
        tree.nodes.get_mut(&parent).unwrap().children.retain(|c| *c != id);
        Ok(self.node_to_file(&node))
    }

    async fn remove_directory(
        &self,
        _auth: &AuthContext,
        parent: &FileHandle,
        name: &str,
    ) -> VfsResult<()> {
        let mut tree = self.tree.lock().unwrap();
        let parent = Self::id_of(parent)?;
        let id = Self::child_by_name(&tree, parent, name).ok_or(VfsError::NotFound)?;
        let node = &tree.nodes[&id];
        if node.kind != FileKind::Directory {
            return Err(VfsError::NotADirectory);
        }
        if !node.children.is_empty() {
            return Err(VfsError::NotEmpty);
        }
        tree.nodes.remove(&id);
        tree.nodes.get_mut(&parent).unwrap().children.retain(|c| *c != id);
        Ok(())
    }

    async fn rename(
        &self,
        _auth: &AuthContext,
        from_parent: &FileHandle,
        from_name: &str,
        to_parent: &FileHandle,
        to_name: &str,
    ) -> VfsResult<()> {
        let mut tree = self.tree.lock().unwrap();
        let from_parent = Self::id_of(from_parent)?;
        let to_parent = Self::id_of(to_parent)?;
        let id = Self::child_by_name(&tree, from_parent, from_name).ok_or(VfsError::NotFound)?;
        if Self::child_by_name(&tree, to_parent, to_name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        tree.nodes.get_mut(&from_parent).unwrap().children.retain(|c| *c != id);
        tree.nodes.get_mut(&to_parent).unwrap().children.push(id);
        let now = FileTime::now();
        let node = tree.nodes.get_mut(&id).unwrap();
        node.parent = to_parent;
        node.name = to_name.to_string();
        node.ctime = now;
        Ok(())
    }

    async fn set_file_attributes(
        &self,
        _auth: &AuthContext,
        handle: &FileHandle,
        attrs: &SetAttrs,
    ) -> VfsResult<FileNode> {
        let mut tree = self.tree.lock().unwrap();
        let id = Self::id_of(handle)?;
        let node = tree.nodes.get_mut(&id).ok_or(VfsError::Stale)?;
        if let Some(size) = attrs.size {
            if node.kind == FileKind::Directory {
                return Err(VfsError::IsADirectory);
            }
            node.size = size;
            let now = FileTime::now();
            node.mtime = now;
            node.ctime = now;
            let mut payloads = self.payloads.lock().unwrap();
            if let Some(payload) = payloads.get_mut(&node.payload_id) {
                payload.resize(size as usize, 0);
            }
        }
        if let Some(uid) = attrs.uid {
            node.uid = uid;
        }
        if let Some(gid) = attrs.gid {
            node.gid = gid;
        }
        if let Some(mode) = attrs.mode {
            node.mode = mode;
        }
        if let Some(hidden) = attrs.hidden {
            node.hidden = hidden;
        }
        if let Some(atime) = attrs.atime {
            node.atime = atime;
        }
        if let Some(mtime) = attrs.mtime {
            node.mtime = mtime;
        }
        if let Some(ctime) = attrs.ctime {
            node.ctime = ctime;
        }
        if let Some(crtime) = attrs.crtime {
            node.crtime = crtime;
        }
        if let Some(acl) = &attrs.acl {
            node.acl = Some(acl.clone());
        }
        let node = node.clone();
        Ok(self.node_to_file(&node))
    }

    async fn flush_pending_write_for_file(
        &self,
        _auth: &AuthContext,
        handle: &FileHandle,
    ) -> VfsResult<bool> {
        let mut tree = self.tree.lock().unwrap();
        let id = Self::id_of(handle)?;
        Ok(tree.pending_mtime.remove(&id).is_some())
    }

    async fn update_pending_mtime(&self, handle: &FileHandle, time: FileTime) -> VfsResult<()> {
        let mut tree = self.tree.lock().unwrap();
        let id = Self::id_of(handle)?;
        // Visible immediately; the pending entry only tracks write-back.
        if let Some(node) = tree.nodes.get_mut(&id) {
            node.mtime = time;
            node.ctime = time;
        }
        tree.pending_mtime.insert(id, time);
        Ok(())
    }

    async fn prepare_read(&self, auth: &AuthContext, handle: &FileHandle) -> VfsResult<ReadMeta> {
        let node = self.get_file(auth, handle).await?;
        Ok(ReadMeta { payload_id: node.payload_id.clone(), node })
    }

    async fn read_dir(
        &self,
        _auth: &AuthContext,
        handle: &FileHandle,
    ) -> VfsResult<Vec<DirEntryInfo>> {
        let tree = self.tree.lock().unwrap();
        let id = Self::id_of(handle)?;
        let node = tree.nodes.get(&id).ok_or(VfsError::Stale)?;
        if node.kind != FileKind::Directory {
            return Err(VfsError::NotADirectory);
        }
        let mut entries: Vec<DirEntryInfo> = node
            .children
            .iter()
            .filter_map(|child| tree.nodes.get(child))
            .map(|child| DirEntryInfo { name: child.name.clone(), node: self.node_to_file(child) })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn lock_range(
        &self,
        handle: &FileHandle,
        session_id: u64,
        offset: u64,
        length: u64,
        exclusive: bool,
    ) -> VfsResult<()> {
        let node = Self::id_of(handle)?;
        let mut locks = self.locks.lock().unwrap();
        let conflict = locks.iter().any(|lock| {
            lock.node == node
                && lock.overlaps(offset, length)
                && (exclusive || lock.exclusive)
                && lock.session_id != session_id
        });
        if conflict {
            return Err(VfsError::LockConflict);
        }
        locks.push(LockRange { node, session_id, offset, length, exclusive });
        Ok(())
    }

    async fn unlock_range(
        &self,
        handle: &FileHandle,
        session_id: u64,
        offset: u64,
        length: u64,
    ) -> VfsResult<()> {
        let node = Self::id_of(handle)?;
        let mut locks = self.locks.lock().unwrap();
        let before = locks.len();
        locks.retain(|lock| {
            !(lock.node == node
                && lock.session_id == session_id
                && lock.offset == offset
                && lock.length == length)
        });
        if locks.len() == before {
            return Err(VfsError::NotLocked);
        }
        Ok(())
    }

    async fn check_lock_for_io(
        &self,
        handle: &FileHandle,
        session_id: u64,
        offset: u64,
        length: u64,
        is_write: bool,
    ) -> VfsResult<()> {
        let node = Self::id_of(handle)?;
        let locks = self.locks.lock().unwrap();
        let conflict = locks.iter().any(|lock| {
            lock.node == node
                && lock.session_id != session_id
                && lock.overlaps(offset, length)
                && (is_write || lock.exclusive)
        });
        if conflict {
            return Err(VfsError::LockConflict);
        }
        Ok(())
    }

    async fn unlock_all_for_session(&self, handle: &FileHandle, session_id: u64) -> VfsResult<()> {
        let node = Self::id_of(handle)?;
        let mut locks = self.locks.lock().unwrap();
        locks.retain(|lock| !(lock.node == node && lock.session_id == session_id));
        Ok(())
    }

    async fn get_filesystem_statistics(&self, _handle: &FileHandle) -> VfsResult<FsStatistics> {
        let used: u64 = self.payloads.lock().unwrap().values().map(|p| p.len() as u64).sum();
        let total = 64 * 1024 * 1024 * 1024u64;
        Ok(FsStatistics { total_bytes: total, available_bytes: total - used.min(total) })
    }
}

#[async_trait]
impl ContentStore for MemFs {
    async fn read_at(&self, payload_id: &str, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        let payloads = self.payloads.lock().unwrap();
        let payload = payloads.get(payload_id).ok_or(VfsError::Stale)?;
        let offset = offset as usize;
        if offset >= payload.len() {
            return Ok(0);
        }
        let n = buf.len().min(payload.len() - offset);
        buf[..n].copy_from_slice(&payload[offset..offset + n]);
        Ok(n)
    }

    async fn write_at(&self, payload_id: &str, data: &[u8], offset: u64) -> VfsResult<usize> {
        let mut payloads = self.payloads.lock().unwrap();
        let payload = payloads.get_mut(payload_id).ok_or(VfsError::Stale)?;
        let end = offset as usize + data.len();
        if payload.len() < end {
            payload.resize(end, 0);
        }
        payload[offset as usize..end].copy_from_slice(data);
        Ok(data.len())
    }

    async fn flush(&self, _payload_id: &str) -> VfsResult<()> {
        Ok(())
    }

    async fn delete(&self, payload_id: &str) -> VfsResult<()> {
        self.payloads.lock().unwrap().remove(payload_id);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemFs {
    async fn get_user(&self, username: &str) -> Option<User> {
        self.users.iter().find(|u| u.name == username).cloned()
    }

    async fn resolve_share_permission(&self, _user: &User, _share: &str) -> Option<SharePermission> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthContext {
        AuthContext::guest("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn create_lookup_remove() {
        let fs = MemFs::new("data");
        let root = fs.get_root_handle("data").await.unwrap();
        let attrs = SetAttrs::default();
        let file = fs.create_file(&auth(), &root, "a.txt", &attrs).await.unwrap();
        assert_eq!(file.kind, FileKind::Regular);
        assert!(!file.payload_id.is_empty());

        let found = fs.lookup(&auth(), &root, "a.txt").await.unwrap();
        assert_eq!(found.handle, file.handle);

        fs.remove_file(&auth(), &root, "a.txt").await.unwrap();
        assert!(matches!(fs.lookup(&auth(), &root, "a.txt").await, Err(VfsError::NotFound)));
    }

    #[tokio::test]
    async fn lock_conflicts_between_sessions() {
        let fs = MemFs::new("data");
        let root = fs.get_root_handle("data").await.unwrap();
        let file = fs.create_file(&auth(), &root, "l", &SetAttrs::default()).await.unwrap();

        fs.lock_range(&file.handle, 1, 0, 10, true).await.unwrap();
        assert!(matches!(
            fs.lock_range(&file.handle, 2, 5, 10, false).await,
            Err(VfsError::LockConflict)
        ));
        assert!(matches!(
            fs.check_lock_for_io(&file.handle, 2, 0, 4, false).await,
            Err(VfsError::LockConflict)
        ));
        fs.check_lock_for_io(&file.handle, 1, 0, 4, true).await.unwrap();

        fs.unlock_all_for_session(&file.handle, 1).await.unwrap();
        fs.lock_range(&file.handle, 2, 5, 10, false).await.unwrap();
    }
}
