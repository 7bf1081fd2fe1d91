//! Oplock and lease grant tracking, keyed by `(share, path)`.
//!
//! Grants and breaks for one key are serialized by the table lock. A
//! conflicting request is resolved by downgrading the requester's grant;
//! existing holders keep their state until they close or acknowledge a
//! break.

use std::collections::HashMap;
use std::sync::Mutex;

use smb_msg::{FileId, LeaseState, OplockLevel};

/// Lease state bits as a plain word: read/handle/write caching.
pub const LEASE_READ: u32 = 0x01;
pub const LEASE_HANDLE: u32 = 0x02;
pub const LEASE_WRITE: u32 = 0x04;

pub fn lease_state_bits(state: LeaseState) -> u32 {
    let mut bits = 0;
    if state.read_caching() {
        bits |= LEASE_READ;
    }
    if state.handle_caching() {
        bits |= LEASE_HANDLE;
    }
    if state.write_caching() {
        bits |= LEASE_WRITE;
    }
    bits
}

pub fn lease_state_from_bits(bits: u32) -> LeaseState {
    LeaseState::new()
        .with_read_caching(bits & LEASE_READ != 0)
        .with_handle_caching(bits & LEASE_HANDLE != 0)
        .with_write_caching(bits & LEASE_WRITE != 0)
}

#[derive(Debug)]
struct OplockEntry {
    level: OplockLevel,
    lease_key: Option<u128>,
    lease_state: u32,
    epoch: u16,
    breaking: bool,
    holders: Vec<FileId>,
}

/// Result of a lease request.
#[derive(Debug, Clone, Copy)]
pub struct LeaseGrant {
    pub state: u32,
    pub epoch: u16,
    pub break_in_progress: bool,
}

#[derive(Default)]
pub struct OplockManager {
    entries: Mutex<HashMap<(String, String), OplockEntry>>,
}

impl OplockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(share: &str, path: &str) -> (String, String) {
        (share.to_string(), path.to_string())
    }

    /// Requests a lease for `(share, path)`. A second open with the same
    /// lease key joins and may upgrade the lease; a different key caps the
    /// grant to read caching and strips write caching from the recorded
    /// state.
    pub fn request_lease(
        &self,
        share: &str,
        path: &str,
        lease_key: u128,
        requested: u32,
        is_directory: bool,
        file_id: FileId,
    ) -> LeaseGrant {
        // Directories may only cache reads and handles.
        let requested = if is_directory { requested & (LEASE_READ | LEASE_HANDLE) } else { requested };

        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(Self::key(share, path)).or_insert_with(|| OplockEntry {
            level: OplockLevel::Lease,
            lease_key: Some(lease_key),
            lease_state: 0,
            epoch: 0,
            breaking: false,
            holders: Vec::new(),
        });

        match entry.lease_key {
            Some(existing) if existing == lease_key => {
                let union = entry.lease_state | requested;
                if union != entry.lease_state {
                    entry.epoch = entry.epoch.wrapping_add(1);
                }
                entry.lease_state = union;
            }
            Some(_) => {
                // Conflicting owner: cap the grant, drop write caching from
                // the recorded state so both holders are consistent.
                entry.lease_state &= !LEASE_WRITE;
                entry.lease_key = Some(lease_key);
                entry.lease_state = (entry.lease_state | requested) & (LEASE_READ | LEASE_HANDLE);
                entry.epoch = entry.epoch.wrapping_add(1);
            }
            None => {
                entry.lease_key = Some(lease_key);
                entry.lease_state = requested;
                entry.epoch = entry.epoch.wrapping_add(1);
            }
        }
        entry.level = OplockLevel::Lease;
        if !entry.holders.contains(&file_id) {
            entry.holders.push(file_id);
        }
        LeaseGrant {
            state: entry.lease_state,
            epoch: entry.epoch,
            break_in_progress: entry.breaking,
        }
    }

    /// Requests a classic oplock; conflicts downgrade the granted level.
    pub fn request_oplock(
        &self,
        share: &str,
        path: &str,
        requested: OplockLevel,
        file_id: FileId,
    ) -> OplockLevel {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(Self::key(share, path)).or_insert_with(|| OplockEntry {
            level: OplockLevel::None,
            lease_key: None,
            lease_state: 0,
            epoch: 0,
            breaking: false,
            holders: Vec::new(),
        });

        let granted = if entry.holders.is_empty() {
            requested
        } else {
            // Another open exists: nothing stronger than level II.
            match requested {
                OplockLevel::None => OplockLevel::None,
                _ => OplockLevel::II,
            }
        };
        entry.level = granted;
        if !entry.holders.contains(&file_id) {
            entry.holders.push(file_id);
        }
        granted
    }

    /// Records a break acknowledgment, lowering the stored lease state.
    pub fn ack_lease_break(&self, lease_key: u128, new_state: u32) -> Option<u16> {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values_mut() {
            if entry.lease_key == Some(lease_key) {
                entry.lease_state &= new_state;
                entry.breaking = false;
                entry.epoch = entry.epoch.wrapping_add(1);
                return Some(entry.epoch);
            }
        }
        None
    }

    /// Records an oplock break acknowledgment for a handle.
    pub fn ack_oplock_break(&self, file_id: FileId, new_level: OplockLevel) -> bool {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values_mut() {
            if entry.holders.contains(&file_id) {
                entry.level = entry.level.min(new_level);
                entry.breaking = false;
                return true;
            }
        }
        false
    }

    /// Releases a handle's interest; the entry goes away with its last
    /// holder.
    pub fn release(&self, share: &str, path: &str, file_id: FileId) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&Self::key(share, path)) {
            entry.holders.retain(|h| *h != file_id);
            if entry.holders.is_empty() {
                entries.remove(&Self::key(share, path));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FID1: FileId = FileId { persistent: 1, volatile: 1 };
    const FID2: FileId = FileId { persistent: 1, volatile: 2 };

    #[test]
    fn same_key_upgrades_and_bumps_epoch() {
        let mgr = OplockManager::new();
        let first = mgr.request_lease("s", "a.txt", 7, LEASE_READ, false, FID1);
        assert_eq!(first.state, LEASE_READ);
        let second =
            mgr.request_lease("s", "a.txt", 7, LEASE_READ | LEASE_WRITE | LEASE_HANDLE, false, FID1);
        assert_eq!(second.state, LEASE_READ | LEASE_WRITE | LEASE_HANDLE);
        assert!(second.epoch > first.epoch);
    }

    #[test]
    fn conflicting_key_loses_write_caching() {
        let mgr = OplockManager::new();
        mgr.request_lease("s", "a.txt", 7, LEASE_READ | LEASE_WRITE | LEASE_HANDLE, false, FID1);
        let other = mgr.request_lease("s", "a.txt", 8, LEASE_READ | LEASE_WRITE, false, FID2);
        assert_eq!(other.state & LEASE_WRITE, 0);
        assert_ne!(other.state & LEASE_READ, 0);
    }

    #[test]
    fn directories_never_get_write_caching() {
        let mgr = OplockManager::new();
        let grant = mgr.request_lease("s", "dir", 9, LEASE_READ | LEASE_WRITE | LEASE_HANDLE, true, FID1);
        assert_eq!(grant.state, LEASE_READ | LEASE_HANDLE);
    }

    #[test]
    fn second_opener_downgrades_oplock() {
        let mgr = OplockManager::new();
        assert_eq!(
            mgr.request_oplock("s", "a.txt", OplockLevel::Batch, FID1),
            OplockLevel::Batch
        );
        assert_eq!(
            mgr.request_oplock("s", "a.txt", OplockLevel::Exclusive, FID2),
            OplockLevel::II
        );
        mgr.release("s", "a.txt", FID1);
        mgr.release("s", "a.txt", FID2);
        assert_eq!(
            mgr.request_oplock("s", "a.txt", OplockLevel::Exclusive, FID1),
            OplockLevel::Exclusive
        );
    }
}
