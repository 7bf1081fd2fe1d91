//! Change-notify registrations.
//!
//! A registration is one-shot: the first matching change (or a cancel, or
//! the close of the watched directory) completes it. The dispatcher parks
//! the request after sending an async interim response and completes it
//! through the registration's channel.

use std::collections::HashMap;
use std::sync::Mutex;

use smb_fscc::{FileNotifyInformation, NotifyAction};
use smb_msg::{FileId, NotifyFilter, Status};
use tokio::sync::oneshot;

/// How a parked CHANGE_NOTIFY completes.
#[derive(Debug)]
pub enum NotifyOutcome {
    /// Deliver these change records with SUCCESS.
    Changes(Vec<FileNotifyInformation>),
    /// Complete with an empty body and this status (CANCELLED,
    /// NOTIFY_CLEANUP).
    Status(Status),
}

struct Registration {
    message_id: u64,
    session_id: u64,
    share: String,
    /// Watched directory, share-relative.
    path: String,
    filter: NotifyFilter,
    recursive: bool,
    tx: oneshot::Sender<NotifyOutcome>,
}

/// One change event posted by a mutating handler.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub action: NotifyAction,
    pub name: String,
}

#[derive(Default)]
pub struct NotifyRegistry {
    pending: Mutex<HashMap<FileId, Registration>>,
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watch for a directory handle, returning the receiver the
    /// dispatcher parks on. An existing registration for the same handle is
    /// replaced (completed as canceled).
    pub fn register(
        &self,
        file_id: FileId,
        message_id: u64,
        session_id: u64,
        share: &str,
        path: &str,
        filter: NotifyFilter,
        recursive: bool,
    ) -> oneshot::Receiver<NotifyOutcome> {
        let (tx, rx) = oneshot::channel();
        let registration = Registration {
            message_id,
            session_id,
            share: share.to_string(),
            path: path.to_string(),
            filter,
            recursive,
            tx,
        };
        let previous = self.pending.lock().unwrap().insert(file_id, registration);
        if let Some(previous) = previous {
            let _ = previous.tx.send(NotifyOutcome::Status(Status::Cancelled));
        }
        rx
    }

    /// Delivers change records for a directory. Matching registrations are
    /// consumed.
    pub fn post(&self, share: &str, dir_path: &str, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        let matching: Vec<FileId> = pending
            .iter()
            .filter(|(_, reg)| {
                reg.share == share
                    && (reg.path == dir_path
                        || (reg.recursive && is_below(&reg.path, dir_path)))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in matching {
            let reg = pending.remove(&id).unwrap();
            let records: Vec<FileNotifyInformation> = events
                .iter()
                .filter(|ev| filter_matches(reg.filter, ev.action))
                .map(|ev| FileNotifyInformation {
                    action: ev.action,
                    file_name: ev.name.as_str().into(),
                })
                .collect();
            if records.is_empty() {
                // Nothing the watcher asked for; leave it parked.
                let _ = pending.insert(id, reg);
                continue;
            }
            let _ = reg.tx.send(NotifyOutcome::Changes(records));
        }
    }

    /// Cancels the registration carrying this message ID, if any.
    pub fn cancel(&self, session_id: u64, message_id: u64) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let id = pending
            .iter()
            .find(|(_, reg)| reg.session_id == session_id && reg.message_id == message_id)
            .map(|(id, _)| *id);
        match id {
            Some(id) => {
                let reg = pending.remove(&id).unwrap();
                let _ = reg.tx.send(NotifyOutcome::Status(Status::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Completes a registration because its directory handle is closing.
    pub fn unregister(&self, file_id: FileId) {
        if let Some(reg) = self.pending.lock().unwrap().remove(&file_id) {
            let _ = reg.tx.send(NotifyOutcome::Status(Status::NotifyCleanup));
        }
    }
}

fn is_below(watch_root: &str, dir_path: &str) -> bool {
    watch_root.is_empty() || dir_path.starts_with(&format!("{watch_root}/"))
}

fn filter_matches(filter: NotifyFilter, action: NotifyAction) -> bool {
    match action {
        NotifyAction::Added
        | NotifyAction::Removed
        | NotifyAction::RenamedOldName
        | NotifyAction::RenamedNewName => filter.file_name() || filter.dir_name(),
        NotifyAction::Modified => {
            filter.attributes() || filter.size() || filter.last_write() || filter.security()
        }
        NotifyAction::AddedStream | NotifyAction::RemovedStream | NotifyAction::ModifiedStream => {
            filter.stream_name() || filter.stream_size() || filter.stream_write()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FID: FileId = FileId { persistent: 1, volatile: 1 };

    fn all_filter() -> NotifyFilter {
        NotifyFilter::new().with_file_name(true).with_dir_name(true).with_last_write(true)
    }

    #[tokio::test]
    async fn registration_is_one_shot() {
        let registry = NotifyRegistry::new();
        let rx = registry.register(FID, 5, 1, "data", "dir", all_filter(), false);
        registry.post(
            "data",
            "dir",
            &[ChangeEvent { action: NotifyAction::Added, name: "x.txt".into() }],
        );
        match rx.await.unwrap() {
            NotifyOutcome::Changes(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].action, NotifyAction::Added);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // A second post finds no registration.
        registry.post(
            "data",
            "dir",
            &[ChangeEvent { action: NotifyAction::Added, name: "y.txt".into() }],
        );
    }

    #[tokio::test]
    async fn cancel_completes_with_cancelled() {
        let registry = NotifyRegistry::new();
        let rx = registry.register(FID, 5, 1, "data", "dir", all_filter(), false);
        assert!(registry.cancel(1, 5));
        match rx.await.unwrap() {
            NotifyOutcome::Status(Status::Cancelled) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_completes_with_cleanup() {
        let registry = NotifyRegistry::new();
        let rx = registry.register(FID, 5, 1, "data", "dir", all_filter(), false);
        registry.unregister(FID);
        match rx.await.unwrap() {
            NotifyOutcome::Status(Status::NotifyCleanup) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn recursive_watch_sees_subdirectory_changes() {
        let registry = NotifyRegistry::new();
        let rx = registry.register(FID, 6, 1, "data", "", all_filter(), true);
        registry.post(
            "data",
            "a/b",
            &[ChangeEvent { action: NotifyAction::Removed, name: "c.txt".into() }],
        );
        assert!(matches!(rx.await.unwrap(), NotifyOutcome::Changes(_)));
    }
}
