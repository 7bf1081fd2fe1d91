//! End-to-end scenarios over a real listener and the in-memory backend.

mod support;

use smb_dtyp::binrw_util::prelude::FileTime;
use smb_fscc::{
    FileBasicInformation, FileDispositionInformation, FileRenameInformation,
    QueryFileInfoClass, SetFileInfoClass,
};
use smb_msg::{CreateDisposition, CreateOptions, Dialect, Status};
use binrw::BinRead;

use support::{TestClient, start_server, to_bytes};

const INFO_FILE: u8 = 1;

#[tokio::test]
async fn guest_ipc_connect_and_session_gate() {
    let addr = start_server().await;

    // A guest session can reach IPC$.
    let mut client = TestClient::connect(addr).await;
    let (status, _) = client.negotiate(vec![0x0202, 0x0210]).await;
    assert_eq!(status, Status::Success);
    assert_eq!(client.session_setup_guest().await, Status::Success);
    let body = client.tree_connect_response("IPC$").await;
    assert_eq!(body.share_type, smb_msg::ShareType::Pipe);
    assert_eq!(body.maximal_access, 0x1f);

    // Without a session, the tree connect is rejected outright.
    let mut bare = TestClient::connect(addr).await;
    let (status, _) = bare.negotiate(vec![0x0202]).await;
    assert_eq!(status, Status::Success);
    let (status, _) = bare.tree_connect("IPC$").await;
    assert_eq!(status, Status::UserSessionDeleted);
}

#[tokio::test]
async fn ntlmv2_happy_path_on_smb21() {
    let addr = start_server().await;
    let mut client = TestClient::connect(addr).await;

    let (status, response) = client.negotiate(vec![0x0210]).await;
    assert_eq!(status, Status::Success);
    let response = response.unwrap();
    assert_eq!(response.dialect_revision, Dialect::Smb021 as u16);
    assert!(response.capabilities.leasing());
    assert!(response.capabilities.large_mtu());

    let status = client
        .session_setup(support::TEST_USER, support::TEST_PASSWORD, "WORKGROUP")
        .await;
    assert_eq!(status, Status::Success);
}

#[tokio::test]
async fn wrong_password_fails_logon() {
    let addr = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let (status, _) = client.negotiate(vec![0x0210]).await;
    assert_eq!(status, Status::Success);
    let status = client.session_setup(support::TEST_USER, "wrong", "WORKGROUP").await;
    assert_eq!(status, Status::LogonFailure);
}

#[tokio::test]
async fn negotiate_wildcard_echo_and_range() {
    let addr = start_server().await;

    // The wildcard alone is echoed back.
    let mut client = TestClient::connect(addr).await;
    let (status, response) = client.negotiate(vec![0x02ff, 0x0202]).await;
    assert_eq!(status, Status::Success);
    assert_eq!(response.unwrap().dialect_revision, 0x02ff);

    // The wildcard alone also stands for 2.0.2.
    let mut client = TestClient::connect(addr).await;
    let (status, response) = client.negotiate(vec![0x02ff]).await;
    assert_eq!(status, Status::Success);
    assert_eq!(response.unwrap().dialect_revision, 0x02ff);

    // A higher dialect wins over the wildcard.
    let mut client = TestClient::connect(addr).await;
    let (status, response) = client.negotiate(vec![0x02ff, 0x0202, 0x0311]).await;
    assert_eq!(status, Status::Success);
    assert_eq!(response.unwrap().dialect_revision, Dialect::Smb0311 as u16);

    // Nothing acceptable: NOT_SUPPORTED.
    let mut client = TestClient::connect(addr).await;
    let (status, _) = client.negotiate(vec![0x0001]).await;
    assert_eq!(status, Status::NotSupported);
}

#[tokio::test]
async fn negotiate_3_1_1_selects_cipher_and_salt() {
    use smb_msg::{
        EncryptionCapabilities, NegotiateContextValue, PreauthIntegrityCapabilities,
        CIPHER_AES_128_CCM, CIPHER_AES_128_GCM, HASH_ALGORITHM_SHA512,
    };

    let addr = start_server().await;
    let mut client = TestClient::connect(addr).await;

    // Drive the raw request so contexts can be attached.
    let response = client
        .send(smb_msg::RequestContent::Negotiate(smb_msg::NegotiateRequest {
            security_mode: Default::default(),
            capabilities: Default::default(),
            client_guid: smb_dtyp::guid::Guid::generate(),
            dialects: vec![0x0202, 0x0210, 0x0300, 0x0311],
            negotiate_contexts: vec![
                NegotiateContextValue::PreauthIntegrity(PreauthIntegrityCapabilities {
                    hash_algorithms: vec![HASH_ALGORITHM_SHA512],
                    salt: vec![0xcd; 32],
                })
                .into(),
                NegotiateContextValue::Encryption(EncryptionCapabilities {
                    ciphers: vec![CIPHER_AES_128_CCM, CIPHER_AES_128_GCM],
                })
                .into(),
            ],
        }))
        .await;
    assert_eq!(response.header.status, 0);
    let smb_msg::ResponseContent::Negotiate(body) = response.content else {
        panic!("expected negotiate response");
    };
    assert_eq!(body.dialect_revision, Dialect::Smb0311 as u16);

    let mut found_preauth = false;
    let mut found_cipher = false;
    for context in &body.negotiate_contexts {
        match &context.data {
            NegotiateContextValue::PreauthIntegrity(preauth) => {
                assert_eq!(preauth.hash_algorithms, vec![HASH_ALGORITHM_SHA512]);
                assert_eq!(preauth.salt.len(), 32);
                found_preauth = true;
            }
            NegotiateContextValue::Encryption(encryption) => {
                assert_eq!(encryption.ciphers, vec![CIPHER_AES_128_GCM]);
                found_cipher = true;
            }
            _ => {}
        }
    }
    assert!(found_preauth && found_cipher);
}

#[tokio::test]
async fn create_write_close_with_postquery() {
    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    // Parent directory, then the file beneath it.
    let (status, dir) = client
        .create("a", CreateDisposition::OpenIf, CreateOptions::new().with_directory_file(true))
        .await;
    assert_eq!(status, Status::Success);
    client.close(dir.unwrap().file_id, false).await;

    let (status, created) = client
        .create("a\\b.txt", CreateDisposition::OpenIf, CreateOptions::new())
        .await;
    assert_eq!(status, Status::Success);
    let created = created.unwrap();
    assert_eq!(created.create_action, smb_msg::CreateAction::Created);

    let (status, count) = client.write(created.file_id, 0, b"hello").await;
    assert_eq!(status, Status::Success);
    assert_eq!(count, 5);

    let (status, read_back) = client.read(created.file_id, 0, 16).await;
    assert_eq!(status, Status::Success);
    assert_eq!(read_back, b"hello");

    assert_eq!(client.flush(created.file_id).await, Status::Success);

    let (status, closed) = client.close(created.file_id, true).await;
    assert_eq!(status, Status::Success);
    let closed = closed.unwrap();
    assert_eq!(closed.end_of_file, 5);
    assert_eq!(closed.allocation_size, 4096);
    assert!(closed.file_attributes.archive());

    // The handle is gone afterwards.
    let (status, _) = client.close(created.file_id, false).await;
    assert_eq!(status, Status::FileClosed);
}

#[tokio::test]
async fn create_dispositions() {
    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    let (status, first) =
        client.create("x.txt", CreateDisposition::Create, CreateOptions::new()).await;
    assert_eq!(status, Status::Success);
    client.close(first.unwrap().file_id, false).await;

    // CREATE on an existing file collides.
    let (status, _) = client.create("x.txt", CreateDisposition::Create, CreateOptions::new()).await;
    assert_eq!(status, Status::ObjectNameCollision);

    // OPEN of a missing file fails.
    let (status, _) = client.create("y.txt", CreateDisposition::Open, CreateOptions::new()).await;
    assert_eq!(status, Status::ObjectNameNotFound);

    // OVERWRITE truncates.
    let (status, opened) =
        client.create("x.txt", CreateDisposition::OpenIf, CreateOptions::new()).await;
    assert_eq!(status, Status::Success);
    let opened = opened.unwrap();
    client.write(opened.file_id, 0, b"0123456789").await;
    client.close(opened.file_id, false).await;

    let (status, truncated) =
        client.create("x.txt", CreateDisposition::Overwrite, CreateOptions::new()).await;
    assert_eq!(status, Status::Success);
    let truncated = truncated.unwrap();
    assert_eq!(truncated.create_action, smb_msg::CreateAction::Overwritten);
    assert_eq!(truncated.end_of_file, 0);
    client.close(truncated.file_id, false).await;
}

#[tokio::test]
async fn rename_clears_delete_pending() {
    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    let (status, created) = client
        .create(
            "a.txt",
            CreateDisposition::Create,
            CreateOptions::new().with_delete_on_close(true),
        )
        .await;
    assert_eq!(status, Status::Success);
    let file_id = created.unwrap().file_id;

    let rename = FileRenameInformation {
        replace_if_exists: false.into(),
        root_directory: 0,
        file_name: "b.txt".into(),
    };
    let status = client
        .set_info(file_id, INFO_FILE, SetFileInfoClass::Rename as u8, to_bytes(&rename))
        .await;
    assert_eq!(status, Status::Success);

    let (status, _) = client.close(file_id, false).await;
    assert_eq!(status, Status::Success);

    // The rename cleared delete-on-close: b.txt exists, a.txt does not.
    let (status, opened) = client.create("b.txt", CreateDisposition::Open, CreateOptions::new()).await;
    assert_eq!(status, Status::Success);
    client.close(opened.unwrap().file_id, false).await;
    let (status, _) = client.create("a.txt", CreateDisposition::Open, CreateOptions::new()).await;
    assert_eq!(status, Status::ObjectNameNotFound);
}

#[tokio::test]
async fn delete_on_close_removes_file() {
    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    let (status, created) =
        client.create("doomed.txt", CreateDisposition::Create, CreateOptions::new()).await;
    assert_eq!(status, Status::Success);
    let file_id = created.unwrap().file_id;

    let disposition = FileDispositionInformation { delete_pending: true.into() };
    let status = client
        .set_info(file_id, INFO_FILE, SetFileInfoClass::Disposition as u8, to_bytes(&disposition))
        .await;
    assert_eq!(status, Status::Success);
    client.close(file_id, false).await;

    let (status, _) =
        client.create("doomed.txt", CreateDisposition::Open, CreateOptions::new()).await;
    assert_eq!(status, Status::ObjectNameNotFound);
}

#[tokio::test]
async fn frozen_mtime_survives_writes_until_thawed() {
    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    let (status, created) =
        client.create("frozen.txt", CreateDisposition::Create, CreateOptions::new()).await;
    assert_eq!(status, Status::Success);
    let file_id = created.unwrap().file_id;
    client.write(file_id, 0, b"a").await;

    // Freeze mtime (sentinel -1).
    let freeze = FileBasicInformation {
        creation_time: FileTime::ZERO,
        last_access_time: FileTime::ZERO,
        last_write_time: u64::MAX.into(),
        change_time: FileTime::ZERO,
        file_attributes: Default::default(),
    };
    let status = client
        .set_info(file_id, INFO_FILE, SetFileInfoClass::Basic as u8, to_bytes(&freeze))
        .await;
    assert_eq!(status, Status::Success);

    let (status, data) =
        client.query_info(file_id, INFO_FILE, QueryFileInfoClass::Basic as u8, 64).await;
    assert_eq!(status, Status::Success);
    let frozen_at = FileBasicInformation::read_le(&mut std::io::Cursor::new(&data))
        .unwrap()
        .last_write_time;

    // Writes do not move the frozen timestamp.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    client.write(file_id, 1, b"b").await;
    let (_, data) =
        client.query_info(file_id, INFO_FILE, QueryFileInfoClass::Basic as u8, 64).await;
    let after_write = FileBasicInformation::read_le(&mut std::io::Cursor::new(&data))
        .unwrap()
        .last_write_time;
    assert_eq!(after_write, frozen_at);

    // Thaw (sentinel -2) and write again: time moves forward.
    let thaw = FileBasicInformation {
        creation_time: FileTime::ZERO,
        last_access_time: FileTime::ZERO,
        last_write_time: (u64::MAX - 1).into(),
        change_time: FileTime::ZERO,
        file_attributes: Default::default(),
    };
    let status =
        client.set_info(file_id, INFO_FILE, SetFileInfoClass::Basic as u8, to_bytes(&thaw)).await;
    assert_eq!(status, Status::Success);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    client.write(file_id, 2, b"c").await;
    let (_, data) =
        client.query_info(file_id, INFO_FILE, QueryFileInfoClass::Basic as u8, 64).await;
    let after_thaw = FileBasicInformation::read_le(&mut std::io::Cursor::new(&data))
        .unwrap()
        .last_write_time;
    assert!(after_thaw > frozen_at);

    client.close(file_id, false).await;
}

#[tokio::test]
async fn set_info_basic_all_zero_sentinels_is_noop() {
    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    let (_, created) =
        client.create("noop.txt", CreateDisposition::Create, CreateOptions::new()).await;
    let file_id = created.unwrap().file_id;

    let (_, before) =
        client.query_info(file_id, INFO_FILE, QueryFileInfoClass::Basic as u8, 64).await;

    let noop = FileBasicInformation::default();
    let status =
        client.set_info(file_id, INFO_FILE, SetFileInfoClass::Basic as u8, to_bytes(&noop)).await;
    assert_eq!(status, Status::Success);

    let (_, after) =
        client.query_info(file_id, INFO_FILE, QueryFileInfoClass::Basic as u8, 64).await;
    // Attributes may pick up the hidden bit from the set; timestamps must
    // be untouched.
    assert_eq!(before[0..32], after[0..32]);
    client.close(file_id, false).await;
}

#[tokio::test]
async fn query_directory_lists_entries() {
    use smb_fscc::FileIdBothDirectoryInformationList;
    use smb_msg::{QueryDirectoryFlags, QueryDirectoryRequest};

    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    for name in ["one.txt", "two.txt"] {
        let (_, created) = client.create(name, CreateDisposition::Create, CreateOptions::new()).await;
        client.close(created.unwrap().file_id, false).await;
    }
    let (_, dir) = client
        .create("", CreateDisposition::Open, CreateOptions::new().with_directory_file(true))
        .await;
    let dir_id = dir.unwrap().file_id;

    let response = client
        .send(smb_msg::RequestContent::QueryDirectory(QueryDirectoryRequest {
            info_class: 37,
            flags: QueryDirectoryFlags::new().with_restart_scans(true),
            file_index: 0,
            file_id: dir_id,
            output_buffer_length: 0x10000,
            pattern: "*".into(),
        }))
        .await;
    assert_eq!(response.header.status, 0);
    let smb_msg::ResponseContent::QueryDirectory(body) = response.content else {
        panic!("expected query directory response");
    };
    let entries = FileIdBothDirectoryInformationList::read_le(&mut std::io::Cursor::new(
        &body.buffer,
    ))
    .unwrap();
    let names: Vec<String> =
        entries.iter().map(|e| e.file_name.as_str().to_string()).collect();
    assert!(names.contains(&".".to_string()));
    assert!(names.contains(&"one.txt".to_string()));
    assert!(names.contains(&"two.txt".to_string()));

    // Exhausted on the second call.
    let response = client
        .send(smb_msg::RequestContent::QueryDirectory(QueryDirectoryRequest {
            info_class: 37,
            flags: QueryDirectoryFlags::new(),
            file_index: 0,
            file_id: dir_id,
            output_buffer_length: 0x10000,
            pattern: "*".into(),
        }))
        .await;
    assert_eq!(response.header.status, Status::NoMoreFiles as u32);
    client.close(dir_id, false).await;
}

#[tokio::test]
async fn mfsymlink_file_becomes_symlink_on_close() {
    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    let payload = smb_srv::mfsymlink::encode("target.txt").unwrap();
    let (_, created) =
        client.create("link.txt", CreateDisposition::Create, CreateOptions::new()).await;
    let file_id = created.unwrap().file_id;
    let (status, count) = client.write(file_id, 0, &payload).await;
    assert_eq!(status, Status::Success);
    assert_eq!(count as usize, payload.len());
    client.close(file_id, false).await;

    // Re-open: now a symlink served as MFsymlink content of 1067 bytes.
    let (status, reopened) =
        client.create("link.txt", CreateDisposition::Open, CreateOptions::new()).await;
    assert_eq!(status, Status::Success);
    let reopened = reopened.unwrap();
    assert_eq!(reopened.end_of_file, smb_srv::mfsymlink::MFSYMLINK_SIZE as u64);
    assert!(reopened.file_attributes.reparse_point());

    let (status, data) = client.read(reopened.file_id, 0, 2048).await;
    assert_eq!(status, Status::Success);
    assert_eq!(smb_srv::mfsymlink::decode(&data).as_deref(), Some("target.txt"));
    client.close(reopened.file_id, false).await;
}

#[tokio::test]
async fn bad_handle_and_bad_tree_are_rejected_cleanly() {
    let addr = start_server().await;
    let mut client = TestClient::ready(addr).await;

    // A made-up FileId does not resolve.
    let bogus = smb_msg::FileId { persistent: 1, volatile: 0x999 };
    let (status, _) = client.read(bogus, 0, 16).await;
    assert_eq!(status, Status::FileClosed);

    // A stale tree id fails without touching the store.
    client.tree_id = 0x7777;
    let (status, _) = client.create("z.txt", CreateDisposition::Create, CreateOptions::new()).await;
    assert_eq!(status, Status::NetworkNameDeleted);
}

#[tokio::test]
async fn change_notify_delivers_create_event() {
    use smb_fscc::NotifyAction;
    use smb_msg::{ChangeNotifyRequest, NotifyFilter, NotifyFlags};

    let addr = start_server().await;
    let mut watcher = TestClient::ready(addr).await;
    let (_, dir) = watcher
        .create("", CreateDisposition::Open, CreateOptions::new().with_directory_file(true))
        .await;
    let dir_id = dir.unwrap().file_id;

    // A second session creates a file once the watch is parked.
    let creator = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let mut client = TestClient::ready(addr).await;
        let (status, created) =
            client.create("noted.txt", CreateDisposition::Create, CreateOptions::new()).await;
        assert_eq!(status, Status::Success);
        client.close(created.unwrap().file_id, false).await;
    });

    let response = watcher
        .send(smb_msg::RequestContent::ChangeNotify(ChangeNotifyRequest {
            flags: NotifyFlags::new(),
            output_buffer_length: 4096,
            file_id: dir_id,
            completion_filter: NotifyFilter::new().with_file_name(true).with_dir_name(true),
        }))
        .await;
    creator.await.unwrap();

    assert_eq!(response.header.status, 0);
    let smb_msg::ResponseContent::ChangeNotify(body) = response.content else {
        panic!("expected change notify response");
    };
    let records: Vec<_> = body.buffer.iter().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, NotifyAction::Added);
    assert_eq!(records[0].file_name.as_str(), "noted.txt");
    watcher.close(dir_id, false).await;
}

#[tokio::test]
async fn echo_round_trips() {
    let addr = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let (status, _) = client.negotiate(vec![0x0202]).await;
    assert_eq!(status, Status::Success);
    let response = client.send(smb_msg::RequestContent::Echo(Default::default())).await;
    assert_eq!(response.header.status, 0);
}
