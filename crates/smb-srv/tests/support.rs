//! Test harness: spins a listener over the in-memory backend and drives it
//! with raw SMB2 messages over TCP.

// Each integration test pulls in the subset of helpers it needs.
#![allow(dead_code)]

use std::sync::Arc;

use binrw::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use smb_dtyp::binrw_util::prelude::FileTime;
use smb_msg::{
    CloseFlags, CloseRequest, CreateDisposition, CreateOptions, CreateRequest,
    CreateResponse, FileId, FlushRequest, Header, HeaderFlags, ImpersonationLevel,
    NegotiateRequest, NegotiateResponse, NegotiateSecurityMode, PlainRequest, PlainResponse,
    QueryInfoRequest, ReadRequest, RequestContent, ResponseContent, SessionSetupRequest,
    SessionSetupResponse, SetInfoRequest, ShareAccessFlags, Status, TreeConnectRequest,
    TreeConnectRequestFlags, WriteFlags, WriteRequest,
};
use smb_srv::auth::ntlm;
use smb_srv::memfs::MemFs;
use smb_srv::{ServerConfig, ServerContext, ShareConfig, SmbListener, User};

pub const TEST_SHARE: &str = "data";
pub const TEST_USER: &str = "alice";
pub const TEST_PASSWORD: &str = "s3cret!";

/// Starts a server over a fresh [`MemFs`] share and returns its address.
pub async fn start_server() -> std::net::SocketAddr {
    let fs = Arc::new(
        MemFs::new(TEST_SHARE)
            .with_user(User::new(TEST_USER, 1000, 1000, Some(ntlm::nt_hash(TEST_PASSWORD)))),
    );
    let mut config = ServerConfig::default();
    config.shares.push(ShareConfig::new(TEST_SHARE));

    let ctx = Arc::new(ServerContext::new(config, fs.clone(), fs.clone(), fs));
    let listener = SmbListener::bind("127.0.0.1:0", ctx).await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = listener.handle_forever().await;
    });
    addr
}

/// A bare-bones SMB2 client for driving the server in tests.
pub struct TestClient {
    stream: TcpStream,
    next_message_id: u64,
    pub session_id: u64,
    pub tree_id: u32,
}

impl TestClient {
    pub async fn connect(addr: std::net::SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).await.expect("connect");
        TestClient { stream, next_message_id: 0, session_id: 0, tree_id: 0 }
    }

    async fn send_frame(&mut self, frame: &[u8]) {
        let header = (frame.len() as u32).to_be_bytes();
        self.stream.write_all(&header).await.expect("write frame header");
        self.stream.write_all(frame).await.expect("write frame");
    }

    async fn recv_frame(&mut self) -> Vec<u8> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await.expect("read frame header");
        let length = u32::from_be_bytes(header) as usize;
        let mut frame = vec![0u8; length];
        self.stream.read_exact(&mut frame).await.expect("read frame");
        frame
    }

    /// Sends one request and returns the matching response, skipping any
    /// async interim.
    pub async fn send(&mut self, content: RequestContent) -> PlainResponse {
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        let request = PlainRequest {
            header: Header {
                credit_charge: 1,
                status: 0,
                command: content.associated_cmd() as u16,
                credit_request: 16,
                flags: HeaderFlags::new(),
                next_command: 0,
                message_id,
                tree_id: Some(self.tree_id),
                async_id: None,
                session_id: self.session_id,
                signature: 0,
            },
            content,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        request.write_le(&mut cursor).expect("serialize request");
        self.send_frame(&cursor.into_inner()).await;

        loop {
            let frame = self.recv_frame().await;
            let response =
                PlainResponse::read_le(&mut std::io::Cursor::new(&frame)).expect("parse response");
            if response.header.status == Status::Pending as u32 {
                continue;
            }
            assert_eq!(response.header.message_id, message_id, "response for wrong message");
            return response;
        }
    }

    pub async fn negotiate(&mut self, dialects: Vec<u16>) -> (Status, Option<NegotiateResponse>) {
        let response = self
            .send(RequestContent::Negotiate(NegotiateRequest {
                security_mode: NegotiateSecurityMode::new().with_signing_enabled(true),
                capabilities: Default::default(),
                client_guid: smb_dtyp::guid::Guid::generate(),
                dialects,
                negotiate_contexts: Vec::new(),
            }))
            .await;
        let status = Status::from_u32(response.header.status).expect("status");
        match response.content {
            ResponseContent::Negotiate(body) => (status, Some(body)),
            _ => (status, None),
        }
    }

    async fn session_setup_leg(&mut self, token: Vec<u8>) -> (Status, u64, SessionSetupResponse) {
        let response = self
            .send(RequestContent::SessionSetup(SessionSetupRequest {
                flags: Default::default(),
                security_mode: Default::default(),
                capabilities: 0,
                previous_session_id: 0,
                buffer: token,
            }))
            .await;
        let status = Status::from_u32(response.header.status).expect("status");
        let session_id = response.header.session_id;
        match response.content {
            ResponseContent::SessionSetup(body) => (status, session_id, body),
            ResponseContent::Error(_) => {
                (status, session_id, SessionSetupResponse::default())
            }
            other => panic!("unexpected session setup body: {other:?}"),
        }
    }

    /// Performs the full NTLMv2 handshake for the given credentials.
    pub async fn session_setup(&mut self, user: &str, password: &str, domain: &str) -> Status {
        let (status, session_id, challenge) =
            self.session_setup_leg(ntlm::build_negotiate()).await;
        assert_eq!(status, Status::MoreProcessingRequired);
        assert_ne!(session_id, 0);
        self.session_id = session_id;

        // The server challenge sits at offset 24 of the CHALLENGE message.
        let server_challenge: [u8; 8] = challenge.buffer[24..32].try_into().unwrap();
        let nt_response = ntlm::compute_ntlmv2_response(
            &ntlm::nt_hash(password),
            user,
            domain,
            &server_challenge,
            &[0x11; 8],
            FileTime::now(),
        );
        let authenticate =
            ntlm::build_authenticate(user, domain, "TESTBOX", &nt_response, &[], ntlm::FLAG_UNICODE);
        let (status, _, _) = self.session_setup_leg(authenticate).await;
        status
    }

    /// Establishes an anonymous (guest) session.
    pub async fn session_setup_guest(&mut self) -> Status {
        let (status, session_id, _) = self.session_setup_leg(ntlm::build_negotiate()).await;
        assert_eq!(status, Status::MoreProcessingRequired);
        self.session_id = session_id;
        let authenticate =
            ntlm::build_authenticate("", "", "", &[], &[], ntlm::FLAG_UNICODE);
        let (status, _, _) = self.session_setup_leg(authenticate).await;
        status
    }

    pub async fn tree_connect(&mut self, share: &str) -> (Status, u32) {
        let path = format!(r"\\server\{share}");
        let response = self
            .send(RequestContent::TreeConnect(TreeConnectRequest {
                flags: TreeConnectRequestFlags::new(),
                path: path.as_str().into(),
            }))
            .await;
        let status = Status::from_u32(response.header.status).expect("status");
        let tree_id = response.header.tree_id.unwrap_or(0);
        if status == Status::Success {
            self.tree_id = tree_id;
        }
        (status, tree_id)
    }

    pub async fn tree_connect_response(&mut self, share: &str) -> smb_msg::TreeConnectResponse {
        let path = format!(r"\\server\{share}");
        let response = self
            .send(RequestContent::TreeConnect(TreeConnectRequest {
                flags: TreeConnectRequestFlags::new(),
                path: path.as_str().into(),
            }))
            .await;
        assert_eq!(response.header.status, 0);
        self.tree_id = response.header.tree_id.unwrap_or(0);
        match response.content {
            ResponseContent::TreeConnect(body) => body,
            other => panic!("unexpected tree connect body: {other:?}"),
        }
    }

    pub async fn create(
        &mut self,
        name: &str,
        disposition: CreateDisposition,
        options: CreateOptions,
    ) -> (Status, Option<CreateResponse>) {
        let response = self
            .send(RequestContent::Create(CreateRequest {
                requested_oplock_level: 0,
                impersonation_level: ImpersonationLevel::Impersonation,
                desired_access: smb_fscc::FileAccessMask::from_raw(0x001f01ff),
                file_attributes: Default::default(),
                share_access: ShareAccessFlags::new().with_read(true).with_write(true),
                create_disposition: disposition,
                create_options: options,
                name: name.into(),
                contexts: Default::default(),
            }))
            .await;
        let status = Status::from_u32(response.header.status).expect("status");
        match response.content {
            ResponseContent::Create(body) => (status, Some(body)),
            _ => (status, None),
        }
    }

    pub async fn write(&mut self, file_id: FileId, offset: u64, data: &[u8]) -> (Status, u32) {
        let response = self
            .send(RequestContent::Write(WriteRequest {
                offset,
                file_id,
                flags: WriteFlags::new(),
                data: data.to_vec(),
            }))
            .await;
        let status = Status::from_u32(response.header.status).expect("status");
        match response.content {
            ResponseContent::Write(body) => (status, body.count),
            _ => (status, 0),
        }
    }

    pub async fn read(&mut self, file_id: FileId, offset: u64, length: u32) -> (Status, Vec<u8>) {
        let response = self
            .send(RequestContent::Read(ReadRequest {
                flags: Default::default(),
                length,
                offset,
                file_id,
                minimum_count: 0,
            }))
            .await;
        let status = Status::from_u32(response.header.status).expect("status");
        match response.content {
            ResponseContent::Read(body) => (status, body.buffer),
            _ => (status, Vec::new()),
        }
    }

    pub async fn flush(&mut self, file_id: FileId) -> Status {
        let response = self.send(RequestContent::Flush(FlushRequest { file_id })).await;
        Status::from_u32(response.header.status).expect("status")
    }

    pub async fn close(
        &mut self,
        file_id: FileId,
        postquery: bool,
    ) -> (Status, Option<smb_msg::CloseResponse>) {
        let response = self
            .send(RequestContent::Close(CloseRequest {
                flags: CloseFlags::new().with_postquery_attrib(postquery),
                file_id,
            }))
            .await;
        let status = Status::from_u32(response.header.status).expect("status");
        match response.content {
            ResponseContent::Close(body) => (status, Some(body)),
            _ => (status, None),
        }
    }

    pub async fn query_info(
        &mut self,
        file_id: FileId,
        info_type: u8,
        info_class: u8,
        output_len: u32,
    ) -> (Status, Vec<u8>) {
        let response = self
            .send(RequestContent::QueryInfo(QueryInfoRequest {
                info_type,
                info_class,
                output_buffer_length: output_len,
                additional_information: Default::default(),
                flags: 0,
                file_id,
                input_buffer: Vec::new(),
            }))
            .await;
        let status = Status::from_u32(response.header.status).expect("status");
        match response.content {
            ResponseContent::QueryInfo(body) => (status, body.data),
            _ => (status, Vec::new()),
        }
    }

    pub async fn set_info(
        &mut self,
        file_id: FileId,
        info_type: u8,
        info_class: u8,
        buffer: Vec<u8>,
    ) -> Status {
        let response = self
            .send(RequestContent::SetInfo(SetInfoRequest {
                info_type,
                info_class,
                additional_information: Default::default(),
                file_id,
                buffer,
            }))
            .await;
        Status::from_u32(response.header.status).expect("status")
    }

    /// Connects, authenticates as the test user, and attaches to the test
    /// share.
    pub async fn ready(addr: std::net::SocketAddr) -> TestClient {
        let mut client = TestClient::connect(addr).await;
        let (status, _) = client.negotiate(vec![0x0202, 0x0210]).await;
        assert_eq!(status, Status::Success);
        assert_eq!(client.session_setup(TEST_USER, TEST_PASSWORD, "WORKGROUP").await, Status::Success);
        let (status, _) = client.tree_connect(TEST_SHARE).await;
        assert_eq!(status, Status::Success);
        client
    }
}

/// Serializes a binrw value to bytes (for SET_INFO buffers).
pub fn to_bytes<T: for<'a> BinWrite<Args<'a> = ()>>(value: &T) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    value.write_le(&mut cursor).expect("serialize");
    cursor.into_inner()
}
