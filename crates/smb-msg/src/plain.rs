//! Plain (unencrypted) message wrappers: header plus typed body.

use binrw::prelude::*;

use crate::header::{Command, Header, HeaderFlags, Status};
use crate::{
    cancel::CancelRequest,
    create::{CloseRequest, CloseResponse, CreateRequest, CreateResponse},
    echo::{EchoRequest, EchoResponse},
    error::ErrorResponse,
    file::{FlushRequest, FlushResponse, ReadRequest, ReadResponse, WriteRequest, WriteResponse},
    info::{QueryInfoRequest, QueryInfoResponse, SetInfoRequest, SetInfoResponse},
    ioctl::{IoctlRequest, IoctlResponse},
    lock::{LockRequest, LockResponse},
    negotiate::{NegotiateRequest, NegotiateResponse},
    notify::{ChangeNotifyRequest, ChangeNotifyResponse},
    oplock::{LeaseBreakAck, LeaseBreakNotify, LeaseBreakResponse, OplockBreakAck, OplockBreakNotify},
    query_dir::{QueryDirectoryRequest, QueryDirectoryResponse},
    session_setup::{LogoffRequest, LogoffResponse, SessionSetupRequest, SessionSetupResponse},
    tree_connect::{
        TreeConnectRequest, TreeConnectResponse, TreeDisconnectRequest, TreeDisconnectResponse,
    },
};

macro_rules! content_enum {
    (
        $name:ident {
            $($cmd:ident => $variant:ident($ty:ty),)+
        }
    ) => {
        /// A typed message body, selected by the header's command code.
        #[binrw::binrw]
        #[brw(little)]
        #[br(import(command: Command))]
        #[derive(Debug, PartialEq, Eq)]
        pub enum $name {
            $(
                #[br(pre_assert(command == Command::$cmd))]
                $variant($ty),
            )+
        }

        impl $name {
            /// The command code this body belongs to.
            pub fn associated_cmd(&self) -> Command {
                match self {
                    $(
                        $name::$variant(_) => Command::$cmd,
                    )+
                }
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(value: $ty) -> Self {
                    $name::$variant(value)
                }
            }
        )+
    };
}

content_enum! {
    RequestContent {
        Negotiate => Negotiate(NegotiateRequest),
        SessionSetup => SessionSetup(SessionSetupRequest),
        Logoff => Logoff(LogoffRequest),
        TreeConnect => TreeConnect(TreeConnectRequest),
        TreeDisconnect => TreeDisconnect(TreeDisconnectRequest),
        Create => Create(CreateRequest),
        Close => Close(CloseRequest),
        Flush => Flush(FlushRequest),
        Read => Read(ReadRequest),
        Write => Write(WriteRequest),
        Lock => Lock(LockRequest),
        Ioctl => Ioctl(IoctlRequest),
        Cancel => Cancel(CancelRequest),
        Echo => Echo(EchoRequest),
        QueryDirectory => QueryDirectory(QueryDirectoryRequest),
        ChangeNotify => ChangeNotify(ChangeNotifyRequest),
        QueryInfo => QueryInfo(QueryInfoRequest),
        SetInfo => SetInfo(SetInfoRequest),
        OplockBreak => OplockBreakAck(OplockBreakAck),
        OplockBreak => LeaseBreakAck(LeaseBreakAck),
    }
}

/// A typed response body. The final `Error` variant has no command guard:
/// any command's failure response parses into it.
#[binrw::binrw]
#[brw(little)]
#[br(import(command: Command))]
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseContent {
    #[br(pre_assert(command == Command::Negotiate))]
    Negotiate(NegotiateResponse),
    #[br(pre_assert(command == Command::SessionSetup))]
    SessionSetup(SessionSetupResponse),
    #[br(pre_assert(command == Command::Logoff))]
    Logoff(LogoffResponse),
    #[br(pre_assert(command == Command::TreeConnect))]
    TreeConnect(TreeConnectResponse),
    #[br(pre_assert(command == Command::TreeDisconnect))]
    TreeDisconnect(TreeDisconnectResponse),
    #[br(pre_assert(command == Command::Create))]
    Create(CreateResponse),
    #[br(pre_assert(command == Command::Close))]
    Close(CloseResponse),
    #[br(pre_assert(command == Command::Flush))]
    Flush(FlushResponse),
    #[br(pre_assert(command == Command::Read))]
    Read(ReadResponse),
    #[br(pre_assert(command == Command::Write))]
    Write(WriteResponse),
    #[br(pre_assert(command == Command::Lock))]
    Lock(LockResponse),
    #[br(pre_assert(command == Command::Ioctl))]
    Ioctl(IoctlResponse),
    #[br(pre_assert(command == Command::Echo))]
    Echo(EchoResponse),
    #[br(pre_assert(command == Command::QueryDirectory))]
    QueryDirectory(QueryDirectoryResponse),
    #[br(pre_assert(command == Command::ChangeNotify))]
    ChangeNotify(ChangeNotifyResponse),
    #[br(pre_assert(command == Command::QueryInfo))]
    QueryInfo(QueryInfoResponse),
    #[br(pre_assert(command == Command::SetInfo))]
    SetInfo(SetInfoResponse),
    #[br(pre_assert(command == Command::OplockBreak))]
    OplockBreakNotify(OplockBreakNotify),
    #[br(pre_assert(command == Command::OplockBreak))]
    LeaseBreakNotify(LeaseBreakNotify),
    #[br(pre_assert(command == Command::OplockBreak))]
    LeaseBreak(LeaseBreakResponse),
    Error(ErrorResponse),
}

impl ResponseContent {
    pub fn associated_cmd(&self) -> Option<Command> {
        Some(match self {
            ResponseContent::Negotiate(_) => Command::Negotiate,
            ResponseContent::SessionSetup(_) => Command::SessionSetup,
            ResponseContent::Logoff(_) => Command::Logoff,
            ResponseContent::TreeConnect(_) => Command::TreeConnect,
            ResponseContent::TreeDisconnect(_) => Command::TreeDisconnect,
            ResponseContent::Create(_) => Command::Create,
            ResponseContent::Close(_) => Command::Close,
            ResponseContent::Flush(_) => Command::Flush,
            ResponseContent::Read(_) => Command::Read,
            ResponseContent::Write(_) => Command::Write,
            ResponseContent::Lock(_) => Command::Lock,
            ResponseContent::Ioctl(_) => Command::Ioctl,
            ResponseContent::Echo(_) => Command::Echo,
            ResponseContent::QueryDirectory(_) => Command::QueryDirectory,
            ResponseContent::ChangeNotify(_) => Command::ChangeNotify,
            ResponseContent::QueryInfo(_) => Command::QueryInfo,
            ResponseContent::SetInfo(_) => Command::SetInfo,
            ResponseContent::OplockBreakNotify(_)
            | ResponseContent::LeaseBreakNotify(_)
            | ResponseContent::LeaseBreak(_) => Command::OplockBreak,
            ResponseContent::Error(_) => return None,
        })
    }
}

macro_rules! response_from {
    ($($variant:ident($ty:ty),)+) => {
        $(
            impl From<$ty> for ResponseContent {
                fn from(value: $ty) -> Self {
                    ResponseContent::$variant(value)
                }
            }
        )+
    };
}

impl From<OplockBreakNotify> for ResponseContent {
    fn from(value: OplockBreakNotify) -> Self {
        ResponseContent::OplockBreakNotify(value)
    }
}

impl From<LeaseBreakNotify> for ResponseContent {
    fn from(value: LeaseBreakNotify) -> Self {
        ResponseContent::LeaseBreakNotify(value)
    }
}

response_from! {
    Negotiate(NegotiateResponse),
    SessionSetup(SessionSetupResponse),
    Logoff(LogoffResponse),
    TreeConnect(TreeConnectResponse),
    TreeDisconnect(TreeDisconnectResponse),
    Create(CreateResponse),
    Close(CloseResponse),
    Flush(FlushResponse),
    Read(ReadResponse),
    Write(WriteResponse),
    Lock(LockResponse),
    Ioctl(IoctlResponse),
    Echo(EchoResponse),
    QueryDirectory(QueryDirectoryResponse),
    ChangeNotify(ChangeNotifyResponse),
    QueryInfo(QueryInfoResponse),
    SetInfo(SetInfoResponse),
    Error(ErrorResponse),
}

/// A single plain request: header plus body, parsed from a cursor positioned
/// at the header so that header-relative offsets resolve.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct PlainRequest {
    pub header: Header,
    #[br(args(header.command().expect("known command")))]
    pub content: RequestContent,
}

impl PlainRequest {
    pub fn new(content: RequestContent) -> PlainRequest {
        let command = content.associated_cmd();
        PlainRequest {
            header: Header {
                credit_charge: 1,
                status: 0,
                command: command as u16,
                credit_request: 1,
                flags: HeaderFlags::new(),
                next_command: 0,
                message_id: 0,
                tree_id: Some(0),
                async_id: None,
                session_id: 0,
                signature: 0,
            },
            content,
        }
    }
}

/// A single plain response.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, PartialEq, Eq)]
pub struct PlainResponse {
    pub header: Header,
    #[br(args(header.command().expect("known command")))]
    pub content: ResponseContent,
}

impl PlainResponse {
    /// Builds a response around a request header: mirrors message ID,
    /// session, tree, and sets the response flag.
    pub fn for_request(request_header: &Header, status: Status, content: ResponseContent) -> Self {
        PlainResponse {
            header: Header {
                credit_charge: request_header.credit_charge,
                status: status as u32,
                command: request_header.command,
                credit_request: request_header.credit_request.max(1),
                flags: HeaderFlags::new()
                    .with_server_to_redir(true)
                    .with_signed(request_header.flags.signed()),
                next_command: 0,
                message_id: request_header.message_id,
                tree_id: Some(request_header.tree_id.unwrap_or(0)),
                async_id: None,
                session_id: request_header.session_id,
                signature: 0,
            },
            content,
        }
    }

    /// Serializes header and body into a standalone buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        self.write_le(&mut cursor).expect("in-memory write");
        cursor.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn echo_request_round_trips_through_plain_wrapper() {
        let msg = PlainRequest::new(RequestContent::Echo(EchoRequest::default()));
        let mut cursor = Cursor::new(Vec::new());
        msg.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(bytes.len(), 68);

        let read = PlainRequest::read_le(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, msg);
    }

    #[test]
    fn break_ack_variants_disambiguate_by_size() {
        use crate::create::FileId;
        use crate::oplock::{LeaseState, OplockBreakMsg};

        let oplock = PlainRequest::new(RequestContent::OplockBreakAck(OplockBreakMsg {
            oplock_level: 1,
            file_id: FileId::EMPTY,
        }));
        let bytes = {
            let mut cursor = Cursor::new(Vec::new());
            oplock.write_le(&mut cursor).unwrap();
            cursor.into_inner()
        };
        let read = PlainRequest::read_le(&mut Cursor::new(bytes)).unwrap();
        assert!(matches!(read.content, RequestContent::OplockBreakAck(_)));

        let lease = PlainRequest::new(RequestContent::LeaseBreakAck(LeaseBreakAck {
            lease_key: 99,
            lease_state: LeaseState::new().with_read_caching(true),
        }));
        let bytes = {
            let mut cursor = Cursor::new(Vec::new());
            lease.write_le(&mut cursor).unwrap();
            cursor.into_inner()
        };
        let read = PlainRequest::read_le(&mut Cursor::new(bytes)).unwrap();
        assert!(matches!(read.content, RequestContent::LeaseBreakAck(_)));
    }
}
