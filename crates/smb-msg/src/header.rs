//! The 64-byte SMB2 message header, command codes, and NT status codes.

use binrw::prelude::*;
use modular_bitfield::prelude::*;

/// SMB2 command codes (MS-SMB2 2.2.1.2).
///
/// The header carries the raw `u16`; unknown opcodes must be answered with
/// `NOT_SUPPORTED` rather than failing the parse, so conversion is explicit.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[repr(u16)]
pub enum Command {
    Negotiate = 0,
    SessionSetup = 1,
    Logoff = 2,
    TreeConnect = 3,
    TreeDisconnect = 4,
    Create = 5,
    Close = 6,
    Flush = 7,
    Read = 8,
    Write = 9,
    Lock = 0xA,
    Ioctl = 0xB,
    Cancel = 0xC,
    Echo = 0xD,
    QueryDirectory = 0xE,
    ChangeNotify = 0xF,
    QueryInfo = 0x10,
    SetInfo = 0x11,
    OplockBreak = 0x12,
}

impl Command {
    pub fn from_u16(value: u16) -> Option<Command> {
        Some(match value {
            0 => Command::Negotiate,
            1 => Command::SessionSetup,
            2 => Command::Logoff,
            3 => Command::TreeConnect,
            4 => Command::TreeDisconnect,
            5 => Command::Create,
            6 => Command::Close,
            7 => Command::Flush,
            8 => Command::Read,
            9 => Command::Write,
            0xA => Command::Lock,
            0xB => Command::Ioctl,
            0xC => Command::Cancel,
            0xD => Command::Echo,
            0xE => Command::QueryDirectory,
            0xF => Command::ChangeNotify,
            0x10 => Command::QueryInfo,
            0x11 => Command::SetInfo,
            0x12 => Command::OplockBreak,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Negotiate => "Negotiate",
            Command::SessionSetup => "Session Setup",
            Command::Logoff => "Logoff",
            Command::TreeConnect => "Tree Connect",
            Command::TreeDisconnect => "Tree Disconnect",
            Command::Create => "Create",
            Command::Close => "Close",
            Command::Flush => "Flush",
            Command::Read => "Read",
            Command::Write => "Write",
            Command::Lock => "Lock",
            Command::Ioctl => "Ioctl",
            Command::Cancel => "Cancel",
            Command::Echo => "Echo",
            Command::QueryDirectory => "Query Directory",
            Command::ChangeNotify => "Change Notify",
            Command::QueryInfo => "Query Info",
            Command::SetInfo => "Set Info",
            Command::OplockBreak => "Oplock Break",
        };
        write!(f, "{} ({:#x})", name, *self as u16)
    }
}

macro_rules! make_status {
    (
        $($name:ident = $value:literal: $description:literal,)+
    ) => {
        /// NT status codes returned on the wire (MS-ERREF 2.3).
        #[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
        #[repr(u32)]
        pub enum Status {
            $(
                #[doc = $description]
                $name = $value,
            )+
        }

        impl Status {
            pub fn from_u32(value: u32) -> Option<Status> {
                match value {
                    $(
                        $value => Some(Status::$name),
                    )+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for Status {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let description = match self {
                    $(
                        Status::$name => $description,
                    )+
                };
                write!(f, "{} ({:#010x})", description, *self as u32)
            }
        }
    };
}

make_status! {
    Success = 0x00000000: "Success",
    Pending = 0x00000103: "Pending",
    NotifyCleanup = 0x0000010B: "Notify Cleanup",
    NotifyEnumDir = 0x0000010C: "Notify Enum Dir",
    BufferOverflow = 0x80000005: "Buffer Overflow",
    NoMoreFiles = 0x80000006: "No More Files",
    InvalidInfoClass = 0xC0000003: "Invalid Info Class",
    InfoLengthMismatch = 0xC0000004: "Info Length Mismatch",
    InvalidHandle = 0xC0000008: "Invalid Handle",
    InvalidParameter = 0xC000000D: "Invalid Parameter",
    InvalidDeviceRequest = 0xC0000010: "Invalid Device Request",
    EndOfFile = 0xC0000011: "End of File",
    MoreProcessingRequired = 0xC0000016: "More Processing Required",
    AccessDenied = 0xC0000022: "Access Denied",
    BufferTooSmall = 0xC0000023: "Buffer Too Small",
    ObjectNameInvalid = 0xC0000033: "Object Name Invalid",
    ObjectNameNotFound = 0xC0000034: "Object Name Not Found",
    ObjectNameCollision = 0xC0000035: "Object Name Collision",
    ObjectPathNotFound = 0xC000003A: "Object Path Not Found",
    SharingViolation = 0xC0000043: "Sharing Violation",
    LockNotGranted = 0xC0000055: "Lock Not Granted",
    LogonFailure = 0xC000006D: "Logon Failure",
    RangeNotLocked = 0xC000007E: "Range Not Locked",
    DiskFull = 0xC000007F: "Disk Full",
    FileIsADirectory = 0xC00000BA: "File is a Directory",
    NotSupported = 0xC00000BB: "Not Supported",
    NetworkNameDeleted = 0xC00000C9: "Network Name Deleted",
    BadNetworkName = 0xC00000CC: "Bad Network Name",
    InternalError = 0xC00000E5: "Internal Error",
    UnexpectedIoError = 0xC00000E9: "Unexpected I/O Error",
    DirectoryNotEmpty = 0xC0000101: "Directory Not Empty",
    NotADirectory = 0xC0000103: "Not a Directory",
    Cancelled = 0xC0000120: "Cancelled",
    FileClosed = 0xC0000128: "File Closed",
    UserSessionDeleted = 0xC0000203: "User Session Deleted",
    NotAReparsePoint = 0xC0000275: "Not a Reparse Point",
    NetworkSessionExpired = 0xC000035C: "Network Session Expired",
}

/// SMB2 packet header, common to every message (MS-SMB2 2.2.1).
///
/// A sync header carries a tree ID; an async header carries an async ID. The
/// writer trusts the invariant that exactly one of `tree_id`/`async_id` is
/// set, matching the `async_command` flag.
#[binrw::binrw]
#[brw(little, magic(b"\xfeSMB"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    #[bw(calc = 64)]
    #[br(temp)]
    #[br(assert(_structure_size == 64))]
    _structure_size: u16,
    /// Credits consumed by this request.
    pub credit_charge: u16,
    /// NT status (responses); channel sequence on some 3.x requests.
    pub status: u32,
    /// Raw command code; see [`Command::from_u16`].
    pub command: u16,
    /// Credits requested (requests) or granted (responses).
    pub credit_request: u16,
    pub flags: HeaderFlags,
    /// Offset to the next header in a compound chain, 0 if last.
    pub next_command: u32,
    pub message_id: u64,

    #[brw(if(!flags.async_command()))]
    #[bw(calc = 0)]
    #[br(temp)]
    _reserved: u32,
    /// Tree identifier (sync headers only).
    #[br(if(!flags.async_command()))]
    pub tree_id: Option<u32>,

    /// Async identifier (async headers only).
    #[br(if(flags.async_command()))]
    pub async_id: Option<u64>,

    pub session_id: u64,
    pub signature: u128,
}

impl Header {
    pub const STRUCT_SIZE: usize = 64;
    /// Byte range of the signature field within an encoded header.
    pub const SIGNATURE_RANGE: std::ops::Range<usize> = 48..64;

    /// The parsed command, if known.
    pub fn command(&self) -> Option<Command> {
        Command::from_u16(self.command)
    }

    /// Converts this header to the async form with the given async ID.
    pub fn to_async(&mut self, async_id: u64) {
        self.flags.set_async_command(true);
        self.tree_id = None;
        self.async_id = Some(async_id);
    }
}

/// Header processing flags (MS-SMB2 2.2.1.2).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct HeaderFlags {
    /// Set on responses (server to redirector).
    pub server_to_redir: bool,
    /// Part of an asynchronous operation.
    pub async_command: bool,
    /// Related operation in a compound chain.
    pub related_operations: bool,
    /// Message is signed.
    pub signed: bool,
    pub priority_mask: B3,
    #[skip]
    __: B21,
    pub dfs_operation: bool,
    pub replay_operation: bool,
    #[skip]
    __: B2,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smb_tests::*;

    test_binrw! {
        async_header: Header {
            credit_charge: 0,
            status: Status::Pending as u32,
            command: Command::ChangeNotify as u16,
            credit_request: 1,
            flags: HeaderFlags::new()
                .with_async_command(true)
                .with_server_to_redir(true)
                .with_priority_mask(1),
            next_command: 0,
            message_id: 8,
            tree_id: None,
            async_id: Some(8),
            session_id: 0x00000000085327d7,
            signature: u128::from_le_bytes(u128::to_be_bytes(
                0x63f825deae02952fa3d8c8aaf46e7c99
            )),
        } => "fe534d4240000000030100000f000100130000000000000008000000000000000800000000000000d72753080000000063f825deae02952fa3d8c8aaf46e7c99"
    }

    #[test]
    fn unknown_command_is_none() {
        assert_eq!(Command::from_u16(0x55), None);
        assert_eq!(Command::from_u16(0x12), Some(Command::OplockBreak));
    }
}
