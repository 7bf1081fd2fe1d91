//! SMB2/SMB3 message structures.
//!
//! One module per command pair, plus the common header, the plain-message
//! wrappers used by the dispatcher, and the 3.x transform (encryption)
//! header. All integers are little-endian, strings are UTF-16LE, and offsets
//! inside message bodies are relative to the start of the SMB2 header, so
//! messages parse and serialize from a cursor positioned at the header.

pub mod cancel;
pub mod create;
pub mod echo;
pub mod error;
pub mod file;
pub mod header;
pub mod info;
pub mod ioctl;
pub mod lock;
pub mod negotiate;
pub mod notify;
pub mod oplock;
pub mod plain;
pub mod query_dir;
pub mod session_setup;
pub mod transform;
pub mod tree_connect;

pub use cancel::*;
pub use create::*;
pub use echo::*;
pub use error::*;
pub use file::*;
pub use header::*;
pub use info::*;
pub use ioctl::*;
pub use lock::*;
pub use negotiate::*;
pub use notify::*;
pub use oplock::*;
pub use plain::*;
pub use query_dir::*;
pub use session_setup::*;
pub use transform::*;
pub use tree_connect::*;
