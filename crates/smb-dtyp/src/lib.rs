//! Windows Data Types (MS-DTYP) for the SMB server engine.

pub mod binrw_util;
pub mod guid;
pub mod security;

pub use guid::*;
pub use security::*;
