//! Binary read/write helpers shared by all wire types.

pub mod boolean;
pub mod file_time;
pub mod pos_marker;
pub mod wide_string;

pub mod prelude {
    pub use super::boolean::Boolean;
    pub use super::file_time::FileTime;
    pub use super::pos_marker::PosMarker;
    pub use super::wide_string::WideString;
}

pub use prelude::*;
