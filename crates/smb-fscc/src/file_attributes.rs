//! File attributes (MS-FSCC 2.6).

use binrw::prelude::*;
use modular_bitfield::prelude::*;

/// Attributes of a file or directory.
///
/// The gateway reports a small subset (readonly, hidden, directory, archive,
/// normal, reparse point for symlinks); the rest are carried for protocol
/// completeness and ignored on set.
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct FileAttributes {
    /// The file may be read but not written or deleted.
    pub readonly: bool,
    /// Excluded from ordinary directory listings.
    pub hidden: bool,
    /// Used by the operating system.
    pub system: bool,
    #[skip]
    __: bool,

    /// This item is a directory.
    pub directory: bool,
    /// Marked for backup or removal.
    pub archive: bool,
    #[skip]
    __: bool,
    /// No other attributes set. Ignored when combined with any other flag.
    pub normal: bool,

    /// Used for temporary storage.
    pub temporary: bool,
    pub sparse_file: bool,
    /// Has an associated reparse point (symlinks).
    pub reparse_point: bool,
    pub compressed: bool,

    /// Data has been physically moved to offline storage.
    pub offline: bool,
    pub not_content_indexed: bool,
    pub encrypted: bool,
    pub integrity_stream: bool,

    #[skip]
    __: bool,
    pub no_scrub_data: bool,
    pub recall_on_open: bool,
    pub pinned: bool,

    pub unpinned: bool,
    #[skip]
    __: bool,
    pub recall_on_data_access: bool,
    #[skip]
    __: B9,
}
