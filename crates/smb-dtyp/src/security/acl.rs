//! MS-DTYP 2.4.4 / 2.4.5: ACE and ACL

use std::io::SeekFrom;

use binrw::io::{Read, Seek, Write};
use binrw::prelude::*;
use binrw::{BinResult, Endian};
use modular_bitfield::prelude::*;

use super::Sid;

/// Access-control entry types carried by this server.
///
/// Object ACEs and callback ACEs are not produced by the gateway and are
/// rejected at parse time.
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u8))]
pub enum AceType {
    AccessAllowed = 0x00,
    AccessDenied = 0x01,
    SystemAudit = 0x02,
}

/// ACE header flags (MS-DTYP 2.4.4.1).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct AceFlags {
    pub object_inherit: bool,
    pub container_inherit: bool,
    pub no_propagate_inherit: bool,
    pub inherit_only: bool,
    /// Set on ACEs that were inherited from a parent (0x10).
    pub inherited: bool,
    #[skip]
    __: bool,
    pub successful_access: bool,
    pub failed_access: bool,
}

/// A single access-control entry: header, access mask, trustee SID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ace {
    pub ace_type: AceType,
    pub ace_flags: AceFlags,
    pub access_mask: u32,
    pub sid: Sid,
}

impl Ace {
    pub fn allow(sid: Sid, access_mask: u32) -> Self {
        Ace { ace_type: AceType::AccessAllowed, ace_flags: AceFlags::new(), access_mask, sid }
    }

    /// Encoded size: 4-byte header, 4-byte mask, SID.
    pub fn binary_size(&self) -> usize {
        8 + self.sid.binary_size()
    }
}

impl BinRead for Ace {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let start = reader.stream_position()?;
        let ace_type = AceType::read_options(reader, endian, ())?;
        let ace_flags = AceFlags::read_options(reader, endian, ())?;
        let ace_size = u16::read_options(reader, endian, ())?;
        let access_mask = u32::read_options(reader, endian, ())?;
        let sid = Sid::read_options(reader, endian, ())?;
        // The declared size may include trailing padding.
        reader.seek(SeekFrom::Start(start + ace_size as u64))?;
        Ok(Ace { ace_type, ace_flags, access_mask, sid })
    }
}

impl BinWrite for Ace {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.ace_type.write_options(writer, endian, ())?;
        self.ace_flags.write_options(writer, endian, ())?;
        (self.binary_size() as u16).write_options(writer, endian, ())?;
        self.access_mask.write_options(writer, endian, ())?;
        self.sid.write_options(writer, endian, ())
    }
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Copy, Clone)]
#[brw(repr(u8))]
pub enum AclRevision {
    /// Windows NT 4.0
    Nt4 = 2,
    /// Active Directory
    Ds = 4,
}

/// An access-control list: a revision, a size, and a run of ACEs.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub acl_revision: AclRevision,
    #[bw(calc = 0)]
    #[br(temp)]
    _sbz1: u8,
    #[bw(calc = (Acl::HEADER_SIZE + ace.iter().map(|a| a.binary_size()).sum::<usize>()) as u16)]
    #[br(temp)]
    _acl_size: u16,
    #[bw(try_calc = ace.len().try_into())]
    #[br(temp)]
    ace_count: u16,
    #[bw(calc = 0)]
    #[br(temp)]
    _sbz2: u16,
    #[br(count = ace_count)]
    pub ace: Vec<Ace>,
}

impl Acl {
    pub const HEADER_SIZE: usize = 8;

    /// An ACL with no entries: the 8-byte stub used for empty SACLs.
    pub fn empty() -> Self {
        Acl { acl_revision: AclRevision::Nt4, ace: Vec::new() }
    }

    pub fn binary_size(&self) -> usize {
        Self::HEADER_SIZE + self.ace.iter().map(|a| a.binary_size()).sum::<usize>()
    }
}
