//! MS-DTYP 2.4.6: self-relative Security Descriptor

use std::io::SeekFrom;

use binrw::io::{Read, Seek, Write};
use binrw::prelude::*;
use binrw::{BinResult, Endian};
use modular_bitfield::prelude::*;

use super::{Acl, Sid};

/// Security descriptor control flags (MS-DTYP 2.4.6).
#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct SdControl {
    pub owner_defaulted: bool,
    pub group_defaulted: bool,
    pub dacl_present: bool,
    pub dacl_defaulted: bool,

    pub sacl_present: bool,
    pub sacl_defaulted: bool,
    pub dacl_trusted: bool,
    pub server_security: bool,

    pub dacl_computed: bool,
    pub sacl_computed: bool,
    pub dacl_auto_inherited: bool,
    pub sacl_auto_inherited: bool,

    pub dacl_protected: bool,
    pub sacl_protected: bool,
    pub rm_control_valid: bool,
    pub self_relative: bool,
}

/// A self-relative security descriptor.
///
/// The 20-byte header carries four offsets relative to the descriptor start.
/// When writing, bodies are emitted in the order SACL, DACL, owner, group,
/// each 4-byte aligned; when reading, the offsets are honored wherever they
/// point, so descriptors produced by other implementations parse correctly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecurityDescriptor {
    pub control: SdControl,
    pub owner_sid: Option<Sid>,
    pub group_sid: Option<Sid>,
    pub sacl: Option<Acl>,
    pub dacl: Option<Acl>,
}

const HEADER_SIZE: u64 = 20;

fn align4<W: Write + Seek>(writer: &mut W, start: u64) -> BinResult<u64> {
    let pos = writer.stream_position()?;
    let pad = (4 - ((pos - start) % 4)) % 4;
    for _ in 0..pad {
        0u8.write_le(writer)?;
    }
    Ok(writer.stream_position()? - start)
}

impl BinRead for SecurityDescriptor {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let start = reader.stream_position()?;
        let revision = u8::read_options(reader, endian, ())?;
        if revision != 1 {
            return Err(binrw::Error::AssertFail {
                pos: start,
                message: format!("unsupported security descriptor revision {revision}"),
            });
        }
        let _sbz1 = u8::read_options(reader, endian, ())?;
        let control = SdControl::read_options(reader, endian, ())?;
        let offset_owner = u32::read_options(reader, endian, ())?;
        let offset_group = u32::read_options(reader, endian, ())?;
        let offset_sacl = u32::read_options(reader, endian, ())?;
        let offset_dacl = u32::read_options(reader, endian, ())?;

        let owner_sid = if offset_owner != 0 {
            reader.seek(SeekFrom::Start(start + offset_owner as u64))?;
            Some(Sid::read_options(reader, endian, ())?)
        } else {
            None
        };
        let group_sid = if offset_group != 0 {
            reader.seek(SeekFrom::Start(start + offset_group as u64))?;
            Some(Sid::read_options(reader, endian, ())?)
        } else {
            None
        };
        let sacl = if offset_sacl != 0 {
            reader.seek(SeekFrom::Start(start + offset_sacl as u64))?;
            Some(Acl::read_options(reader, endian, ())?)
        } else {
            None
        };
        let dacl = if offset_dacl != 0 {
            reader.seek(SeekFrom::Start(start + offset_dacl as u64))?;
            Some(Acl::read_options(reader, endian, ())?)
        } else {
            None
        };
        Ok(SecurityDescriptor { control, owner_sid, group_sid, sacl, dacl })
    }
}

impl BinWrite for SecurityDescriptor {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let start = writer.stream_position()?;

        let control = self
            .control
            .with_self_relative(true)
            .with_sacl_present(self.sacl.is_some())
            .with_dacl_present(self.dacl.is_some());

        1u8.write_options(writer, endian, ())?;
        0u8.write_options(writer, endian, ())?;
        control.write_options(writer, endian, ())?;
        // Offset fields, patched below.
        let offsets_pos = writer.stream_position()?;
        [0u32; 4].write_options(writer, endian, ())?;

        let mut offsets = [0u32; 4]; // owner, group, sacl, dacl
        if let Some(sacl) = &self.sacl {
            offsets[2] = align4(writer, start)? as u32;
            sacl.write_options(writer, endian, ())?;
        }
        if let Some(dacl) = &self.dacl {
            offsets[3] = align4(writer, start)? as u32;
            dacl.write_options(writer, endian, ())?;
        }
        if let Some(owner) = &self.owner_sid {
            offsets[0] = align4(writer, start)? as u32;
            owner.write_options(writer, endian, ())?;
        }
        if let Some(group) = &self.group_sid {
            offsets[1] = align4(writer, start)? as u32;
            group.write_options(writer, endian, ())?;
        }

        let end = writer.stream_position()?;
        writer.seek(SeekFrom::Start(offsets_pos))?;
        offsets.write_options(writer, endian, ())?;
        writer.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

impl SecurityDescriptor {
    /// Serializes into a standalone buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        self.write_le(&mut cursor).expect("in-memory write");
        cursor.into_inner()
    }

    /// Parses from a standalone buffer.
    pub fn parse(data: &[u8]) -> BinResult<Self> {
        Self::read_le(&mut std::io::Cursor::new(data))
    }

    /// Encoded size of the 20-byte header.
    pub const HEADER_SIZE: u64 = HEADER_SIZE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{Ace, AclRevision};

    fn sample() -> SecurityDescriptor {
        SecurityDescriptor {
            control: SdControl::new().with_dacl_auto_inherited(true),
            owner_sid: Some("S-1-5-21-11-22-33-1000".parse().unwrap()),
            group_sid: Some("S-1-5-21-11-22-33-1001".parse().unwrap()),
            sacl: None,
            dacl: Some(Acl {
                acl_revision: AclRevision::Nt4,
                ace: vec![
                    Ace::allow("S-1-5-21-11-22-33-1000".parse().unwrap(), 0x001f_01ff),
                    Ace::allow(Sid::everyone(), 0x0012_0089),
                ],
            }),
        }
    }

    #[test]
    fn round_trip() {
        let sd = sample();
        let bytes = sd.to_bytes();
        let read = SecurityDescriptor::parse(&bytes).unwrap();
        assert_eq!(read.owner_sid, sd.owner_sid);
        assert_eq!(read.group_sid, sd.group_sid);
        assert_eq!(read.dacl, sd.dacl);
        assert!(read.control.self_relative());
        assert!(read.control.dacl_present());
        assert!(read.control.dacl_auto_inherited());
        assert!(!read.control.sacl_present());
    }

    #[test]
    fn empty_sacl_stub_round_trips() {
        let sd = SecurityDescriptor {
            sacl: Some(Acl::empty()),
            ..SecurityDescriptor::default()
        };
        let read = SecurityDescriptor::parse(&sd.to_bytes()).unwrap();
        assert!(read.control.sacl_present());
        assert_eq!(read.sacl.unwrap().ace.len(), 0);
    }

    #[test]
    fn parses_out_of_order_bodies() {
        // Build a descriptor manually with owner before dacl (the reverse of
        // our writer's body order) to prove offsets are honored.
        let owner: Sid = "S-1-5-18".parse().unwrap();
        let mut body = vec![1u8, 0];
        body.extend_from_slice(&0x8004u16.to_le_bytes()); // self-relative | dacl present
        let owner_off = 20u32;
        let dacl_off = 20 + owner.binary_size() as u32;
        body.extend_from_slice(&owner_off.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&dacl_off.to_le_bytes());
        let mut cursor = std::io::Cursor::new(&mut body);
        cursor.set_position(20);
        owner.write_le(&mut cursor).unwrap();
        Acl::empty().write_le(&mut cursor).unwrap();

        let sd = SecurityDescriptor::parse(&body).unwrap();
        assert_eq!(sd.owner_sid, Some(owner));
        assert_eq!(sd.dacl, Some(Acl::empty()));
        assert_eq!(sd.group_sid, None);
    }
}
