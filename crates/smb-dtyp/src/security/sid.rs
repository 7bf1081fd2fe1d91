//! MS-DTYP 2.4.2: SID

use binrw::prelude::*;

/// A security identifier in its packet representation: revision, a 6-byte
/// big-endian identifier authority, and up to 15 little-endian 32-bit
/// sub-authorities.
#[binrw::binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    #[bw(calc = 1)]
    #[br(temp)]
    #[br(assert(_revision == 1))]
    _revision: u8,
    #[bw(try_calc = sub_authority.len().try_into())]
    #[br(temp)]
    #[br(assert(sub_authority_count <= 15))]
    sub_authority_count: u8,
    pub identifier_authority: [u8; 6],
    #[br(count = sub_authority_count)]
    pub sub_authority: Vec<u32>,
}

impl Sid {
    /// S-1-1-0, world authority.
    pub const S_EVERYONE: &'static str = "S-1-1-0";
    /// S-1-5-18, local system.
    pub const S_SYSTEM: &'static str = "S-1-5-18";
    /// S-1-5-32-544, builtin administrators.
    pub const S_ADMINISTRATORS: &'static str = "S-1-5-32-544";

    pub fn new(authority: u64, sub_authority: Vec<u32>) -> Self {
        let bytes = authority.to_be_bytes();
        Sid {
            identifier_authority: bytes[2..8].try_into().unwrap(),
            sub_authority,
        }
    }

    pub fn everyone() -> Self {
        Sid::new(1, vec![0])
    }

    pub fn local_system() -> Self {
        Sid::new(5, vec![18])
    }

    pub fn administrators() -> Self {
        Sid::new(5, vec![32, 544])
    }

    pub fn authority(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[2..8].copy_from_slice(&self.identifier_authority);
        u64::from_be_bytes(bytes)
    }

    /// The relative identifier: the final sub-authority, if any.
    pub fn rid(&self) -> Option<u32> {
        self.sub_authority.last().copied()
    }

    /// Encoded size in bytes.
    pub fn binary_size(&self) -> usize {
        8 + self.sub_authority.len() * 4
    }
}

impl std::fmt::Display for Sid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S-1-{}", self.authority())?;
        for sub in &self.sub_authority {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Sid {
    type Err = SidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SidParseError(s.to_string());
        let rest = s.strip_prefix("S-1-").ok_or_else(err)?;
        let mut parts = rest.split('-');
        let authority: u64 = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let sub_authority = parts
            .map(|p| p.parse::<u32>().map_err(|_| err()))
            .collect::<Result<Vec<_>, _>>()?;
        if sub_authority.len() > 15 {
            return Err(err());
        }
        Ok(Sid::new(authority, sub_authority))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid SID string: {0}")]
pub struct SidParseError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn well_known_sids_round_trip_as_strings() {
        for text in [Sid::S_EVERYONE, Sid::S_SYSTEM, Sid::S_ADMINISTRATORS] {
            let sid: Sid = text.parse().unwrap();
            assert_eq!(sid.to_string(), text);
        }
    }

    #[test]
    fn wire_encoding() {
        let sid: Sid = "S-1-5-21-782712087-788053251-2163258630-1000".parse().unwrap();
        let mut cursor = Cursor::new(Vec::new());
        sid.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert_eq!(bytes.len(), sid.binary_size());
        assert_eq!(&bytes[..8], &[1, 5, 0, 0, 0, 0, 0, 5]);

        let read = Sid::read_le(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, sid);
        assert_eq!(read.rid(), Some(1000));
    }
}
