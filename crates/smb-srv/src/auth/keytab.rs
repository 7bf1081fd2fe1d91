//! MIT keytab file parsing (big-endian throughout).

use byteorder::{BigEndian, ByteOrder};

#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed keytab")]
pub struct KeytabError;

/// One key entry from a keytab.
#[derive(Debug, Clone)]
pub struct KeytabEntry {
    /// Principal without the realm, components joined with `/`.
    pub principal: String,
    pub realm: String,
    pub kvno: u32,
    pub etype: u16,
    pub key: Vec<u8>,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], KeytabError> {
        if self.pos + n > self.data.len() {
            return Err(KeytabError);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, KeytabError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, KeytabError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32, KeytabError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    fn i32(&mut self) -> Result<i32, KeytabError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    fn counted_string(&mut self) -> Result<String, KeytabError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| KeytabError)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Parses every live entry of a keytab. Holes (negative entry sizes left by
/// `kadmin` deletions) are skipped.
pub fn parse_keytab(data: &[u8]) -> Result<Vec<KeytabEntry>, KeytabError> {
    let mut reader = Reader { data, pos: 0 };
    let version = reader.u16()?;
    if version != 0x0502 && version != 0x0501 {
        return Err(KeytabError);
    }

    let mut entries = Vec::new();
    while reader.remaining() >= 4 {
        let size = reader.i32()?;
        if size == 0 {
            break;
        }
        if size < 0 {
            reader.take(size.unsigned_abs() as usize)?;
            continue;
        }
        let entry_data = reader.take(size as usize)?;
        let mut entry = Reader { data: entry_data, pos: 0 };

        let component_count = entry.u16()? as usize;
        let realm = entry.counted_string()?;
        let mut components = Vec::with_capacity(component_count);
        for _ in 0..component_count {
            components.push(entry.counted_string()?);
        }
        let _name_type = entry.u32()?;
        let _timestamp = entry.u32()?;
        let vno8 = entry.u8()? as u32;
        let etype = entry.u16()?;
        let key_len = entry.u16()? as usize;
        let key = entry.take(key_len)?.to_vec();
        // 32-bit kvno extension, when present.
        let kvno = if entry.remaining() >= 4 { entry.u32()? } else { 0 };
        let kvno = if kvno != 0 { kvno } else { vno8 };

        entries.push(KeytabEntry { principal: components.join("/"), realm, kvno, etype, key });
    }
    Ok(entries)
}

/// Builds a single-entry keytab; used by tests and provisioning tools.
pub fn build_keytab(principal: &str, realm: &str, kvno: u32, etype: u16, key: &[u8]) -> Vec<u8> {
    let mut entry = Vec::new();
    let components: Vec<&str> = principal.split('/').collect();
    entry.extend_from_slice(&(components.len() as u16).to_be_bytes());
    entry.extend_from_slice(&(realm.len() as u16).to_be_bytes());
    entry.extend_from_slice(realm.as_bytes());
    for component in &components {
        entry.extend_from_slice(&(component.len() as u16).to_be_bytes());
        entry.extend_from_slice(component.as_bytes());
    }
    entry.extend_from_slice(&1u32.to_be_bytes()); // KRB5_NT_PRINCIPAL
    entry.extend_from_slice(&0u32.to_be_bytes()); // timestamp
    entry.push(kvno as u8);
    entry.extend_from_slice(&etype.to_be_bytes());
    entry.extend_from_slice(&(key.len() as u16).to_be_bytes());
    entry.extend_from_slice(key);
    entry.extend_from_slice(&kvno.to_be_bytes());

    let mut out = vec![0x05, 0x02];
    out.extend_from_slice(&(entry.len() as i32).to_be_bytes());
    out.extend_from_slice(&entry);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let keytab = build_keytab("cifs/gw.example.com", "EXAMPLE.COM", 3, 18, &[0x42; 32]);
        let entries = parse_keytab(&keytab).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.principal, "cifs/gw.example.com");
        assert_eq!(entry.realm, "EXAMPLE.COM");
        assert_eq!(entry.kvno, 3);
        assert_eq!(entry.etype, 18);
        assert_eq!(entry.key.len(), 32);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(parse_keytab(&[0x05, 0x03, 0, 0, 0, 0]).is_err());
    }
}
