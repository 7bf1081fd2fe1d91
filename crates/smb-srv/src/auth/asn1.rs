//! Just enough DER to carry SPNEGO and Kerberos structures.

/// A DER parse failure; mapped to LOGON_FAILURE at the protocol boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed DER at offset {0}")]
pub struct DerError(pub usize);

pub type DerResult<T> = Result<T, DerError>;

/// A borrowing TLV reader.
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        DerReader { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn err(&self) -> DerError {
        DerError(self.pos)
    }

    fn take(&mut self, n: usize) -> DerResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(self.err());
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads one TLV, returning the tag and its content.
    pub fn read_tlv(&mut self) -> DerResult<(u8, &'a [u8])> {
        let tag = self.take(1)?[0];
        let first = self.take(1)?[0];
        let length = if first & 0x80 == 0 {
            first as usize
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 4 {
                return Err(self.err());
            }
            let mut length = 0usize;
            for byte in self.take(count)? {
                length = (length << 8) | *byte as usize;
            }
            length
        };
        Ok((tag, self.take(length)?))
    }

    /// Reads a TLV and checks its tag.
    pub fn expect(&mut self, expected: u8) -> DerResult<&'a [u8]> {
        let at = self.pos;
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(DerError(at));
        }
        Ok(content)
    }

    /// Peeks at the next tag without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Reads an INTEGER into an i64.
    pub fn read_integer(&mut self) -> DerResult<i64> {
        let at = self.pos;
        let content = self.expect(0x02)?;
        if content.is_empty() || content.len() > 8 {
            return Err(DerError(at));
        }
        let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
        for byte in content {
            value = (value << 8) | *byte as i64;
        }
        Ok(value)
    }
}

/// Encodes a definite length.
fn push_length(out: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        out.push(length as u8);
    } else {
        let bytes = length.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

/// Emits one TLV.
pub fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    push_length(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_round_trip_short_and_long_lengths() {
        let short = der_tlv(0x04, &[1, 2, 3]);
        assert_eq!(short, vec![0x04, 3, 1, 2, 3]);
        let (tag, content) = DerReader::new(&short).read_tlv().unwrap();
        assert_eq!((tag, content), (0x04, &[1u8, 2, 3][..]));

        let long = der_tlv(0x04, &[0xaa; 300]);
        assert_eq!(&long[..4], &[0x04, 0x82, 0x01, 0x2c]);
        let (_, content) = DerReader::new(&long).read_tlv().unwrap();
        assert_eq!(content.len(), 300);
    }

    #[test]
    fn integer_parsing() {
        let mut reader = DerReader::new(&[0x02, 0x01, 0x05]);
        assert_eq!(reader.read_integer().unwrap(), 5);
        let mut reader = DerReader::new(&[0x02, 0x02, 0x01, 0x00]);
        assert_eq!(reader.read_integer().unwrap(), 256);
    }
}
