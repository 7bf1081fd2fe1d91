//! Minshall-French symlinks (the `XSym` format).
//!
//! Clients that cannot create native symlinks over SMB write a 1067-byte
//! regular file instead: `XSym\n`, a 4-digit decimal target length, `\n`,
//! the target path, `\n`, then space padding. The server transcodes these
//! to real symlinks on CLOSE and serves real symlinks as MFsymlink content
//! on READ.

/// The exact on-wire size of an MFsymlink file.
pub const MFSYMLINK_SIZE: usize = 1067;
/// Longest representable target path.
pub const MFSYMLINK_MAX_TARGET: usize = 1024;

const HEADER: &[u8] = b"XSym\n";

/// Encodes a link target into the 1067-byte form. Fails when the target
/// exceeds [`MFSYMLINK_MAX_TARGET`] bytes.
pub fn encode(target: &str) -> Option<Vec<u8>> {
    let target = target.as_bytes();
    if target.len() > MFSYMLINK_MAX_TARGET {
        return None;
    }
    let mut out = Vec::with_capacity(MFSYMLINK_SIZE);
    out.extend_from_slice(HEADER);
    out.extend_from_slice(format!("{:04}\n", target.len()).as_bytes());
    out.extend_from_slice(target);
    out.push(b'\n');
    out.resize(MFSYMLINK_SIZE, b' ');
    Some(out)
}

/// Whether a payload looks like an MFsymlink: exact size, `XSym\n` header,
/// and a consistent decimal length prefix.
pub fn is_mfsymlink(data: &[u8]) -> bool {
    decode(data).is_some()
}

/// Decodes the target path, if the buffer is a well-formed MFsymlink.
pub fn decode(data: &[u8]) -> Option<String> {
    if data.len() != MFSYMLINK_SIZE || !data.starts_with(HEADER) {
        return None;
    }
    let length_field = std::str::from_utf8(&data[5..9]).ok()?;
    let length: usize = length_field.parse().ok()?;
    if length > MFSYMLINK_MAX_TARGET || data[9] != b'\n' {
        return None;
    }
    let target = &data[10..10 + length];
    if data[10 + length] != b'\n' {
        return None;
    }
    String::from_utf8(target.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for target in ["a", "../some/where", &"x".repeat(1024)] {
            let encoded = encode(target).unwrap();
            assert_eq!(encoded.len(), MFSYMLINK_SIZE);
            assert!(is_mfsymlink(&encoded));
            assert_eq!(decode(&encoded).unwrap(), *target);
        }
    }

    #[test]
    fn oversized_target_is_rejected() {
        assert!(encode(&"y".repeat(1025)).is_none());
    }

    #[test]
    fn wrong_size_or_header_is_not_a_link() {
        assert!(!is_mfsymlink(b"XSym\n0001\na\n"));
        let mut bogus = encode("a").unwrap();
        bogus[0] = b'Y';
        assert!(!is_mfsymlink(&bogus));
        // A length field inconsistent with the terminator.
        let mut tampered = encode("ab").unwrap();
        tampered[5..9].copy_from_slice(b"0005");
        assert!(!is_mfsymlink(&tampered));
    }
}
