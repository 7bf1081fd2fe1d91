//! Shared test helpers: hex fixtures and binrw round-trip assertions.
//!
//! Only for use inside `#[cfg(test)]` modules of the workspace crates.

use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// Decodes a hex string fixture (whitespace ignored) into bytes.
pub fn hex_to_bytes(hex: &str) -> Vec<u8> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    assert!(hex.len() % 2 == 0, "hex fixture has odd length");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("invalid hex fixture"))
        .collect()
}

/// Asserts that `value` serializes (little-endian) to exactly `hex`.
pub fn assert_writes<T>(value: &T, hex: &str)
where
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(Vec::new());
    value.write_le(&mut cursor).expect("write failed");
    assert_eq!(
        cursor.into_inner(),
        hex_to_bytes(hex),
        "serialized bytes differ from fixture"
    );
}

/// Asserts that `hex` deserializes (little-endian) to `value`.
pub fn assert_reads<T>(value: &T, hex: &str)
where
    T: for<'a> BinRead<Args<'a> = ()> + PartialEq + std::fmt::Debug,
{
    let mut cursor = Cursor::new(hex_to_bytes(hex));
    let read = T::read_le(&mut cursor).expect("read failed");
    assert_eq!(&read, value, "parsed value differs from fixture");
}

/// Asserts that writing `$value` little-endian produces the `$hex` bytes and
/// that reading those bytes back yields an equal value.
#[macro_export]
macro_rules! test_binrw {
    ($name:ident: $value:expr => $hex:expr) => {
        mod $name {
            use super::*;

            #[test]
            fn write() {
                $crate::assert_writes(&($value), $hex);
            }

            #[test]
            fn read() {
                $crate::assert_reads(&($value), $hex);
            }
        }
    };
}

/// Write-only variant of [`test_binrw!`], for types whose read side needs
/// arguments or is intentionally asymmetric.
#[macro_export]
macro_rules! test_binrw_write {
    ($name:ident: $value:expr => $hex:expr) => {
        mod $name {
            use super::*;

            #[test]
            fn write() {
                $crate::assert_writes(&($value), $hex);
            }
        }
    };
}

/// Read-only variant of [`test_binrw!`].
#[macro_export]
macro_rules! test_binrw_read {
    ($name:ident: $value:expr => $hex:expr) => {
        mod $name {
            use super::*;

            #[test]
            fn read() {
                $crate::assert_reads(&($value), $hex);
            }
        }
    };
}
