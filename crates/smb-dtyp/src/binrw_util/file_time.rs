//! FILETIME: 100-nanosecond intervals since 1601-01-01 UTC.

use binrw::prelude::*;
use time::OffsetDateTime;

/// Seconds between the Windows epoch (1601) and the Unix epoch (1970).
const EPOCH_DELTA_SECS: i128 = 11_644_473_600;

#[binrw::binrw]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FileTime {
    pub value: u64,
}

impl FileTime {
    pub const ZERO: FileTime = FileTime { value: 0 };

    pub fn now() -> Self {
        OffsetDateTime::now_utc().into()
    }

    pub fn date_time(&self) -> OffsetDateTime {
        let unix_nanos = (self.value as i128) * 100 - EPOCH_DELTA_SECS * 1_000_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(unix_nanos)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

impl From<u64> for FileTime {
    fn from(value: u64) -> Self {
        Self { value }
    }
}

impl From<FileTime> for u64 {
    fn from(value: FileTime) -> Self {
        value.value
    }
}

impl From<OffsetDateTime> for FileTime {
    fn from(value: OffsetDateTime) -> Self {
        let ticks = (value.unix_timestamp_nanos() / 100 + EPOCH_DELTA_SECS * 10_000_000).max(0);
        Self { value: ticks as u64 }
    }
}

impl From<FileTime> for OffsetDateTime {
    fn from(value: FileTime) -> Self {
        value.date_time()
    }
}

impl std::fmt::Debug for FileTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileTime({})", self.date_time())
    }
}

impl std::fmt::Display for FileTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.date_time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn converts_from_datetime() {
        let ft: FileTime = datetime!(2025-01-20 15:36:20.277632400 UTC).into();
        assert_eq!(ft.value, 0x01db6b510da18f04);
    }

    #[test]
    fn converts_back_to_datetime() {
        let ft = FileTime::from(0x01db6b510da18f04u64);
        assert_eq!(ft.date_time(), datetime!(2025-01-20 15:36:20.277632400 UTC));
    }

    #[test]
    fn zero_is_windows_epoch() {
        assert_eq!(FileTime::ZERO.date_time(), datetime!(1601-01-01 0:00 UTC));
    }
}
