//! Lists of "chained" entries.
//!
//! Many FSCC structures are sequences where each entry begins with a 32-bit
//! offset from its own start to the next entry (0 for the last), and entries
//! are aligned to a fixed boundary. [`ChainedItemList`] wraps a `Vec<T>` and
//! handles the offsets and alignment when reading and writing.

use std::io::SeekFrom;

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite, Endian};

/// A run of `T` entries chained by next-entry offsets, aligned to `ALIGN`
/// bytes. An empty byte range decodes to an empty list.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ChainedItemList<T, const ALIGN: u32 = 4> {
    values: Vec<T>,
}

impl<T, const ALIGN: u32> ChainedItemList<T, ALIGN> {
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl<T, const ALIGN: u32> BinRead for ChainedItemList<T, ALIGN>
where
    T: BinRead,
    for<'b> <T as BinRead>::Args<'b>: Default,
{
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let here = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(here))?;
        if here == end {
            return Ok(Self { values: Vec::new() });
        }

        let mut values = Vec::new();
        loop {
            let entry_start = reader.stream_position()?;
            let next_entry_offset = u32::read_options(reader, endian, ())?;
            values.push(T::read_options(reader, endian, Default::default())?);
            if next_entry_offset == 0 {
                break;
            }
            reader.seek(SeekFrom::Start(entry_start + next_entry_offset as u64))?;
        }
        Ok(Self { values })
    }
}

impl<T, const ALIGN: u32> BinWrite for ChainedItemList<T, ALIGN>
where
    T: BinWrite,
    for<'b> <T as BinWrite>::Args<'b>: Default,
{
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        for (i, item) in self.values.iter().enumerate() {
            let entry_start = writer.stream_position()?;
            0u32.write_options(writer, endian, ())?;
            item.write_options(writer, endian, Default::default())?;

            if i + 1 == self.values.len() {
                break;
            }

            // Pad up to the alignment boundary and chain to the next entry.
            let mut pos = writer.stream_position()?;
            while pos % ALIGN as u64 != 0 {
                0u8.write_options(writer, endian, ())?;
                pos += 1;
            }
            let next_entry_offset = pos - entry_start;
            writer.seek(SeekFrom::Start(entry_start))?;
            (next_entry_offset as u32).write_options(writer, endian, ())?;
            writer.seek(SeekFrom::Start(pos))?;
        }
        Ok(())
    }
}

impl<T, const ALIGN: u32> From<Vec<T>> for ChainedItemList<T, ALIGN> {
    fn from(values: Vec<T>) -> Self {
        Self { values }
    }
}

impl<T, const ALIGN: u32> From<ChainedItemList<T, ALIGN>> for Vec<T> {
    fn from(list: ChainedItemList<T, ALIGN>) -> Self {
        list.values
    }
}

impl<T, const ALIGN: u32> FromIterator<T> for ChainedItemList<T, ALIGN> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

impl<T, const ALIGN: u32> Default for ChainedItemList<T, ALIGN> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T, const ALIGN: u32> std::ops::Deref for ChainedItemList<T, ALIGN> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::prelude::*;
    use std::io::Cursor;

    #[binrw::binrw]
    #[brw(little)]
    #[derive(Debug, PartialEq, Eq)]
    struct Entry {
        tag: u32,
        #[bw(try_calc = data.len().try_into())]
        #[br(temp)]
        len: u8,
        #[br(count = len)]
        data: Vec<u8>,
    }

    #[test]
    fn round_trip_with_padding() {
        let list: ChainedItemList<Entry, 4> = vec![
            Entry { tag: 1, data: vec![0xaa] },
            Entry { tag: 2, data: vec![0xbb, 0xcc] },
        ]
        .into();

        let mut cursor = Cursor::new(Vec::new());
        list.write_le(&mut cursor).unwrap();
        let bytes = cursor.into_inner();
        // First entry is 9 bytes, padded to 12 for the 4-byte alignment.
        assert_eq!(bytes[0..4], [12, 0, 0, 0]);
        assert_eq!(bytes[12..16], [0, 0, 0, 0]);

        let read = ChainedItemList::<Entry, 4>::read_le(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, list);
    }

    #[test]
    fn empty_range_reads_as_empty_list() {
        let read = ChainedItemList::<Entry, 4>::read_le(&mut Cursor::new(Vec::new())).unwrap();
        assert!(read.is_empty());
    }
}
