//! Back-patched offset/length fields.
//!
//! Many SMB structures carry a field whose value is the offset or length of a
//! buffer that is only known once the surrounding structure has been written.
//! A [`PosMarker`] records the stream position of such a field when it is
//! written (as a zero placeholder), so the real value can be patched in later
//! by one of the `write_*` helpers, used with binrw's `write_with`.

use std::cell::Cell;
use std::io::SeekFrom;

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite, Endian};

#[derive(Debug, Default)]
pub struct PosMarker<T> {
    /// Stream position of the field itself.
    pub pos: Cell<u64>,
    /// The value read from the stream. Unused when writing.
    pub value: T,
}

impl<T> PosMarker<T>
where
    T: BinWrite + TryFrom<u64>,
    for<'a> <T as BinWrite>::Args<'a>: Default,
{
    /// Overwrites this marker's placeholder with `value`, preserving the
    /// current stream position.
    pub fn fill<W: Write + Seek>(&self, writer: &mut W, endian: Endian, value: u64) -> BinResult<()> {
        let converted = T::try_from(value).map_err(|_| binrw::Error::AssertFail {
            pos: self.pos.get(),
            message: "back-patched value does not fit its field".into(),
        })?;
        let return_to = writer.stream_position()?;
        writer.seek(SeekFrom::Start(self.pos.get()))?;
        converted.write_options(writer, endian, Default::default())?;
        writer.seek(SeekFrom::Start(return_to))?;
        Ok(())
    }

    /// `write_with` helper: writes `value` and back-patches this marker with
    /// the absolute stream offset at which `value` begins.
    pub fn write_aoff<V, W>(
        value: &V,
        writer: &mut W,
        endian: Endian,
        (this,): (&Self,),
    ) -> BinResult<()>
    where
        W: Write + Seek,
        V: for<'a> BinWrite<Args<'a> = ()>,
    {
        let start = writer.stream_position()?;
        this.fill(writer, endian, start)?;
        value.write_options(writer, endian, ())
    }

    /// `write_with` helper: writes `value` and back-patches this marker with
    /// the number of bytes written.
    pub fn write_size<V, W>(
        value: &V,
        writer: &mut W,
        endian: Endian,
        (this,): (&Self,),
    ) -> BinResult<()>
    where
        W: Write + Seek,
        V: for<'a> BinWrite<Args<'a> = ()>,
    {
        let start = writer.stream_position()?;
        value.write_options(writer, endian, ())?;
        let end = writer.stream_position()?;
        this.fill(writer, endian, end - start)
    }

    /// `write_with` helper combining [`Self::write_aoff`] and
    /// [`Self::write_size`]: patches `offset` with the absolute start of
    /// `value` and `size` with its written length.
    pub fn write_aoff_size<V, U, W>(
        value: &V,
        writer: &mut W,
        endian: Endian,
        (offset, size): (&Self, &PosMarker<U>),
    ) -> BinResult<()>
    where
        W: Write + Seek,
        V: for<'a> BinWrite<Args<'a> = ()>,
        U: BinWrite + TryFrom<u64>,
        for<'a> <U as BinWrite>::Args<'a>: Default,
    {
        let start = writer.stream_position()?;
        offset.fill(writer, endian, start)?;
        value.write_options(writer, endian, ())?;
        let end = writer.stream_position()?;
        size.fill(writer, endian, end - start)
    }
}

impl<T> BinRead for PosMarker<T>
where
    T: BinRead,
    for<'a> <T as BinRead>::Args<'a>: Default,
{
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let value = T::read_options(reader, endian, Default::default())?;
        Ok(Self { pos: Cell::new(pos), value })
    }
}

impl<T> BinWrite for PosMarker<T>
where
    T: BinWrite + Default,
    for<'a> <T as BinWrite>::Args<'a>: Default,
{
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.pos.set(writer.stream_position()?);
        T::default().write_options(writer, endian, Default::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_aoff_patches_offset_of_trailing_buffer() {
        let mut cursor = Cursor::new(Vec::new());
        let marker = PosMarker::<u16>::default();
        marker.write_le(&mut cursor).unwrap();
        0xffeeu16.write_le(&mut cursor).unwrap();
        PosMarker::write_aoff(&vec![1u8, 2, 3], &mut cursor, Endian::Little, (&marker,)).unwrap();
        assert_eq!(cursor.into_inner(), vec![0x04, 0x00, 0xee, 0xff, 1, 2, 3]);
    }

    #[test]
    fn write_aoff_size_patches_both_fields() {
        let mut cursor = Cursor::new(Vec::new());
        let offset = PosMarker::<u16>::default();
        let size = PosMarker::<u32>::default();
        offset.write_le(&mut cursor).unwrap();
        size.write_le(&mut cursor).unwrap();
        PosMarker::write_aoff_size(&vec![9u8; 5], &mut cursor, Endian::Little, (&offset, &size))
            .unwrap();
        assert_eq!(
            cursor.into_inner(),
            vec![0x06, 0x00, 0x05, 0x00, 0x00, 0x00, 9, 9, 9, 9, 9]
        );
    }
}
