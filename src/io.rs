
//! Specialized binary input and output.
//! The container stores all of its bookkeeping fields big-endian.

pub use std::io::{Read, Write, Seek};
use std::io::SeekFrom;
use lebe::prelude::*;
use crate::error::{Result, UnitResult};


/// The byte-stream capability this engine requires from the caller:
/// absolute positioning plus reading and writing.
/// Implemented by files and by `std::io::Cursor<Vec<u8>>`.
pub trait Stream: Read + Write + Seek {}
impl<T: Read + Write + Seek> Stream for T {}


/// Position the stream at the specified absolute byte offset.
/// All positioning in this crate is absolute, never relative.
#[inline]
pub fn seek_to(stream: &mut (impl Seek + ?Sized), position: u64) -> UnitResult {
    stream.seek(SeekFrom::Start(position))?;
    Ok(())
}

/// Total size of the stream in bytes. Restores the previous position.
pub fn stream_size(stream: &mut (impl Seek + ?Sized)) -> Result<u64> {
    let previous = stream.seek(SeekFrom::Current(0))?;
    let size = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(previous))?;
    Ok(size)
}

/// Generic trait that defines common binary operations such as reading and
/// writing for this type. All values cross the stream in big-endian order.
pub trait Data: Sized + Default + Clone {
    const BYTE_SIZE: usize = std::mem::size_of::<Self>();

    /// Read a value of type `Self`.
    fn read(read: &mut impl Read) -> Result<Self>;

    /// Read as many values of type `Self` as fit into the specified slice.
    /// If the slice cannot be filled completely, returns `Error::Io`.
    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    /// Write this value to the writer.
    fn write(self, write: &mut impl Write) -> UnitResult;

    /// Write all values of that slice to the writer.
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult;

    /// Read as many values of type `Self` as specified with `data_size`.
    ///
    /// This method will not allocate more memory than `soft_max` at once.
    #[inline]
    fn read_vec(read: &mut impl Read, data_size: usize, soft_max: usize) -> Result<Vec<Self>> {
        let mut data = Vec::new();

        // do not allocate the whole table at once
        // (most of the time, this loop will run only once)
        while data.len() < data_size {
            let chunk_start = data.len();
            let chunk_end = (chunk_start + soft_max).min(data_size);

            data.resize(chunk_end, Self::default());
            Self::read_slice(read, &mut data[chunk_start .. chunk_end])?;
        }

        Ok(data)
    }
}


macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            #[inline]
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_big_endian()?)
            }

            #[inline]
            fn write(self, write: &mut impl Write) -> UnitResult {
                write.write_as_big_endian(&self)?;
                Ok(())
            }

            #[inline]
            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_big_endian_into(slice)?;
                Ok(())
            }

            #[inline]
            fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_big_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);
