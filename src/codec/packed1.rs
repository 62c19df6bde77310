
//! Bi-valued pixels, stored one bit per pixel.
//!
//! Not a compression at all: each block is a fixed-size bit field, most
//! significant bit first. Unpacking expands every bit into one byte with
//! the value zero or one, which is the form the rest of the engine and the
//! caller see.

use bit_field::BitField;

use super::{
    Decompressor, DecompressionControl, Compressor, CompressionControl, BlockDirectory,
};

use crate::io::{Stream, seek_to};
use crate::error::{Error, Result, UnitResult};
use crate::mask::MaskTable;
use crate::meta::{BlockGeometry, BlockingInfo, PixelDescription};
use crate::math::RoundingMode;


/// The packed 1-bit pseudo-compression.
#[derive(Debug, Clone, Copy)]
pub struct PackedBits;

struct PackedBitsControl {
    directory: BlockDirectory,
    packed_length: usize,
    unpacked_length: usize,
}

impl Decompressor for PackedBits {
    fn open(&self, geometry: &BlockGeometry, pixel: &PixelDescription)
        -> Result<Box<dyn DecompressionControl>>
    {
        if pixel.bits != 1 {
            return Err(Error::codec("packed bit codec requires one bit per pixel"));
        }

        Ok(Box::new(PackedBitsControl {
            directory: BlockDirectory::default(),
            packed_length: geometry.disk_block_length,
            unpacked_length: geometry.block_size_bytes,
        }))
    }
}

impl Compressor for PackedBits {
    fn open(&self, geometry: &BlockGeometry, pixel: &PixelDescription)
        -> Result<Box<dyn CompressionControl>>
    {
        if pixel.bits != 1 {
            return Err(Error::codec("packed bit codec requires one bit per pixel"));
        }

        Ok(Box::new(PackedBitsControl {
            directory: BlockDirectory::default(),
            packed_length: geometry.disk_block_length,
            unpacked_length: geometry.block_size_bytes,
        }))
    }
}

impl DecompressionControl for PackedBitsControl {
    fn start(
        &mut self, _stream: &mut dyn Stream,
        offset: u64, length: u64,
        _blocking: &mut BlockingInfo, mask: &MaskTable,
    ) -> UnitResult {
        self.directory.capture(offset, length, mask);
        Ok(())
    }

    fn read_block(&mut self, stream: &mut dyn Stream, block_number: usize) -> Result<Vec<u8>> {
        let mut packed = vec![0_u8; self.packed_length];
        seek_to(stream, self.directory.position(block_number))?;
        stream.read_exact(&mut packed)?;

        Ok(unpack_bits(&packed, self.unpacked_length))
    }
}

impl CompressionControl for PackedBitsControl {
    fn start(
        &mut self, _stream: &mut dyn Stream,
        offset: u64,
        _blocking: &mut BlockingInfo, mask: &MaskTable,
    ) -> UnitResult {
        self.directory.capture(offset, 0, mask);
        Ok(())
    }

    fn write_block(
        &mut self, stream: &mut dyn Stream,
        data: &[u8], _pad_present: bool, no_data: bool,
    ) -> Result<u64> {
        if no_data {
            return Ok(0);
        }

        if data.len() != self.unpacked_length {
            return Err(Error::codec("packed bit block has the wrong size"));
        }

        let packed = pack_bits(data);
        stream.write_all(&packed)?;
        Ok(packed.len() as u64)
    }

    fn end(&mut self, _stream: &mut dyn Stream) -> UnitResult {
        Ok(())
    }
}


/// Expand each stored bit into one byte, most significant bit first.
fn unpack_bits(packed: &[u8], pixel_count: usize) -> Vec<u8> {
    let mut pixels = vec![0_u8; pixel_count];

    for (index, pixel) in pixels.iter_mut().enumerate() {
        let byte = packed[index / 8];
        *pixel = byte.get_bit(7 - index % 8) as u8;
    }

    pixels
}

/// Pack each byte into one bit, treating any nonzero value as one.
fn pack_bits(pixels: &[u8]) -> Vec<u8> {
    let mut packed = vec![0_u8; RoundingMode::Up.divide(pixels.len(), 8)];

    for (index, &pixel) in pixels.iter().enumerate() {
        if pixel != 0 {
            packed[index / 8].set_bit(7 - index % 8, true);
        }
    }

    packed
}
