
//! Deflate compression behind the plugin contract.
//!
//! Carried by the vendor-reserved masked compression code. Mostly exists
//! to prove that the block engine is orthogonal to real compression: each
//! block becomes an independent zlib stream, located through the block
//! mask like any other masked block.

use super::{
    Decompressor, DecompressionControl, Compressor, CompressionControl, BlockDirectory,
};

use crate::io::{Stream, seek_to};
use crate::error::{Error, Result, UnitResult};
use crate::mask::MaskTable;
use crate::meta::{BlockGeometry, BlockingInfo, PixelDescription};


/// Per-block zlib compression.
#[derive(Debug, Clone, Copy)]
pub struct Deflate;

struct DeflateControl {
    directory: BlockDirectory,
    unpacked_length: usize,
}

impl Decompressor for Deflate {
    fn open(&self, geometry: &BlockGeometry, _pixel: &PixelDescription)
        -> Result<Box<dyn DecompressionControl>>
    {
        Ok(Box::new(DeflateControl {
            directory: BlockDirectory::default(),
            unpacked_length: geometry.block_size_bytes,
        }))
    }
}

impl Compressor for Deflate {
    fn open(&self, geometry: &BlockGeometry, _pixel: &PixelDescription)
        -> Result<Box<dyn CompressionControl>>
    {
        Ok(Box::new(DeflateControl {
            directory: BlockDirectory::default(),
            unpacked_length: geometry.block_size_bytes,
        }))
    }
}

impl DecompressionControl for DeflateControl {
    fn start(
        &mut self, _stream: &mut dyn Stream,
        offset: u64, length: u64,
        _blocking: &mut BlockingInfo, mask: &MaskTable,
    ) -> UnitResult {
        self.directory.capture(offset, length, mask);
        Ok(())
    }

    fn read_block(&mut self, stream: &mut dyn Stream, block_number: usize) -> Result<Vec<u8>> {
        let stored_length = self.directory.stored_length(block_number) as usize;
        let mut compressed = vec![0_u8; stored_length];

        seek_to(stream, self.directory.position(block_number))?;
        stream.read_exact(&mut compressed)?;

        let bytes = zune_inflate::DeflateDecoder::new(&compressed)
            .decode_zlib()
            .map_err(|_| Error::codec("zlib-compressed block malformed"))?;

        if bytes.len() != self.unpacked_length {
            return Err(Error::codec("decompressed block has the wrong size"));
        }

        Ok(bytes)
    }
}

impl CompressionControl for DeflateControl {
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
            return Err(Error::codec("block to compress has the wrong size"));
        }

        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(data, 4);
        stream.write_all(&compressed)?;
        Ok(compressed.len() as u64)
    }

    fn end(&mut self, _stream: &mut dyn Stream) -> UnitResult {
        Ok(())
    }
}
