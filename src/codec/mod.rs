
//! Pluggable block compression and decompression.
//!
//! Codecs sit behind a narrow lifecycle contract: `open` produces an owned
//! control handle, `start` binds it to a stream position and the block
//! layout, then blocks are moved one at a time. The handle is destroyed by
//! dropping it. The same contract also carries the two bit-packing
//! pseudo-compressions, which perform no compression at all, and the
//! deflate demonstration codec.

// private modules make non-breaking changes easier
mod packed1;
mod packed12;
mod deflate;

pub use self::packed1::PackedBits;
pub use self::packed12::PackedTwelveBits;
pub use self::deflate::Deflate;

use crate::io::Stream;
use crate::error::{Result, UnitResult};
use crate::mask::MaskTable;
use crate::meta::{BlockGeometry, BlockingInfo, CompressionKind, PixelDescription};


/// Opens decompression control handles for one compression method.
pub trait Decompressor {

    /// Prepare for reading the described image.
    /// Failure is fatal to the whole read request.
    fn open(&self, geometry: &BlockGeometry, pixel: &PixelDescription)
        -> Result<Box<dyn DecompressionControl>>;
}

/// Manages the reading of blocks for one image segment.
/// Dropping the control releases everything it holds.
pub trait DecompressionControl {

    /// Bind to the stream region holding the compressed pixel data.
    /// `offset` is the absolute position of the first pixel byte and
    /// `length` the remaining byte count of the segment. The codec may
    /// revise the blocking info it is handed, for example when the
    /// compressed codestream disagrees with the subheader.
    fn start(
        &mut self, stream: &mut dyn Stream,
        offset: u64, length: u64,
        blocking: &mut BlockingInfo, mask: &MaskTable,
    ) -> UnitResult;

    /// Read and decode one block, returning the unpacked bytes as an
    /// owned buffer. Failure aborts the enclosing request.
    fn read_block(&mut self, stream: &mut dyn Stream, block_number: usize) -> Result<Vec<u8>>;
}


/// Opens compression control handles for one compression method.
pub trait Compressor {

    /// Prepare for writing the described image.
    /// Failure is fatal to the whole write request.
    fn open(&self, geometry: &BlockGeometry, pixel: &PixelDescription)
        -> Result<Box<dyn CompressionControl>>;
}

/// Manages the writing of blocks for one image segment.
pub trait CompressionControl {

    /// Bind to the stream region that will hold the compressed pixel data.
    fn start(
        &mut self, stream: &mut dyn Stream,
        offset: u64,
        blocking: &mut BlockingInfo, mask: &MaskTable,
    ) -> UnitResult;

    /// Encode and write one block at the current stream position,
    /// returning the number of bytes appended. `pad_present` tells the
    /// codec that the block mixes pad and real pixels; `no_data` that the
    /// block was elided and nothing should be written.
    fn write_block(
        &mut self, stream: &mut dyn Stream,
        data: &[u8], pad_present: bool, no_data: bool,
    ) -> Result<u64>;

    /// Complete any deferred writes.
    fn end(&mut self, stream: &mut dyn Stream) -> UnitResult;
}


/// The codec installed automatically for a compression kind and pixel
/// description, if any. Bit-packed pixel widths always use the built-in
/// packing codecs; the vendor-reserved masked code carries the deflate
/// demonstration codec.
pub(crate) fn built_in(compression: CompressionKind, pixel: &PixelDescription)
    -> Option<(Box<dyn Decompressor>, Box<dyn Compressor>)>
{
    if !compression.is_compressed() && pixel.bits == 1 {
        return Some((Box::new(PackedBits), Box::new(PackedBits)));
    }

    if !compression.is_compressed() && pixel.bits == 12 {
        return Some((Box::new(PackedTwelveBits), Box::new(PackedTwelveBits)));
    }

    if compression == CompressionKind::VendorMasked {
        return Some((Box::new(Deflate), Box::new(Deflate)));
    }

    None
}


/// Shared bookkeeping of the built-in controls: where the pixel data
/// starts and where each block sits, captured at `start` time.
#[derive(Debug, Clone, Default)]
pub(crate) struct BlockDirectory {
    pub pixel_base: u64,
    pub segment_length: u64,
    pub block_offsets: Vec<u64>,
}

impl BlockDirectory {

    pub fn capture(&mut self, offset: u64, length: u64, mask: &MaskTable) {
        self.pixel_base = offset;
        self.segment_length = length;
        self.block_offsets = mask.block_offsets.clone();
    }

    /// Absolute stream position of the block.
    pub fn position(&self, block_number: usize) -> u64 {
        self.pixel_base + self.block_offsets[block_number]
    }

    /// Bytes from this block's offset to the next physically present
    /// block, or to the end of the segment for the last one.
    pub fn stored_length(&self, block_number: usize) -> u64 {
        let own = self.block_offsets[block_number];

        let next = self.block_offsets[block_number + 1 ..].iter()
            .find(|&&offset| offset != crate::mask::NO_BLOCK)
            .copied()
            .unwrap_or(self.segment_length);

        next.min(self.segment_length).saturating_sub(own)
    }
}
