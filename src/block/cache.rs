
//! Block caches for the cached I/O paths.
//!
//! Reading through a codec always moves whole blocks, so the context keeps
//! the most recently decoded block around; requests walk blocks row by row
//! and would otherwise decode the same block once per row. Writing through
//! a codec assembles whole blocks in per-column buffers before encoding.

use crate::error::Result;


/// The single-block read cache. "No block loaded" is an explicit state,
/// distinct from the on-disk absent-block sentinel.
#[derive(Debug, Default)]
pub(crate) struct BlockCache {
    slot: Option<(usize, Vec<u8>)>,
}

impl BlockCache {

    /// Borrow the cached bytes of the block, loading it first if a
    /// different block (or none) is cached.
    pub fn fetch(
        &mut self, number: usize,
        load: impl FnOnce() -> Result<Vec<u8>>,
    ) -> Result<&[u8]> {
        let matches = match &self.slot {
            Some((cached, _)) => *cached == number,
            None => false,
        };

        if !matches {
            self.slot = Some((number, load()?));
        }

        match &self.slot {
            Some((_, bytes)) => Ok(bytes),
            None => unreachable!("cache slot bug"),
        }
    }

    /// Forget the cached block.
    pub fn clear(&mut self) {
        self.slot = None;
    }
}


/// One block being assembled for a cached write.
#[derive(Debug)]
pub(crate) struct WriteBlock {

    /// The block number this buffer will become.
    pub number: usize,

    /// Unpacked block bytes in file sample encoding.
    pub buffer: Vec<u8>,

    /// Whether any pad pixels were placed into this block.
    pub has_pad: bool,
}

impl WriteBlock {
    pub fn new(number: usize, size: usize) -> Self {
        WriteBlock { number, buffer: vec![0_u8; size], has_pad: false }
    }

    /// Re-arm the buffer for the next block it will assemble.
    pub fn reset(&mut self, number: usize) {
        self.number = number;
        self.has_pad = false;

        for byte in &mut self.buffer {
            *byte = 0;
        }
    }
}


/// Whether every pixel of the buffer equals the pad value.
/// The pad value is one sample in file encoding.
pub(crate) fn is_all_pad(buffer: &[u8], pad: &[u8]) -> bool {
    debug_assert!(!pad.is_empty(), "pad value bug");

    buffer.chunks(pad.len()).all(|pixel| pixel == pad)
}

/// Fill the buffer with repetitions of the pad value.
pub(crate) fn fill_with_pad(buffer: &mut [u8], pad: &[u8]) {
    debug_assert!(!pad.is_empty(), "pad value bug");

    for pixel in buffer.chunks_mut(pad.len()) {
        let length = pixel.len();
        pixel.copy_from_slice(&pad[.. length]);
    }
}
