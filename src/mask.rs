
//! The block-offset and pad-pixel masks.
//!
//! Masked images carry a small header and two offset tables in front of
//! their pixel data: one file offset per block, and one pad marker per
//! block. A block whose offset is the [`NO_BLOCK`] sentinel was entirely
//! pad and is physically absent from the file. Unmasked images get a
//! synthetic, strictly linear table so that the rest of the engine never
//! needs to distinguish the two cases.

use crate::io::{Data, Stream, seek_to};
use crate::error::{Error, Result, UnitResult, u64_to_u32_offset};
use crate::meta::BlockGeometry;


/// Sentinel meaning "this block has no bytes in the file" in the block
/// table, or "this block contains no pad pixels" in the pad table.
/// Stored on disk as the all-ones 32-bit pattern, widened unsigned in memory.
pub const NO_BLOCK: u64 = 0xffff_ffff;

/// Bytes of the fixed mask header, excluding the pad pixel value.
const HEADER_LENGTH: usize = 10;

/// On-disk bytes per offset table record.
const RECORD_LENGTH: u16 = 4;


/// The per-block offset table and the parallel pad-pixel table.
///
/// `block_offsets` holds one entry per block plus a trailing sentinel
/// giving the offset just past the last block, so that
/// `block_offsets[i + 1] - block_offsets[i]` is the size of any block.
/// All offsets are relative to the first pixel byte of the segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskTable {

    /// Offset from the start of the mask section to the first pixel byte.
    /// Zero for images without masks.
    pub image_data_offset: u64,

    /// One offset per block, in block index order, plus the sentinel.
    pub block_offsets: Vec<u64>,

    /// One entry per block: [`NO_BLOCK`] where the block has no pad pixels,
    /// otherwise equal to the block's own offset.
    pub pad_offsets: Vec<u64>,

    /// The pad pixel value in file encoding, one pixel wide.
    /// Empty when the image defines none.
    pub pad_value: Vec<u8>,

    /// Whether the mask section exists on disk at all.
    pub on_disk: bool,
}

impl MaskTable {

    /// Build the synthetic table for an image without masking:
    /// strictly linear offsets and an all-"no-pad" pad table.
    /// Reads no bytes from any stream.
    pub fn linear(geometry: &BlockGeometry, pad_value: &[u8]) -> Self {
        let total = geometry.total_blocks;
        let length = geometry.disk_block_length as u64;

        let block_offsets = (0 ..= total as u64).map(|index| index * length).collect();

        MaskTable {
            image_data_offset: 0,
            block_offsets,
            pad_offsets: vec![NO_BLOCK; total],
            pad_value: pad_value.to_vec(),
            on_disk: false,
        }
    }

    /// Build the table to be written in front of a new masked image.
    /// Starts out linear; writing corrects it as all-pad blocks are found.
    pub fn for_writing(geometry: &BlockGeometry, pad_value: &[u8]) -> Self {
        let mut table = Self::linear(geometry, pad_value);
        table.on_disk = true;
        table.image_data_offset = table.section_length() as u64;
        table
    }

    /// Read the mask section of an existing masked image.
    /// The stream must be positioned at the start of the mask section.
    pub fn read(stream: &mut (impl Stream + ?Sized), geometry: &BlockGeometry) -> Result<Self> {
        let total = geometry.total_blocks;

        // a sized handle, so the generic binary reads apply
        let mut stream = stream;

        let image_data_offset = u32::read(&mut stream)? as u64;
        let block_record_length = u16::read(&mut stream)?;
        let pad_record_length = u16::read(&mut stream)?;
        let pad_value_bits = u16::read(&mut stream)?;

        if block_record_length != 0 && block_record_length != RECORD_LENGTH {
            return Err(Error::invalid("mask block record length"));
        }

        if pad_record_length != 0 && pad_record_length != RECORD_LENGTH {
            return Err(Error::invalid("mask pad record length"));
        }

        let mut pad_value = vec![0_u8; (pad_value_bits as usize + 7) / 8];
        u8::read_slice(&mut stream, &mut pad_value)?;

        let mut block_offsets = if block_record_length != 0 {
            let table = u32::read_vec(&mut stream, total, u16::MAX as usize)?;
            table.into_iter().map(u64::from).collect()
        }
        else {
            (0 .. total as u64).map(|index| index * geometry.disk_block_length as u64).collect::<Vec<u64>>()
        };

        let pad_offsets = if pad_record_length != 0 {
            let table = u32::read_vec(&mut stream, total, u16::MAX as usize)?;
            table.into_iter().map(u64::from).collect()
        }
        else {
            vec![NO_BLOCK; total]
        };

        // the sentinel is one block past the last physically present block
        let last_present = block_offsets.iter().rev()
            .find(|&&offset| offset != NO_BLOCK).copied();

        block_offsets.push(match last_present {
            Some(offset) => offset + geometry.disk_block_length as u64,
            None => 0,
        });

        Ok(MaskTable {
            image_data_offset,
            block_offsets, pad_offsets,
            pad_value,
            on_disk: true,
        })
    }

    /// Write the mask section. The stream must be positioned at the start
    /// of the mask section. Fails with `Error::Overflow` if any in-memory
    /// offset does not fit the 32-bit on-disk field.
    pub fn write(&self, stream: &mut (impl Stream + ?Sized)) -> UnitResult {
        debug_assert!(self.on_disk, "mask write bug");

        // a sized handle, so the generic binary writes apply
        let mut stream = stream;

        u64_to_u32_offset(self.image_data_offset, "mask image data offset")?.write(&mut stream)?;
        RECORD_LENGTH.write(&mut stream)?;
        RECORD_LENGTH.write(&mut stream)?;
        ((self.pad_value.len() * 8) as u16).write(&mut stream)?;
        u8::write_slice(&mut stream, &self.pad_value)?;

        // the in-memory sentinel entry stays in memory
        let total = self.pad_offsets.len();
        for &offset in &self.block_offsets[.. total] {
            u64_to_u32_offset(offset, "mask block offset")?.write(&mut stream)?;
        }

        for &offset in &self.pad_offsets {
            u64_to_u32_offset(offset, "mask pad offset")?.write(&mut stream)?;
        }

        Ok(())
    }

    /// Write the mask section at the given absolute stream position.
    pub fn write_at(&self, stream: &mut (impl Stream + ?Sized), position: u64) -> UnitResult {
        seek_to(stream, position)?;
        self.write(stream)
    }

    /// Total bytes of the mask section on disk.
    pub fn section_length(&self) -> usize {
        HEADER_LENGTH + self.pad_value.len()
            + self.pad_offsets.len() * 2 * RECORD_LENGTH as usize
    }

    /// Number of blocks, excluding the sentinel entry.
    pub fn block_count(&self) -> usize {
        self.pad_offsets.len()
    }

    /// Whether the block was entirely pad and physically omitted.
    #[inline]
    pub fn block_is_absent(&self, index: usize) -> bool {
        self.block_offsets[index] == NO_BLOCK
    }

    /// Whether the block is marked as containing pad pixels.
    #[inline]
    pub fn block_has_pad(&self, index: usize) -> bool {
        self.pad_offsets[index] != NO_BLOCK
    }

    /// Record that the block contains both pad and real pixels.
    pub fn mark_padded(&mut self, index: usize) {
        if !self.block_is_absent(index) {
            self.pad_offsets[index] = self.block_offsets[index];
        }
    }

    /// Drop a block that turned out to be entirely pad. Its offset becomes
    /// [`NO_BLOCK`], and every later block moves up by the block length it
    /// no longer has to skip.
    pub fn elide_block(&mut self, index: usize, block_length: u64) {
        self.block_offsets[index] = NO_BLOCK;
        self.pad_offsets[index] = NO_BLOCK;

        for offset in &mut self.block_offsets[index + 1 ..] {
            if *offset != NO_BLOCK {
                *offset -= block_length;
            }
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::*;
    use std::io::Cursor;

    fn geometry() -> BlockGeometry {
        let parameters = ImageParameters::new(
            64, 64, 1, 32, 32,
            BlockingMode::ByBlock,
            CompressionKind::UncompressedMasked,
            PixelDescription::new(PixelType::Integer, 8),
        );

        BlockGeometry::derive(&parameters).unwrap()
    }

    #[test]
    fn linear_table_matches_block_indices(){
        let geometry = geometry();
        let table = MaskTable::linear(&geometry, &[0]);

        for index in 0 ..= geometry.total_blocks {
            assert_eq!(table.block_offsets[index], (index * geometry.block_size_bytes) as u64);
        }

        assert!(table.pad_offsets.iter().all(|&offset| offset == NO_BLOCK));
    }

    #[test]
    fn disk_round_trip(){
        let geometry = geometry();
        let mut table = MaskTable::for_writing(&geometry, &[0x7f]);
        table.mark_padded(2);

        let mut stream = Cursor::new(Vec::new());
        table.write(&mut stream).unwrap();

        assert_eq!(stream.get_ref().len(), table.section_length());

        stream.set_position(0);
        let restored = MaskTable::read(&mut stream, &geometry).unwrap();

        assert_eq!(restored, table);
        assert!(restored.block_has_pad(2));
        assert!(!restored.block_has_pad(1));
    }

    #[test]
    fn elision_shifts_later_offsets(){
        let geometry = geometry();
        let length = geometry.block_size_bytes as u64;
        let mut table = MaskTable::for_writing(&geometry, &[0]);

        table.elide_block(1, length);

        assert_eq!(table.block_offsets[0], 0);
        assert_eq!(table.block_offsets[1], NO_BLOCK);
        assert_eq!(table.block_offsets[2], length);
        assert_eq!(table.block_offsets[3], 2 * length);
        assert_eq!(table.block_offsets[4], 3 * length);
        assert_eq!(table.pad_offsets[1], NO_BLOCK);
    }

    #[test]
    fn oversized_offset_is_an_overflow_error(){
        let geometry = geometry();
        let mut table = MaskTable::for_writing(&geometry, &[0]);
        table.block_offsets[3] = u64::from(u32::MAX) + 12;

        let mut stream = Cursor::new(Vec::new());
        assert!(matches!(table.write(&mut stream), Err(Error::Overflow(_))));
    }

    #[test]
    fn header_is_big_endian(){
        let geometry = geometry();
        let table = MaskTable::for_writing(&geometry, &[0xab]);

        let mut stream = Cursor::new(Vec::new());
        table.write(&mut stream).unwrap();
        let bytes = stream.get_ref();

        // image data offset: 10 byte header + 1 pad byte + 2 * 4 * 4 records
        let expected = (HEADER_LENGTH + 1 + 32) as u32;
        assert_eq!(&bytes[.. 4], &expected.to_be_bytes());

        // record lengths and pad value length in bits
        assert_eq!(&bytes[4 .. 6], &[0, 4]);
        assert_eq!(&bytes[6 .. 8], &[0, 4]);
        assert_eq!(&bytes[8 .. 10], &[0, 8]);
        assert_eq!(bytes[10], 0xab);
    }
}
