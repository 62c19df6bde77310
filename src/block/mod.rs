
//! Block layout strategies, one per interleaving scheme.
//!
//! A strategy knows where a band's bytes live inside a block, how far the
//! intra-block cursor moves per image row, and whether the bands of one
//! block column share their physical transfers. It is selected once at
//! context construction; no call site re-derives layout from mode flags.

pub(crate) mod cursor;
pub(crate) mod transfer;
pub(crate) mod planner;
pub(crate) mod cache;

use crate::meta::{BlockGeometry, BlockingMode};


/// Shared layout facts every strategy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LayoutData {

    /// In-memory bytes per sample.
    pub bytes: usize,

    /// Bands stored in one block.
    pub bands: usize,

    pub rows_per_block: usize,
    pub cols_per_block: usize,
    pub blocks_per_row: usize,

    /// Blocks in one band's grid.
    pub band_block_count: usize,
}

/// The interleaving strategy of the image, selected once per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModeLayout {

    /// "S": per-band block grids, one after the other.
    BandSequential(LayoutData),

    /// "B": each band a contiguous sub-block inside the block.
    ByBlock(LayoutData),

    /// "R": bands alternate every block-width pixels.
    ByRow(LayoutData),

    /// "P": bands alternate every pixel; one physical transfer per block
    /// column feeds all bands.
    ByPixel(LayoutData),
}

impl ModeLayout {

    /// Select the strategy for the mode. The collapsed modes reuse the
    /// band-sequential layout over their single synthetic band.
    pub fn select(mode: BlockingMode, geometry: &BlockGeometry, bytes: usize) -> Self {
        let data = LayoutData {
            bytes,
            bands: geometry.bands_per_block,
            rows_per_block: geometry.rows_per_block,
            cols_per_block: geometry.cols_per_block,
            blocks_per_row: geometry.blocks_per_row,
            band_block_count: geometry.band_block_count,
        };

        match mode {
            BlockingMode::BandSequential | BlockingMode::Rgb24 | BlockingMode::Iq =>
                ModeLayout::BandSequential(data),

            BlockingMode::ByBlock => ModeLayout::ByBlock(data),
            BlockingMode::ByRow => ModeLayout::ByRow(data),
            BlockingMode::ByPixel => ModeLayout::ByPixel(data),
        }
    }

    pub fn data(&self) -> &LayoutData {
        match self {
            ModeLayout::BandSequential(data) => data,
            ModeLayout::ByBlock(data) => data,
            ModeLayout::ByRow(data) => data,
            ModeLayout::ByPixel(data) => data,
        }
    }

    /// The block number holding the given position. Band-sequential grids
    /// put each band's whole grid before the next band's.
    pub fn block_number(&self, band: usize, block_row: usize, block_col: usize) -> usize {
        let data = self.data();
        let within_grid = block_row * data.blocks_per_row + block_col;

        match self {
            ModeLayout::BandSequential(data) => band * data.band_block_count + within_grid,
            _ => within_grid,
        }
    }

    /// Byte offset of a band's row segment inside its block,
    /// at the given column within the block.
    pub fn block_origin(&self, band: usize, col_in_block: usize) -> usize {
        match self {
            ModeLayout::BandSequential(data) =>
                col_in_block * data.bytes,

            ModeLayout::ByBlock(data) =>
                (band * data.rows_per_block * data.cols_per_block + col_in_block) * data.bytes,

            ModeLayout::ByRow(data) =>
                (band * data.cols_per_block + col_in_block) * data.bytes,

            // the shared transfer starts at the pixel group;
            // the band offset is applied while unpacking
            ModeLayout::ByPixel(data) =>
                col_in_block * data.bands * data.bytes,
        }
    }

    /// How far the intra-block cursor moves per image row.
    pub fn row_increment(&self) -> usize {
        let data = self.data();
        match self {
            ModeLayout::BandSequential(_) | ModeLayout::ByBlock(_) =>
                data.cols_per_block * data.bytes,

            ModeLayout::ByRow(_) | ModeLayout::ByPixel(_) =>
                data.cols_per_block * data.bands * data.bytes,
        }
    }

    /// Physical bytes to move for a row segment of `count` pixels.
    pub fn transfer_bytes(&self, count: usize) -> usize {
        let data = self.data();
        match self {
            ModeLayout::ByPixel(_) => count * data.bands * data.bytes,
            _ => count * data.bytes,
        }
    }

    /// Whether only one unit per block column performs physical I/O,
    /// with the other bands unpacking from the shared buffer.
    pub fn shares_column_io(&self) -> bool {
        matches!(self, ModeLayout::ByPixel(_))
    }

    /// Block-number stride for moving one block row down.
    pub fn block_row_stride(&self) -> usize {
        self.data().blocks_per_row
    }
}


/// Copy one band out of a pixel-interleaved buffer.
/// `raw` starts at a pixel group boundary and holds `count` groups of
/// `stride` samples each; the band's samples land contiguously in `target`.
pub(crate) fn gather_band(
    raw: &[u8], target: &mut [u8],
    bytes: usize, stride: usize, band: usize, count: usize,
) {
    match bytes {
        1 => gather::<1>(raw, target, stride, band, count),
        2 => gather::<2>(raw, target, stride, band, count),
        4 => gather::<4>(raw, target, stride, band, count),
        8 => gather::<8>(raw, target, stride, band, count),
        16 => gather::<16>(raw, target, stride, band, count),
        _ => debug_assert!(false, "no interleave exists for {} byte samples", bytes),
    }
}

/// Copy one band into a pixel-interleaved buffer; the inverse of
/// [`gather_band`].
pub(crate) fn scatter_band(
    source: &[u8], raw: &mut [u8],
    bytes: usize, stride: usize, band: usize, count: usize,
) {
    match bytes {
        1 => scatter::<1>(source, raw, stride, band, count),
        2 => scatter::<2>(source, raw, stride, band, count),
        4 => scatter::<4>(source, raw, stride, band, count),
        8 => scatter::<8>(source, raw, stride, band, count),
        16 => scatter::<16>(source, raw, stride, band, count),
        _ => debug_assert!(false, "no interleave exists for {} byte samples", bytes),
    }
}

fn gather<const SIZE: usize>(raw: &[u8], target: &mut [u8], stride: usize, band: usize, count: usize) {
    for pixel in 0 .. count {
        let source = (pixel * stride + band) * SIZE;
        target[pixel * SIZE ..][.. SIZE].copy_from_slice(&raw[source ..][.. SIZE]);
    }
}

fn scatter<const SIZE: usize>(source: &[u8], raw: &mut [u8], stride: usize, band: usize, count: usize) {
    for pixel in 0 .. count {
        let target = (pixel * stride + band) * SIZE;
        raw[target ..][.. SIZE].copy_from_slice(&source[pixel * SIZE ..][.. SIZE]);
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::*;

    fn layout(mode: BlockingMode) -> ModeLayout {
        let parameters = ImageParameters::new(
            64, 64, 2, 16, 16, mode,
            CompressionKind::Uncompressed,
            PixelDescription::new(PixelType::Integer, 16),
        );

        let geometry = BlockGeometry::derive(&parameters).unwrap();
        ModeLayout::select(mode, &geometry, 2)
    }

    #[test]
    fn band_sequential_offsets_blocks_per_band(){
        let layout = layout(BlockingMode::BandSequential);
        assert_eq!(layout.block_number(0, 1, 2), 6);
        assert_eq!(layout.block_number(1, 1, 2), 22);
        assert_eq!(layout.block_origin(1, 3), 6);
        assert_eq!(layout.row_increment(), 32);
    }

    #[test]
    fn by_block_offsets_sub_blocks(){
        let layout = layout(BlockingMode::ByBlock);
        assert_eq!(layout.block_number(1, 1, 2), 6);
        assert_eq!(layout.block_origin(0, 3), 6);
        assert_eq!(layout.block_origin(1, 3), (256 + 3) * 2);
        assert_eq!(layout.row_increment(), 32);
    }

    #[test]
    fn by_row_alternates_every_block_width(){
        let layout = layout(BlockingMode::ByRow);
        assert_eq!(layout.block_origin(1, 3), (16 + 3) * 2);
        assert_eq!(layout.row_increment(), 64);
    }

    #[test]
    fn by_pixel_shares_the_transfer(){
        let layout = layout(BlockingMode::ByPixel);
        assert!(layout.shares_column_io());
        assert_eq!(layout.block_origin(1, 3), 3 * 2 * 2);
        assert_eq!(layout.transfer_bytes(5), 20);
        assert_eq!(layout.row_increment(), 64);
    }

    #[test]
    fn interleave_round_trip(){
        let mut raw = vec![0_u8; 3 * 4 * 2]; // 4 pixels, 3 bands, 2 bytes
        let band_1 = [10, 11,  20, 21,  30, 31,  40, 41];

        scatter_band(&band_1, &mut raw, 2, 3, 1, 4);

        let mut back = [0_u8; 8];
        gather_band(&raw, &mut back, 2, 3, 1, 4);
        assert_eq!(back, band_1);

        // the other bands were not touched
        let mut band_0 = [0_u8; 8];
        gather_band(&raw, &mut band_0, 2, 3, 0, 4);
        assert_eq!(band_0, [0_u8; 8]);
    }
}
