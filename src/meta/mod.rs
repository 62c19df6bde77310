
//! Describes the image segment parameters and the block geometry
//! derived from them.
//!
//! The parameters are supplied by whatever parsed the container's
//! subheader; this crate never interprets header text itself.

use smallvec::SmallVec;
use crate::error::{Error, Result, UnitResult, checked_mul};
use crate::math::RoundingMode;


/// The fundamental representation of a single sample value in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {

    /// Unsigned binary integer.
    Integer,

    /// Two's complement signed integer.
    SignedInteger,

    /// IEEE floating point.
    Float,

    /// Two floating point components per pixel.
    Complex,

    /// Bi-valued data, one significant bit per pixel.
    Binary,
}

/// Where the significant bits sit inside the stored pixel field
/// when fewer bits are significant than are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Justification {

    /// Significant bits occupy the most significant end of the field.
    Left,

    /// Significant bits occupy the least significant end of the field.
    Right,
}

/// One pixel's wire representation: type, stored width,
/// significant width, and justification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDescription {
    pub kind: PixelType,

    /// Number of bits each pixel occupies in the file, per band.
    /// `1` and `12` select the packed pseudo-compressions.
    pub bits: u32,

    /// Number of significant bits, at most `bits`.
    pub actual_bits: u32,

    pub justification: Justification,
}

impl PixelDescription {

    /// Shorthand for a fully significant pixel of the given type and width.
    pub fn new(kind: PixelType, bits: u32) -> Self {
        PixelDescription { kind, bits, actual_bits: bits, justification: Justification::Right }
    }

    /// In-memory bytes per pixel per band. Packed widths round up
    /// to their unpacked container size.
    pub fn byte_width(&self) -> usize {
        ((self.bits as usize - 1) / 8) + 1
    }

    /// The justification shift, in bits.
    pub fn shift(&self) -> u32 {
        self.bits - self.actual_bits
    }

    /// Whether this width is stored bit-packed and needs one of the
    /// built-in pseudo-compression codecs.
    pub fn is_packed(&self) -> bool {
        self.bits == 1 || self.bits == 12
    }

    /// Check the type against the stored width and justification.
    /// Every combination this returns `Ok` for has a transform pair assigned.
    pub fn validate(&self) -> UnitResult {
        if self.actual_bits == 0 || self.actual_bits > self.bits {
            return Err(Error::configuration("significant bit count must be between one and the stored bit count"));
        }

        let valid_width = match self.kind {
            PixelType::Integer | PixelType::SignedInteger =>
                matches!(self.bits, 8 | 12 | 16 | 32 | 64),

            PixelType::Float => matches!(self.bits, 32 | 64),
            PixelType::Complex => matches!(self.bits, 64 | 128),
            PixelType::Binary => self.bits == 1,
        };

        if !valid_width {
            return Err(Error::configuration(format!(
                "pixel type {:?} cannot be stored in {} bits", self.kind, self.bits
            )));
        }

        if self.shift() != 0 && matches!(self.kind, PixelType::Float | PixelType::Complex | PixelType::Binary) {
            return Err(Error::configuration("only integer pixels support a justification shift"));
        }

        Ok(())
    }
}


/// The compression code of the segment. The codes ending in "masked" carry
/// the block and pad offset tables in front of the pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    Uncompressed,            // NC
    UncompressedMasked,      // NM
    Bilevel,                 // C1
    BilevelMasked,           // M1
    Jpeg,                    // C3
    JpegMasked,              // M3
    VectorQuantized,         // C4
    VectorQuantizedMasked,   // M4
    LosslessJpeg,            // C5
    LosslessJpegMasked,      // M5
    Vendor,                  // C6
    VendorMasked,            // M6
    ComplexSar,              // C7
    ComplexSarMasked,        // M7
    Jpeg2000,                // C8
    Jpeg2000Masked,          // M8
    DownsampledJpeg,         // I1
}

impl CompressionKind {

    /// Parse the two-character compression code from the subheader.
    pub fn from_code(code: &str) -> Result<Self> {
        use self::CompressionKind::*;
        Ok(match code {
            "NC" => Uncompressed,       "NM" => UncompressedMasked,
            "C1" => Bilevel,            "M1" => BilevelMasked,
            "C3" => Jpeg,               "M3" => JpegMasked,
            "C4" => VectorQuantized,    "M4" => VectorQuantizedMasked,
            "C5" => LosslessJpeg,       "M5" => LosslessJpegMasked,
            "C6" => Vendor,             "M6" => VendorMasked,
            "C7" => ComplexSar,         "M7" => ComplexSarMasked,
            "C8" => Jpeg2000,           "M8" => Jpeg2000Masked,
            "I1" => DownsampledJpeg,
            _ => return Err(Error::configuration(format!("unknown compression code `{}`", code))),
        })
    }

    /// The two-character subheader code.
    pub fn code(self) -> &'static str {
        use self::CompressionKind::*;
        match self {
            Uncompressed => "NC",       UncompressedMasked => "NM",
            Bilevel => "C1",            BilevelMasked => "M1",
            Jpeg => "C3",               JpegMasked => "M3",
            VectorQuantized => "C4",    VectorQuantizedMasked => "M4",
            LosslessJpeg => "C5",       LosslessJpegMasked => "M5",
            Vendor => "C6",             VendorMasked => "M6",
            ComplexSar => "C7",         ComplexSarMasked => "M7",
            Jpeg2000 => "C8",           Jpeg2000Masked => "M8",
            DownsampledJpeg => "I1",
        }
    }

    /// Whether block and pad offset tables precede the pixel data.
    pub fn has_mask(self) -> bool {
        use self::CompressionKind::*;
        matches!(self,
            UncompressedMasked | BilevelMasked | JpegMasked | VectorQuantizedMasked
            | LosslessJpegMasked | VendorMasked | ComplexSarMasked | Jpeg2000Masked
        )
    }

    /// Whether the pixel data runs through a codec plugin.
    pub fn is_compressed(self) -> bool {
        use self::CompressionKind::*;
        !matches!(self, Uncompressed | UncompressedMasked)
    }
}

impl std::fmt::Display for CompressionKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.code())
    }
}


/// How bands map into blocks.
/// The last two variants are detected automatically and never parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingMode {

    /// "S": one whole band occupies contiguous blocks before the next band begins.
    BandSequential,

    /// "B": within one block, each band is a contiguous sub-block.
    ByBlock,

    /// "R": within one block row, bands alternate every block-width pixels.
    ByRow,

    /// "P": consecutive pixels alternate bands.
    ByPixel,

    /// Pixel-interleaved three-band 8-bit color, collapsed into a single
    /// synthetic band of three-byte pixels.
    Rgb24,

    /// Pixel-interleaved two-band in-phase/quadrature data, collapsed into
    /// a single synthetic band of doubled width.
    Iq,
}

impl BlockingMode {

    /// Parse the blocking mode letter from the subheader.
    /// Only `B`, `P`, `R` and `S` are valid in a file.
    pub fn from_letter(letter: char) -> Result<Self> {
        Ok(match letter {
            'B' => BlockingMode::ByBlock,
            'P' => BlockingMode::ByPixel,
            'R' => BlockingMode::ByRow,
            'S' => BlockingMode::BandSequential,
            _ => return Err(Error::configuration(format!("invalid blocking mode `{}`", letter))),
        })
    }

    /// Whether all bands of a pixel share one block.
    pub fn bands_share_blocks(self) -> bool {
        !matches!(self, BlockingMode::BandSequential)
    }
}


/// Everything the subheader supplies about one image segment.
/// Constructing an [`crate::image::ImageIo`] validates these values.
#[derive(Debug, Clone)]
pub struct ImageParameters {
    pub num_rows: u32,
    pub num_columns: u32,
    pub num_bands: u32,

    /// Rows per block; zero means the image is not blocked vertically.
    pub rows_per_block: u32,

    /// Columns per block; zero means the image is not blocked horizontally.
    pub cols_per_block: u32,

    pub blocking_mode: BlockingMode,
    pub compression: CompressionKind,
    pub pixel: PixelDescription,

    /// The representation tag of the segment, for example `"RGB"` or `"MONO"`.
    pub representation: String,

    /// Per-band subcategory tags, for example `"I"` and `"Q"`.
    pub band_subcategories: SmallVec<[String; 4]>,
}

impl ImageParameters {

    /// Shorthand for a single untagged representation.
    pub fn new(
        num_rows: u32, num_columns: u32, num_bands: u32,
        rows_per_block: u32, cols_per_block: u32,
        blocking_mode: BlockingMode, compression: CompressionKind,
        pixel: PixelDescription,
    ) -> Self {
        ImageParameters {
            num_rows, num_columns, num_bands,
            rows_per_block, cols_per_block,
            blocking_mode, compression, pixel,
            representation: String::new(),
            band_subcategories: SmallVec::new(),
        }
    }

    pub fn validate(&self) -> UnitResult {
        if self.num_rows == 0 || self.num_columns == 0 {
            return Err(Error::configuration("image extent must not be zero"));
        }

        if self.num_bands == 0 {
            return Err(Error::configuration("at least one band is required"));
        }

        self.pixel.validate()?;

        if matches!(self.blocking_mode, BlockingMode::Rgb24 | BlockingMode::Iq) {
            return Err(Error::configuration("collapsed blocking modes cannot be specified directly"));
        }

        Ok(())
    }
}


/// Derived, immutable layout facts for one image segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockGeometry {
    pub rows_per_block: usize,
    pub cols_per_block: usize,
    pub blocks_per_row: usize,
    pub blocks_per_column: usize,

    /// Blocks in one band's grid: `blocks_per_row * blocks_per_column`.
    pub band_block_count: usize,

    /// Number of entries in the block mask. Band-sequential images have
    /// one grid per band, all other modes share one grid.
    pub total_blocks: usize,

    /// Unpacked bytes per block, including all bands stored in the block.
    pub block_size_bytes: usize,

    /// Bytes one block occupies in the file when no codec is involved.
    /// Differs from `block_size_bytes` only for the bit-packed widths.
    pub disk_block_length: usize,

    /// Padded row extent: `rows_per_block * blocks_per_column`.
    pub actual_rows: usize,

    /// Padded column extent: `cols_per_block * blocks_per_row`.
    pub actual_columns: usize,

    /// Bands stored per block (one for band-sequential images).
    pub bands_per_block: usize,
}

impl BlockGeometry {

    /// Derive the layout from validated parameters.
    pub fn derive(parameters: &ImageParameters) -> Result<Self> {
        let num_rows = parameters.num_rows as usize;
        let num_columns = parameters.num_columns as usize;
        let num_bands = parameters.num_bands as usize;

        // zero block dimensions mean the whole extent is one block
        let rows_per_block = match parameters.rows_per_block {
            0 => num_rows, rows => rows as usize,
        };

        let cols_per_block = match parameters.cols_per_block {
            0 => num_columns, cols => cols as usize,
        };

        let blocks_per_row = RoundingMode::Up.divide(num_columns, cols_per_block);
        let blocks_per_column = RoundingMode::Up.divide(num_rows, rows_per_block);
        let band_block_count = checked_mul(blocks_per_row, blocks_per_column, "block count")?;

        let bands_per_block = if parameters.blocking_mode.bands_share_blocks() { num_bands } else { 1 };
        let total_blocks = if bands_per_block == 1 && num_bands > 1 {
            checked_mul(band_block_count, num_bands, "block count")?
        } else {
            band_block_count
        };

        let block_pixels = checked_mul(rows_per_block, cols_per_block, "block size")?;
        let block_samples = checked_mul(block_pixels, bands_per_block, "block size")?;
        let block_size_bytes = checked_mul(block_samples, parameters.pixel.byte_width(), "block size")?;

        // bit-packed widths shrink the physical block
        let disk_block_length = RoundingMode::Up
            .divide(checked_mul(block_samples, parameters.pixel.bits as usize, "block size")?, 8);

        Ok(BlockGeometry {
            rows_per_block, cols_per_block,
            blocks_per_row, blocks_per_column,
            band_block_count, total_blocks,
            block_size_bytes, disk_block_length,
            actual_rows: rows_per_block * blocks_per_column,
            actual_columns: cols_per_block * blocks_per_row,
            bands_per_block,
        })
    }

    /// The caller-facing summary of this geometry.
    pub fn summary(&self) -> BlockingInfo {
        BlockingInfo {
            blocks_per_row: self.blocks_per_row,
            blocks_per_column: self.blocks_per_column,
            rows_per_block: self.rows_per_block,
            cols_per_block: self.cols_per_block,
            block_size_bytes: self.block_size_bytes,
        }
    }
}


/// Blocking information reported to callers before they issue sub-window
/// requests. For compressed images the codec may revise these values,
/// so this can differ from what the subheader claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingInfo {
    pub blocks_per_row: usize,
    pub blocks_per_column: usize,
    pub rows_per_block: usize,
    pub cols_per_block: usize,
    pub block_size_bytes: usize,
}


#[cfg(test)]
mod test {
    use super::*;

    fn simple_parameters(mode: BlockingMode) -> ImageParameters {
        ImageParameters::new(
            100, 100, 3, 32, 32, mode,
            CompressionKind::Uncompressed,
            PixelDescription::new(PixelType::Integer, 8),
        )
    }

    #[test]
    fn geometry_pads_partial_blocks(){
        let geometry = BlockGeometry::derive(&simple_parameters(BlockingMode::ByBlock)).unwrap();

        assert_eq!(geometry.blocks_per_row, 4);
        assert_eq!(geometry.blocks_per_column, 4);
        assert_eq!(geometry.actual_rows, 128);
        assert_eq!(geometry.actual_columns, 128);
        assert_eq!(geometry.total_blocks, 16);
        assert_eq!(geometry.block_size_bytes, 32 * 32 * 3);
    }

    #[test]
    fn band_sequential_blocks_count_per_band(){
        let geometry = BlockGeometry::derive(&simple_parameters(BlockingMode::BandSequential)).unwrap();

        assert_eq!(geometry.total_blocks, 48);
        assert_eq!(geometry.band_block_count, 16);
        assert_eq!(geometry.block_size_bytes, 32 * 32);
    }

    #[test]
    fn unblocked_image_is_one_block(){
        let mut parameters = simple_parameters(BlockingMode::ByBlock);
        parameters.rows_per_block = 0;
        parameters.cols_per_block = 0;

        let geometry = BlockGeometry::derive(&parameters).unwrap();
        assert_eq!(geometry.total_blocks, 1);
        assert_eq!(geometry.actual_rows, 100);
    }

    #[test]
    fn invalid_mode_letter_is_rejected(){
        assert!(BlockingMode::from_letter('Q').is_err());
        assert!(BlockingMode::from_letter('S').is_ok());
    }

    #[test]
    fn compression_codes_round_trip(){
        for code in ["NC", "NM", "C1", "M1", "C3", "M3", "C4", "M4",
                     "C5", "M5", "C6", "M6", "C7", "M7", "C8", "M8", "I1"] {
            assert_eq!(CompressionKind::from_code(code).unwrap().code(), code);
        }

        assert!(CompressionKind::from_code("XX").is_err());
    }

    #[test]
    fn packed_widths_are_detected(){
        assert!(PixelDescription::new(PixelType::Binary, 1).is_packed());
        assert!(PixelDescription::new(PixelType::Integer, 12).is_packed());
        assert!(!PixelDescription::new(PixelType::Integer, 16).is_packed());
    }

    #[test]
    fn float_with_shift_is_rejected(){
        let pixel = PixelDescription {
            kind: PixelType::Float, bits: 32, actual_bits: 24,
            justification: Justification::Left,
        };

        assert!(pixel.validate().is_err());
    }
}
