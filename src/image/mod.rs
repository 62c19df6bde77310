
//! The per-segment I/O context.
//!
//! An [`ImageIo`] owns everything derived from one image segment's
//! parameters: block geometry, the selected interleaving strategy and
//! sample transforms, the lazily built masks, the block cache, and the
//! codec controls. It drives sub-window reads and sequential writes over
//! a caller-supplied byte stream, which it positions absolutely before
//! every transfer.

use smallvec::SmallVec;

use crate::io::{Stream, seek_to};
use crate::error::{Error, Result, UnitResult};
use crate::meta::{
    ImageParameters, BlockGeometry, BlockingInfo, BlockingMode, PixelDescription,
};
use crate::sample::PixelFormat;
use crate::mask::MaskTable;
use crate::block::ModeLayout;
use crate::block::cache::BlockCache;
use crate::block::planner::{Engine, Region, TransferPlan};
use crate::codec::{self, Decompressor, Compressor, DecompressionControl, CompressionControl};
use crate::downsample::DownSampler;


/// One sub-window request: a pixel region, optional down-sample factors,
/// and an ordered band subset. Start coordinates are full-resolution;
/// the row and column counts are in output pixels.
#[derive(Debug, Clone)]
pub struct SubWindow {
    pub start_row: usize,
    pub start_col: usize,
    pub num_rows: usize,
    pub num_cols: usize,

    /// Down-sample factors. `1` reads at full resolution.
    pub row_skip: usize,
    pub col_skip: usize,

    /// Requested bands, in order; the first entry must be the smallest.
    /// An empty list requests all bands.
    pub bands: SmallVec<[usize; 4]>,
}

impl SubWindow {

    /// A full-resolution request for all bands.
    pub fn new(start_row: usize, start_col: usize, num_rows: usize, num_cols: usize) -> Self {
        SubWindow {
            start_row, start_col, num_rows, num_cols,
            row_skip: 1, col_skip: 1,
            bands: SmallVec::new(),
        }
    }

    /// Request down-sampling by the given window size.
    /// The row and column counts then mean output pixels.
    pub fn with_skip(mut self, row_skip: usize, col_skip: usize) -> Self {
        self.row_skip = row_skip;
        self.col_skip = col_skip;
        self
    }

    /// Request a subset of bands, in order.
    pub fn with_bands(mut self, bands: &[usize]) -> Self {
        self.bands = bands.iter().copied().collect();
        self
    }
}


/// The working view of the image: either the parameters as supplied, or
/// the collapsed single-band view of an auto-detected interleaved layout.
#[derive(Debug)]
struct View {
    geometry: BlockGeometry,
    layout: ModeLayout,
    format: PixelFormat,
    mode: BlockingMode,
    num_bands: usize,
}


/// Manages the pixel data I/O for one image segment.
pub struct ImageIo {
    parameters: ImageParameters,
    view: View,

    /// Which collapsed optimization is active, if any.
    collapsed: Option<BlockingMode>,

    /// Absolute stream position of the segment (mask section, if masked).
    offset: u64,

    /// Byte length of the segment, including any mask section.
    length: u64,

    /// The pad value for one true pixel, in file encoding.
    pad_base: Vec<u8>,

    /// The pad value widened to the current view's sample width.
    pad_file: Vec<u8>,

    /// The view pad value as the caller sees it.
    pad_native: Vec<u8>,

    mask: Option<MaskTable>,

    decompressor: Option<Box<dyn Decompressor>>,
    compressor: Option<Box<dyn Compressor>>,
    decompression: Option<Box<dyn DecompressionControl>>,
    compression: Option<Box<dyn CompressionControl>>,

    cache: BlockCache,
    cached_reads: bool,
    cached_writes: bool,

    /// The active sequential write, if any. At most one exists at a time.
    writer: Option<TransferPlan>,
}

impl ImageIo {

    /// Build the context for one image segment. `offset` is the absolute
    /// stream position of the segment data (the mask section start for
    /// masked images) and `length` its byte count.
    ///
    /// Codecs may be supplied for the compressed kinds; the bit-packed
    /// pixel widths and the vendor-reserved masked code fall back to the
    /// built-in codecs when none are given.
    pub fn new(
        parameters: ImageParameters, offset: u64, length: u64,
        compressor: Option<Box<dyn Compressor>>,
        decompressor: Option<Box<dyn Decompressor>>,
    ) -> Result<Self> {
        parameters.validate()?;

        let collapsed = detect_collapse(&parameters);
        let view = make_view(&parameters, collapsed)?;

        // interleaved partial blocks cannot round-trip through a codec
        // that consumes whole fixed-size blocks of every band at once
        if parameters.compression.is_compressed()
            && parameters.blocking_mode == BlockingMode::ByPixel
            && parameters.num_bands > 1
            && (view.geometry.actual_rows != parameters.num_rows as usize
                || view.geometry.actual_columns != parameters.num_columns as usize) {
            return Err(Error::configuration(
                "compressed pixel-interleaved images with partial blocks and multiple bands are not supported"
            ));
        }

        let (compressor, decompressor) = match (compressor, decompressor) {
            (None, None) => match codec::built_in(parameters.compression, &parameters.pixel) {
                Some((decompress, compress)) => (Some(compress), Some(decompress)),
                None => (None, None),
            },

            supplied => supplied,
        };

        let mut image = ImageIo {
            pad_base: vec![0_u8; parameters.pixel.byte_width()],
            pad_file: Vec::new(),
            pad_native: Vec::new(),
            parameters, view, collapsed,
            offset, length,
            mask: None,
            decompressor, compressor,
            decompression: None,
            compression: None,
            cache: BlockCache::default(),
            cached_reads: false,
            cached_writes: false,
            writer: None,
        };

        image.refresh_pads();
        Ok(image)
    }

    /// The pixel size in bytes, as described by the subheader.
    pub fn pixel_size(&self) -> usize {
        self.parameters.pixel.byte_width()
    }

    /// Bands a request currently addresses. One while a collapsed
    /// optimization is active, the true band count otherwise.
    pub fn band_count(&self) -> usize {
        self.view.num_bands
    }

    /// Set the pad value used for writing and for reads of omitted
    /// blocks. Must be one true pixel wide, in file encoding.
    pub fn set_pad_pixel(&mut self, value: &[u8]) -> UnitResult {
        if value.len() != self.parameters.pixel.byte_width() {
            return Err(Error::configuration("pad value must be one pixel wide"));
        }

        self.pad_base = value.to_vec();
        self.refresh_pads();
        Ok(())
    }

    /// Move the segment to another stream position. Not possible while a
    /// write is in progress; drops lazily built state.
    pub fn set_file_offset(&mut self, offset: u64) -> UnitResult {
        if self.writer.is_some() {
            return Err(Error::configuration("cannot move the segment during a write"));
        }

        self.offset = offset;
        self.mask = None;
        self.decompression = None;
        self.compression = None;
        self.cache.clear();
        Ok(())
    }

    /// Route uncompressed writes through whole-block buffers, enabling
    /// all-pad block elision. Compressed and bit-packed images are always
    /// cached. Returns the previous setting.
    pub fn set_write_caching(&mut self, enable: bool) -> bool {
        std::mem::replace(&mut self.cached_writes, enable)
    }

    /// Route uncompressed reads through the single-block cache.
    pub fn set_read_caching(&mut self) {
        self.cached_reads = true;
    }

    /// Blocking information for callers that need the geometry before
    /// issuing requests. Triggers lazy mask construction and, for
    /// compressed images, the decompressor's start call, which may revise
    /// the reported geometry. Only valid over an existing file.
    pub fn blocking_info(&mut self, stream: &mut impl Stream) -> Result<BlockingInfo> {
        let stream: &mut dyn Stream = stream;
        self.prepare_reading(stream)?;
        Ok(self.view.geometry.summary())
    }

    /// Read a sub-window into one caller buffer per requested band.
    /// Returns whether the result may contain pad pixels.
    ///
    /// Down-sampled requests must supply the sampler whose window matches
    /// the sub-window's skip factors.
    pub fn read_sub_window(
        &mut self, stream: &mut impl Stream,
        window: &SubWindow,
        sampler: Option<&mut dyn DownSampler>,
        user: &mut [&mut [u8]],
    ) -> Result<bool> {
        let stream: &mut dyn Stream = stream;

        self.revert_unless_served(&window.bands)?;
        self.prepare_reading(stream)?;

        let region = Region {
            start_row: window.start_row,
            start_col: window.start_col,
            num_rows: window.num_rows,
            num_cols: window.num_cols,
            row_skip: window.row_skip,
            col_skip: window.col_skip,
        };

        let cached = self.cached_reads || self.decompression.is_some();
        let mut engine = self.engine(cached, false);
        let mut plan = TransferPlan::plan(&engine, region, &window.bands, true)?;
        plan.read(&mut engine, stream, sampler, user)
    }

    /// Begin a sequential write of the whole image, full rows, all bands.
    /// Masks are synthesized fresh; the codec, if any, is opened and
    /// started. At most one write may be in progress per context.
    pub fn write_sequential(&mut self, stream: &mut impl Stream) -> UnitResult {
        let stream: &mut dyn Stream = stream;

        if self.writer.is_some() {
            return Err(Error::invalid("a write is already in progress"));
        }

        // writes always address the true bands
        self.revert_collapse()?;

        if self.needs_codec() && self.compressor.is_none() {
            return Err(Error::codec(format!(
                "no compressor installed for {}", self.parameters.compression
            )));
        }

        self.mask = Some(if self.parameters.compression.has_mask() {
            MaskTable::for_writing(&self.view.geometry, &self.pad_file)
        } else {
            MaskTable::linear(&self.view.geometry, &self.pad_file)
        });

        if self.needs_codec() {
            let compressor = match &self.compressor {
                Some(compressor) => compressor,
                None => unreachable!("codec presence checked above"),
            };

            let mut control = compressor.open(&self.view.geometry, &self.parameters.pixel)?;
            let mut info = self.view.geometry.summary();

            let mask = match &self.mask {
                Some(mask) => mask,
                None => unreachable!("mask synthesized above"),
            };

            control.start(stream, self.offset + mask.image_data_offset, &mut info, mask)?;
            self.compression = Some(control);
        }

        let region = Region {
            start_row: 0, start_col: 0,
            num_rows: self.parameters.num_rows as usize,
            num_cols: self.parameters.num_columns as usize,
            row_skip: 1, col_skip: 1,
        };

        let cached = self.cached_writes || self.compression.is_some();
        let engine = self.engine(cached, true);
        let plan = TransferPlan::plan(&engine, region, &[], false)?;

        self.writer = Some(plan);
        Ok(())
    }

    /// Append rows to the sequential write. `data` holds one buffer per
    /// band, each with `num_rows` full-width rows, ordered by band.
    pub fn write_rows(
        &mut self, stream: &mut impl Stream,
        data: &[&[u8]], num_rows: usize,
    ) -> UnitResult {
        let stream: &mut dyn Stream = stream;

        let mut plan = match self.writer.take() {
            Some(plan) => plan,
            None => return Err(Error::invalid("no write is in progress")),
        };

        let cached = self.cached_writes || self.compression.is_some();
        let mut engine = self.engine(cached, true);
        let result = plan.write_rows(&mut engine, stream, data, num_rows);

        // a failed call tears the write down; the context stays reusable
        if result.is_ok() {
            self.writer = Some(plan);
        }

        result
    }

    /// Finalize the sequential write: emit the trailing pad rows, flush
    /// the block buffers, finish the codec, and write the masks.
    pub fn write_done(&mut self, stream: &mut impl Stream) -> UnitResult {
        let stream: &mut dyn Stream = stream;

        let mut plan = match self.writer.take() {
            Some(plan) => plan,
            None => return Err(Error::invalid("no write is in progress")),
        };

        let cached = self.cached_writes || self.compression.is_some();
        let result = {
            let mut engine = self.engine(cached, true);
            plan.finish(&mut engine, stream)
        };

        self.compression = None;
        self.cache.clear();
        result
    }

    /// Complete deferred writes without ending the sequential write:
    /// the current state of the masks is written back to the stream.
    pub fn flush(&mut self, stream: &mut impl Stream) -> UnitResult {
        let stream: &mut dyn Stream = stream;

        if self.writer.is_none() {
            return Err(Error::invalid("no write is in progress"));
        }

        if let Some(mask) = &self.mask {
            if mask.on_disk {
                mask.write_at(stream, self.offset)?;
            }
        }

        Ok(())
    }


    // ----------------------------------------------------------- internals

    fn needs_codec(&self) -> bool {
        self.parameters.compression.is_compressed() || self.parameters.pixel.is_packed()
    }

    /// Rebuild the widened pad values from the base pad pixel.
    fn refresh_pads(&mut self) {
        let factor = self.view.format.bytes / self.pad_base.len().max(1);
        debug_assert!(factor >= 1, "pad width bug");

        let mut file = Vec::with_capacity(self.view.format.bytes);
        for _ in 0 .. factor {
            file.extend_from_slice(&self.pad_base);
        }

        let mut native = file.clone();
        self.view.format.unformat_in_place(&mut native);

        self.pad_file = file;
        self.pad_native = native;
    }

    /// Permanently reinstate the true multi-band view when a request
    /// cannot be served by the collapsed one. Only a request for exactly
    /// the single collapsed band keeps the optimization.
    fn revert_unless_served(&mut self, bands: &[usize]) -> UnitResult {
        if self.collapsed.is_none() {
            return Ok(());
        }

        let serves_collapsed = bands.len() == 1 && bands[0] == 0;
        if !serves_collapsed {
            self.revert_collapse()?;
        }

        Ok(())
    }

    fn revert_collapse(&mut self) -> UnitResult {
        if self.collapsed.is_none() {
            return Ok(());
        }

        // the block grid and block sizes are identical in both views,
        // so an already built mask stays valid
        self.view = make_view(&self.parameters, None)?;
        self.collapsed = None;
        self.refresh_pads();
        Ok(())
    }

    /// Build the masks if missing and start the decompressor once.
    fn prepare_reading(&mut self, stream: &mut dyn Stream) -> UnitResult {
        if self.mask.is_none() {
            let table = if self.parameters.compression.has_mask() {
                seek_to(stream, self.offset)?;
                let table = MaskTable::read(stream, &self.view.geometry)?;

                // the segment's own pad value wins over the default
                if table.pad_value.len() == self.pad_base.len() {
                    self.pad_base = table.pad_value.clone();
                    self.refresh_pads();
                }

                table
            }
            else {
                MaskTable::linear(&self.view.geometry, &self.pad_file)
            };

            self.mask = Some(table);
        }

        if self.needs_codec() && self.decompression.is_none() {
            let decompressor = match &self.decompressor {
                Some(decompressor) => decompressor,
                None => return Err(Error::codec(format!(
                    "no decompressor installed for {}", self.parameters.compression
                ))),
            };

            let mut control = decompressor.open(&self.view.geometry, &self.parameters.pixel)?;
            let mut info = self.view.geometry.summary();

            {
                let mask = match &self.mask {
                    Some(mask) => mask,
                    None => unreachable!("mask built above"),
                };

                let pixel_base = self.offset + mask.image_data_offset;
                let remaining = self.length.saturating_sub(mask.image_data_offset);
                control.start(stream, pixel_base, remaining, &mut info, mask)?;
            }

            if info != self.view.geometry.summary() {
                self.apply_blocking_revision(info)?;
            }

            self.decompression = Some(control);
        }

        Ok(())
    }

    /// Adopt the geometry the codec reported, where it disagrees with
    /// the subheader.
    fn apply_blocking_revision(&mut self, info: BlockingInfo) -> UnitResult {
        self.parameters.rows_per_block = info.rows_per_block as u32;
        self.parameters.cols_per_block = info.cols_per_block as u32;
        self.view = make_view(&self.parameters, self.collapsed)?;
        self.refresh_pads();
        Ok(())
    }

    /// Borrow the pieces a plan needs for one call.
    fn engine(&mut self, cached: bool, writing: bool) -> Engine<'_> {
        let mask = match &mut self.mask {
            Some(mask) => mask,
            None => unreachable!("engine built before the masks"),
        };

        let pixel_base = self.offset + mask.image_data_offset;

        Engine {
            geometry: &self.view.geometry,
            layout: &self.view.layout,
            format: &self.view.format,
            mask,
            pad_file: &self.pad_file,
            pad_native: &self.pad_native,
            pixel_type: self.parameters.pixel.kind,
            num_rows: self.parameters.num_rows as usize,
            num_cols: self.parameters.num_columns as usize,
            num_bands: self.view.num_bands,
            segment_base: self.offset,
            pixel_base,
            cached,
            elision_supported: !matches!(self.view.mode, BlockingMode::BandSequential),
            cache: &mut self.cache,
            decompression: if writing { None } else { self.decompression.as_mut() },
            compression: if writing { self.compression.as_mut() } else { None },
        }
    }
}



/// Decide whether the image qualifies for one of the collapsed
/// single-band optimizations of pixel-interleaved data.
fn detect_collapse(parameters: &ImageParameters) -> Option<BlockingMode> {
    if parameters.blocking_mode != BlockingMode::ByPixel
        || parameters.compression.is_compressed()
        || parameters.pixel.is_packed()
        || parameters.pixel.shift() != 0 {
        return None;
    }

    if parameters.num_bands == 3
        && parameters.representation == "RGB"
        && parameters.pixel.byte_width() == 1 {
        return Some(BlockingMode::Rgb24);
    }

    if parameters.num_bands == 2
        && parameters.band_subcategories.len() == 2
        && parameters.band_subcategories[0] == "I"
        && parameters.band_subcategories[1] == "Q" {
        return Some(BlockingMode::Iq);
    }

    None
}

/// Derive the working view: geometry, layout and sample transforms.
fn make_view(parameters: &ImageParameters, collapse: Option<BlockingMode>) -> Result<View> {
    match collapse {
        None => {
            let geometry = BlockGeometry::derive(parameters)?;
            let codec_attached = parameters.pixel.is_packed()
                || parameters.compression.is_compressed();

            let format = PixelFormat::select(&parameters.pixel, codec_attached)?;
            let layout = ModeLayout::select(parameters.blocking_mode, &geometry, format.bytes);

            Ok(View {
                geometry, layout, format,
                mode: parameters.blocking_mode,
                num_bands: parameters.num_bands as usize,
            })
        },

        Some(mode) => {
            // all interleaved bands of one pixel become one widened sample
            let factor = parameters.num_bands;
            let component_bytes = parameters.pixel.byte_width();

            let mut synthetic = parameters.clone();
            synthetic.num_bands = 1;
            synthetic.blocking_mode = BlockingMode::BandSequential;
            synthetic.pixel = PixelDescription {
                bits: parameters.pixel.bits * factor,
                actual_bits: parameters.pixel.bits * factor,
                ..parameters.pixel
            };

            let geometry = BlockGeometry::derive(&synthetic)?;
            let format = PixelFormat::collapsed(component_bytes * factor as usize, component_bytes);
            let layout = ModeLayout::select(mode, &geometry, format.bytes);

            Ok(View { geometry, layout, format, mode, num_bands: 1 })
        },
    }
}
