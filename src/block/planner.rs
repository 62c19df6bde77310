
//! Sub-window planning and the read and write drive loops.
//!
//! A plan decomposes one caller request into a grid of transfer units,
//! one per (block column, band) pair, allocates every working buffer up
//! front, and then walks the request row by row. Read plans live for one
//! call; write plans persist across sequential row calls until finalized.

use smallvec::SmallVec;

use crate::io::{Stream, seek_to};
use crate::error::{Error, Result, UnitResult};
use crate::meta::PixelType;
use crate::sample::PixelFormat;
use crate::mask::MaskTable;
use crate::meta::BlockGeometry;
use crate::downsample::DownSampler;
use crate::codec::{DecompressionControl, CompressionControl};

use super::{ModeLayout, gather_band, scatter_band};
use super::cursor::Cursor;
use super::transfer::{BlockTransfer, RowMovement};
use super::cache::{BlockCache, WriteBlock, is_all_pad, fill_with_pad};


/// Everything of the image context a plan needs to do its work,
/// borrowed for the duration of one call.
pub(crate) struct Engine<'e> {
    pub geometry: &'e BlockGeometry,
    pub layout: &'e ModeLayout,
    pub format: &'e PixelFormat,
    pub mask: &'e mut MaskTable,

    /// One pad sample in file encoding.
    pub pad_file: &'e [u8],

    /// One pad sample as the caller sees it.
    pub pad_native: &'e [u8],

    pub pixel_type: PixelType,

    /// True image extent, as opposed to the padded block extent.
    pub num_rows: usize,
    pub num_cols: usize,

    /// Bands visible to the caller.
    pub num_bands: usize,

    /// Absolute stream position of the segment (the mask section, if any).
    pub segment_base: u64,

    /// Absolute stream position of the first pixel byte.
    pub pixel_base: u64,

    /// Whether this request moves whole blocks through the caches.
    pub cached: bool,

    /// Whether all-pad blocks may be dropped from the file on write.
    pub elision_supported: bool,

    pub cache: &'e mut BlockCache,
    pub decompression: Option<&'e mut Box<dyn DecompressionControl>>,
    pub compression: Option<&'e mut Box<dyn CompressionControl>>,
}


/// The validated request region. Start coordinates are full-resolution,
/// counts are output-resolution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region {
    pub start_row: usize,
    pub start_col: usize,
    pub num_rows: usize,
    pub num_cols: usize,
    pub row_skip: usize,
    pub col_skip: usize,
}

impl Region {
    pub fn is_downsampling(&self) -> bool {
        self.row_skip != 1 || self.col_skip != 1
    }
}


/// One planned request: the unit grid, the shared cursor movement, and
/// every working buffer, allocated up front and never resized mid-request.
pub(crate) struct TransferPlan {
    region: Region,
    reading: bool,
    downsampling: bool,

    /// Row-major unit grid: `units[column * band_count + band]`.
    units: Vec<BlockTransfer>,
    band_count: usize,
    num_block_cols: usize,
    movement: RowMovement,
    bytes: usize,

    /// Diagnostic transfer count: columns x bands x requested rows.
    pub total_transfers: usize,

    /// Whether any read touched an absent or pad-marked block.
    pub pad_found: bool,

    /// Shared raw row buffers, one per block column,
    /// for the pixel-interleaved modes.
    raw_chunks: Vec<Vec<u8>>,

    /// Down-sample accumulation buffers, one per unit.
    accumulators: Vec<Vec<u8>>,

    /// Input width of each column's accumulator, in samples.
    accumulator_width: Vec<usize>,

    /// Residual columns carried between block columns, one per band.
    column_save: Vec<Vec<u8>>,

    /// Write-back block buffers for cached writes.
    write_blocks: Vec<WriteBlock>,

    /// Per-band row segment scratch for the write-path format transform.
    scratch: Vec<u8>,

    /// Prefilled pad columns appended behind the last data column.
    pad_tail: Vec<u8>,

    /// Append offset for compressed writes, relative to the pixel base.
    next_out: u64,

    /// Sequential write progress, in full-resolution rows.
    pub rows_written: usize,
}

impl TransferPlan {

    /// Bounds-checked access into the flat unit grid.
    fn unit_index(&self, column: usize, band: usize) -> usize {
        debug_assert!(column < self.num_block_cols && band < self.band_count, "unit grid bug");
        column * self.band_count + band
    }

    /// Validate the request and build the unit grid.
    pub fn plan(
        engine: &Engine<'_>, region: Region,
        requested_bands: &[usize], reading: bool,
    ) -> Result<TransferPlan> {
        let geometry = engine.geometry;
        let layout = engine.layout;
        let bytes = engine.format.bytes;

        // resolve and check the band subset
        let bands: SmallVec<[usize; 8]> = if requested_bands.is_empty() {
            (0 .. engine.num_bands).collect()
        }
        else {
            requested_bands.iter().copied().collect()
        };

        for &band in &bands {
            if band >= engine.num_bands {
                return Err(Error::invalid("band index out of range"));
            }
        }

        let minimum = bands.iter().copied().min().unwrap_or(0);
        if bands.first() != Some(&minimum) {
            return Err(Error::invalid("the first requested band must be the lowest requested band"));
        }

        // check the sub-window
        if region.num_rows == 0 || region.num_cols == 0 {
            return Err(Error::invalid("empty sub-window"));
        }

        if region.row_skip == 0 || region.col_skip == 0 {
            return Err(Error::invalid("skip factors must be at least one"));
        }

        if region.row_skip > geometry.rows_per_block || region.col_skip > geometry.cols_per_block {
            return Err(Error::invalid("skip factors must not exceed the block dimensions"));
        }

        let num_rows_fr = region.num_rows * region.row_skip;
        let num_cols_fr = region.num_cols * region.col_skip;

        // the trailing sample window may overshoot the true edge by less
        // than one window, but never the padded block extent
        let fits = |start: usize, length_fr: usize, skip: usize, true_extent: usize, padded_extent: usize| {
            start < true_extent
                && start + length_fr <= true_extent + (skip - 1)
                && start + length_fr <= padded_extent
        };

        if !fits(region.start_row, num_rows_fr, region.row_skip, engine.num_rows, geometry.actual_rows)
            || !fits(region.start_col, num_cols_fr, region.col_skip, engine.num_cols, geometry.actual_columns) {
            return Err(Error::invalid("sub-window outside the image"));
        }

        let band_count = bands.len();
        let downsampling = region.is_downsampling();

        let start_block_col = region.start_col / geometry.cols_per_block;
        let last_col_fr = (region.start_col + num_cols_fr - 1).min(geometry.actual_columns - 1);
        let end_block_col = last_col_fr / geometry.cols_per_block;
        let num_block_cols = end_block_col - start_block_col + 1;

        let block_row = region.start_row / geometry.rows_per_block;
        let row_in_block = region.start_row % geometry.rows_per_block;

        let movement = RowMovement {
            block_stride: layout.block_row_stride(),
            rows_per_block: geometry.rows_per_block,
            block_increment: layout.row_increment(),
            raw_increment: 0,
            user_increment: region.num_cols * bytes,
        };

        // writes of a partially covered last block emit pad columns and rows
        let writes_final_column = !reading
            && region.start_col + num_cols_fr >= engine.num_cols
            && geometry.actual_columns > engine.num_cols;

        let writes_final_row = !reading
            && region.start_row + num_rows_fr >= engine.num_rows
            && geometry.actual_rows > engine.num_rows;

        let pad_rows = if writes_final_row { geometry.actual_rows - engine.num_rows } else { 0 };

        // one pass per column for the geometry every band shares
        let mut units = Vec::with_capacity(num_block_cols * band_count);
        let mut user_offset = 0_usize;
        let mut carried = 0_usize;
        let mut total_dr = 0_usize;

        for column in 0 .. num_block_cols {
            let absolute_col = start_block_col + column;
            let col_block_start = absolute_col * geometry.cols_per_block;
            let col_block_end = col_block_start + geometry.cols_per_block - 1;

            let segment_start = region.start_col.max(col_block_start);
            let data_end = (region.start_col + num_cols_fr - 1)
                .min(col_block_end)
                .min(engine.num_cols - 1);

            debug_assert!(data_end >= segment_start, "column planning bug");
            let count_fr = data_end - segment_start + 1;

            // down-sample window bookkeeping, computed once per column
            // and shared by every band in it
            let windows = (carried + count_fr) / region.col_skip;
            let my_residual = (carried + count_fr) % region.col_skip;
            let count_dr = if downsampling { windows } else { count_fr };

            let residual = carried;
            carried = my_residual;
            total_dr += count_dr;

            let is_last_absolute = absolute_col + 1 == geometry.blocks_per_row;
            let pad_col_count = if writes_final_column && is_last_absolute {
                geometry.actual_columns - engine.num_cols
            } else { 0 };

            for band in 0 .. band_count {
                let source_band = bands[band];
                let shares = layout.shares_column_io();

                let do_io = if shares {
                    if reading { band == 0 } else { band + 1 == band_count }
                } else { true };

                let pad_col_bytes = if shares {
                    if do_io { layout.transfer_bytes(pad_col_count) } else { 0 }
                } else {
                    pad_col_count * bytes
                };

                units.push(BlockTransfer {
                    band_position: band,
                    source_band,
                    number: layout.block_number(source_band, block_row, absolute_col),
                    rows_until: geometry.rows_per_block - 1 - row_in_block,
                    block: Cursor::new_offset(
                        layout.block_origin(source_band, segment_start - col_block_start),
                        row_in_block * layout.row_increment(),
                    ),
                    raw: Cursor::new(0),
                    unpacked: Cursor::new(residual * bytes),
                    user: Cursor::new(user_offset * bytes),
                    count_fr,
                    count_dr,
                    read_bytes: layout.transfer_bytes(count_fr),
                    pad_col_bytes,
                    pad_rows,
                    residual,
                    my_residual,
                    cols_in_last_window: region.col_skip,
                    do_io,
                    write_block: None,
                    flushes_write_block: false,
                    unpacked_increment: 0,
                });
            }

            user_offset += count_dr;
        }

        let mut plan = TransferPlan {
            region, reading, downsampling,
            units, band_count, num_block_cols, movement, bytes,
            total_transfers: num_block_cols * band_count * region.num_rows,
            pad_found: false,
            raw_chunks: Vec::new(),
            accumulators: Vec::new(),
            accumulator_width: vec![0; num_block_cols],
            column_save: Vec::new(),
            write_blocks: Vec::new(),
            scratch: Vec::new(),
            pad_tail: Vec::new(),
            next_out: 0,
            rows_written: 0,
        };

        // a trailing window cut off by the true image edge still yields
        // one output pixel, completed with pad
        if downsampling && total_dr < region.num_cols {
            let shortfall = region.num_cols - total_dr;
            debug_assert!(shortfall == 1, "window accounting bug");

            let last_column = num_block_cols - 1;
            for band in 0 .. band_count {
                let index = plan.unit_index(last_column, band);
                let unit = &mut plan.units[index];
                unit.cols_in_last_window = unit.my_residual;
                unit.count_dr += shortfall;
                unit.my_residual = 0;
            }
        }

        plan.allocate_buffers(engine);
        Ok(plan)
    }

    /// Size every working buffer from the request geometry, up front.
    fn allocate_buffers(&mut self, engine: &Engine<'_>) {
        let bytes = self.bytes;
        let band_count = self.band_count;

        if engine.layout.shares_column_io() {
            self.raw_chunks = (0 .. self.num_block_cols)
                .map(|column| {
                    let units = &self.units[column * band_count .. (column + 1) * band_count];
                    let length = units.iter()
                        .map(|unit| unit.read_bytes + unit.pad_col_bytes)
                        .max().unwrap_or(0);

                    vec![0_u8; length]
                })
                .collect();
        }

        if self.downsampling {
            let row_skip = self.region.row_skip;
            let col_skip = self.region.col_skip;

            for column in 0 .. self.num_block_cols {
                let unit = &self.units[column * band_count];
                self.accumulator_width[column] =
                    (unit.count_dr * col_skip).max(unit.residual + unit.count_fr);
            }

            self.accumulators = (0 .. self.units.len())
                .map(|index| {
                    let width = self.accumulator_width[index / band_count];
                    vec![0_u8; row_skip * width * bytes]
                })
                .collect();

            for (index, unit) in self.units.iter_mut().enumerate() {
                unit.unpacked_increment = self.accumulator_width[index / band_count] * bytes;
            }

            self.column_save = (0 .. band_count)
                .map(|_| vec![0_u8; row_skip * col_skip * bytes])
                .collect();
        }

        if !self.reading {
            self.scratch = vec![0_u8; engine.geometry.cols_per_block * bytes];

            let pad_tail_length = self.units.iter()
                .map(|unit| unit.pad_col_bytes)
                .max().unwrap_or(0);

            self.pad_tail = vec![0_u8; pad_tail_length];
            fill_with_pad(&mut self.pad_tail, engine.pad_file);

            if engine.cached {
                // band-sequential images write one block per band,
                // everything else shares the block across its bands
                let per_unit = matches!(engine.layout, ModeLayout::BandSequential(_))
                    && band_count > 1;

                if per_unit {
                    self.write_blocks = self.units.iter()
                        .map(|unit| WriteBlock::new(unit.number, engine.geometry.block_size_bytes))
                        .collect();

                    for (index, unit) in self.units.iter_mut().enumerate() {
                        unit.write_block = Some(index);
                        unit.flushes_write_block = true;
                    }
                }
                else {
                    self.write_blocks = (0 .. self.num_block_cols)
                        .map(|column| {
                            let unit = &self.units[column * band_count];
                            WriteBlock::new(unit.number, engine.geometry.block_size_bytes)
                        })
                        .collect();

                    for (index, unit) in self.units.iter_mut().enumerate() {
                        unit.write_block = Some(index / band_count);
                        unit.flushes_write_block = (index % band_count) + 1 == band_count;
                    }
                }
            }
        }
    }


    // ------------------------------------------------------- read path

    /// Drive a full read request. Returns whether pad pixels may have
    /// been part of the result.
    pub fn read(
        &mut self, engine: &mut Engine<'_>, stream: &mut dyn Stream,
        sampler: Option<&mut dyn DownSampler>,
        user: &mut [&mut [u8]],
    ) -> Result<bool> {
        debug_assert!(self.total_transfers > 0, "transfer accounting bug");
        self.check_user_buffers(user)?;

        if self.downsampling {
            let sampler = match sampler {
                Some(sampler) => sampler,
                None => return Err(Error::invalid("down-sampling requires a down-sampler")),
            };

            if sampler.row_skip() != self.region.row_skip
                || sampler.col_skip() != self.region.col_skip {
                return Err(Error::invalid("down-sampler window does not match the requested skip factors"));
            }

            self.read_downsampled(engine, stream, sampler, user)?;
        }
        else {
            for _ in 0 .. self.region.num_rows {
                for column in 0 .. self.num_block_cols {
                    self.read_column_row(engine, stream, column, user, false)?;
                }

                for unit in &mut self.units {
                    unit.next_row(&self.movement, true);
                }
            }
        }

        Ok(self.pad_found)
    }

    fn check_user_buffers(&self, user: &[&mut [u8]]) -> UnitResult {
        if user.len() != self.band_count {
            return Err(Error::configuration("one buffer per requested band is required"));
        }

        let required = self.region.num_rows * self.region.num_cols * self.bytes;
        if user.iter().any(|buffer| buffer.len() < required) {
            return Err(Error::configuration("caller buffer too small for the requested sub-window"));
        }

        Ok(())
    }

    fn read_downsampled(
        &mut self, engine: &mut Engine<'_>, stream: &mut dyn Stream,
        sampler: &mut dyn DownSampler,
        user: &mut [&mut [u8]],
    ) -> UnitResult {
        let row_skip = self.region.row_skip;
        let available_fr_rows = engine.num_rows - self.region.start_row;

        for output_row in 0 .. self.region.num_rows {
            let mut rows_in_set = 0;

            for sub_row in 0 .. row_skip {
                let fr_index = output_row * row_skip + sub_row;

                if fr_index < available_fr_rows {
                    for column in 0 .. self.num_block_cols {
                        self.read_column_row(engine, stream, column, user, true)?;
                    }

                    rows_in_set += 1;
                }
                else {
                    // neighborhood rows past the true edge become pad
                    self.fill_pad_accumulation_row(engine);
                }

                for unit in &mut self.units {
                    unit.next_row(&self.movement, false);
                }
            }

            let final_output_row = output_row + 1 == self.region.num_rows;
            for column in 0 .. self.num_block_cols {
                self.invoke_sampler(
                    engine, sampler, column, user,
                    rows_in_set, final_output_row,
                )?;
            }

            for unit in &mut self.units {
                unit.user.advance(self.movement.user_increment);
                unit.unpacked.reset();
            }
        }

        Ok(())
    }

    /// Move one full-resolution row of one block column from the stream
    /// (or the block cache) into its target, converting samples in place.
    fn read_column_row(
        &mut self, engine: &mut Engine<'_>, stream: &mut dyn Stream,
        column: usize, user: &mut [&mut [u8]], accumulate: bool,
    ) -> UnitResult {
        let first_index = self.unit_index(column, 0);
        let band_count = self.band_count;
        let bytes = self.bytes;
        let stride = engine.layout.data().bands;
        let shares = engine.layout.shares_column_io();

        for band in 0 .. band_count {
            let index = first_index + band;

            let (number, block_mark, count_fr, read_bytes, do_io, source_band, band_position, unpacked_mark, user_mark) = {
                let unit = &self.units[index];
                (unit.number, unit.block.mark, unit.count_fr, unit.read_bytes,
                 unit.do_io, unit.source_band, unit.band_position,
                 unit.unpacked.mark, unit.user.mark)
            };

            if engine.mask.block_is_absent(number) || engine.mask.block_has_pad(number) {
                self.pad_found = true;
            }

            if shares {
                // one physical transfer per column, into the shared chunk
                if do_io {
                    let chunk = &mut self.raw_chunks[column][.. read_bytes];
                    load_segment(engine, stream, number, block_mark, chunk)?;
                }

                let chunk = &self.raw_chunks[column];
                let target = if accumulate {
                    &mut self.accumulators[index][unpacked_mark .. unpacked_mark + count_fr * bytes]
                } else {
                    &mut user[band_position][user_mark .. user_mark + count_fr * bytes]
                };

                gather_band(chunk, target, bytes, stride, source_band, count_fr);
                engine.format.unformat_in_place(target);
            }
            else {
                let target = if accumulate {
                    &mut self.accumulators[index][unpacked_mark .. unpacked_mark + count_fr * bytes]
                } else {
                    &mut user[band_position][user_mark .. user_mark + count_fr * bytes]
                };

                load_segment(engine, stream, number, block_mark, target)?;
                engine.format.unformat_in_place(target);
            }
        }

        Ok(())
    }

    fn fill_pad_accumulation_row(&mut self, engine: &Engine<'_>) {
        let bytes = self.bytes;

        for (index, unit) in self.units.iter().enumerate() {
            let target = &mut self.accumulators[index]
                [unit.unpacked.mark .. unit.unpacked.mark + unit.count_fr * bytes];

            fill_with_pad(target, engine.pad_native);
        }
    }

    /// Complete one row of sample windows for one block column and hand
    /// it to the down-sampler, writing output pixels straight into the
    /// caller's buffers.
    fn invoke_sampler(
        &mut self, engine: &mut Engine<'_>, sampler: &mut dyn DownSampler,
        column: usize, user: &mut [&mut [u8]],
        rows_in_set: usize, final_output_row: bool,
    ) -> UnitResult {
        let bytes = self.bytes;
        let row_skip = self.region.row_skip;
        let col_skip = self.region.col_skip;
        let width = self.accumulator_width[column];
        let first_index = self.unit_index(column, 0);

        let (count_dr, residual, my_residual, count_fr, cols_in_last, user_mark) = {
            let unit = &self.units[first_index];
            (unit.count_dr, unit.residual, unit.my_residual,
             unit.count_fr, unit.cols_in_last_window, unit.user.mark)
        };

        let data_cols = residual + count_fr;

        for band in 0 .. self.band_count {
            let accumulator = &mut self.accumulators[first_index + band];

            // splice in the residual carried over from the previous column
            if residual > 0 {
                let save = &self.column_save[band];
                for row in 0 .. row_skip {
                    accumulator[row * width * bytes ..][.. residual * bytes]
                        .copy_from_slice(&save[row * col_skip * bytes ..][.. residual * bytes]);
                }
            }

            // pad out a trailing window cut short by the true image edge
            if data_cols < width {
                for row in 0 .. row_skip {
                    let tail = &mut accumulator[(row * width + data_cols) * bytes .. (row + 1) * width * bytes];
                    fill_with_pad(tail, engine.pad_native);
                }
            }

            // refresh the carry for the next block column
            if my_residual > 0 {
                let save = &mut self.column_save[band];
                for row in 0 .. row_skip {
                    save[row * col_skip * bytes ..][.. my_residual * bytes].copy_from_slice(
                        &accumulator[(row * width + data_cols - my_residual) * bytes ..][.. my_residual * bytes]
                    );
                }
            }
        }

        let inputs: SmallVec<[&[u8]; 8]> = (0 .. self.band_count)
            .map(|band| self.accumulators[first_index + band].as_slice())
            .collect();

        let mut outputs: SmallVec<[&mut [u8]; 8]> = user.iter_mut()
            .map(|band| &mut band[user_mark ..])
            .collect();

        let rows_in_last_window = if final_output_row { rows_in_set.max(1) } else { row_skip };
        let cols_in_last_window = if count_dr * col_skip > data_cols { cols_in_last } else { col_skip };

        sampler.apply(
            &inputs, &mut outputs,
            1, count_dr,
            width, self.region.num_cols,
            engine.pixel_type, bytes,
            rows_in_last_window, cols_in_last_window,
        )
    }


    // ------------------------------------------------------ write path

    /// Append full-width rows for all bands. `data` holds `num_rows` rows
    /// per band at full resolution.
    pub fn write_rows(
        &mut self, engine: &mut Engine<'_>, stream: &mut dyn Stream,
        data: &[&[u8]], num_rows: usize,
    ) -> UnitResult {
        debug_assert!(!self.reading, "write plan bug");

        if self.rows_written + num_rows > self.region.num_rows {
            return Err(Error::invalid("more rows than the image holds"));
        }

        if data.len() != self.band_count {
            return Err(Error::configuration("one buffer per band is required"));
        }

        let row_bytes = self.region.num_cols * self.bytes;
        if data.iter().any(|band| band.len() < num_rows * row_bytes) {
            return Err(Error::configuration("caller buffer too small for the row count"));
        }

        // each call brings fresh buffers, so the user cursors restart
        for unit in &mut self.units {
            unit.user.reset();
        }

        for _ in 0 .. num_rows {
            for column in 0 .. self.num_block_cols {
                self.write_column_row(engine, stream, column, Some(data))?;
            }

            self.complete_row(engine, stream)?;
            self.rows_written += 1;
        }

        Ok(())
    }

    /// Flush completed blocks, then advance every unit one row.
    fn complete_row(&mut self, engine: &mut Engine<'_>, stream: &mut dyn Stream) -> UnitResult {
        if engine.cached {
            for index in 0 .. self.units.len() {
                let (rows_until, flushes, write_block) = {
                    let unit = &self.units[index];
                    (unit.rows_until, unit.flushes_write_block, unit.write_block)
                };

                if rows_until == 0 && flushes {
                    if let Some(buffer_index) = write_block {
                        self.flush_write_block(engine, stream, buffer_index)?;
                    }
                }
            }
        }

        for unit in &mut self.units {
            unit.next_row(&self.movement, true);
        }

        // re-arm flushed buffers for the blocks one block row down
        if engine.cached {
            for index in 0 .. self.units.len() {
                let (rows_until, flushes, write_block, number) = {
                    let unit = &self.units[index];
                    (unit.rows_until, unit.flushes_write_block, unit.write_block, unit.number)
                };

                if flushes && rows_until + 1 == self.movement.rows_per_block {
                    if let Some(buffer_index) = write_block {
                        self.write_blocks[buffer_index].reset(number);
                    }
                }
            }
        }

        Ok(())
    }

    /// Move one full-resolution row of one block column from the caller's
    /// buffers into the stream or the write-back block buffer.
    /// Passing no data writes a row of pure pad pixels instead.
    fn write_column_row(
        &mut self, engine: &mut Engine<'_>, stream: &mut dyn Stream,
        column: usize, data: Option<&[&[u8]]>,
    ) -> UnitResult {
        let first_index = self.unit_index(column, 0);
        let band_count = self.band_count;
        let bytes = self.bytes;
        let stride = engine.layout.data().bands;
        let shares = engine.layout.shares_column_io();

        for band in 0 .. band_count {
            let index = first_index + band;

            let (number, block_mark, count_fr, read_bytes, pad_col_bytes, do_io, source_band, band_position, user_mark, write_block) = {
                let unit = &self.units[index];
                (unit.number, unit.block.mark, unit.count_fr, unit.read_bytes,
                 unit.pad_col_bytes, unit.do_io, unit.source_band,
                 unit.band_position, unit.user.mark, unit.write_block)
            };

            let segment_bytes = count_fr * bytes;

            // stage the band's row segment in file encoding
            let scratch = &mut self.scratch[.. segment_bytes];
            match data {
                Some(data) => {
                    scratch.copy_from_slice(&data[band_position][user_mark .. user_mark + segment_bytes]);
                    engine.format.format_in_place(scratch);
                },

                None => fill_with_pad(scratch, engine.pad_file),
            }

            if shares {
                let chunk = &mut self.raw_chunks[column];
                scatter_band(scratch, chunk, bytes, stride, source_band, count_fr);

                if !do_io {
                    continue;
                }

                // the last band completes the pixel groups; emit them,
                // with the trailing pad columns appended
                let chunk_length = read_bytes + pad_col_bytes;
                let chunk = &mut self.raw_chunks[column][.. chunk_length];

                if pad_col_bytes > 0 {
                    let (_, tail) = chunk.split_at_mut(read_bytes);
                    fill_with_pad(tail, engine.pad_file);
                }

                emit_segment(engine, stream, &mut self.write_blocks, write_block, number, block_mark, chunk)?;

                if pad_col_bytes > 0 || data.is_none() {
                    mark_block_padded(engine, &mut self.write_blocks, write_block, number);
                }
            }
            else {
                emit_segment(engine, stream, &mut self.write_blocks, write_block, number, block_mark, scratch)?;

                if pad_col_bytes > 0 {
                    emit_segment(
                        engine, stream, &mut self.write_blocks, write_block,
                        number, block_mark + segment_bytes,
                        &self.pad_tail[.. pad_col_bytes],
                    )?;
                }

                if pad_col_bytes > 0 || data.is_none() {
                    mark_block_padded(engine, &mut self.write_blocks, write_block, number);
                }
            }
        }

        Ok(())
    }

    /// Encode and emit one completed write-back block, or drop it from
    /// the file entirely if it holds nothing but pad pixels.
    fn flush_write_block(
        &mut self, engine: &mut Engine<'_>, stream: &mut dyn Stream,
        buffer_index: usize,
    ) -> UnitResult {
        let block = &self.write_blocks[buffer_index];
        let number = block.number;
        let has_pad = block.has_pad;
        let all_pad = engine.mask.on_disk && is_all_pad(&block.buffer, engine.pad_file);

        if let Some(control) = engine.compression.as_mut() {
            if all_pad && engine.elision_supported {
                // compressed offsets are assigned as blocks are emitted,
                // so dropping one shifts nothing
                engine.mask.elide_block(number, 0);
                control.write_block(stream, &[], true, true)?;
                return Ok(());
            }

            engine.mask.block_offsets[number] = self.next_out;
            if has_pad {
                engine.mask.mark_padded(number);
            }

            seek_to(stream, engine.pixel_base + self.next_out)?;
            let written = control.write_block(stream, &self.write_blocks[buffer_index].buffer, has_pad, false)?;
            self.next_out += written;

            // keep the sentinel pointing one block past the last real one
            let sentinel = engine.mask.block_offsets.len() - 1;
            engine.mask.block_offsets[sentinel] = self.next_out;
            return Ok(());
        }

        if all_pad && engine.elision_supported {
            engine.mask.elide_block(number, engine.geometry.disk_block_length as u64);
            return Ok(());
        }

        if has_pad && engine.mask.on_disk {
            engine.mask.mark_padded(number);
        }

        seek_to(stream, engine.pixel_base + engine.mask.block_offsets[number])?;
        stream.write_all(&self.write_blocks[buffer_index].buffer)?;
        Ok(())
    }

    /// Emit the trailing pad rows, flush what remains, finish the codec,
    /// and write the corrected masks back to the stream.
    pub fn finish(&mut self, engine: &mut Engine<'_>, stream: &mut dyn Stream) -> UnitResult {
        debug_assert!(!self.reading, "write plan bug");

        if self.rows_written < self.region.num_rows {
            return Err(Error::invalid("image is missing rows"));
        }

        let pad_rows = self.units.first().map(|unit| unit.pad_rows).unwrap_or(0);
        for _ in 0 .. pad_rows {
            for column in 0 .. self.num_block_cols {
                self.write_column_row(engine, stream, column, None)?;
            }

            self.complete_row(engine, stream)?;
        }

        if let Some(control) = engine.compression.as_mut() {
            control.end(stream)?;
        }

        if engine.mask.on_disk {
            engine.mask.write_at(stream, engine.segment_base)?;
        }

        Ok(())
    }
}


/// Load one row segment from the stream or the block cache into the
/// target, or fill it with pad where the block was omitted from the file.
fn load_segment(
    engine: &mut Engine<'_>, stream: &mut dyn Stream,
    number: usize, block_mark: usize, target: &mut [u8],
) -> UnitResult {
    if engine.mask.block_is_absent(number) {
        fill_with_pad(target, engine.pad_file);
        return Ok(());
    }

    if engine.cached {
        let offset = engine.pixel_base + engine.mask.block_offsets[number];
        let disk_length = engine.geometry.disk_block_length;

        let Engine { cache, decompression, .. } = engine;
        let block = cache.fetch(number, move || match decompression.as_mut() {
            Some(control) => control.read_block(stream, number),

            None => {
                let mut bytes = vec![0_u8; disk_length];
                seek_to(stream, offset)?;
                stream.read_exact(&mut bytes)?;
                Ok(bytes)
            },
        })?;

        let length = target.len();
        target.copy_from_slice(&block[block_mark .. block_mark + length]);
        Ok(())
    }
    else {
        seek_to(stream, engine.pixel_base + engine.mask.block_offsets[number] + block_mark as u64)?;
        stream.read_exact(target)?;
        Ok(())
    }
}

/// Write one row segment to its final position: straight into the stream
/// for direct writes, or into the write-back block buffer for cached ones.
fn emit_segment(
    engine: &mut Engine<'_>, stream: &mut dyn Stream,
    write_blocks: &mut [WriteBlock], write_block: Option<usize>,
    number: usize, block_mark: usize, segment: &[u8],
) -> UnitResult {
    if engine.cached {
        let buffer_index = match write_block {
            Some(index) => index,
            None => return Err(Error::configuration("cached write without a block buffer")),
        };

        let block = &mut write_blocks[buffer_index];
        debug_assert_eq!(block.number, number, "write block assignment bug");

        block.buffer[block_mark .. block_mark + segment.len()].copy_from_slice(segment);
        Ok(())
    }
    else {
        seek_to(stream, engine.pixel_base + engine.mask.block_offsets[number] + block_mark as u64)?;
        stream.write_all(segment)?;
        Ok(())
    }
}

/// Remember that pad pixels went into the block.
fn mark_block_padded(
    engine: &mut Engine<'_>,
    write_blocks: &mut [WriteBlock], write_block: Option<usize>,
    number: usize,
) {
    if engine.cached {
        if let Some(index) = write_block {
            write_blocks[index].has_pad = true;
        }
    }
    else if engine.mask.on_disk {
        engine.mask.mark_padded(number);
    }
}
