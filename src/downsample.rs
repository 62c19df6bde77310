
//! The down-sampler invocation contract.
//!
//! The engine accumulates full-resolution rows into per-band neighborhood
//! buffers and hands complete rows of sample windows to a down-sampler,
//! which reduces each `row_skip` by `col_skip` window to a single output
//! pixel directly inside the caller's buffer. The algorithms themselves
//! are external; this crate only ships the trivial pixel-skip reducer.

use crate::error::UnitResult;
use crate::meta::PixelType;


/// Reduces rows of sample windows to single pixels.
///
/// For every band, `inputs[band]` holds `window_rows * row_skip` rows of
/// `input_cols` full-resolution samples, row-major, and `outputs[band]`
/// starts at the first output pixel and is laid out with `output_cols`
/// samples per row. A trailing window shorter than the full neighborhood
/// is padded on input; `rows_in_last_window` and `cols_in_last_window`
/// tell the sampler how much of the final window is real data.
pub trait DownSampler {

    /// Vertical window extent.
    fn row_skip(&self) -> usize;

    /// Horizontal window extent.
    fn col_skip(&self) -> usize;

    /// Reduce one row of sample windows per band.
    #[allow(clippy::too_many_arguments)]
    fn apply(
        &mut self,
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
        window_rows: usize,
        window_cols: usize,
        input_cols: usize,
        output_cols: usize,
        pixel: PixelType,
        pixel_bytes: usize,
        rows_in_last_window: usize,
        cols_in_last_window: usize,
    ) -> UnitResult;
}


/// Keeps the top-left pixel of every window and discards the rest.
/// Works on any pixel type since no value is ever interpreted.
#[derive(Debug, Clone, Copy)]
pub struct PixelSkip {
    row_skip: usize,
    col_skip: usize,
}

impl PixelSkip {
    pub fn new(row_skip: usize, col_skip: usize) -> Self {
        PixelSkip { row_skip, col_skip }
    }
}

impl DownSampler for PixelSkip {

    fn row_skip(&self) -> usize { self.row_skip }
    fn col_skip(&self) -> usize { self.col_skip }

    fn apply(
        &mut self,
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
        window_rows: usize,
        window_cols: usize,
        input_cols: usize,
        output_cols: usize,
        _pixel: PixelType,
        pixel_bytes: usize,
        _rows_in_last_window: usize,
        _cols_in_last_window: usize,
    ) -> UnitResult {
        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            for window_row in 0 .. window_rows {
                let input_row = window_row * self.row_skip;

                for window_col in 0 .. window_cols {
                    let source = (input_row * input_cols + window_col * self.col_skip) * pixel_bytes;
                    let target = (window_row * output_cols + window_col) * pixel_bytes;

                    output[target ..][.. pixel_bytes]
                        .copy_from_slice(&input[source ..][.. pixel_bytes]);
                }
            }
        }

        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pixel_skip_keeps_top_left(){
        let input: Vec<u8> = (0 .. 16).collect(); // 4x4, one byte per pixel
        let mut output = [0_u8; 4];

        let mut sampler = PixelSkip::new(2, 2);
        {
            let mut outputs: Vec<&mut [u8]> = vec![&mut output];
            sampler.apply(
                &[&input], &mut outputs,
                2, 2, 4, 2,
                PixelType::Integer, 1, 2, 2,
            ).unwrap();
        }

        assert_eq!(output, [0, 2, 8, 10]);
    }
}
