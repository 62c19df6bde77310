
extern crate rasterseg;

use std::io::Cursor;

use rasterseg::prelude::*;
use rasterseg::error::UnitResult;
use rasterseg::meta::PixelType as Pixel;


/// Averages every window of single-byte samples, honoring the valid
/// extent of the trailing window.
struct Averaging {
    row_skip: usize,
    col_skip: usize,
}

impl DownSampler for Averaging {

    fn row_skip(&self) -> usize { self.row_skip }
    fn col_skip(&self) -> usize { self.col_skip }

    fn apply(
        &mut self,
        inputs: &[&[u8]], outputs: &mut [&mut [u8]],
        window_rows: usize, window_cols: usize,
        input_cols: usize, output_cols: usize,
        _pixel: Pixel, pixel_bytes: usize,
        rows_in_last_window: usize, cols_in_last_window: usize,
    ) -> UnitResult {
        assert_eq!(pixel_bytes, 1, "this stub only averages bytes");

        for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
            for window_row in 0 .. window_rows {
                for window_col in 0 .. window_cols {
                    let rows = if window_row + 1 == window_rows { rows_in_last_window } else { self.row_skip };
                    let cols = if window_col + 1 == window_cols { cols_in_last_window } else { self.col_skip };

                    let mut sum = 0_u32;
                    for row in 0 .. rows {
                        for col in 0 .. cols {
                            let at = (window_row * self.row_skip + row) * input_cols
                                + window_col * self.col_skip + col;
                            sum += input[at] as u32;
                        }
                    }

                    output[window_row * output_cols + window_col] = (sum / (rows * cols) as u32) as u8;
                }
            }
        }

        Ok(())
    }
}


fn write_single_band(
    parameters: &ImageParameters, source: &[u8], rows: usize,
) -> Cursor<Vec<u8>> {
    let mut stream = Cursor::new(Vec::new());
    let mut writer = ImageIo::new(parameters.clone(), 0, 0, None, None).unwrap();

    writer.write_sequential(&mut stream).unwrap();
    writer.write_rows(&mut stream, &[source], rows).unwrap();
    writer.write_done(&mut stream).unwrap();
    stream
}

fn byte_image(rows: u32, cols: u32, block_rows: u32, block_cols: u32) -> ImageParameters {
    ImageParameters::new(
        rows, cols, 1, block_rows, block_cols,
        BlockingMode::ByBlock,
        CompressionKind::Uncompressed,
        PixelDescription::new(PixelType::Integer, 8),
    )
}


/// An 8x8 single-block image read with skip 2/2 yields a 4x4 result whose
/// first pixel averages the top-left 2x2 neighborhood.
#[test]
fn averaging_reduces_neighborhoods() {
    let parameters = byte_image(8, 8, 8, 8);
    let source: Vec<u8> = (0 .. 64).map(|index| (index * 2) as u8).collect();
    let mut stream = write_single_band(&parameters, &source, 8);

    let mut reader = ImageIo::new(parameters, 0, 64, None, None).unwrap();
    let mut sampler = Averaging { row_skip: 2, col_skip: 2 };

    let mut pixels = vec![0_u8; 16];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        let window = SubWindow::new(0, 0, 4, 4).with_skip(2, 2);
        reader.read_sub_window(&mut stream, &window, Some(&mut sampler), &mut buffers).unwrap();
    }

    let average = |a: usize, b: usize, c: usize, d: usize|
        ((source[a] as u32 + source[b] as u32 + source[c] as u32 + source[d] as u32) / 4) as u8;

    assert_eq!(pixels[0], average(0, 1, 8, 9));
    assert_eq!(pixels[1], average(2, 3, 10, 11));
    assert_eq!(pixels[5], average(18, 19, 26, 27));
    assert_eq!(pixels[15], average(54, 55, 62, 63));
}

/// Skip factors of one produce bit-identical pixels to a plain read.
#[test]
fn unit_skip_is_the_identity() {
    let parameters = byte_image(12, 12, 4, 4);
    let source: Vec<u8> = (0 .. 144).map(|index| (index * 5 + 1) as u8).collect();
    let mut stream = write_single_band(&parameters, &source, 12);

    let mut reader = ImageIo::new(parameters, 0, 144, None, None).unwrap();

    let mut plain = vec![0_u8; 6 * 7];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut plain];
        let window = SubWindow::new(3, 2, 6, 7);
        reader.read_sub_window(&mut stream, &window, None, &mut buffers).unwrap();
    }

    let mut skipped = vec![0_u8; 6 * 7];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut skipped];
        let window = SubWindow::new(3, 2, 6, 7).with_skip(1, 1);
        reader.read_sub_window(&mut stream, &window, None, &mut buffers).unwrap();
    }

    assert_eq!(plain, skipped);
}

/// Sample windows that straddle a block-column boundary are re-assembled
/// from the residual carried between columns.
#[test]
fn windows_straddling_block_columns() {
    let parameters = byte_image(6, 16, 8, 8);
    let source: Vec<u8> = (0 .. 6 * 16).map(|index| {
        let row = index / 16;
        let col = index % 16;
        (row * 16 + col) as u8
    }).collect();

    let mut stream = write_single_band(&parameters, &source, 6);

    let mut reader = ImageIo::new(parameters, 0, 2 * 64, None, None).unwrap();
    let mut sampler = PixelSkip::new(3, 3);

    // 15 full-resolution columns in windows of 3: the second window of
    // the second output row spans columns 6, 7 | 8 across the boundary
    let mut pixels = vec![0_u8; 2 * 5];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        let window = SubWindow::new(0, 0, 2, 5).with_skip(3, 3);
        reader.read_sub_window(&mut stream, &window, Some(&mut sampler), &mut buffers).unwrap();
    }

    for output_row in 0 .. 2 {
        for output_col in 0 .. 5 {
            let expected = source[(output_row * 3) * 16 + output_col * 3];
            assert_eq!(pixels[output_row * 5 + output_col], expected,
                "output ({}, {})", output_row, output_col);
        }
    }
}

/// A trailing window extending past the true image edge is completed with
/// pad pixels and still yields its output pixel.
#[test]
fn trailing_partial_window_is_padded() {
    let parameters = byte_image(4, 10, 4, 16);
    let source: Vec<u8> = (0 .. 40).map(|index| (100 + index) as u8).collect();
    let mut stream = write_single_band(&parameters, &source, 4);

    let mut reader = ImageIo::new(parameters, 0, 4 * 16, None, None).unwrap();
    reader.set_pad_pixel(&[0]).unwrap();
    let mut sampler = Averaging { row_skip: 1, col_skip: 4 };

    // 10 columns in windows of 4: the third window holds columns 8, 9
    // plus two pad columns, averaged over its two valid columns only
    let mut pixels = vec![0_u8; 4 * 3];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        let window = SubWindow::new(0, 0, 4, 3).with_skip(1, 4);
        reader.read_sub_window(&mut stream, &window, Some(&mut sampler), &mut buffers).unwrap();
    }

    for row in 0 .. 4 {
        let base = row * 10;
        let full = |start: usize| ((source[base + start] as u32
            + source[base + start + 1] as u32
            + source[base + start + 2] as u32
            + source[base + start + 3] as u32) / 4) as u8;

        assert_eq!(pixels[row * 3], full(0));
        assert_eq!(pixels[row * 3 + 1], full(4));

        let partial = ((source[base + 8] as u32 + source[base + 9] as u32) / 2) as u8;
        assert_eq!(pixels[row * 3 + 2], partial);
    }
}

/// Down-sampling without a sampler is a validation error;
/// a mismatched sampler window is too.
#[test]
fn sampler_validation() {
    let parameters = byte_image(8, 8, 8, 8);
    let source = vec![1_u8; 64];
    let mut stream = write_single_band(&parameters, &source, 8);

    let mut reader = ImageIo::new(parameters, 0, 64, None, None).unwrap();
    let mut pixels = vec![0_u8; 16];

    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        let window = SubWindow::new(0, 0, 4, 4).with_skip(2, 2);
        assert!(reader.read_sub_window(&mut stream, &window, None, &mut buffers).is_err());
    }

    {
        let mut sampler = PixelSkip::new(3, 3);
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        let window = SubWindow::new(0, 0, 4, 4).with_skip(2, 2);
        assert!(reader.read_sub_window(&mut stream, &window, Some(&mut sampler), &mut buffers).is_err());
    }
}
