
extern crate rasterseg;

use std::io::Cursor;

use rasterseg::prelude::*;


fn parameters(
    rows: u32, cols: u32, bands: u32, block_rows: u32, block_cols: u32,
    mode: BlockingMode, compression: CompressionKind, pixel: PixelDescription,
) -> ImageParameters {
    ImageParameters::new(rows, cols, bands, block_rows, block_cols, mode, compression, pixel)
}

fn band_pattern(band: usize, length: usize) -> Vec<u8> {
    (0 .. length).map(|index| (index * 7 + band * 31 + 3) as u8).collect()
}


/// A 4x4, single-band, single-block, band-sequential, uncompressed 8 bit
/// image: writing and reading the full image returns the exact bytes.
#[test]
fn single_block_byte_image_round_trips() {
    let parameters = parameters(
        4, 4, 1, 4, 4,
        BlockingMode::BandSequential,
        CompressionKind::Uncompressed,
        PixelDescription::new(PixelType::Integer, 8),
    );

    let source: Vec<u8> = (0 .. 16).collect();
    let mut stream = Cursor::new(Vec::new());

    let mut writer = ImageIo::new(parameters.clone(), 0, 0, None, None).unwrap();
    writer.write_sequential(&mut stream).unwrap();
    writer.write_rows(&mut stream, &[&source], 4).unwrap();
    writer.write_done(&mut stream).unwrap();

    assert_eq!(stream.get_ref().len(), 16);
    assert_eq!(stream.get_ref().as_slice(), source.as_slice());

    let mut reader = ImageIo::new(parameters, 0, 16, None, None).unwrap();
    let mut pixels = vec![0_u8; 16];

    let window = SubWindow::new(0, 0, 4, 4);
    let padded = {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        reader.read_sub_window(&mut stream, &window, None, &mut buffers).unwrap()
    };

    assert!(!padded);
    assert_eq!(pixels, source);
}

#[test]
fn multi_block_image_round_trips_with_sub_windows() {
    let parameters = parameters(
        20, 24, 1, 8, 8,
        BlockingMode::ByBlock,
        CompressionKind::Uncompressed,
        PixelDescription::new(PixelType::Integer, 8),
    );

    let source = band_pattern(0, 20 * 24);
    let mut stream = Cursor::new(Vec::new());

    let mut writer = ImageIo::new(parameters.clone(), 0, 0, None, None).unwrap();
    writer.write_sequential(&mut stream).unwrap();
    writer.write_rows(&mut stream, &[&source], 20).unwrap();
    writer.write_done(&mut stream).unwrap();

    // 3 x 3 blocks of 64 pixels each, pad included
    assert_eq!(stream.get_ref().len(), 9 * 64);

    let mut reader = ImageIo::new(parameters, 0, 9 * 64, None, None).unwrap();

    // the full image
    let mut pixels = vec![0_u8; 20 * 24];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        reader.read_sub_window(&mut stream, &SubWindow::new(0, 0, 20, 24), None, &mut buffers).unwrap();
    }
    assert_eq!(pixels, source);

    // a sub-window crossing block boundaries
    let mut pixels = vec![0_u8; 10 * 13];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        reader.read_sub_window(&mut stream, &SubWindow::new(5, 6, 10, 13), None, &mut buffers).unwrap();
    }

    for row in 0 .. 10 {
        for col in 0 .. 13 {
            assert_eq!(pixels[row * 13 + col], source[(row + 5) * 24 + (col + 6)]);
        }
    }
}

#[test]
fn sixteen_bit_samples_swap_and_round_trip() {
    let parameters = parameters(
        8, 8, 1, 8, 8,
        BlockingMode::ByBlock,
        CompressionKind::Uncompressed,
        PixelDescription::new(PixelType::Integer, 16),
    );

    let values: Vec<u16> = (0 .. 64).map(|index| 1000 + index * 77).collect();
    let source: Vec<u8> = values.iter().flat_map(|value| value.to_ne_bytes()).collect();

    let mut stream = Cursor::new(Vec::new());
    let mut writer = ImageIo::new(parameters.clone(), 0, 0, None, None).unwrap();
    writer.write_sequential(&mut stream).unwrap();
    writer.write_rows(&mut stream, &[&source], 8).unwrap();
    writer.write_done(&mut stream).unwrap();

    // the file itself is big-endian
    let first = u16::from_be_bytes([stream.get_ref()[0], stream.get_ref()[1]]);
    assert_eq!(first, 1000);

    let mut reader = ImageIo::new(parameters, 0, 128, None, None).unwrap();
    let mut pixels = vec![0_u8; 128];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        reader.read_sub_window(&mut stream, &SubWindow::new(0, 0, 8, 8), None, &mut buffers).unwrap();
    }

    assert_eq!(pixels, source);
}

/// A left-justified 12 bit sample in a 16 bit field: the round trip is
/// exact for the caller, and the raw field keeps its low bits zero.
#[test]
fn left_justified_samples_round_trip_through_the_file() {
    let parameters = parameters(
        4, 4, 1, 4, 4,
        BlockingMode::ByBlock,
        CompressionKind::Uncompressed,
        PixelDescription {
            kind: PixelType::Integer,
            bits: 16, actual_bits: 12,
            justification: Justification::Left,
        },
    );

    let values: Vec<u16> = (0 .. 16).map(|index| (index * 273) % 4096).collect();
    let source: Vec<u8> = values.iter().flat_map(|value| value.to_ne_bytes()).collect();

    let mut stream = Cursor::new(Vec::new());
    let mut writer = ImageIo::new(parameters.clone(), 0, 0, None, None).unwrap();
    writer.write_sequential(&mut stream).unwrap();
    writer.write_rows(&mut stream, &[&source], 4).unwrap();
    writer.write_done(&mut stream).unwrap();

    // every stored field is left-justified with a zero low nibble
    for field in stream.get_ref().chunks(2) {
        let raw = u16::from_be_bytes([field[0], field[1]]);
        assert_eq!(raw & 0x000f, 0);
    }

    let mut reader = ImageIo::new(parameters, 0, 32, None, None).unwrap();
    let mut pixels = vec![0_u8; 32];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        reader.read_sub_window(&mut stream, &SubWindow::new(0, 0, 4, 4), None, &mut buffers).unwrap();
    }

    assert_eq!(pixels, source);
}

#[test]
fn partial_blocks_are_padded_and_recovered() {
    let parameters = parameters(
        5, 5, 1, 4, 4,
        BlockingMode::ByBlock,
        CompressionKind::Uncompressed,
        PixelDescription::new(PixelType::Integer, 8),
    );

    let source = band_pattern(0, 25);
    let mut stream = Cursor::new(Vec::new());

    let mut writer = ImageIo::new(parameters.clone(), 0, 0, None, None).unwrap();
    writer.set_pad_pixel(&[0xee]).unwrap();
    writer.write_sequential(&mut stream).unwrap();
    writer.write_rows(&mut stream, &[&source], 5).unwrap();
    writer.write_done(&mut stream).unwrap();

    // four 4x4 blocks, pad included
    let bytes = stream.get_ref();
    assert_eq!(bytes.len(), 4 * 16);

    // the columns beyond the image are pad in the second block
    assert_eq!(bytes[16], source[4]);
    assert_eq!(bytes[17], 0xee);
    assert_eq!(bytes[18], 0xee);

    let mut reader = ImageIo::new(parameters, 0, 64, None, None).unwrap();
    reader.set_pad_pixel(&[0xee]).unwrap();

    let mut pixels = vec![0_u8; 25];
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        reader.read_sub_window(&mut stream, &SubWindow::new(0, 0, 5, 5), None, &mut buffers).unwrap();
    }

    assert_eq!(pixels, source);
}

#[test]
fn sub_window_validation_rejects_bad_requests() {
    let parameters = parameters(
        16, 16, 2, 8, 8,
        BlockingMode::ByBlock,
        CompressionKind::Uncompressed,
        PixelDescription::new(PixelType::Integer, 8),
    );

    let mut stream = Cursor::new(vec![0_u8; 2 * 16 * 16]);
    let mut image = ImageIo::new(parameters, 0, 2 * 16 * 16, None, None).unwrap();

    let mut band = vec![0_u8; 16 * 16];

    // out of range
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut band];
        let window = SubWindow::new(10, 0, 10, 16);
        assert!(image.read_sub_window(&mut stream, &window, None, &mut buffers).is_err());
    }

    // band out of range
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut band];
        let window = SubWindow::new(0, 0, 4, 4).with_bands(&[2]);
        assert!(image.read_sub_window(&mut stream, &window, None, &mut buffers).is_err());
    }

    // the first band must be the lowest requested
    {
        let mut first = vec![0_u8; 16 * 16];
        let mut second = vec![0_u8; 16 * 16];
        let mut buffers: Vec<&mut [u8]> = vec![&mut first, &mut second];
        let window = SubWindow::new(0, 0, 4, 4).with_bands(&[1, 0]);
        assert!(image.read_sub_window(&mut stream, &window, None, &mut buffers).is_err());
    }

    // an undersized caller buffer is a configuration error
    {
        let mut small = vec![0_u8; 4];
        let mut buffers: Vec<&mut [u8]> = vec![&mut small];
        let window = SubWindow::new(0, 0, 4, 4);
        assert!(matches!(
            image.read_sub_window(&mut stream, &window, None, &mut buffers),
            Err(Error::Configuration(_))
        ));
    }
}

#[test]
fn context_stays_usable_after_a_failed_request() {
    let parameters = parameters(
        8, 8, 1, 8, 8,
        BlockingMode::ByBlock,
        CompressionKind::Uncompressed,
        PixelDescription::new(PixelType::Integer, 8),
    );

    let source = band_pattern(0, 64);
    let mut stream = Cursor::new(Vec::new());

    let mut image = ImageIo::new(parameters, 0, 64, None, None).unwrap();
    image.write_sequential(&mut stream).unwrap();
    image.write_rows(&mut stream, &[&source], 8).unwrap();
    image.write_done(&mut stream).unwrap();

    let mut pixels = vec![0_u8; 64];

    // a failing request leaves the context reusable
    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        let bad = SubWindow::new(0, 0, 64, 64);
        assert!(image.read_sub_window(&mut stream, &bad, None, &mut buffers).is_err());
    }

    {
        let mut buffers: Vec<&mut [u8]> = vec![&mut pixels];
        let good = SubWindow::new(0, 0, 8, 8);
        image.read_sub_window(&mut stream, &good, None, &mut buffers).unwrap();
    }

    assert_eq!(pixels, source);
}
