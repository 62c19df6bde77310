
//! In-place byte transforms between the file representation of pixel
//! samples and the native representation handed to the caller.
//!
//! Samples cross the API as right-justified, sign-extended, native-endian
//! values. The file may store them byte-swapped, left-justified, or with
//! fewer significant bits than the stored field holds. Each combination of
//! type, width, byte order, sign and justification selects exactly one
//! transform per direction; "no transform" is an explicit, valid result.

use std::convert::TryInto;
use crate::error::Result;
use crate::meta::{PixelDescription, PixelType, Justification};


/// One in-place buffer transform. The read direction swaps before the bit
/// operation, the write direction swaps after it, so that bit operations
/// always see native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {

    /// Reverse the byte order of every sample.
    Swap,

    /// Reverse the byte order of each half of every sample.
    /// Used for two-component samples such as complex pairs.
    SwapHalves,

    /// Logical right shift. Normalizes left-justified unsigned samples.
    ShiftRightUnsigned,

    /// Arithmetic right shift. Normalizes left-justified signed samples,
    /// extending the sign bit on the way down.
    ShiftRightSigned,

    /// Sign-extend the low significant field of a right-justified
    /// signed sample.
    SignExtend,

    /// Logical left shift. Re-justifies samples for writing.
    ShiftLeft,

    /// Clear the bits above the significant field. Write direction of
    /// right-justified samples; masking instead of shifting keeps the
    /// significant field in place.
    MaskHigh,

    SwapThenShiftRightUnsigned,
    SwapThenShiftRightSigned,
    SwapThenSignExtend,
    ShiftLeftThenSwap,
    MaskHighThenSwap,
}


macro_rules! implement_bit_ops {
    ($function: ident, $unsigned: ty, $signed: ty) => {
        fn $function(operation: Transform, shift: u32, buffer: &mut [u8]) {
            use self::Transform::*;
            const SIZE: usize = std::mem::size_of::<$unsigned>();

            for sample in buffer.chunks_exact_mut(SIZE) {
                match operation {
                    Swap | SwapThenShiftRightUnsigned | SwapThenShiftRightSigned | SwapThenSignExtend =>
                        sample.reverse(),

                    SwapHalves => {
                        let (low, high) = sample.split_at_mut(SIZE / 2);
                        low.reverse();
                        high.reverse();
                    },

                    _ => {},
                }

                let value = <$unsigned>::from_ne_bytes(
                    (&*sample).try_into().expect("sample width bug")
                );

                let value = match operation {
                    ShiftRightUnsigned | SwapThenShiftRightUnsigned =>
                        value >> shift,

                    ShiftRightSigned | SwapThenShiftRightSigned =>
                        ((value as $signed) >> shift) as $unsigned,

                    SignExtend | SwapThenSignExtend =>
                        (((value << shift) as $signed) >> shift) as $unsigned,

                    ShiftLeft | ShiftLeftThenSwap =>
                        value << shift,

                    MaskHigh | MaskHighThenSwap =>
                        value & (<$unsigned>::MAX >> shift),

                    _ => value,
                };

                sample.copy_from_slice(&value.to_ne_bytes());

                match operation {
                    ShiftLeftThenSwap | MaskHighThenSwap => sample.reverse(),
                    _ => {},
                }
            }
        }
    };
}

implement_bit_ops!(transform_1, u8, i8);
implement_bit_ops!(transform_2, u16, i16);
implement_bit_ops!(transform_4, u32, i32);
implement_bit_ops!(transform_8, u64, i64);

/// Sixteen-byte samples are always complex pairs and only ever swap
/// their component byte order.
fn transform_16(operation: Transform, _shift: u32, buffer: &mut [u8]) {
    debug_assert!(matches!(operation, Transform::Swap | Transform::SwapHalves), "transform selection bug");

    for sample in buffer.chunks_exact_mut(16) {
        let (low, high) = sample.split_at_mut(8);
        low.reverse();
        high.reverse();
    }
}

/// Apply the transform to every sample in the buffer.
/// The buffer length must be a multiple of the sample width.
pub fn apply(operation: Transform, width: usize, shift: u32, buffer: &mut [u8]) {
    debug_assert_eq!(buffer.len() % width, 0, "sample buffer length bug");

    match width {
        1 => transform_1(operation, shift, buffer),
        2 => transform_2(operation, shift, buffer),
        4 => transform_4(operation, shift, buffer),
        8 => transform_8(operation, shift, buffer),
        16 => transform_16(operation, shift, buffer),
        _ => debug_assert!(false, "no transform exists for {} byte samples", width),
    }
}


/// The wire representation of one sample and the transform pair
/// selected for it. Selected once per image and then fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {

    /// In-memory bytes per sample.
    pub bytes: usize,

    /// Justification shift in bits.
    pub shift: u32,

    /// Transform applied to freshly read samples, if any.
    pub unformat: Option<Transform>,

    /// Transform applied to samples about to be written, if any.
    pub format: Option<Transform>,
}

impl PixelFormat {

    /// Select the transform pair for the described pixel.
    ///
    /// When a codec plugin is attached it already produces and consumes
    /// native-order samples, so both transforms end up empty; the
    /// combination is still validated to reject broken configurations early.
    pub fn select(pixel: &PixelDescription, codec_attached: bool) -> Result<Self> {
        pixel.validate()?;

        let bytes = pixel.byte_width();
        let shift = pixel.shift();

        // one-byte samples have no byte order
        let swap = bytes > 1 && cfg!(target_endian = "little");

        if codec_attached {
            return Ok(PixelFormat { bytes, shift, unformat: None, format: None });
        }

        let swap_transform = match pixel.kind {
            PixelType::Complex => Transform::SwapHalves,
            _ => Transform::Swap,
        };

        use self::Transform::*;
        let (unformat, format) = if shift == 0 {
            let only_swap = if swap { Some(swap_transform) } else { None };
            (only_swap, only_swap)
        }
        else {
            match (pixel.kind, pixel.justification) {
                (PixelType::Integer, Justification::Left) => (
                    Some(if swap { SwapThenShiftRightUnsigned } else { ShiftRightUnsigned }),
                    Some(if swap { ShiftLeftThenSwap } else { ShiftLeft }),
                ),

                (PixelType::SignedInteger, Justification::Left) => (
                    Some(if swap { SwapThenShiftRightSigned } else { ShiftRightSigned }),
                    Some(if swap { ShiftLeftThenSwap } else { ShiftLeft }),
                ),

                (PixelType::SignedInteger, Justification::Right) => (
                    Some(if swap { SwapThenSignExtend } else { SignExtend }),
                    Some(if swap { MaskHighThenSwap } else { MaskHigh }),
                ),

                // right-justified unsigned fields are already normalized;
                // writing still clears stray bits above the field
                (PixelType::Integer, Justification::Right) => (
                    if swap { Some(Swap) } else { None },
                    Some(if swap { MaskHighThenSwap } else { MaskHigh }),
                ),

                // floats, complex and binary with a shift were rejected above
                _ => (None, None),
            }
        };

        Ok(PixelFormat { bytes, shift, unformat, format })
    }

    /// The format of a synthetic band that carries all interleaved
    /// components of one pixel as a single widened sample.
    /// Components of one byte need no transform at all.
    pub fn collapsed(bytes: usize, component_bytes: usize) -> Self {
        let swap = component_bytes > 1 && cfg!(target_endian = "little");
        let transform = if swap { Some(Transform::SwapHalves) } else { None };
        PixelFormat { bytes, shift: 0, unformat: transform, format: transform }
    }

    /// Transform freshly read file samples into their native representation.
    #[inline]
    pub fn unformat_in_place(&self, buffer: &mut [u8]) {
        if let Some(transform) = self.unformat {
            apply(transform, self.bytes, self.shift, buffer);
        }
    }

    /// Transform native samples into their file representation.
    #[inline]
    pub fn format_in_place(&self, buffer: &mut [u8]) {
        if let Some(transform) = self.format {
            apply(transform, self.bytes, self.shift, buffer);
        }
    }
}
