
//! Read and write the blocked pixel payload of raster image segments.
//!
//! An image segment is stored as a grid of fixed-size blocks. Each block
//! holds one or more spectral bands in one of several interleaving schemes,
//! with pixels in one of several bit widths, justifications and sign
//! conventions, optionally run through a pluggable codec, and optionally
//! preceded by a mask recording which blocks were physically omitted.
//!
//! The main entry point is [`image::ImageIo`], which owns the derived block
//! geometry and masks for one segment and drives sub-window reads and
//! sequential writes over a caller-supplied byte stream.

#![forbid(unsafe_code)]

pub mod io;
pub mod math;
pub mod error;
pub mod meta;
pub mod sample;
pub mod mask;
pub mod codec;
pub mod downsample;
pub mod image;

mod block;

#[macro_use]
extern crate smallvec;


pub mod prelude {

    // main exports
    pub use crate::image::{ImageIo, SubWindow};
    pub use crate::meta::{
        ImageParameters, PixelDescription, PixelType, Justification,
        CompressionKind, BlockingMode, BlockingInfo,
    };

    // secondary data types
    pub use crate::mask::{MaskTable, NO_BLOCK};
    pub use crate::downsample::{DownSampler, PixelSkip};
    pub use crate::codec::{Decompressor, Compressor};
    pub use crate::error::{Error, Result, UnitResult};
}
