
//! Error type definitions.

use std::borrow::Cow;
use std::convert::TryFrom;
use std::io::Error as IoError;


/// A result that may contain an error from this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if ok, contains nothing, and otherwise contains an error from this crate.
pub type UnitResult = Result<()>;


/// An error that may happen while reading or writing blocked image data.
/// Distinguishes between several kinds of errors so that the caller can
/// react to configuration mistakes differently than to broken streams.
#[derive(Debug)]
pub enum Error {

    /// The image parameters themselves are contradictory or describe a
    /// combination this crate does not implement.
    Configuration(Cow<'static, str>),

    /// The requested operation does not fit the image,
    /// for example a sub-window outside the image extent.
    Invalid(Cow<'static, str>),

    /// A working buffer could not be sized for the request.
    Resource(Cow<'static, str>),

    /// The byte stream failed to seek, read or write.
    Io(IoError),

    /// A compression or decompression plugin was missing or failed.
    Codec(Cow<'static, str>),

    /// An in-memory value does not fit its fixed-width on-disk field.
    Overflow(Cow<'static, str>),
}

impl Error {

    /// Create an error of the variant `Configuration`.
    pub(crate) fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Configuration(message.into())
    }

    /// Create an error of the variant `Invalid`.
    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Invalid(message.into())
    }

    /// Create an error of the variant `Resource`.
    pub(crate) fn resource(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Resource(message.into())
    }

    /// Create an error of the variant `Codec`.
    pub(crate) fn codec(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Codec(message.into())
    }

    /// Create an error of the variant `Overflow`.
    pub(crate) fn overflow(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Overflow(message.into())
    }
}

/// Enable using the `?` operator on `std::io::Result`.
impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::Io(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Configuration(message) => write!(formatter, "invalid configuration: {}", message),
            Error::Invalid(message) => write!(formatter, "invalid request: {}", message),
            Error::Resource(message) => write!(formatter, "cannot allocate: {}", message),
            Error::Io(error) => write!(formatter, "io error: {}", error),
            Error::Codec(message) => write!(formatter, "codec error: {}", message),
            Error::Overflow(message) => write!(formatter, "value too large: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(error) => Some(error),
            _ => None,
        }
    }
}


/// Convert an in-memory offset to its 32-bit on-disk representation,
/// returning `Error::Overflow` where the value does not round-trip.
pub(crate) fn u64_to_u32_offset(value: u64, message: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::overflow(message))
}

/// Multiply two buffer dimensions, returning `Error::Resource`
/// instead of wrapping around on overflow.
pub(crate) fn checked_mul(left: usize, right: usize, message: &'static str) -> Result<usize> {
    left.checked_mul(right).ok_or_else(|| Error::resource(message))
}
