//! Decoder inputs and outputs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a byte sequence could not be turned into pixels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no image data")]
    Empty,

    /// No known signature at the start of the data.
    #[error("unrecognised image format")]
    InvalidFormat,

    /// Known container, unhandled feature (e.g. an exotic colour type).
    #[error("unsupported image: {0}")]
    Unsupported(String),

    /// Truncated, or structurally broken past the header.
    #[error("corrupted image data: {0}")]
    CorruptedFile(String),

    #[error("image exceeds decoder memory limits")]
    OutOfMemory,

    /// The decode job panicked or was dropped before reporting back.
    #[error("decode aborted: {0}")]
    Aborted(String),
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        use image::ImageError;

        match err {
            ImageError::Unsupported(inner) => Self::Unsupported(inner.to_string()),
            ImageError::Limits(_) => Self::OutOfMemory,
            other => Self::CorruptedFile(other.to_string()),
        }
    }
}

/// How stored pixels must be transformed to display upright.
///
/// Discriminants are the EXIF `Orientation` tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Orientation {
    #[default]
    Upright = 1,
    MirrorX = 2,
    Rotate180 = 3,
    MirrorY = 4,
    MirrorXRotate270 = 5,
    Rotate90 = 6,
    MirrorXRotate90 = 7,
    Rotate270 = 8,
}

impl Orientation {
    /// Map an EXIF tag value; anything outside 1..=8 is treated as upright.
    pub fn from_exif(value: u32) -> Self {
        const TABLE: [Orientation; 8] = [
            Orientation::Upright,
            Orientation::MirrorX,
            Orientation::Rotate180,
            Orientation::MirrorY,
            Orientation::MirrorXRotate270,
            Orientation::Rotate90,
            Orientation::MirrorXRotate90,
            Orientation::Rotate270,
        ];
        usize::try_from(value)
            .ok()
            .and_then(|v| v.checked_sub(1))
            .and_then(|i| TABLE.get(i).copied())
            .unwrap_or_default()
    }

    /// Quarter turns exchange width and height.
    pub fn is_transposed(self) -> bool {
        (self as u8) >= 5
    }
}

/// What a header says about an image, read without touching pixel data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Stored width, before orientation.
    pub width: u32,
    /// Stored height, before orientation.
    pub height: u32,
    /// e.g. `image/png`
    pub mime_type: String,
    pub orientation: Orientation,
}

impl ImageMetadata {
    /// `(width, height)` as the image will be displayed.
    pub fn display_dimensions(&self) -> (u32, u32) {
        if self.orientation.is_transposed() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Packed RGB8 pixels, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len() as u64,
            u64::from(width) * u64::from(height) * 3,
            "pixel buffer does not match {width}x{height}"
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Borrow the pixels as an `image` buffer, if the dimensions agree.
    pub fn as_rgb_image(&self) -> Option<image::ImageBuffer<image::Rgb<u8>, &[u8]>> {
        image::ImageBuffer::from_raw(self.width, self.height, self.pixels.as_slice())
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True when there is nothing to show. Never a successful decode result.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty() || self.pixel_count() == 0
    }
}

impl From<image::RgbImage> for DecodedImage {
    fn from(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            pixels: img.into_raw(),
        }
    }
}
