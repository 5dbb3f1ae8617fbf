//! The decoding capability and its default implementation.

use std::io::Cursor;

use image::ImageReader;

use super::orientation::{apply_orientation, get_orientation};
use super::{DecodeError, DecodedImage, ImageMetadata};

/// Turns an encoded byte sequence into pixels.
///
/// Implementations run on worker threads, so they must be `Send + Sync` and
/// must not assume anything about the calling thread. A successful return is
/// always a non-empty image; anything else is an error.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;
}

impl<F> ImageDecoder for F
where
    F: Fn(&[u8]) -> Result<DecodedImage, DecodeError> + Send + Sync,
{
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        self(bytes)
    }
}

/// Decoder backed by the `image` crate.
///
/// The container format is guessed from the leading bytes, so the file
/// extension never matters. EXIF orientation is applied unless disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardDecoder {
    pub apply_orientation: bool,
}

impl Default for StandardDecoder {
    fn default() -> Self {
        Self {
            apply_orientation: true,
        }
    }
}

impl StandardDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that leaves pixels in stored order.
    pub fn without_orientation() -> Self {
        Self {
            apply_orientation: false,
        }
    }
}

impl ImageDecoder for StandardDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        let reader = guessed_reader(bytes)?;
        let img = reader.decode()?;

        let img = if self.apply_orientation {
            apply_orientation(img, get_orientation(bytes))
        } else {
            img
        };

        let decoded = DecodedImage::from(img.into_rgb8());
        if decoded.is_empty() {
            return Err(DecodeError::CorruptedFile(
                "decoder produced an empty image".to_string(),
            ));
        }
        Ok(decoded)
    }
}

/// Read dimensions, container type and orientation without decoding pixels.
pub fn probe_metadata(bytes: &[u8]) -> Result<ImageMetadata, DecodeError> {
    let reader = guessed_reader(bytes)?;
    let mime_type = reader
        .format()
        .map(|format| format.to_mime_type().to_string())
        .ok_or(DecodeError::InvalidFormat)?;
    let (width, height) = reader.into_dimensions()?;

    Ok(ImageMetadata {
        width,
        height,
        mime_type,
        orientation: get_orientation(bytes),
    })
}

fn guessed_reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::CorruptedFile(e.to_string()))?;

    if reader.format().is_none() {
        return Err(DecodeError::InvalidFormat);
    }
    Ok(reader)
}
