//! Image decoding for ribs.
//!
//! This module provides:
//! - The [`ImageDecoder`] capability the loader hands fully-read files to
//! - [`StandardDecoder`], which recognises PNG, JPEG, GIF, BMP, TIFF and WebP
//!   from their signatures and applies EXIF orientation
//! - [`probe_metadata`] for reading dimensions without decoding pixels
//!
//! Decoders are synchronous and CPU-bound. They are meant to be driven from a
//! worker pool, never from an I/O event loop.

mod orientation;
mod standard;
mod types;

pub use orientation::get_orientation;
pub use standard::{probe_metadata, ImageDecoder, StandardDecoder};
pub use types::{DecodeError, DecodedImage, ImageMetadata, Orientation};
