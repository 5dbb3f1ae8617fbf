//! Ribs Core - image decoding capability
//!
//! Turns encoded image bytes into RGB pixels. The asynchronous file pipeline
//! lives in `ribs-loader`; this crate has no I/O and no threads of its own.

pub mod decode;

pub use decode::{
    probe_metadata, DecodeError, DecodedImage, ImageDecoder, ImageMetadata, Orientation,
    StandardDecoder,
};
