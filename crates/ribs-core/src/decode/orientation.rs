//! EXIF orientation lookup and correction.

use std::io::Cursor;

use exif::{In, Reader, Tag};
use image::DynamicImage;

use super::Orientation;

/// Orientation recorded in the image's EXIF block.
///
/// Missing or unreadable EXIF counts as [`Orientation::Upright`].
pub fn get_orientation(bytes: &[u8]) -> Orientation {
    Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()
        .and_then(|exif| {
            exif.get_field(Tag::Orientation, In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .map(Orientation::from_exif)
        .unwrap_or_default()
}

pub(crate) fn apply_orientation(img: DynamicImage, orientation: Orientation) -> DynamicImage {
    use Orientation::*;

    match orientation {
        Upright => img,
        MirrorX => img.fliph(),
        Rotate180 => img.rotate180(),
        MirrorY => img.flipv(),
        MirrorXRotate270 => img.rotate90().fliph(),
        Rotate90 => img.rotate90(),
        MirrorXRotate90 => img.rotate270().fliph(),
        Rotate270 => img.rotate270(),
    }
}
