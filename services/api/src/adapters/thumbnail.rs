//! services/api/src/adapters/thumbnail.rs
//!
//! Image inspection for uploaded attachments: pixel dimensions plus a small
//! JPEG thumbnail.

use image::{imageops::FilterType, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Longest edge of generated thumbnails, in pixels.
pub const THUMBNAIL_SIZE: u32 = 320;

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// JPEG-encoded thumbnail.
    pub thumbnail: Vec<u8>,
}

/// Returns `None` for anything that is not a decodable image.
pub fn inspect_image(data: &[u8], mime_type: &str) -> Option<ImageInfo> {
    if !mime_type.starts_with("image/") {
        return None;
    }
    let img = match image::load_from_memory(data) {
        Ok(img) => img,
        Err(e) => {
            debug!("Upload declared as {} is not decodable: {}", mime_type, e);
            return None;
        }
    };

    let thumbnail = img
        .resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle)
        .to_rgb8();
    let mut encoded = Cursor::new(Vec::new());
    thumbnail.write_to(&mut encoded, ImageFormat::Jpeg).ok()?;

    Some(ImageInfo {
        width: img.width(),
        height: img.height(),
        thumbnail: encoded.into_inner(),
    })
}

/// Content type for a stored object, judged by its key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    ImageFormat::from_path(key)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut encoded = Cursor::new(Vec::new());
    img.write_to(&mut encoded, ImageFormat::Png).unwrap();
    encoded.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_get_dimensions_and_a_bounded_thumbnail() {
        let info = inspect_image(&sample_png(800, 400), "image/png").unwrap();
        assert_eq!((info.width, info.height), (800, 400));

        let thumb = image::load_from_memory_with_format(&info.thumbnail, ImageFormat::Jpeg).unwrap();
        assert_eq!(thumb.width(), THUMBNAIL_SIZE);
        assert_eq!(thumb.height(), THUMBNAIL_SIZE / 2);
    }

    #[test]
    fn non_images_are_skipped() {
        assert!(inspect_image(b"%PDF-1.4", "application/pdf").is_none());
        assert!(inspect_image(b"not really a png", "image/png").is_none());
    }

    #[test]
    fn content_type_follows_the_extension() {
        assert_eq!(content_type_for("claims/a/photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("claims/a/report.pdf"), "application/octet-stream");
    }
}
