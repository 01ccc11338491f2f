use crate::error::{Result, StoreError};
use image::{GenericImageView, ImageFormat};
use std::io::Cursor;

pub const THUMBNAIL_BOX: (u32, u32) = (200, 200);

/// Image downscaling capability; output is always PNG.
pub trait ThumbnailRenderer: Send + Sync {
    fn render(&self, image: &[u8], bounds: (u32, u32)) -> Result<Vec<u8>>;
}

/// [`ThumbnailRenderer`] backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageThumbnailer;

impl ThumbnailRenderer for ImageThumbnailer {
    fn render(&self, image: &[u8], (max_width, max_height): (u32, u32)) -> Result<Vec<u8>> {
        let img = image::load_from_memory(image)
            .map_err(|e| StoreError::Render(format!("Failed to decode image: {e}")))?;
        let (width, height) = img.dimensions();

        // Fit inside the box keeping the aspect ratio; never enlarge.
        let img = if width > max_width || height > max_height {
            img.thumbnail(max_width, max_height)
        } else {
            img
        };

        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| StoreError::Render(format!("PNG encode error: {e}")))?;
        Ok(png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 30, 30]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    fn dimensions(bytes: &[u8]) -> (u32, u32) {
        image::load_from_memory(bytes).unwrap().dimensions()
    }

    #[test]
    fn large_images_fit_the_box() {
        let thumb = ImageThumbnailer.render(&png(800, 400), THUMBNAIL_BOX).unwrap();
        assert_eq!(dimensions(&thumb), (200, 100));
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let thumb = ImageThumbnailer.render(&png(40, 20), THUMBNAIL_BOX).unwrap();
        assert_eq!(dimensions(&thumb), (40, 20));
    }

    #[test]
    fn garbage_is_a_render_error() {
        let err = ImageThumbnailer.render(b"not an image", THUMBNAIL_BOX).unwrap_err();
        assert!(matches!(err, StoreError::Render(_)));
    }
}
