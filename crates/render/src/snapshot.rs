//! PNG export of a surface.
//!
//! Feature-gated behind `png` (default on) so builds without image output
//! do not pull in the `image` crate.

use flowfield_core::error::FlowError;
use flowfield_core::surface::{Raster, Surface};
use std::path::Path;

/// Writes the raster as an opaque RGBA PNG.
///
/// Returns `FlowError::InvalidDimensions` if the size does not fit in `u32`,
/// or `FlowError::Io` on write failure.
pub fn write_png(raster: &Raster, path: &Path) -> Result<(), FlowError> {
    write_rgba_png(raster.width(), raster.height(), raster.to_rgba8(), path)
}

/// Writes a row-major RGBA8 buffer as a PNG.
pub fn write_rgba_png(
    width: usize,
    height: usize,
    rgba: Vec<u8>,
    path: &Path,
) -> Result<(), FlowError> {
    let w = u32::try_from(width).map_err(|_| FlowError::InvalidDimensions)?;
    let h = u32::try_from(height).map_err(|_| FlowError::InvalidDimensions)?;
    let img = image::RgbaImage::from_raw(w, h, rgba)
        .ok_or_else(|| FlowError::Io("RGBA buffer size mismatch".into()))?;
    img.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| FlowError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowfield_core::color::Srgb;

    #[test]
    fn write_png_round_trip() {
        let mut raster = Raster::new(16, 8, Srgb::BLACK).unwrap();
        raster.set_pixel(3, 2, Srgb::WHITE);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");

        write_png(&raster, &path).unwrap();

        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!((img.width(), img.height()), (16, 8));
        assert_eq!(img.get_pixel(3, 2).0, [255, 255, 255, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn mismatched_buffer_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_rgba_png(4, 4, vec![0; 7], &dir.path().join("bad.png")).unwrap_err();
        assert!(matches!(err, FlowError::Io(_)));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let raster = Raster::new(2, 2, Srgb::BLACK).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = write_png(&raster, &dir.path().join("no/such/dir/x.png")).unwrap_err();
        assert!(matches!(err, FlowError::Io(_)));
    }
}
