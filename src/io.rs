//! Image loading via the `image` crate.
//!
//! Available when the `image-io` feature is enabled.

use crate::tensor::Tensor3;
use crate::util::{SparseDetError, SparseDetResult};
use std::path::Path;

/// Converts an RGB buffer into a `3 x H x W` tensor with values in `[0, 255]`.
pub fn tensor_from_rgb_image(img: &image::RgbImage) -> SparseDetResult<Tensor3> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = pixel[c] as f32;
        }
    }
    Tensor3::from_vec(data, 3, height, width)
}

/// Loads an image from disk as a CHW RGB tensor.
pub fn load_rgb_image<P: AsRef<Path>>(path: P) -> SparseDetResult<Tensor3> {
    let img = image::open(path).map_err(|err| SparseDetError::ImageIo {
        reason: err.to_string(),
    })?;
    tensor_from_rgb_image(&img.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_split_into_planes() {
        let mut img = image::RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([1, 2, 3]));
        img.put_pixel(1, 0, image::Rgb([4, 5, 6]));
        let t = tensor_from_rgb_image(&img).unwrap();
        assert_eq!(t.as_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_rgb_image("/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, SparseDetError::ImageIo { .. }));
    }
}
