//! Pure frame conversion logic (functional core).
//!
//! Takes a raw RGBA plane as the mirroring service hands it over and
//! returns an image. No host or filesystem access happens here.
//!
//! Hardware may align every row to a stride wider than the logical
//! width. The decoded image therefore keeps that padding as extra
//! columns (`padded_width`) so rows line up, and [`crop_to_width`] trims
//! the padding back off.

use crate::host::Plane;
use image::{DynamicImage, RgbaImage};

/// Bytes per pixel of the only layout the mirrored surface produces.
pub const RGBA_PIXEL_STRIDE: usize = 4;

/// Extra bytes at the end of each row: `row_stride - pixel_stride * width`.
pub fn row_padding(width: u32, pixel_stride: usize, row_stride: usize) -> Result<usize, FrameError> {
    if pixel_stride == 0 {
        return Err(FrameError::UnsupportedPixelStride(pixel_stride));
    }
    let row_bytes = pixel_stride * width as usize;
    row_stride
        .checked_sub(row_bytes)
        .ok_or(FrameError::StrideTooSmall {
            row_stride,
            row_bytes,
        })
}

/// Width of the image that keeps the row padding as extra columns:
/// `width + row_padding / pixel_stride`. Never smaller than `width`.
pub fn padded_width(width: u32, pixel_stride: usize, row_stride: usize) -> Result<u32, FrameError> {
    let padding = row_padding(width, pixel_stride, row_stride)?;
    u32::try_from(padding / pixel_stride)
        .ok()
        .and_then(|extra| width.checked_add(extra))
        .ok_or(FrameError::StrideTooLarge { row_stride, width })
}

/// Builds an RGBA image at the padded width from a frame plane.
///
/// The final row may omit its padding; some producers do not pad the
/// last row of a buffer. Anything shorter than that is rejected.
pub fn decode_rgba(plane: &Plane<'_>, width: u32, height: u32) -> Result<RgbaImage, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::ZeroDimension);
    }
    if plane.pixel_stride != RGBA_PIXEL_STRIDE {
        return Err(FrameError::UnsupportedPixelStride(plane.pixel_stride));
    }

    let decoded_width = padded_width(width, plane.pixel_stride, plane.row_stride)?;
    let out_row = decoded_width as usize * RGBA_PIXEL_STRIDE;
    let logical_row = width as usize * RGBA_PIXEL_STRIDE;
    let rows = height as usize;

    let minimum = (rows - 1) * plane.row_stride + logical_row;
    if plane.data.len() < minimum {
        return Err(FrameError::BufferTooSmall {
            needed: minimum,
            actual: plane.data.len(),
        });
    }

    let pixels = if out_row == plane.row_stride && plane.data.len() >= out_row * rows {
        plane.data[..out_row * rows].to_vec()
    } else {
        let mut pixels = Vec::with_capacity(out_row * rows);
        for y in 0..rows {
            let start = y * plane.row_stride;
            let end = (start + out_row).min(plane.data.len());
            pixels.extend_from_slice(&plane.data[start..end]);
            pixels.resize((y + 1) * out_row, 0);
        }
        pixels
    };

    RgbaImage::from_raw(decoded_width, height, pixels).ok_or(FrameError::Decode {
        width: decoded_width,
        height,
    })
}

/// Drops the padding columns added by [`decode_rgba`].
pub fn crop_to_width(image: RgbaImage, width: u32) -> DynamicImage {
    let image = DynamicImage::ImageRgba8(image);
    if image.width() <= width {
        return image;
    }
    image.crop_imm(0, 0, width, image.height())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame has zero width or height")]
    ZeroDimension,

    #[error("Unsupported pixel stride {0} (expected 4 for RGBA_8888)")]
    UnsupportedPixelStride(usize),

    #[error("Row stride {row_stride} is smaller than a logical row of {row_bytes} bytes")]
    StrideTooSmall { row_stride: usize, row_bytes: usize },

    #[error("Row stride {row_stride} is too large for a {width} pixel wide frame")]
    StrideTooLarge { row_stride: usize, width: u32 },

    #[error("Frame is {actual_width}x{actual_height}, session expects {width}x{height}")]
    GeometryMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Pixel buffer holds {actual} bytes, frame needs at least {needed}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("Could not build a {width}x{height} image from the pixel buffer")]
    Decode { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(data: &[u8], row_stride: usize) -> Plane<'_> {
        Plane {
            data,
            pixel_stride: RGBA_PIXEL_STRIDE,
            row_stride,
        }
    }

    #[test]
    fn padded_width_matches_stride_arithmetic() {
        let cases = [
            (1080u32, 4usize, 4352usize),
            (1080, 4, 4320),
            (7, 4, 32),
            (1, 4, 64),
            (720, 4, 2944),
        ];
        for (width, pixel_stride, row_stride) in cases {
            let padded = padded_width(width, pixel_stride, row_stride).unwrap();
            let expected = width + ((row_stride - pixel_stride * width as usize) / pixel_stride) as u32;
            assert_eq!(padded, expected, "width={width} row_stride={row_stride}");
            assert!(padded >= width);
        }
    }

    #[test]
    fn stride_narrower_than_row_is_rejected() {
        assert!(matches!(
            padded_width(100, 4, 396),
            Err(FrameError::StrideTooSmall { .. })
        ));
    }

    #[test]
    fn decode_keeps_padding_columns() {
        // 2x2 image, rows padded to 3 pixels.
        let mut data = Vec::new();
        for row in 0..2u8 {
            data.extend_from_slice(&[row, 0, 0, 255, row, 1, 0, 255]);
            data.extend_from_slice(&[9, 9, 9, 9]);
        }
        let image = decode_rgba(&plane(&data, 12), 2, 2).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(1, 1).0, [1, 1, 0, 255]);

        let cropped = crop_to_width(image, 2);
        assert_eq!(cropped.width(), 2);
        assert_eq!(cropped.to_rgba8().get_pixel(0, 1).0, [1, 0, 0, 255]);
    }

    #[test]
    fn oversized_stride_is_an_error_not_an_overflow() {
        let row_stride = 400 + 4 * (u32::MAX as usize - 50);
        assert!(matches!(
            padded_width(100, 4, row_stride),
            Err(FrameError::StrideTooLarge { width: 100, .. })
        ));

        let data = vec![0u8; 800];
        assert!(matches!(
            decode_rgba(&plane(&data, row_stride), 100, 2),
            Err(FrameError::StrideTooLarge { .. })
        ));
    }

    #[test]
    fn decode_accepts_unpadded_last_row() {
        let mut data = vec![1u8; 12];
        data.extend_from_slice(&[2u8; 8]);
        let image = decode_rgba(&plane(&data, 12), 2, 2).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(0, 1).0, [2, 2, 2, 2]);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let data = vec![0u8; 10];
        assert!(matches!(
            decode_rgba(&plane(&data, 8), 2, 2),
            Err(FrameError::BufferTooSmall { needed: 16, actual: 10 })
        ));
    }

    #[test]
    fn decode_rejects_non_rgba_stride() {
        let data = vec![0u8; 12];
        let plane = Plane {
            data: &data,
            pixel_stride: 3,
            row_stride: 6,
        };
        assert!(matches!(
            decode_rgba(&plane, 2, 2),
            Err(FrameError::UnsupportedPixelStride(3))
        ));
    }

    #[test]
    fn decode_rejects_zero_dimension() {
        assert!(matches!(
            decode_rgba(&plane(&[], 0), 0, 4),
            Err(FrameError::ZeroDimension)
        ));
    }

    #[test]
    fn crop_is_noop_without_padding() {
        let image = RgbaImage::new(4, 2);
        assert_eq!(crop_to_width(image, 4).width(), 4);
    }
}
