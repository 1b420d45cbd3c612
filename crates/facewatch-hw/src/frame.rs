//! Frame type and pixel conversion from YUYV and MJPEG to packed RGB.

use image::RgbImage;

/// A captured camera frame in packed RGB8.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn from_image(image: RgbImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// True once the stream delivers decoded pixels of a non-zero size.
    pub fn has_valid_dimensions(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() >= (self.width * self.height * 3) as usize
    }

    /// View the frame as an image, or `None` if it has not decoded yet.
    pub fn to_image(&self) -> Option<RgbImage> {
        if !self.has_valid_dimensions() {
            return None;
        }
        let len = (self.width * self.height * 3) as usize;
        RgbImage::from_raw(self.width, self.height, self.data[..len].to_vec())
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_u8(y + 1.402 * v));
            rgb.push(clamp_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_u8(y + 1.772 * u));
        }
    }
    Ok(rgb)
}

/// Decode a motion-JPEG buffer into RGB.
pub fn mjpeg_to_rgb(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    if decoded.dimensions() != (width, height) {
        return Err(FrameError::Decode(format!(
            "expected {width}x{height}, decoded {}x{}",
            decoded.width(),
            decoded.height()
        )));
    }
    Ok(decoded.into_raw())
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_gray_maps_to_gray() {
        // Neutral chroma: RGB equals luma.
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        let rgb = yuyv_to_rgb(&[76, 85, 76, 255], 2, 1).unwrap();
        assert!(rgb[0] > 240, "red channel should saturate, got {}", rgb[0]);
        assert!(rgb[1] < 20);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_zero_sized_frame_is_not_valid() {
        let frame = Frame {
            data: vec![],
            width: 0,
            height: 0,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        assert!(!frame.has_valid_dimensions());
        assert!(frame.to_image().is_none());
    }

    #[test]
    fn test_frame_image_round_trip() {
        let img = RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3]));
        let frame = Frame::from_image(img.clone(), 7);
        assert!(frame.has_valid_dimensions());
        assert_eq!(frame.to_image().unwrap(), img);
    }

    #[test]
    fn test_mjpeg_rejects_garbage() {
        assert!(mjpeg_to_rgb(&[0, 1, 2, 3], 2, 2).is_err());
    }
}
