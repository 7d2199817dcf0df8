//! Decoded raster frames.
//!
//! A `Frame` is a packed RGB24 buffer. It is moved between pipeline stages and
//! never shared; the renderer produces a new frame instead of drawing into the
//! one it was given.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Bytes per pixel for RGB24.
pub const CHANNELS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a packed RGB24 buffer. The length must be `width * height * 3`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = expected_len(width, height)
            .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions {}x{} are empty", width, height));
        }
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame of one solid colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = expected_len(width, height)
            .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))?;
        let data = rgb.iter().copied().cycle().take(len).collect();
        Self::new(width, height, data)
    }

    pub fn from_image(image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// `true` when the public dimensions still agree with the buffer.
    pub fn is_consistent(&self) -> bool {
        self.width > 0
            && self.height > 0
            && expected_len(self.width, self.height) == Some(self.data.len())
    }

    /// Copy into an `image` buffer for drawing or encoding.
    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }
}

/// Byte length of an RGB24 frame, `None` on overflow.
pub fn expected_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
}
