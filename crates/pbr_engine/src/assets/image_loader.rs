//! Image decoding
//!
//! 8-bit RGBA for albedo-style maps, 32-bit float RGBA for HDR environments.
//! Both come out tightly packed, row by row from the top.

use crate::assets::AssetError;
use std::path::Path;

/// Decoded 8-bit RGBA pixels
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Four bytes per pixel
    pub data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl ImageData {
    /// Decode any format `image` understands, converting to RGBA8
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let rgba = decode(path)?.into_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// `width` x `height` pixels of one colour
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            data: color.repeat((width * height) as usize),
            width,
            height,
        }
    }

    /// Length of `data`
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Decoded 32-bit float RGBA pixels, usually an equirectangular environment
#[derive(Debug, Clone)]
pub struct HdrImageData {
    /// Four floats per pixel
    pub data: Vec<f32>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl HdrImageData {
    /// Decode a Radiance `.hdr` (or any other supported format) as RGBA32F
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let rgba = decode(path)?.into_rgba32f();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// Constant radiance
    pub fn solid_color(width: u32, height: u32, color: [f32; 4]) -> Self {
        Self {
            data: color.repeat((width * height) as usize),
            width,
            height,
        }
    }

    /// `data` viewed as bytes for a staging copy
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

fn decode(path: &Path) -> Result<image::DynamicImage, AssetError> {
    let decoded = image::open(path).map_err(|error| match error {
        image::ImageError::IoError(source) => AssetError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => AssetError::Decode {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })?;
    log::debug!(
        "[ASSET] Decoded {:?} ({}x{}, {:?})",
        path,
        decoded.width(),
        decoded.height(),
        decoded.color()
    );
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_image() {
        let img = ImageData::solid_color(4, 4, [255, 0, 0, 255]);
        assert_eq!(img.width, 4);
        assert_eq!(img.height, 4);
        assert_eq!(img.size_bytes(), 4 * 4 * 4);
        assert_eq!(&img.data[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_hdr_byte_view_size() {
        let img = HdrImageData::solid_color(8, 4, [1.5, 0.25, 0.0, 1.0]);
        assert_eq!(img.data.len(), 8 * 4 * 4);
        assert_eq!(img.as_bytes().len(), 8 * 4 * 16);
        assert_eq!(&img.data[4..8], &[1.5, 0.25, 0.0, 1.0]);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ImageData::from_file("does/not/exist.png").unwrap_err();
        match err {
            AssetError::Io { path, .. } => assert_eq!(path, Path::new("does/not/exist.png")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
