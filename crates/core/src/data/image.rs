//! Image payloads
//!
//! Images are carried, never decoded: encoded formats keep their bytes as-is,
//! raw formats are validated against `width * height * channels`.

use crate::{Error, Result};

/// Image payload format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// PNG-encoded bytes
    Png,
    /// JPEG-encoded bytes
    Jpeg,
    /// BMP-encoded bytes
    Bmp,
    /// Raw interleaved RGB, 8 bits per channel
    Rgb8,
    /// Raw interleaved BGR, 8 bits per channel
    Bgr8,
    /// Raw single-channel 8-bit
    Gray8,
}

impl ImageFormat {
    const ALL: [ImageFormat; 6] = [
        ImageFormat::Png,
        ImageFormat::Jpeg,
        ImageFormat::Bmp,
        ImageFormat::Rgb8,
        ImageFormat::Bgr8,
        ImageFormat::Gray8,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Bmp => "BMP",
            ImageFormat::Rgb8 => "RGB8",
            ImageFormat::Bgr8 => "BGR8",
            ImageFormat::Gray8 => "GRAY8",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::InvalidData(format!("Unknown image format: {}", name)))
    }

    pub fn tag(&self) -> u8 {
        match self {
            ImageFormat::Png => 1,
            ImageFormat::Jpeg => 2,
            ImageFormat::Bmp => 3,
            ImageFormat::Rgb8 => 4,
            ImageFormat::Bgr8 => 5,
            ImageFormat::Gray8 => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.tag() == tag)
            .ok_or_else(|| Error::Serialization(format!("Unknown image format tag: {}", tag)))
    }

    /// Channels per pixel for raw formats; `None` for encoded formats
    pub fn raw_channels(&self) -> Option<usize> {
        match self {
            ImageFormat::Rgb8 | ImageFormat::Bgr8 => Some(3),
            ImageFormat::Gray8 => Some(1),
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp => None,
        }
    }
}

/// Image carried through a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    format: ImageFormat,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Image {
    /// Create an image, validating raw payload sizes
    pub fn new(format: ImageFormat, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if let Some(channels) = format.raw_channels() {
            let expected = width as usize * height as usize * channels;
            if data.len() != expected {
                return Err(Error::InvalidData(format!(
                    "{} image {}x{} needs {} bytes, got {}",
                    format.as_str(),
                    width,
                    height,
                    expected,
                    data.len()
                )));
            }
        }
        Ok(Self {
            format,
            width,
            height,
            data,
        })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the payload is unencoded pixels
    pub fn is_raw(&self) -> bool {
        self.format.raw_channels().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_size_is_validated() {
        assert!(Image::new(ImageFormat::Rgb8, 2, 2, vec![0; 12]).is_ok());
        assert!(Image::new(ImageFormat::Rgb8, 2, 2, vec![0; 11]).is_err());
        // Encoded payloads are opaque
        assert!(Image::new(ImageFormat::Png, 640, 480, vec![0x89, b'P']).is_ok());
    }

    #[test]
    fn test_format_parse_is_case_insensitive() {
        assert_eq!(ImageFormat::parse("jpeg").unwrap(), ImageFormat::Jpeg);
        assert!(ImageFormat::parse("tiff").is_err());
    }
}
