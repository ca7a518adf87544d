//! Decoded image handle and provenance.

use std::sync::Arc;

/// A fully decoded image.
///
/// Cheap to clone: every clone shares the same pixel buffer, so handing the
/// same bitmap to several consumers never copies pixels.
#[derive(Debug, Clone)]
pub struct Bitmap(Arc<image::DynamicImage>);

impl Bitmap {
    /// Wraps a decoded image.
    #[must_use]
    pub fn new(image: image::DynamicImage) -> Self {
        Self(Arc::new(image))
    }

    /// Decodes an encoded image (PNG, JPEG, WebP) from memory, applying any
    /// EXIF orientation it carries.
    ///
    /// # Errors
    /// Returns the decoder error if the bytes are not a supported image.
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        use image::ImageDecoder;

        let mut decoder = image::ImageReader::new(std::io::Cursor::new(bytes))
            .with_guessed_format()?
            .into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut decoded = image::DynamicImage::from_decoder(decoder)?;
        decoded.apply_orientation(orientation);
        Ok(Self::new(decoded))
    }

    /// Encodes the bitmap as PNG.
    ///
    /// # Errors
    /// Returns the encoder error if the pixel layout cannot be written as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut out = std::io::Cursor::new(Vec::new());
        self.0.write_to(&mut out, image::ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Number of bytes held by the pixel buffer.
    #[must_use]
    pub fn byte_count(&self) -> usize {
        self.0.as_bytes().len()
    }

    /// Borrows the underlying image.
    #[must_use]
    pub fn image(&self) -> &image::DynamicImage {
        &self.0
    }

    /// Returns true if both handles share the same pixel buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<image::DynamicImage> for Bitmap {
    fn from(image: image::DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Where an image was ultimately obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadedFrom {
    /// Served from the in-memory cache.
    Memory,
    /// Read from local storage or the HTTP disk cache.
    Disk,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for LoadedFrom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}
