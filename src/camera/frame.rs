use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, RgbaImage};

/// A still image in a transport encoding, carried around as bytes and turned
/// into a self-contained `data:` URL when recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime: String,
    bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// JPEG-encodes a raw camera frame. JPEG has no alpha channel, so the
    /// frame is flattened to RGB first.
    pub fn jpeg_from_frame(frame: &RgbaImage) -> Result<Self> {
        if frame.width() == 0 || frame.height() == 0 {
            bail!("frame has no pixels");
        }

        let rgb = DynamicImage::ImageRgba8(frame.clone()).to_rgb8();
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(rgb)
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .context("failed to encode frame as JPEG")?;

        Ok(Self::new("image/jpeg", buffer.into_inner()))
    }

    /// Reads an image file from disk, rejecting anything that is not an image.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let format = image::guess_format(&bytes)
            .map_err(|_| anyhow!("{} is not an image file", path.display()))?;
        Ok(Self::new(format.to_mime_type(), bytes))
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime = header.strip_suffix(";base64")?;
        let bytes = STANDARD.decode(payload.trim()).ok()?;
        let mime = if mime.is_empty() {
            "application/octet-stream"
        } else {
            mime
        };
        Some(Self::new(mime, bytes))
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory(&self.bytes).context("failed to decode image")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn jpeg_frame_decodes_back_with_same_dimensions() {
        let frame = RgbaImage::from_pixel(32, 24, Rgba([10, 200, 30, 255]));
        let encoded = EncodedImage::jpeg_from_frame(&frame).unwrap();

        assert_eq!(encoded.mime(), "image/jpeg");
        let decoded = encoded.decode().unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let frame = RgbaImage::new(0, 0);
        assert!(EncodedImage::jpeg_from_frame(&frame).is_err());
    }

    #[test]
    fn data_url_parses_back() {
        let image = EncodedImage::new("image/png", vec![1, 2, 3, 4]);
        let url = image.data_url();

        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(EncodedImage::from_data_url(&url), Some(image));
    }

    #[test]
    fn malformed_data_urls_are_rejected() {
        assert!(EncodedImage::from_data_url("http://example.com/a.png").is_none());
        assert!(EncodedImage::from_data_url("data:image/png,plain").is_none());
        assert!(EncodedImage::from_data_url("data:image/png;base64,@@@").is_none());
    }

    #[test]
    fn non_image_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not an image").unwrap();

        assert!(EncodedImage::from_path(&path).is_err());
    }
}
