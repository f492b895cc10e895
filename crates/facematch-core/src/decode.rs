//! Image payload decoding — raw bytes or base64 (optionally a data URL).

use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
}

/// An encoded image as it arrives from a caller.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Encoded file bytes (PNG, JPEG, ...).
    Raw(Vec<u8>),
    /// Base64 of the encoded bytes, with or without a `data:<mime>;base64,` prefix.
    Base64(String),
}

impl ImageSource {
    /// Decode to an 8-bit RGB raster.
    pub fn decode(&self) -> Result<RgbImage, DecodeError> {
        let bytes = match self {
            ImageSource::Raw(bytes) => std::borrow::Cow::Borrowed(bytes.as_slice()),
            ImageSource::Base64(payload) => std::borrow::Cow::Owned(decode_base64(payload)?),
        };
        Ok(image::load_from_memory(&bytes)?.to_rgb8())
    }
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = payload.trim();
    let body = match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, body)| body).unwrap_or(rest),
        None => payload,
    };
    let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD.decode(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_raw() {
        let img = ImageSource::Raw(png_bytes()).decode().unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_base64() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(png_bytes());
        let img = ImageSource::Base64(b64).decode().unwrap();
        assert_eq!(img.dimensions(), (3, 2));
    }

    #[test]
    fn test_decode_data_url() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(png_bytes());
        let url = format!("data:image/png;base64,{b64}\n");
        assert!(ImageSource::Base64(url).decode().is_ok());
    }

    #[test]
    fn test_decode_bad_base64() {
        let err = ImageSource::Base64("not*base64!".into()).decode().unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_not_an_image() {
        let err = ImageSource::Raw(b"hello world".to_vec()).decode().unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }
}
