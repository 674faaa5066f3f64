use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};

const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OutputFormat::Png => "PNG",
            OutputFormat::Jpeg => "JPEG",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpeg" | "jpg" => Some(OutputFormat::Jpeg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

/// Decodes image bytes just far enough to describe them for a gallery
/// listing. Decode failure is an explicit error the caller reports
/// per-item.
pub fn inspect_image(bytes: &[u8]) -> Result<ImageInfo> {
    let decoded = image::load_from_memory(bytes).context("Failed to decode image bytes")?;
    let mime_type = infer::get(bytes)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(ImageInfo {
        width: decoded.width(),
        height: decoded.height(),
        mime_type,
    })
}

/// Re-encodes image bytes in the requested output format. JPEG has no
/// alpha channel, so transparent input is flattened onto a white
/// background first.
pub fn convert_image(bytes: &[u8], format: OutputFormat) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("Failed to decode image bytes")?;
    let mut buffer = Vec::new();

    match format {
        OutputFormat::Png => {
            decoded
                .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
                .context("Failed to encode PNG")?;
        }
        OutputFormat::Jpeg => {
            let flattened = flatten_alpha(&decoded);
            let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            flattened
                .write_with_encoder(encoder)
                .context("Failed to encode JPEG")?;
        }
    }

    Ok(buffer)
}

fn flatten_alpha(decoded: &DynamicImage) -> DynamicImage {
    let rgba = decoded.to_rgba8();
    if !rgba.pixels().any(|pixel| pixel.0[3] != u8::MAX) {
        return DynamicImage::ImageRgb8(decoded.to_rgb8());
    }

    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |channel: u8| -> u8 {
            ((channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        image::Rgb([blend(r), blend(g), blend(b)])
    });
    DynamicImage::ImageRgb8(flattened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_with_alpha() -> Vec<u8> {
        let mut img = RgbaImage::new(4, 4);
        for pixel in img.pixels_mut() {
            *pixel = Rgba([200, 10, 10, 0]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn converts_png_to_jpeg_flattening_alpha() {
        let jpeg = convert_image(&png_with_alpha(), OutputFormat::Jpeg).unwrap();
        let info = inspect_image(&jpeg).unwrap();
        assert_eq!(info.mime_type, "image/jpeg");
        assert_eq!((info.width, info.height), (4, 4));

        // Fully transparent input flattens to the white background.
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        let pixel = decoded.get_pixel(0, 0).0;
        assert!(pixel.iter().all(|channel| *channel > 240));
    }

    #[test]
    fn reencodes_png_as_png() {
        let png = convert_image(&png_with_alpha(), OutputFormat::Png).unwrap();
        let info = inspect_image(&png).unwrap();
        assert_eq!(info.mime_type, "image/png");
    }

    #[test]
    fn garbage_bytes_are_an_explicit_error() {
        assert!(convert_image(b"definitely not an image", OutputFormat::Png).is_err());
        assert!(inspect_image(b"definitely not an image").is_err());
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!(OutputFormat::parse("PNG"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::parse("jpg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("webp"), None);
        assert_eq!(OutputFormat::Jpeg.extension(), "jpeg");
    }
}
