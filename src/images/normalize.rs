use std::io::Cursor;

use bytes::Bytes;
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilter, PngEncoder},
        webp::WebPEncoder,
    },
    imageops::FilterType,
    DynamicImage, GenericImageView, ImageFormat,
};

use crate::error::{AppError, AppResult};

pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";
pub const MIME_WEBP: &str = "image/webp";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

pub const DEFAULT_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Png => MIME_PNG,
            OutputFormat::WebP => MIME_WEBP,
            OutputFormat::Jpeg => MIME_JPEG,
        }
    }
}

fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => MIME_PNG,
        ImageFormat::WebP => MIME_WEBP,
        _ => MIME_JPEG,
    }
}

/// Decodes, flattens to RGB, shrinks so the longer side is at most
/// `max_side` and re-encodes to `format`.
///
/// With `max_side <= 0` the input is returned untouched along with a best
/// effort mime guess (`application/octet-stream` when nothing matches).
pub fn normalize(
    data: &[u8],
    max_side: i64,
    format: OutputFormat,
    quality: u8,
) -> AppResult<(Bytes, &'static str)> {
    if max_side <= 0 {
        let mime = image::guess_format(data)
            .map(mime_for_format)
            .unwrap_or(MIME_OCTET_STREAM);
        return Ok((Bytes::copy_from_slice(data), mime));
    }

    let img = image::load_from_memory(data)
        .map_err(|e| AppError::UnsupportedFormat(e.to_string()))?;
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let (w, h) = (rgb.width(), rgb.height());
    let (nw, nh) = thumbnail_size(w, h, max_side as u64);
    let rgb = if (nw, nh) == (w, h) {
        rgb
    } else {
        rgb.resize_exact(nw, nh, FilterType::Lanczos3)
    };

    let mut out = Cursor::new(Vec::new());
    let encoded = match format {
        OutputFormat::Jpeg => {
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)))
        }
        OutputFormat::Png => rgb.write_with_encoder(PngEncoder::new_with_quality(
            &mut out,
            CompressionType::Best,
            PngFilter::Adaptive,
        )),
        OutputFormat::WebP => rgb.write_with_encoder(WebPEncoder::new_lossless(&mut out)),
    };
    encoded.map_err(|e| AppError::Internal(anyhow::anyhow!("encode image: {e}")))?;

    Ok((Bytes::from(out.into_inner()), format.mime()))
}

/// Shrink-only fit into a `max_side` square keeping the aspect ratio.
fn thumbnail_size(w: u32, h: u32, max_side: u64) -> (u32, u32) {
    let long = w.max(h) as u64;
    if long <= max_side || long == 0 {
        return (w, h);
    }
    let scale = |side: u32| -> u32 {
        let scaled = (side as u64 * max_side + long / 2) / long;
        scaled.clamp(1, max_side) as u32
    };
    if w >= h {
        (max_side as u32, scale(h))
    } else {
        (scale(w), max_side as u32)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba, RgbaImage};

    pub(crate) fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img: RgbaImage = ImageBuffer::from_fn(w, h, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, if x % 2 == 0 { 255 } else { 40 }])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn dims(bytes: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(bytes).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn shrinks_long_side_to_max_and_keeps_aspect() {
        let (out, mime) = normalize(&png_bytes(1024, 768), 512, OutputFormat::Jpeg, 85).unwrap();
        assert_eq!(mime, MIME_JPEG);
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        assert_eq!(dims(&out), (512, 384));
    }

    #[test]
    fn portrait_images_scale_on_height() {
        let (out, _) = normalize(&png_bytes(300, 900), 512, OutputFormat::Jpeg, 85).unwrap();
        assert_eq!(dims(&out), (171, 512));
    }

    #[test]
    fn never_upscales() {
        let (out, mime) = normalize(&png_bytes(200, 100), 512, OutputFormat::Jpeg, 85).unwrap();
        assert_eq!(mime, MIME_JPEG);
        assert_eq!(dims(&out), (200, 100));
    }

    #[test]
    fn alpha_is_dropped() {
        let (out, mime) = normalize(&png_bytes(64, 64), 512, OutputFormat::Png, 85).unwrap();
        assert_eq!(mime, MIME_PNG);
        let img = image::load_from_memory(&out).unwrap();
        assert!(!img.color().has_alpha());
    }

    #[test]
    fn webp_target_reports_webp_mime() {
        let (out, mime) = normalize(&png_bytes(40, 20), 16, OutputFormat::WebP, 85).unwrap();
        assert_eq!(mime, MIME_WEBP);
        assert_eq!(dims(&out), (16, 8));
    }

    #[test]
    fn passthrough_when_resizing_disabled() {
        let png = png_bytes(32, 32);
        let (out, mime) = normalize(&png, 0, OutputFormat::Jpeg, 85).unwrap();
        assert_eq!(&out[..], &png[..]);
        assert_eq!(mime, MIME_PNG);

        let junk = b"definitely not an image".to_vec();
        let (out, mime) = normalize(&junk, -1, OutputFormat::Jpeg, 85).unwrap();
        assert_eq!(&out[..], &junk[..]);
        assert_eq!(mime, MIME_OCTET_STREAM);
    }

    #[test]
    fn undecodable_input_is_unsupported_format() {
        let err = normalize(b"GIF89a-but-not-really", 512, OutputFormat::Jpeg, 85).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFormat(_)));
    }

    #[test]
    fn thumbnail_size_edges() {
        assert_eq!(thumbnail_size(512, 512, 512), (512, 512));
        assert_eq!(thumbnail_size(513, 1, 512), (512, 1));
        assert_eq!(thumbnail_size(2000, 1000, 512), (512, 256));
    }
}
