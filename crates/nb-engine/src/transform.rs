use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use nb_contracts::validation::MAX_RESIZE_SIDE;
use nb_contracts::{ImageFormat, NanoError, NanoResult, ProcessingOptions, Resize};
use tracing::debug;

/// Encoding used when neither the caller nor the input bytes name one.
pub const DEFAULT_FORMAT: ImageFormat = ImageFormat::Png;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub bytes: Vec<u8>,
    /// Encoding of `bytes`, which decides the file extension.
    pub format: ImageFormat,
}

pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        _ => None,
    }
}

/// Maps quality 1..=100 onto zlib-style levels 0..=9; higher quality, lighter compression.
pub fn png_compression_level(quality: u8) -> u8 {
    (100 - quality.clamp(1, 100)) / 10
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Largest size that fits inside the box while keeping the aspect ratio.
/// Upscaling is allowed; a missing side is derived from the other one, and
/// neither side grows past `MAX_RESIZE_SIDE`.
/// An exact resize with both sides set ignores the aspect ratio.
pub fn fit_within(width: u32, height: u32, resize: &Resize) -> (u32, u32) {
    if let (true, Some(bw), Some(bh)) = (resize.exact, resize.width, resize.height) {
        return (bw, bh);
    }
    let (w, h) = (f64::from(width.max(1)), f64::from(height.max(1)));
    let scale = match (resize.width, resize.height) {
        (Some(bw), Some(bh)) => (f64::from(bw) / w).min(f64::from(bh) / h),
        (Some(bw), None) => f64::from(bw) / w,
        (None, Some(bh)) => f64::from(bh) / h,
        (None, None) => return (width, height),
    };
    let cap = f64::from(MAX_RESIZE_SIDE);
    let scale = scale.min(cap / w).min(cap / h);
    let scaled = |side: f64| ((side * scale).round() as u32).clamp(1, MAX_RESIZE_SIDE);
    (scaled(w), scaled(h))
}

/// Decodes, optionally resizes, and re-encodes one image.
///
/// With no options set the input is returned untouched.
pub fn transform(bytes: &[u8], options: &ProcessingOptions) -> NanoResult<Transformed> {
    let native = sniff_format(bytes);
    if options.is_noop() {
        return Ok(Transformed {
            bytes: bytes.to_vec(),
            format: native.unwrap_or(DEFAULT_FORMAT),
        });
    }

    let mut decoded = image::load_from_memory(bytes)
        .map_err(|err| NanoError::Transform(format!("decode failed: {err}")))?;

    if let Some(resize) = options.resize.filter(|resize| !resize.is_empty()) {
        let (width, height) = fit_within(decoded.width(), decoded.height(), &resize);
        debug!(
            from = %format!("{}x{}", decoded.width(), decoded.height()),
            to = %format!("{width}x{height}"),
            "resizing image"
        );
        decoded = decoded.resize_exact(width, height, FilterType::Lanczos3);
    }

    let format = options.format.or(native).unwrap_or(DEFAULT_FORMAT);
    let quality = options.quality_or_default();
    let bytes = encode(&decoded, format, quality)?;
    debug!(%format, quality, bytes = bytes.len(), "re-encoded image");
    Ok(Transformed { bytes, format })
}

fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> NanoResult<Vec<u8>> {
    let (width, height) = (image.width(), image.height());
    let has_alpha = image.color().has_alpha();
    let mut out = Vec::new();
    let result = match format {
        ImageFormat::Jpeg => {
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
        ImageFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut out,
                png_compression(png_compression_level(quality)),
                PngFilter::Adaptive,
            );
            if has_alpha {
                encoder.write_image(
                    image.to_rgba8().as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgba8,
                )
            } else {
                encoder.write_image(
                    image.to_rgb8().as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )
            }
        }
        // The only WebP encoder available is lossless, so quality has no effect.
        ImageFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut out);
            if has_alpha {
                encoder.write_image(
                    image.to_rgba8().as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgba8,
                )
            } else {
                encoder.write_image(
                    image.to_rgb8().as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )
            }
        }
    };
    result.map_err(|err| NanoError::Transform(format!("{format} encode failed: {err}")))?;
    Ok(out)
}
