use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NanoError, NanoResult};
use crate::validation::{validate_count, validate_quality, validate_resize};

pub const DEFAULT_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Webp];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    /// Accepts `png`, `jpg`, `jpeg`, `webp`, with or without an `image/` prefix.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut lowered = raw.trim().to_ascii_lowercase();
        if let Some(value) = lowered.strip_prefix("image/") {
            lowered = value.to_string();
        }
        match lowered.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|value| value.to_str())
            .and_then(Self::parse)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageFormat {
    type Err = NanoError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw).ok_or_else(|| {
            NanoError::UnsupportedFormat(format!(
                "{raw}. Supported output formats: png, jpg, webp"
            ))
        })
    }
}

/// Aspect ratios the image backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 10] = [
        AspectRatio::Square,
        AspectRatio::Portrait2x3,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait3x4,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape5x4,
        AspectRatio::Portrait9x16,
        AspectRatio::Landscape16x9,
        AspectRatio::Ultrawide21x9,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait2x3 => "2:3",
            Self::Landscape3x2 => "3:2",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait4x5 => "4:5",
            Self::Landscape5x4 => "5:4",
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
            Self::Ultrawide21x9 => "21:9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = NanoError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| {
                let valid = Self::ALL
                    .iter()
                    .map(|ratio| ratio.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                NanoError::validation(format!(
                    "Invalid aspect ratio: {trimmed}. Valid options: {valid}"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Stretch to exactly `width x height` instead of fitting inside the box.
    #[serde(default)]
    pub exact: bool,
}

impl Resize {
    pub fn square(side: u32) -> Self {
        Self {
            width: Some(side),
            height: Some(side),
            exact: false,
        }
    }

    pub fn exact_square(side: u32) -> Self {
        Self {
            exact: true,
            ..Self::square(side)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

/// Post-processing applied before an image is written.
///
/// All fields absent means the decoded payload is written byte for byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    pub format: Option<ImageFormat>,
    pub quality: Option<u8>,
    pub resize: Option<Resize>,
}

impl ProcessingOptions {
    pub fn new(
        format: Option<ImageFormat>,
        quality: Option<u8>,
        resize: Option<Resize>,
    ) -> NanoResult<Self> {
        if let Some(quality) = quality {
            validate_quality(quality)?;
        }
        if let Some(resize) = resize.as_ref() {
            validate_resize(resize)?;
        }
        Ok(Self {
            format,
            quality,
            resize,
        })
    }

    pub fn with_resize(self, resize: Resize) -> NanoResult<Self> {
        Self::new(self.format, self.quality, Some(resize))
    }

    pub fn is_noop(&self) -> bool {
        self.format.is_none()
            && self.quality.is_none()
            && self.resize.map(|resize| resize.is_empty()).unwrap_or(true)
    }

    pub fn quality_or_default(&self) -> u8 {
        self.quality.unwrap_or(DEFAULT_QUALITY)
    }
}

/// One logical generation request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    count: usize,
    aspect_ratio: Option<AspectRatio>,
    seed: Option<i64>,
    mask: Option<Vec<u8>>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, count: usize) -> NanoResult<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(NanoError::validation("Prompt cannot be empty"));
        }
        validate_count(count)?;
        Ok(Self {
            prompt,
            count,
            aspect_ratio: None,
            seed: None,
            mask: None,
        })
    }

    pub fn single(prompt: impl Into<String>) -> NanoResult<Self> {
        Self::new(prompt, 1)
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: Option<AspectRatio>) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_seed(mut self, seed: Option<i64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_mask(mut self, mask: Option<Vec<u8>>) -> Self {
        self.mask = mask;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        self.aspect_ratio
    }

    pub fn seed(&self) -> Option<i64> {
        self.seed
    }

    pub fn mask(&self) -> Option<&[u8]> {
        self.mask.as_deref()
    }
}
