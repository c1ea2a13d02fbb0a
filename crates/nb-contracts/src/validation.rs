use std::path::Path;

use crate::error::{NanoError, NanoResult};
use crate::requests::{ImageFormat, Resize};

pub const MAX_PROMPT_CHARS: usize = 4000;
pub const MAX_COUNT: usize = 8;
pub const MIN_SCENES: usize = 2;
pub const MAX_SCENES: usize = 8;
pub const MAX_RESIZE_SIDE: u32 = 4096;
pub const ICON_SIZES: [u32; 7] = [16, 32, 64, 128, 256, 512, 1024];

pub fn validate_prompt(prompt: &str) -> NanoResult<()> {
    if prompt.trim().is_empty() {
        return Err(NanoError::validation("Prompt cannot be empty"));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(NanoError::validation(format!(
            "Prompt is too long (max {MAX_PROMPT_CHARS} characters)"
        )));
    }
    Ok(())
}

pub fn validate_count(count: usize) -> NanoResult<()> {
    if !(1..=MAX_COUNT).contains(&count) {
        return Err(NanoError::validation(format!(
            "Count must be between 1 and {MAX_COUNT}"
        )));
    }
    Ok(())
}

pub fn validate_scenes(scenes: usize) -> NanoResult<()> {
    if !(MIN_SCENES..=MAX_SCENES).contains(&scenes) {
        return Err(NanoError::validation(format!(
            "Number of scenes must be between {MIN_SCENES} and {MAX_SCENES}"
        )));
    }
    Ok(())
}

pub fn validate_quality(quality: u8) -> NanoResult<()> {
    if !(1..=100).contains(&quality) {
        return Err(NanoError::validation(format!(
            "Quality must be between 1 and 100 (got {quality})"
        )));
    }
    Ok(())
}

pub fn validate_resize(resize: &Resize) -> NanoResult<()> {
    for (label, side) in [("width", resize.width), ("height", resize.height)] {
        if let Some(side) = side {
            if side == 0 || side > MAX_RESIZE_SIDE {
                return Err(NanoError::validation(format!(
                    "Resize {label} must be between 1 and {MAX_RESIZE_SIDE} (got {side})"
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_icon_sizes(sizes: &[u32]) -> NanoResult<()> {
    if sizes.is_empty() {
        return Err(NanoError::validation("At least one icon size is required"));
    }
    for size in sizes {
        if !ICON_SIZES.contains(size) {
            let valid = ICON_SIZES
                .iter()
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(NanoError::validation(format!(
                "Invalid size: {size}. Valid sizes: {valid}"
            )));
        }
    }
    Ok(())
}

/// Existence is checked first, then the extension. No bytes are read.
pub fn validate_image_path(path: &Path) -> NanoResult<ImageFormat> {
    if !path.exists() {
        return Err(NanoError::InputNotFound(path.to_path_buf()));
    }
    ImageFormat::from_path(path).ok_or_else(|| {
        NanoError::UnsupportedFormat(format!(
            "{}. Supported: .jpg, .jpeg, .png, .webp",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_bounds() {
        assert!(validate_prompt("a lighthouse at dusk").is_ok());
        assert!(validate_prompt(" \n ").is_err());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_CHARS)).is_ok());
        assert!(validate_prompt(&"x".repeat(MAX_PROMPT_CHARS + 1)).is_err());
    }

    #[test]
    fn count_and_scene_bounds() {
        assert!(validate_count(1).is_ok());
        assert!(validate_count(8).is_ok());
        assert!(validate_count(0).is_err());
        assert!(validate_scenes(1).is_err());
        assert!(validate_scenes(2).is_ok());
        assert!(validate_scenes(9).is_err());
    }

    #[test]
    fn icon_sizes_must_come_from_the_allowed_set() {
        assert!(validate_icon_sizes(&[16, 32, 1024]).is_ok());
        assert!(validate_icon_sizes(&[]).is_err());
        let err = validate_icon_sizes(&[16, 48]).unwrap_err();
        assert!(err.to_string().starts_with("Invalid size: 48"));
    }

    #[test]
    fn image_path_checks_existence_before_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("missing.gif");
        assert!(matches!(
            validate_image_path(&missing),
            Err(NanoError::InputNotFound(_))
        ));

        let gif = temp.path().join("present.gif");
        std::fs::write(&gif, b"GIF89a")?;
        assert!(matches!(
            validate_image_path(&gif),
            Err(NanoError::UnsupportedFormat(_))
        ));

        let png = temp.path().join("present.PNG");
        std::fs::write(&png, b"not really a png")?;
        assert_eq!(validate_image_path(&png)?, ImageFormat::Png);
        Ok(())
    }
}
