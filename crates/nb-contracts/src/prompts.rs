//! Canned prompt fragments keyed by closed tag sets.
//!
//! Every builder is a pure function of its inputs; fragments are joined in a
//! fixed order so the same flags always produce the same prompt text.

use std::str::FromStr;

use crate::error::{NanoError, NanoResult};

pub trait PromptTag: Copy + Sized + 'static {
    const KIND: &'static str;
    const ALL: &'static [Self];

    fn as_str(self) -> &'static str;
}

fn parse_tag<T: PromptTag>(raw: &str) -> NanoResult<T> {
    let lowered = raw.trim().to_ascii_lowercase();
    T::ALL
        .iter()
        .copied()
        .find(|tag| tag.as_str() == lowered)
        .ok_or_else(|| {
            let valid = T::ALL
                .iter()
                .map(|tag| tag.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            NanoError::validation(format!(
                "Invalid {}: {raw}. Valid options: {valid}",
                T::KIND
            ))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageStyle {
    Photorealistic,
    Watercolor,
    OilPainting,
    Anime,
    Sketch,
    DigitalArt,
    Render3d,
    PixelArt,
    Minimalist,
    Abstract,
}

impl PromptTag for ImageStyle {
    const KIND: &'static str = "style";
    const ALL: &'static [Self] = &[
        Self::Photorealistic,
        Self::Watercolor,
        Self::OilPainting,
        Self::Anime,
        Self::Sketch,
        Self::DigitalArt,
        Self::Render3d,
        Self::PixelArt,
        Self::Minimalist,
        Self::Abstract,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Photorealistic => "photorealistic",
            Self::Watercolor => "watercolor",
            Self::OilPainting => "oil-painting",
            Self::Anime => "anime",
            Self::Sketch => "sketch",
            Self::DigitalArt => "digital-art",
            Self::Render3d => "3d-render",
            Self::PixelArt => "pixel-art",
            Self::Minimalist => "minimalist",
            Self::Abstract => "abstract",
        }
    }
}

impl ImageStyle {
    pub fn phrase(self) -> &'static str {
        match self {
            Self::Photorealistic => "photorealistic, high detail, professional photography",
            Self::Watercolor => "watercolor painting, soft colors, artistic brush strokes",
            Self::OilPainting => "oil painting, thick brushstrokes, classical art style",
            Self::Anime => "anime style, vibrant colors, Japanese animation aesthetic",
            Self::Sketch => "pencil sketch, hand-drawn, artistic linework",
            Self::DigitalArt => "digital art, modern illustration, clean lines",
            Self::Render3d => "3D rendered, CGI, realistic lighting and materials",
            Self::PixelArt => "pixel art, retro game style, 8-bit or 16-bit aesthetic",
            Self::Minimalist => "minimalist design, simple shapes, limited color palette",
            Self::Abstract => "abstract art, non-representational, creative composition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagramType {
    Flowchart,
    Sequence,
    Architecture,
    Network,
    Erd,
    Mindmap,
}

impl PromptTag for DiagramType {
    const KIND: &'static str = "diagram type";
    const ALL: &'static [Self] = &[
        Self::Flowchart,
        Self::Sequence,
        Self::Architecture,
        Self::Network,
        Self::Erd,
        Self::Mindmap,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Flowchart => "flowchart",
            Self::Sequence => "sequence",
            Self::Architecture => "architecture",
            Self::Network => "network",
            Self::Erd => "erd",
            Self::Mindmap => "mindmap",
        }
    }
}

impl DiagramType {
    pub fn phrase(self) -> &'static str {
        match self {
            Self::Flowchart => "flowchart diagram with boxes, arrows, and decision points",
            Self::Sequence => "sequence diagram showing interactions and timeline",
            Self::Architecture => "system architecture diagram with components and connections",
            Self::Network => "network diagram showing nodes, connections, and topology",
            Self::Erd => "entity relationship diagram with tables and relationships",
            Self::Mindmap => "mind map with central concept and branching ideas",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternDensity {
    Low,
    Medium,
    High,
}

impl PromptTag for PatternDensity {
    const KIND: &'static str = "density";
    const ALL: &'static [Self] = &[Self::Low, Self::Medium, Self::High];

    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl PatternDensity {
    pub fn phrase(self) -> &'static str {
        match self {
            Self::Low => "sparse, minimal elements, lots of space",
            Self::Medium => "balanced density, moderate spacing",
            Self::High => "dense pattern, tightly packed elements",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditOperation {
    Add,
    Remove,
    Modify,
}

impl PromptTag for EditOperation {
    const KIND: &'static str = "operation";
    const ALL: &'static [Self] = &[Self::Add, Self::Remove, Self::Modify];

    fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Modify => "modify",
        }
    }
}

impl EditOperation {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Add => "Add to the image:",
            Self::Remove => "Remove from the image:",
            Self::Modify => "Modify the image:",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RestoreLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl PromptTag for RestoreLevel {
    const KIND: &'static str = "restore quality";
    const ALL: &'static [Self] = &[Self::Low, Self::Medium, Self::High];

    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl RestoreLevel {
    fn suffix(self) -> Option<&'static str> {
        match self {
            Self::High => Some("Apply maximum enhancement and detail improvement."),
            Self::Low => Some("Apply gentle enhancement while preserving original character."),
            Self::Medium => None,
        }
    }
}

impl FromStr for ImageStyle {
    type Err = NanoError;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_tag(raw)
    }
}

impl FromStr for DiagramType {
    type Err = NanoError;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_tag(raw)
    }
}

impl FromStr for PatternDensity {
    type Err = NanoError;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_tag(raw)
    }
}

impl FromStr for EditOperation {
    type Err = NanoError;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_tag(raw)
    }
}

impl FromStr for RestoreLevel {
    type Err = NanoError;
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_tag(raw)
    }
}

const RESTORE_BASE: &str = "Restore and enhance this image. Improve quality, reduce noise, fix artifacts, and enhance details while preserving the original content and composition.";
const RESTORE_DENOISE: &str = "Focus on noise reduction and artifact removal.";

pub fn generate_prompt(base: &str, style: Option<ImageStyle>) -> String {
    match style {
        Some(style) => format!("{base}, {}", style.phrase()),
        None => base.to_string(),
    }
}

pub fn edit_prompt(base: &str, operation: Option<EditOperation>) -> String {
    match operation {
        Some(operation) => format!("{} {base}", operation.prefix()),
        None => base.to_string(),
    }
}

pub fn restore_prompt(level: RestoreLevel, denoise: bool) -> String {
    let mut sentences = vec![RESTORE_BASE];
    sentences.extend(level.suffix());
    if denoise {
        sentences.push(RESTORE_DENOISE);
    }
    sentences.join(" ")
}

pub fn icon_prompt(base: &str, size: u32) -> String {
    format!(
        "{base}, simple icon design, clean lines, professional, suitable for {size}x{size}px, centered, transparent or white background"
    )
}

pub fn pattern_prompt(
    base: &str,
    tileable: bool,
    density: Option<PatternDensity>,
    colors: &[String],
) -> String {
    let mut fragments = vec![base.to_string()];
    if tileable {
        fragments.push("seamless pattern, perfectly tileable, repeating design".to_string());
    }
    if let Some(density) = density {
        fragments.push(density.phrase().to_string());
    }
    let colors = colors
        .iter()
        .map(|color| color.trim())
        .filter(|color| !color.is_empty())
        .collect::<Vec<_>>();
    if !colors.is_empty() {
        fragments.push(format!("color palette: {}", colors.join(", ")));
    }
    fragments.join(", ")
}

pub fn story_prompts(base: &str, scenes: usize) -> Vec<String> {
    (1..=scenes)
        .map(|scene| {
            format!(
                "{base} - Scene {scene} of {scenes}. Consistent art style and characters throughout all scenes."
            )
        })
        .collect()
}

pub fn diagram_prompt(base: &str, diagram_type: Option<DiagramType>, labeled: bool) -> String {
    let mut prompt = match diagram_type {
        Some(diagram_type) => format!("{}: {base}", diagram_type.phrase()),
        None => format!("Technical diagram: {base}"),
    };
    if labeled {
        prompt.push_str(", with clear labels and annotations");
    }
    prompt.push_str(", professional, clean design, easy to understand");
    prompt
}
