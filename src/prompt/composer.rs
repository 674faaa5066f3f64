use std::collections::HashSet;

pub const SAFE_PERSON_PHRASE: &str = "non-celebrity adult person";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    Cinematic,
    StudioPortrait,
    ProductShot,
    Illustration,
    ThreeDRender,
    #[default]
    None,
}

impl Preset {
    pub fn bundle(self) -> &'static [&'static str] {
        match self {
            Preset::Cinematic => &[
                "cinematic look",
                "dramatic lighting",
                "rich contrast",
                "filmic color grading",
            ],
            Preset::StudioPortrait => &[
                "studio portrait",
                "soft key light",
                "subtle rim light",
                "seamless backdrop",
            ],
            Preset::ProductShot => &[
                "product photography",
                "clean background",
                "soft shadow",
                "commercial lighting",
            ],
            Preset::Illustration => &[
                "highly detailed illustration",
                "clean linework",
                "balanced shading",
            ],
            Preset::ThreeDRender => &[
                "ultra-detailed 3D render",
                "physically based rendering",
                "global illumination",
            ],
            Preset::None => &[],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Preset::Cinematic => "Cinematic",
            Preset::StudioPortrait => "Studio Portrait",
            Preset::ProductShot => "Product Shot",
            Preset::Illustration => "Illustration",
            Preset::ThreeDRender => "3D Render",
            Preset::None => "None",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cinematic" => Some(Preset::Cinematic),
            "studio portrait" | "studio-portrait" | "portrait" => Some(Preset::StudioPortrait),
            "product shot" | "product-shot" | "product" => Some(Preset::ProductShot),
            "illustration" => Some(Preset::Illustration),
            "3d render" | "3d-render" | "3d" => Some(Preset::ThreeDRender),
            "none" => Some(Preset::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Medium {
    #[default]
    Photo,
    Illustration,
    ThreeDRender,
}

impl Medium {
    pub fn bundle(self) -> &'static [&'static str] {
        match self {
            Medium::Photo => &["photograph", "realistic details", "sharp focus"],
            Medium::Illustration => &["illustration", "hand-drawn feel"],
            Medium::ThreeDRender => &["3D render", "ray tracing aesthetics"],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Medium::Photo => "Photo",
            Medium::Illustration => "Illustration",
            Medium::ThreeDRender => "3D Render",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "photo" | "photograph" => Some(Medium::Photo),
            "illustration" => Some(Medium::Illustration),
            "3d render" | "3d-render" | "3d" => Some(Medium::ThreeDRender),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Square,
    Portrait3x4,
    Landscape4x3,
    Wide16x9,
    Tall9x16,
}

impl AspectRatio {
    /// Wire code used by the generation API.
    pub fn code(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Wide16x9 => "16:9",
            AspectRatio::Tall9x16 => "9:16",
        }
    }

    /// Descriptive phrase the composer appends for this ratio.
    pub fn phrase(self) -> &'static str {
        match self {
            AspectRatio::Wide16x9 => "wide 16:9 composition",
            AspectRatio::Tall9x16 => "vertical 9:16 composition",
            AspectRatio::Landscape4x3 => "classic 4:3 composition",
            AspectRatio::Portrait3x4 => "vertical 3:4 composition",
            AspectRatio::Square => "square composition",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1:1" => Some(AspectRatio::Square),
            "3:4" => Some(AspectRatio::Portrait3x4),
            "4:3" => Some(AspectRatio::Landscape4x3),
            "16:9" => Some(AspectRatio::Wide16x9),
            "9:16" => Some(AspectRatio::Tall9x16),
            _ => None,
        }
    }
}

/// Input to [`compose`]. The free-text fields are already resolved to
/// `Option` here; the UI-level "None" sentinel is translated by
/// [`optional_field`] before this struct is built.
#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    pub base: String,
    pub preset: Preset,
    pub medium: Medium,
    pub style: Option<String>,
    pub lighting: Option<String>,
    pub composition: Option<String>,
    pub color: Option<String>,
    pub mood: Option<String>,
    pub quality: Option<String>,
    pub aspect_phrase: Option<String>,
    pub lens_mm: String,
    pub aperture: String,
    pub safe_person: bool,
}

/// Translates a raw UI field value to its optional form. The literal
/// sentinel "None" (exact match on the trimmed value, case-sensitive)
/// and whitespace-only input both mean "not provided"; anything else is
/// passed through verbatim, untrimmed.
pub fn optional_field(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "None" {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Assembles the enhanced prompt from the base text plus the stylistic
/// options. Pure and deterministic: fragments are collected in a fixed
/// order, deduplicated on first occurrence, and joined with ", ".
pub fn compose(options: &PromptOptions) -> String {
    let mut fragments: Vec<String> = Vec::new();

    let base = options.base.trim();
    if !base.is_empty() {
        fragments.push(base.to_string());
    }

    for part in options.preset.bundle() {
        fragments.push((*part).to_string());
    }
    for part in options.medium.bundle() {
        fragments.push((*part).to_string());
    }

    for field in [
        &options.style,
        &options.lighting,
        &options.composition,
        &options.color,
        &options.mood,
        &options.quality,
        &options.aspect_phrase,
    ] {
        if let Some(value) = field {
            fragments.push(value.clone());
        }
    }

    // Camera details apply to photographs only; lens and aperture form a
    // single fragment so they dedup as a unit.
    if options.medium == Medium::Photo {
        let mut camera_bits: Vec<String> = Vec::new();
        let lens = options.lens_mm.trim();
        if !lens.is_empty() {
            camera_bits.push(format!("{lens}mm lens"));
        }
        let aperture = options.aperture.trim();
        if !aperture.is_empty() {
            camera_bits.push(format!("{aperture} aperture"));
        }
        if !camera_bits.is_empty() {
            fragments.push(camera_bits.join(", "));
        }
    }

    if options.safe_person {
        fragments.push(SAFE_PERSON_PHRASE.to_string());
    }

    // Dedup while preserving insertion order. Fragments are normalized by
    // stripping surrounding whitespace and then surrounding commas; the
    // comma strip does not touch commas embedded in free-text values.
    let mut seen: HashSet<String> = HashSet::new();
    let mut clean: Vec<String> = Vec::new();
    for fragment in fragments {
        let normalized = fragment.trim().trim_matches(',');
        if normalized.is_empty() || seen.contains(normalized) {
            continue;
        }
        seen.insert(normalized.to_string());
        clean.push(normalized.to_string());
    }

    clean.join(", ")
}
