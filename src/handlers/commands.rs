use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::config::CONFIG;
use crate::llm::imagen::rate_limit_hint;
use crate::llm::{
    generate_images, max_images_for_model, GeneratedImage, ImagenRequest, PersonGeneration,
};
use crate::media::{convert_image, inspect_image, zip_gallery, OutputFormat};
use crate::prompt::{compose, optional_field, AspectRatio, Medium, Preset, PromptOptions};
use crate::state::{GalleryImage, HistoryEntry, SessionState};
use crate::utils::logging::read_recent_log_lines;

/// Raw option values as the user typed them. Free-text fields keep the
/// literal "None" sentinel until [`ComposerForm::to_options`] translates
/// it away; the composer itself only ever sees resolved options.
#[derive(Debug, Clone)]
pub struct ComposerForm {
    pub base: String,
    pub preset: Preset,
    pub medium: Medium,
    pub style: String,
    pub lighting: String,
    pub composition: String,
    pub color: String,
    pub mood: String,
    pub quality: String,
    pub lens_mm: String,
    pub aperture: String,
    pub safe_person: bool,
}

impl Default for ComposerForm {
    fn default() -> Self {
        ComposerForm {
            base: String::new(),
            preset: Preset::Cinematic,
            medium: Medium::Photo,
            style: "dramatic, realistic".to_string(),
            lighting: "soft light, volumetric glow".to_string(),
            composition: "rule of thirds, leading lines".to_string(),
            color: "rich, warm tones".to_string(),
            mood: "serene, cinematic".to_string(),
            quality: "highly detailed, crisp, 8k uhd".to_string(),
            lens_mm: "50".to_string(),
            aperture: "f/1.8".to_string(),
            safe_person: false,
        }
    }
}

impl ComposerForm {
    pub fn to_options(&self, aspect: AspectRatio) -> PromptOptions {
        PromptOptions {
            base: self.base.clone(),
            preset: self.preset,
            medium: self.medium,
            style: optional_field(&self.style),
            lighting: optional_field(&self.lighting),
            composition: optional_field(&self.composition),
            color: optional_field(&self.color),
            mood: optional_field(&self.mood),
            quality: optional_field(&self.quality),
            aspect_phrase: Some(aspect.phrase().to_string()),
            lens_mm: self.lens_mm.clone(),
            aperture: self.aperture.clone(),
            safe_person: self.safe_person,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub aspect: AspectRatio,
    pub person_generation: PersonGeneration,
    pub image_count: usize,
    pub output_format: OutputFormat,
    pub use_enhanced: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        GenerationSettings {
            model: CONFIG.imagen_model.clone(),
            aspect: AspectRatio::Square,
            person_generation: PersonGeneration::AllowAdult,
            image_count: 1,
            output_format: OutputFormat::Png,
            use_enhanced: true,
        }
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

pub fn handle_set(
    form: &mut ComposerForm,
    settings: &mut GenerationSettings,
    field: &str,
    value: &str,
) -> Result<String> {
    match field.to_lowercase().as_str() {
        "preset" => {
            form.preset = Preset::parse(value)
                .ok_or_else(|| anyhow!("Unknown preset '{value}' (try: Cinematic, Studio Portrait, Product Shot, Illustration, 3D Render, None)"))?;
            Ok(format!("preset = {}", form.preset.label()))
        }
        "medium" => {
            form.medium = Medium::parse(value)
                .ok_or_else(|| anyhow!("Unknown medium '{value}' (try: Photo, Illustration, 3D Render)"))?;
            Ok(format!("medium = {}", form.medium.label()))
        }
        "style" => {
            form.style = value.to_string();
            Ok(format!("style = {value}"))
        }
        "lighting" => {
            form.lighting = value.to_string();
            Ok(format!("lighting = {value}"))
        }
        "composition" => {
            form.composition = value.to_string();
            Ok(format!("composition = {value}"))
        }
        "color" => {
            form.color = value.to_string();
            Ok(format!("color = {value}"))
        }
        "mood" => {
            form.mood = value.to_string();
            Ok(format!("mood = {value}"))
        }
        "quality" => {
            form.quality = value.to_string();
            Ok(format!("quality = {value}"))
        }
        "lens" => {
            form.lens_mm = value.to_string();
            Ok(format!("lens = {value}"))
        }
        "aperture" => {
            form.aperture = value.to_string();
            Ok(format!("aperture = {value}"))
        }
        "safe-person" | "safe_person" => {
            form.safe_person = parse_switch(value)
                .ok_or_else(|| anyhow!("Expected on/off for safe-person, got '{value}'"))?;
            Ok(format!("safe-person = {}", form.safe_person))
        }
        "aspect" => {
            settings.aspect = AspectRatio::parse(value)
                .ok_or_else(|| anyhow!("Unknown aspect ratio '{value}' (try: 1:1, 3:4, 4:3, 16:9, 9:16)"))?;
            Ok(format!("aspect = {}", settings.aspect.code()))
        }
        "people" => {
            settings.person_generation = PersonGeneration::parse(value).ok_or_else(|| {
                anyhow!("Unknown people policy '{value}' (try: dont_allow, allow_adult, allow_all)")
            })?;
            Ok(format!("people = {}", settings.person_generation.as_str()))
        }
        "count" => {
            let count: usize = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("Expected a number for count, got '{value}'"))?;
            let max = max_images_for_model(&settings.model);
            if count < 1 || count > max {
                bail!("count must be between 1 and {max} for model {}", settings.model);
            }
            settings.image_count = count;
            Ok(format!("count = {count}"))
        }
        "format" => {
            settings.output_format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow!("Unknown output format '{value}' (try: png, jpeg)"))?;
            Ok(format!("format = {}", settings.output_format.label()))
        }
        "model" => {
            let model = match value.trim().to_lowercase().as_str() {
                "default" => CONFIG.imagen_model.clone(),
                "ultra" => CONFIG.imagen_ultra_model.clone(),
                _ => value.trim().to_string(),
            };
            let max = max_images_for_model(&model);
            if settings.image_count > max {
                settings.image_count = max;
            }
            settings.model = model;
            Ok(format!(
                "model = {} (up to {} image(s) per request)",
                settings.model, max
            ))
        }
        "use-enhanced" | "use_enhanced" => {
            settings.use_enhanced = parse_switch(value)
                .ok_or_else(|| anyhow!("Expected on/off for use-enhanced, got '{value}'"))?;
            Ok(format!("use-enhanced = {}", settings.use_enhanced))
        }
        _ => bail!("Unknown field '{field}' (see 'help' for the full list)"),
    }
}

pub fn handle_enhance(
    form: &ComposerForm,
    settings: &GenerationSettings,
    state: &SessionState,
) -> String {
    let enhanced = compose(&form.to_options(settings.aspect));
    state.set_enhanced_preview(enhanced.clone());
    if enhanced.is_empty() {
        "Enhanced prompt is empty (no base prompt and no active options).".to_string()
    } else {
        format!("Enhanced prompt:\n{enhanced}")
    }
}

/// The prompt actually submitted: the enhanced preview when enabled and
/// non-empty, otherwise the raw base prompt.
pub fn effective_prompt(
    form: &ComposerForm,
    settings: &GenerationSettings,
    state: &SessionState,
) -> Option<String> {
    if settings.use_enhanced {
        let preview = state.enhanced_preview();
        let preview = preview.trim();
        if !preview.is_empty() {
            return Some(preview.to_string());
        }
    }
    let base = form.base.trim();
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}

pub async fn handle_generate(
    form: &ComposerForm,
    settings: &GenerationSettings,
    state: &SessionState,
) -> Result<String> {
    if !CONFIG.has_api_key() {
        bail!("No API key configured. Set GEMINI_API_KEY and restart.");
    }

    let Some(prompt) = effective_prompt(form, settings, state) else {
        bail!("Prompt is empty. Use 'prompt <text>' first (or 'enhance').");
    };

    info!("Generating with prompt: {}", prompt);

    let request = ImagenRequest {
        model: settings.model.clone(),
        prompt: prompt.clone(),
        sample_count: settings.image_count,
        aspect_ratio: settings.aspect,
        person_generation: settings.person_generation,
    };

    let images = match generate_images(&request).await {
        Ok(images) => images,
        Err(err) => {
            warn!("Image generation failed: {err}");
            let mut message = err.to_string();
            if let Some(hint) = rate_limit_hint(&err) {
                message.push_str("\n");
                message.push_str(hint);
            }
            return Err(anyhow!(message));
        }
    };

    // An empty result means the service produced nothing (safety block or
    // quota), which is a user-visible outcome rather than a failure.
    if images.is_empty() {
        return Ok(
            "No images returned (possibly blocked by safety filters or quota exhausted)."
                .to_string(),
        );
    }

    let generation_id = state.next_generation_id();
    let (gallery, entry) = build_generation_records(&images, settings, generation_id, prompt);
    let count = gallery.len();
    state.replace_gallery(gallery);
    state.push_history(entry);

    Ok(format!(
        "Generated {count} image(s) as request #{generation_id}. Use 'gallery' to list them."
    ))
}

/// Turns the raw generation result into gallery items and a history
/// entry. Conversion failure keeps the original bytes; the history
/// records the number of images actually produced.
fn build_generation_records(
    images: &[GeneratedImage],
    settings: &GenerationSettings,
    generation_id: u64,
    prompt: String,
) -> (Vec<GalleryImage>, HistoryEntry) {
    let mut gallery = Vec::with_capacity(images.len());
    for (index, image) in images.iter().enumerate() {
        let bytes = match convert_image(&image.bytes, settings.output_format) {
            Ok(converted) => converted,
            Err(err) => {
                warn!(
                    "Keeping original bytes ({}) for image {}: conversion failed: {err}",
                    image.mime_type,
                    index + 1
                );
                image.bytes.clone()
            }
        };
        let file_name = format!(
            "{}_gen{}_{}.{}",
            settings.model,
            generation_id,
            index + 1,
            settings.output_format.extension()
        );
        gallery.push(GalleryImage {
            bytes,
            file_name,
            format: settings.output_format,
        });
    }

    let entry = HistoryEntry {
        request_id: generation_id,
        model: settings.model.clone(),
        prompt_used: prompt,
        aspect_ratio: settings.aspect.code().to_string(),
        person_generation: settings.person_generation.as_str().to_string(),
        image_count: gallery.len(),
        format: settings.output_format,
        created_at: Utc::now(),
    };
    (gallery, entry)
}

pub fn render_show(
    form: &ComposerForm,
    settings: &GenerationSettings,
    state: &SessionState,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Prompt: {}",
        if form.base.is_empty() {
            "(unset)"
        } else {
            form.base.as_str()
        }
    );
    let _ = writeln!(out, "Preset: {} · Medium: {}", form.preset.label(), form.medium.label());
    let _ = writeln!(out, "Style: {}", form.style);
    let _ = writeln!(out, "Lighting: {}", form.lighting);
    let _ = writeln!(out, "Composition: {}", form.composition);
    let _ = writeln!(out, "Color: {}", form.color);
    let _ = writeln!(out, "Mood: {}", form.mood);
    let _ = writeln!(out, "Quality: {}", form.quality);
    let _ = writeln!(out, "Lens: {} · Aperture: {} · Safe person: {}", form.lens_mm, form.aperture, form.safe_person);
    let _ = writeln!(
        out,
        "Model: {} · Aspect: {} · People: {} · Count: {} · Format: {} · Use enhanced: {}",
        settings.model,
        settings.aspect.code(),
        settings.person_generation.as_str(),
        settings.image_count,
        settings.output_format.label(),
        settings.use_enhanced
    );
    let preview = state.enhanced_preview();
    if preview.is_empty() {
        let _ = write!(out, "Enhanced preview: (none — run 'enhance')");
    } else {
        let _ = write!(out, "Enhanced preview:\n{preview}");
    }
    out
}

pub fn render_gallery(state: &SessionState) -> String {
    let gallery = state.gallery();
    if gallery.is_empty() {
        return "Gallery is empty. Run 'generate' first.".to_string();
    }

    let mut out = String::new();
    for (index, item) in gallery.iter().enumerate() {
        match inspect_image(&item.bytes) {
            Ok(info) => {
                let _ = writeln!(
                    out,
                    "[{}] {} · {}x{} · {} · {} bytes",
                    index + 1,
                    item.file_name,
                    info.width,
                    info.height,
                    info.mime_type,
                    item.bytes.len()
                );
            }
            Err(err) => {
                // Preview failure is per-item; the bytes stay downloadable.
                let _ = writeln!(
                    out,
                    "[{}] {} · preview unavailable ({err}) · {} bytes",
                    index + 1,
                    item.file_name,
                    item.bytes.len()
                );
            }
        }
    }
    let _ = write!(out, "Use 'save <n>', 'saveall' or 'zip' to export.");
    out
}

pub async fn handle_save(
    state: &SessionState,
    index: usize,
    path: Option<&str>,
) -> Result<String> {
    if index == 0 || index > state.gallery_len() {
        bail!(
            "No gallery item {index} (gallery has {} item(s))",
            state.gallery_len()
        );
    }
    let item = state
        .gallery_item(index - 1)
        .ok_or_else(|| anyhow!("No gallery item {index}"))?;

    let target = match path {
        Some(path) => PathBuf::from(path),
        None => CONFIG.output_dir.join(&item.file_name),
    };
    write_image_file(&target, &item.bytes).await?;
    Ok(format!("Saved {} to {}", item.file_name, target.display()))
}

pub async fn handle_save_all(state: &SessionState, dir: Option<&str>) -> Result<String> {
    let gallery = state.gallery();
    if gallery.is_empty() {
        bail!("Gallery is empty, nothing to save.");
    }

    let dir = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| CONFIG.output_dir.clone());
    for item in &gallery {
        write_image_file(&dir.join(&item.file_name), &item.bytes).await?;
    }
    Ok(format!(
        "Saved {} image(s) to {}",
        gallery.len(),
        dir.display()
    ))
}

pub async fn handle_zip(state: &SessionState, path: Option<&str>) -> Result<String> {
    let gallery = state.gallery();
    if gallery.is_empty() {
        bail!("Gallery is empty, nothing to export.");
    }

    let bytes = zip_gallery(&gallery)?;
    let target = path
        .map(PathBuf::from)
        .unwrap_or_else(|| CONFIG.output_dir.join("imagen_outputs.zip"));
    write_image_file(&target, &bytes).await?;
    Ok(format!(
        "Wrote {} gallery item(s) to {}",
        gallery.len(),
        target.display()
    ))
}

async fn write_image_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

pub fn render_history(state: &SessionState, limit: Option<usize>) -> String {
    let limit = limit.unwrap_or(CONFIG.history_display_limit);
    let entries = state.recent_history(limit);
    if entries.is_empty() {
        return "No history yet.".to_string();
    }

    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "#{} · {} · {} · {} img · {} · people={} · {}",
            entry.request_id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.model,
            entry.image_count,
            entry.format.label(),
            entry.person_generation,
            entry.aspect_ratio
        );
        let _ = writeln!(out, "    prompt: {}", entry.prompt_used);
    }
    out.trim_end().to_string()
}

pub fn render_diagnostics(settings: &GenerationSettings, state: &SessionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "API key: {}", if CONFIG.has_api_key() { "configured" } else { "MISSING (set GEMINI_API_KEY)" });
    let _ = writeln!(out, "Base URL: {}", CONFIG.imagen_base_url);
    let _ = writeln!(
        out,
        "Model: {} (max {} image(s) per request)",
        settings.model,
        max_images_for_model(&settings.model)
    );
    let _ = writeln!(
        out,
        "Aspect: {} · People: {} · Count: {} · Format: {}",
        settings.aspect.code(),
        settings.person_generation.as_str(),
        settings.image_count,
        settings.output_format.label()
    );
    let _ = writeln!(
        out,
        "Timeout: {}s · Max attempts: {} · Output dir: {}",
        CONFIG.http_timeout_seconds,
        CONFIG.request_max_attempts,
        CONFIG.output_dir.display()
    );
    let _ = writeln!(
        out,
        "Session: {} gallery item(s), {} history entries",
        state.gallery_len(),
        state.history_len()
    );

    match read_recent_log_lines("studio.log", 5) {
        Ok(Some(tail)) => {
            let _ = writeln!(out, "Recent log ({}):", tail.path.display());
            for line in tail.lines {
                let _ = writeln!(out, "  {line}");
            }
        }
        Ok(None) => {
            let _ = writeln!(out, "No log files yet.");
        }
        Err(err) => {
            let _ = writeln!(out, "Could not read logs: {err}");
        }
    }
    out.trim_end().to_string()
}

pub fn render_help() -> &'static str {
    "Commands:\n\
     prompt <text>         set the base prompt\n\
     set <field> <value>   preset, medium, style, lighting, composition, color,\n\
                           mood, quality, lens, aperture, safe-person on|off,\n\
                           aspect, people, count, format, model, use-enhanced on|off\n\
                           (free-text fields accept the literal 'None' to unset)\n\
     enhance               compose the enhanced prompt and store the preview\n\
     show                  print the current form, settings and preview\n\
     generate              submit a generation request\n\
     gallery               list generated images\n\
     save <n> [path]       write one gallery item to disk\n\
     saveall [dir]         write every gallery item to disk\n\
     zip [path]            export the gallery as a ZIP archive\n\
     history [n]           show recent requests (newest first)\n\
     clear                 clear the gallery\n\
     diagnose              config snapshot and recent log lines\n\
     help                  this text\n\
     quit                  end the session"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_translates_the_sentinel_before_composing() {
        let mut form = ComposerForm::default();
        form.base = "a quiet harbor".to_string();
        form.mood = "None".to_string();
        form.style = "none".to_string();

        let options = form.to_options(AspectRatio::Square);
        assert_eq!(options.mood, None);
        assert_eq!(options.style, Some("none".to_string()));
        assert_eq!(options.aspect_phrase, Some("square composition".to_string()));
    }

    #[test]
    fn effective_prompt_prefers_the_enhanced_preview() {
        let mut form = ComposerForm::default();
        form.base = "raw prompt".to_string();
        let settings = GenerationSettings::default();
        let state = SessionState::new();

        assert_eq!(
            effective_prompt(&form, &settings, &state),
            Some("raw prompt".to_string())
        );

        state.set_enhanced_preview("  enhanced prompt  ".to_string());
        assert_eq!(
            effective_prompt(&form, &settings, &state),
            Some("enhanced prompt".to_string())
        );

        let mut raw_settings = settings.clone();
        raw_settings.use_enhanced = false;
        assert_eq!(
            effective_prompt(&form, &raw_settings, &state),
            Some("raw prompt".to_string())
        );
    }

    #[test]
    fn empty_prompt_resolves_to_none() {
        let form = ComposerForm::default();
        let settings = GenerationSettings::default();
        let state = SessionState::new();
        assert_eq!(effective_prompt(&form, &settings, &state), None);
    }

    #[test]
    fn set_validates_enumerated_fields() {
        let mut form = ComposerForm::default();
        let mut settings = GenerationSettings::default();

        handle_set(&mut form, &mut settings, "preset", "Studio Portrait").unwrap();
        assert_eq!(form.preset, Preset::StudioPortrait);

        handle_set(&mut form, &mut settings, "aspect", "16:9").unwrap();
        assert_eq!(settings.aspect, AspectRatio::Wide16x9);

        handle_set(&mut form, &mut settings, "people", "dont_allow").unwrap();
        assert_eq!(settings.person_generation, PersonGeneration::DontAllow);

        assert!(handle_set(&mut form, &mut settings, "aspect", "2:1").is_err());
        assert!(handle_set(&mut form, &mut settings, "nonsense", "x").is_err());
    }

    #[test]
    fn count_is_bounded_by_the_model_tier() {
        let mut form = ComposerForm::default();
        let mut settings = GenerationSettings::default();
        settings.model = "imagen-4.0-generate-preview-06-06".to_string();

        handle_set(&mut form, &mut settings, "count", "4").unwrap();
        assert_eq!(settings.image_count, 4);
        assert!(handle_set(&mut form, &mut settings, "count", "5").is_err());

        // Switching to the ultra tier clamps the count back down.
        handle_set(
            &mut form,
            &mut settings,
            "model",
            "imagen-4.0-ultra-generate-preview-06-06",
        )
        .unwrap();
        assert_eq!(settings.image_count, 1);
        assert!(handle_set(&mut form, &mut settings, "count", "2").is_err());
    }

    #[test]
    fn history_records_the_produced_image_count() {
        let mut settings = GenerationSettings::default();
        settings.image_count = 4;
        // Two images came back for a four-image request; the history
        // entry reflects what the gallery actually holds.
        let images = vec![
            GeneratedImage {
                bytes: b"first".to_vec(),
                mime_type: "image/png".to_string(),
            },
            GeneratedImage {
                bytes: b"second".to_vec(),
                mime_type: "image/png".to_string(),
            },
        ];
        let (gallery, entry) =
            build_generation_records(&images, &settings, 7, "a quiet harbor".to_string());
        assert_eq!(gallery.len(), 2);
        assert_eq!(entry.image_count, 2);
        assert_eq!(entry.request_id, 7);
        assert_eq!(entry.prompt_used, "a quiet harbor");
    }

    #[test]
    fn gallery_file_names_carry_model_generation_and_index() {
        let mut settings = GenerationSettings::default();
        settings.model = "imagen-4.0-generate-preview-06-06".to_string();
        settings.output_format = OutputFormat::Jpeg;
        let images = vec![GeneratedImage {
            bytes: b"not an image".to_vec(),
            mime_type: "image/png".to_string(),
        }];
        let (gallery, _entry) =
            build_generation_records(&images, &settings, 3, "prompt".to_string());
        assert_eq!(
            gallery[0].file_name,
            "imagen-4.0-generate-preview-06-06_gen3_1.jpeg"
        );
        // Undecodable bytes fall back to the original payload.
        assert_eq!(gallery[0].bytes, b"not an image");
    }

    #[test]
    fn enhance_stores_the_preview_in_session_state() {
        let mut form = ComposerForm::default();
        form.base = "a red fox in snow".to_string();
        let settings = GenerationSettings::default();
        let state = SessionState::new();

        let message = handle_enhance(&form, &settings, &state);
        assert!(message.contains("a red fox in snow, cinematic look"));
        assert!(state.enhanced_preview().starts_with("a red fox in snow"));
    }
}
