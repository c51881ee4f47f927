use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Merged configuration from the layered settings files. Engine
/// defaults match the constants the pipeline was tuned with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub gap_threshold: f32,
    pub span_pad: f32,
    pub min_span_size: f32,
    pub oversample: f32,
    pub background: String,
    pub font_path: Option<String>,
    pub font_family: Option<String>,
    pub rewrite_model: Option<String>,
    pub rewrite_base_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gap_threshold: 3.0,
            span_pad: 0.3,
            min_span_size: 5.0,
            oversample: 2.0,
            background: "sampled".to_string(),
            font_path: None,
            font_family: None,
            rewrite_model: None,
            rewrite_base_url: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    engine: Option<EngineSection>,
    font: Option<FontSection>,
    rewrite: Option<RewriteSection>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSection {
    gap_threshold: Option<f32>,
    span_pad: Option<f32>,
    min_span_size: Option<f32>,
    oversample: Option<f32>,
    background: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSection {
    path: Option<String>,
    family: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RewriteSection {
    model: Option<String>,
    base_url: Option<String>,
}

/// Loads settings from the working directory, then the home config
/// directory, then an optional explicit path; later files win
/// field-by-field.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(engine) = incoming.engine {
            if let Some(value) = engine.gap_threshold {
                if value > 0.0 {
                    self.gap_threshold = value;
                }
            }
            if let Some(value) = engine.span_pad {
                if value >= 0.0 {
                    self.span_pad = value;
                }
            }
            if let Some(value) = engine.min_span_size {
                if value >= 0.0 {
                    self.min_span_size = value;
                }
            }
            if let Some(value) = engine.oversample {
                if value > 0.0 {
                    self.oversample = value;
                }
            }
            if let Some(value) = engine.background {
                if !value.trim().is_empty() {
                    self.background = value;
                }
            }
        }
        if let Some(font) = incoming.font {
            if let Some(path) = font.path {
                if !path.trim().is_empty() {
                    self.font_path = Some(path);
                }
            }
            if let Some(family) = font.family {
                if !family.trim().is_empty() {
                    self.font_family = Some(family);
                }
            }
        }
        if let Some(rewrite) = incoming.rewrite {
            if let Some(model) = rewrite.model {
                if !model.trim().is_empty() {
                    self.rewrite_model = Some(model);
                }
            }
            if let Some(base_url) = rewrite.base_url {
                if !base_url.trim().is_empty() {
                    self.rewrite_base_url = Some(base_url);
                }
            }
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".inplace-translator"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> SettingsFile {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn merge_overrides_engine_fields() {
        let mut settings = Settings::default();
        settings.merge(parse(
            r#"
[engine]
gap_threshold = 5.0
background = "flat"
"#,
        ));
        assert_eq!(settings.gap_threshold, 5.0);
        assert_eq!(settings.background, "flat");
        // Untouched fields keep their defaults.
        assert_eq!(settings.oversample, 2.0);
    }

    #[test]
    fn merge_rejects_invalid_values() {
        let mut settings = Settings::default();
        settings.merge(parse(
            r#"
[engine]
gap_threshold = -1.0
oversample = 0.0
background = "  "
"#,
        ));
        assert_eq!(settings.gap_threshold, 3.0);
        assert_eq!(settings.oversample, 2.0);
        assert_eq!(settings.background, "sampled");
    }

    #[test]
    fn merge_picks_up_font_and_rewrite_sections() {
        let mut settings = Settings::default();
        settings.merge(parse(
            r#"
[font]
path = "/usr/share/fonts/NotoSans-Regular.ttf"

[rewrite]
model = "gpt-4o"
"#,
        ));
        assert_eq!(
            settings.font_path.as_deref(),
            Some("/usr/share/fonts/NotoSans-Regular.ttf")
        );
        assert_eq!(settings.rewrite_model.as_deref(), Some("gpt-4o"));
    }
}
