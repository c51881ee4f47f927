use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};

pub mod background;
pub mod extract;
pub mod fit;
pub mod font;
pub mod grouping;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod rewrite;
pub mod settings;
pub mod surface;

pub use background::BackgroundStrategy;
pub use pipeline::{EngineOptions, PageReport};

#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub output: PathBuf,
    pub lang: String,
    pub model: Option<String>,
    pub key: Option<String>,
    pub background: Option<String>,
    pub settings_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub pages: usize,
    pub lines: usize,
    pub degraded: usize,
    pub overflowed: usize,
}

impl RunSummary {
    fn from_reports(reports: &[PageReport]) -> Self {
        Self {
            pages: reports.len(),
            lines: reports.iter().map(|report| report.lines).sum(),
            degraded: reports.iter().map(|report| report.degraded).sum(),
            overflowed: reports.iter().map(|report| report.overflowed).sum(),
        }
    }
}

/// Translates `config.input` into `config.output`, replacing page
/// text with its translation while keeping layout and imagery intact.
pub async fn run(config: Config) -> Result<RunSummary> {
    let settings = settings::load_settings(config.settings_path.as_deref())?;
    let mut options = EngineOptions::from_settings(&settings)?;
    if let Some(background) = config.background.as_deref() {
        options.background = BackgroundStrategy::parse(background)?;
    }

    let key = config
        .key
        .clone()
        .or_else(|| get_env("OPENAI_API_KEY"))
        .ok_or_else(|| anyhow!("no API key found (set OPENAI_API_KEY or pass --key)"))?;
    let mut rewriter = rewrite::OpenAiRewriter::new(key);
    if let Some(model) = config.model.clone().or_else(|| settings.rewrite_model.clone()) {
        rewriter = rewriter.with_model(model);
    }
    if let Some(base_url) = settings.rewrite_base_url.clone() {
        rewriter = rewriter.with_base_url(base_url);
    }

    let source = extract::MutoolSource::open(&config.input)?;
    let replacement_font = font::resolve_font(
        settings.font_path.as_deref().map(Path::new),
        settings.font_family.as_deref(),
    );
    let mut surface = surface::SvgSurface::new(replacement_font, options.oversample);

    let reports = pipeline::translate_document(
        &source,
        &mut surface,
        &rewriter,
        &config.lang,
        &options,
        &config.output,
    )
    .await?;

    Ok(RunSummary::from_reports(&reports))
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
