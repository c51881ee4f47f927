use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::background::{BackgroundStrategy, WHITE};
use crate::extract::DocumentSource;
use crate::fit::draw_fitted;
use crate::grouping::group_spans;
use crate::layout::{Rect, union_of};
use crate::rewrite::{RewriteService, Rewritten, rewrite_line};
use crate::settings::Settings;
use crate::surface::{PageId, RenderSurface};

/// Spans narrower or shorter than this have nothing visible to erase.
pub const MIN_ERASE_EXTENT: f32 = 1.0;

/// Knobs for the per-page engine, usually derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum horizontal gap (points) within one span group.
    pub gap_threshold: f32,
    /// Padding added around each erased span footprint.
    pub span_pad: f32,
    /// Spans below this font size are excluded from geometry.
    pub min_span_size: f32,
    /// Source-page raster scale relative to page points.
    pub oversample: f32,
    pub background: BackgroundStrategy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            gap_threshold: 3.0,
            span_pad: 0.3,
            min_span_size: 5.0,
            oversample: 2.0,
            background: BackgroundStrategy::Sampled,
        }
    }
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            gap_threshold: settings.gap_threshold,
            span_pad: settings.span_pad,
            min_span_size: settings.min_span_size,
            oversample: settings.oversample,
            background: BackgroundStrategy::parse(&settings.background)?,
        })
    }
}

/// Per-page accounting, surfaced so callers can report degradation
/// without digging through logs.
#[derive(Debug, Clone, Default)]
pub struct PageReport {
    pub index: usize,
    /// Non-blank lines seen on the page.
    pub lines: usize,
    /// Lines whose text was replaced (translated or kept verbatim).
    pub replaced: usize,
    /// Lines that kept their original text because the rewrite failed.
    pub degraded: usize,
    /// Lines drawn with the overflow fallback.
    pub overflowed: usize,
}

/// Runs the replacement engine for one page: extract, rasterize once,
/// copy the page visual into a fresh output page, then per line erase
/// the original footprint and draw the rewritten text. Per-span and
/// per-line anomalies degrade locally; only source/surface I/O errors
/// propagate.
pub async fn translate_page(
    source: &dyn DocumentSource,
    surface: &mut dyn RenderSurface,
    rewriter: &dyn RewriteService,
    page_index: usize,
    target_lang: &str,
    options: &EngineOptions,
) -> Result<PageReport> {
    let layout = source
        .layout(page_index)
        .with_context(|| format!("failed to extract layout of page {page_index}"))?;
    // One raster per page, taken before any edits. It stays immutable
    // so later paint operations can never be sampled by earlier lines.
    let raster = source
        .rasterize(page_index, options.oversample)
        .with_context(|| format!("failed to rasterize page {page_index}"))?;

    let page = surface.create_page(layout.width, layout.height)?;
    let full_page = Rect::new(0.0, 0.0, layout.width, layout.height);
    surface.paint_image(page, full_page, &raster.encode_png()?)?;

    let mut report = PageReport {
        index: page_index,
        ..PageReport::default()
    };

    if !layout.has_text() {
        warn!(page = page_index, "no extractable text, passing page through");
        return Ok(report);
    }

    for line in layout.text_lines() {
        let text = line.text();
        if text.is_empty() {
            continue;
        }
        report.lines += 1;

        let valid = line.valid_spans(options.min_span_size);
        for group in group_spans(&valid, options.gap_threshold) {
            for span in &group.spans {
                if span.bbox.width() < MIN_ERASE_EXTENT || span.bbox.height() < MIN_ERASE_EXTENT {
                    continue;
                }
                let patch = span.bbox.expanded(options.span_pad);
                let color = match options.background {
                    BackgroundStrategy::Flat => WHITE,
                    BackgroundStrategy::Sampled => {
                        raster.average_over(&patch).unwrap_or(WHITE)
                    }
                };
                if let Err(err) = surface.fill_rect(page, patch, color) {
                    warn!(page = page_index, "erase rejected, span left as-is: {err:#}");
                }
            }
        }

        // Rewrite at line granularity to keep sentence context.
        let replacement = match rewrite_line(rewriter, &text, target_lang).await {
            Rewritten::Translated(translated) => translated,
            Rewritten::Degraded { text, reason } => {
                report.degraded += 1;
                debug!(page = page_index, %reason, "line kept original text");
                text
            }
        };

        let Some(target) = union_of(valid.iter().map(|span| span.bbox)) else {
            continue;
        };
        let base_size = valid.first().map(|span| span.font_size);
        let fit = draw_fitted(
            surface,
            page,
            target.expanded(options.span_pad),
            &replacement,
            base_size,
        );
        if !fit.fitted {
            report.overflowed += 1;
        }
        report.replaced += 1;
    }

    debug!(
        page = page_index,
        lines = report.lines,
        degraded = report.degraded,
        overflowed = report.overflowed,
        "page committed"
    );
    Ok(report)
}

/// Translates every page of `source` in index order and serializes
/// the result to `output` in one shot. A failing save leaves no
/// partial artifact behind the returned error; owned resources are
/// released on both paths by drop.
pub async fn translate_document(
    source: &dyn DocumentSource,
    surface: &mut dyn RenderSurface,
    rewriter: &dyn RewriteService,
    target_lang: &str,
    options: &EngineOptions,
    output: &Path,
) -> Result<Vec<PageReport>> {
    let pages = source.page_count();
    info!(pages, lang = target_lang, "translating document");

    let mut reports = Vec::with_capacity(pages);
    for index in 0..pages {
        let report =
            translate_page(source, surface, rewriter, index, target_lang, options).await?;
        reports.push(report);
    }

    surface
        .save(output)
        .with_context(|| format!("failed to persist output: {}", output.display()))?;
    info!(output = %output.display(), "document saved");
    Ok(reports)
}
