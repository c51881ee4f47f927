use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use resvg::render;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::Pixmap;
use usvg::{Options, Tree, fontdb};

use super::{PageId, RenderSurface};
use crate::background::Rgb;
use crate::font::{FontMetrics, measure_text_width};
use crate::layout::Rect;

const FIT_EPSILON: f32 = 0.01;
const BASELINE_RATIO: f32 = 0.8;

#[derive(Debug, Clone)]
enum Primitive {
    Image {
        rect: Rect,
        png: Vec<u8>,
    },
    Fill {
        rect: Rect,
        color: Rgb,
    },
    TextBox {
        rect: Rect,
        lines: Vec<String>,
        font_size: f32,
        line_height: f32,
    },
    Text {
        origin: (f32, f32),
        text: String,
        font_size: f32,
    },
}

#[derive(Debug, Clone)]
struct PageState {
    width: f32,
    height: f32,
    primitives: Vec<Primitive>,
}

/// Render surface that accumulates primitives per page, rasterizes
/// each page through SVG, and assembles the output PDF from the page
/// images. Because every page is rebuilt from scratch, no original
/// glyphs can survive underneath the painted patches.
pub struct SvgSurface {
    pages: Vec<PageState>,
    font: Option<FontMetrics>,
    oversample: f32,
}

impl SvgSurface {
    pub fn new(font: Option<FontMetrics>, oversample: f32) -> Self {
        Self {
            pages: Vec::new(),
            font,
            oversample: if oversample > 0.0 { oversample } else { 2.0 },
        }
    }

    fn page_mut(&mut self, page: PageId) -> Result<&mut PageState> {
        self.pages
            .get_mut(page.0)
            .ok_or_else(|| anyhow!("unknown page handle {}", page.0))
    }

    /// The SVG document for one page, as fed to the rasterizer.
    pub fn page_svg(&self, page: PageId) -> Result<String> {
        let state = self
            .pages
            .get(page.0)
            .ok_or_else(|| anyhow!("unknown page handle {}", page.0))?;
        Ok(self.emit_svg(state))
    }

    fn emit_svg(&self, state: &PageState) -> String {
        let px_w = (state.width * self.oversample).round().max(1.0) as u32;
        let px_h = (state.height * self.oversample).round().max(1.0) as u32;
        let font_family = self.font.as_ref().and_then(|font| font.family());

        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{px_w}" height="{px_h}" viewBox="0 0 {vw} {vh}">"#,
            vw = state.width,
            vh = state.height
        ));
        svg.push_str(&format!(
            r##"<rect x="0" y="0" width="{w}" height="{h}" fill="#ffffff"/>"##,
            w = state.width,
            h = state.height
        ));

        for primitive in &state.primitives {
            match primitive {
                Primitive::Image { rect, png } => {
                    let uri = format!("data:image/png;base64,{}", BASE64.encode(png));
                    svg.push_str(&format!(
                        r#"<image href="{uri}" xlink:href="{uri}" x="{x}" y="{y}" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
                        x = rect.x0,
                        y = rect.y0,
                        w = rect.width(),
                        h = rect.height()
                    ));
                }
                Primitive::Fill { rect, color } => {
                    svg.push_str(&format!(
                        r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="{fill}"/>"#,
                        x = rect.x0,
                        y = rect.y0,
                        w = rect.width(),
                        h = rect.height(),
                        fill = color.to_css()
                    ));
                }
                Primitive::TextBox {
                    rect,
                    lines,
                    font_size,
                    line_height,
                } => {
                    let mut baseline = rect.y0 + font_size * BASELINE_RATIO;
                    for line in lines {
                        push_text_element(
                            &mut svg,
                            rect.x0,
                            baseline,
                            line,
                            *font_size,
                            font_family,
                        );
                        baseline += font_size * line_height;
                    }
                }
                Primitive::Text {
                    origin,
                    text,
                    font_size,
                } => {
                    push_text_element(&mut svg, origin.0, origin.1, text, *font_size, font_family);
                }
            }
        }

        svg.push_str("</svg>");
        svg
    }

    fn render_page_png(&self, state: &PageState) -> Result<Vec<u8>> {
        let svg = self.emit_svg(state);

        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        if let Some(font) = &self.font {
            db.load_font_data(font.data().to_vec());
        }
        let options = Options {
            fontdb: Arc::new(db),
            ..Options::default()
        };
        let tree = Tree::from_str(&svg, &options).with_context(|| "failed to parse page SVG")?;
        let size = tree.size().to_int_size();
        let mut pixmap = Pixmap::new(size.width(), size.height())
            .ok_or_else(|| anyhow!("empty page size"))?;
        let mut pixmap_mut = pixmap.as_mut();
        render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);

        let image =
            image::RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
                .ok_or_else(|| anyhow!("failed to build image buffer from page SVG"))?;
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        image::DynamicImage::ImageRgba8(image)
            .to_rgb8()
            .write_to(&mut cursor, image::ImageFormat::Png)
            .with_context(|| "failed to encode rendered page")?;
        Ok(bytes)
    }
}

impl RenderSurface for SvgSurface {
    fn create_page(&mut self, width: f32, height: f32) -> Result<PageId> {
        if width <= 0.0 || height <= 0.0 {
            return Err(anyhow!("page size must be positive ({width} x {height})"));
        }
        self.pages.push(PageState {
            width,
            height,
            primitives: Vec::new(),
        });
        Ok(PageId(self.pages.len() - 1))
    }

    fn paint_image(&mut self, page: PageId, rect: Rect, png: &[u8]) -> Result<()> {
        let state = self.page_mut(page)?;
        state.primitives.push(Primitive::Image {
            rect,
            png: png.to_vec(),
        });
        Ok(())
    }

    fn fill_rect(&mut self, page: PageId, rect: Rect, color: Rgb) -> Result<()> {
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            return Err(anyhow!("cannot fill degenerate rectangle"));
        }
        let state = self.page_mut(page)?;
        state.primitives.push(Primitive::Fill { rect, color });
        Ok(())
    }

    fn draw_text_box(
        &mut self,
        page: PageId,
        rect: Rect,
        text: &str,
        font_size: f32,
        line_height: f32,
    ) -> Result<bool> {
        let font = self.font.clone();
        let lines = wrap_text(text, rect.width(), font_size, font.as_ref());
        let block_height = lines.len() as f32 * font_size * line_height;
        let max_line_width = lines
            .iter()
            .map(|line| measure_text_width(line, font_size, font.as_ref()))
            .fold(0.0, f32::max);
        if block_height > rect.height() + FIT_EPSILON
            || max_line_width > rect.width() + FIT_EPSILON
        {
            return Ok(false);
        }
        let state = self.page_mut(page)?;
        state.primitives.push(Primitive::TextBox {
            rect,
            lines,
            font_size,
            line_height,
        });
        Ok(true)
    }

    fn draw_text(
        &mut self,
        page: PageId,
        origin: (f32, f32),
        text: &str,
        font_size: f32,
    ) -> Result<()> {
        let state = self.page_mut(page)?;
        state.primitives.push(Primitive::Text {
            origin,
            text: text.to_string(),
            font_size,
        });
        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        use printpdf::{Image, ImageTransform, Mm, PdfDocument};

        if self.pages.is_empty() {
            return Err(anyhow!("no pages to save"));
        }

        let mut doc = None;
        let mut placements = Vec::new();
        for (idx, state) in self.pages.iter().enumerate() {
            let png = self.render_page_png(state)?;
            let decoded = printpdf::image_crate::load_from_memory(&png)
                .with_context(|| format!("failed to decode rendered page {idx}"))?;
            let width_mm = pt_to_mm(state.width);
            let height_mm = pt_to_mm(state.height);

            if idx == 0 {
                let (handle, page, layer) =
                    PdfDocument::new("translated", Mm(width_mm), Mm(height_mm), "Layer 1");
                doc = Some(handle);
                placements.push((page, layer, decoded));
            } else if let Some(handle) = doc.as_mut() {
                let (page, layer) =
                    handle.add_page(Mm(width_mm), Mm(height_mm), format!("Layer {}", idx + 1));
                placements.push((page, layer, decoded));
            }
        }

        let doc = doc.ok_or_else(|| anyhow!("no pages to save"))?;
        let dpi = 72.0 * self.oversample;
        for (page, layer, decoded) in placements.into_iter() {
            let current_layer = doc.get_page(page).get_layer(layer);
            let pdf_image = Image::from_dynamic_image(&decoded);
            let transform = ImageTransform {
                translate_x: Some(Mm(0.0)),
                translate_y: Some(Mm(0.0)),
                rotate: None,
                scale_x: Some(1.0),
                scale_y: Some(1.0),
                dpi: Some(dpi),
            };
            pdf_image.add_to_layer(current_layer, transform);
        }

        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create output: {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        doc.save(&mut writer)
            .with_context(|| format!("failed to write output: {}", path.display()))?;
        Ok(())
    }
}

fn push_text_element(
    svg: &mut String,
    x: f32,
    baseline: f32,
    text: &str,
    font_size: f32,
    font_family: Option<&str>,
) {
    let escaped = escape_xml(text);
    if let Some(family) = font_family {
        svg.push_str(&format!(
            r##"<text x="{x}" y="{baseline}" font-size="{font_size}" fill="#000000" font-family="{family}">{escaped}</text>"##,
            family = escape_xml(family)
        ));
    } else {
        svg.push_str(&format!(
            r##"<text x="{x}" y="{baseline}" font-size="{font_size}" fill="#000000">{escaped}</text>"##
        ));
    }
}

fn pt_to_mm(pt: f32) -> f32 {
    pt / 72.0 * 25.4
}

/// Greedy word wrap against measured advance widths. CJK characters
/// break anywhere; latin words stay whole even when a single word is
/// wider than the box (the caller detects that as overflow).
fn wrap_text(text: &str, max_width: f32, font_size: f32, font: Option<&FontMetrics>) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for token in tokenize(text) {
        if token == "\n" {
            if !current.trim().is_empty() {
                lines.push(current.trim_end().to_string());
            }
            current.clear();
        } else if token == " " {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
        } else {
            let mut candidate = current.clone();
            candidate.push_str(&token);
            if !current.trim().is_empty()
                && measure_text_width(candidate.trim_end(), font_size, font) > max_width
            {
                lines.push(current.trim_end().to_string());
                current = token;
            } else {
                current = candidate;
            }
        }
    }
    if !current.trim().is_empty() {
        lines.push(current.trim_end().to_string());
    }
    if lines.is_empty() {
        lines.push(text.trim().to_string());
    }
    lines
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch == '\n' {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push("\n".to_string());
            continue;
        }
        if ch.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(" ".to_string());
            continue;
        }
        let is_cjk = matches!(
            ch as u32,
            0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF
        );
        if is_cjk {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(ch.to_string());
            continue;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::WHITE;

    #[test]
    fn wrap_splits_on_measured_width() {
        let lines = wrap_text("aaaa bbbb cccc", 40.0, 10.0, None);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(measure_text_width(line, 10.0, None) <= 40.0 + FIT_EPSILON);
        }
    }

    #[test]
    fn wrap_keeps_short_text_on_one_line() {
        assert_eq!(wrap_text("hello", 200.0, 12.0, None), vec!["hello"]);
    }

    #[test]
    fn overflowing_text_box_records_nothing() {
        let mut surface = SvgSurface::new(None, 2.0);
        let page = surface.create_page(100.0, 100.0).unwrap();
        let tight = Rect::new(0.0, 0.0, 20.0, 5.0);
        let fitted = surface
            .draw_text_box(page, tight, "far too much text for this box", 12.0, 1.05)
            .unwrap();
        assert!(!fitted);
        let svg = surface.page_svg(page).unwrap();
        assert!(!svg.contains("far too much"));
    }

    #[test]
    fn fitting_text_box_appears_in_svg() {
        let mut surface = SvgSurface::new(None, 2.0);
        let page = surface.create_page(200.0, 100.0).unwrap();
        let rect = Rect::new(10.0, 10.0, 190.0, 40.0);
        let fitted = surface
            .draw_text_box(page, rect, "Bonjour le monde", 12.0, 1.05)
            .unwrap();
        assert!(fitted);
        let svg = surface.page_svg(page).unwrap();
        assert!(svg.contains("Bonjour le monde"));
    }

    #[test]
    fn fill_rect_uses_css_color() {
        let mut surface = SvgSurface::new(None, 2.0);
        let page = surface.create_page(50.0, 50.0).unwrap();
        surface
            .fill_rect(page, Rect::new(1.0, 2.0, 10.0, 12.0), WHITE)
            .unwrap();
        let svg = surface.page_svg(page).unwrap();
        assert!(svg.contains(r##"fill="#ffffff""##));
    }

    #[test]
    fn xml_escaping_covers_markup_characters() {
        assert_eq!(escape_xml("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }

    #[test]
    fn unknown_page_handle_is_an_error() {
        let mut surface = SvgSurface::new(None, 2.0);
        assert!(
            surface
                .fill_rect(PageId(3), Rect::new(0.0, 0.0, 1.0, 1.0), WHITE)
                .is_err()
        );
    }
}
