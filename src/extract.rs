use anyhow::{Context, Result, anyhow};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

use crate::background::PageRaster;
use crate::layout::{Block, BlockKind, Line, PageLayout, Rect, Span, union_of};

/// Read side of a paginated document: text geometry and page rasters.
pub trait DocumentSource {
    fn page_count(&self) -> usize;

    /// Page dimensions in points.
    fn page_size(&self, index: usize) -> Result<(f32, f32)>;

    /// Blocks -> lines -> spans for one page, in reading order.
    fn layout(&self, index: usize) -> Result<PageLayout>;

    /// Renders the page once at `oversample` times its point size.
    fn rasterize(&self, index: usize, oversample: f32) -> Result<PageRaster>;
}

/// Document source backed by the `mutool` CLI: structured text from
/// `mutool draw -F stext`, page rasters from `mutool draw -r` (with a
/// `pdftoppm` fallback for rasters only).
pub struct MutoolSource {
    path: PathBuf,
    layouts: Vec<PageLayout>,
}

impl MutoolSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!("document not found: {}", path.display()));
        }
        let xml = run_stext(path)?;
        let layouts = parse_stext(&xml)
            .with_context(|| format!("failed to parse layout of {}", path.display()))?;
        if layouts.is_empty() {
            return Err(anyhow!("no pages found in {}", path.display()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            layouts,
        })
    }
}

impl DocumentSource for MutoolSource {
    fn page_count(&self) -> usize {
        self.layouts.len()
    }

    fn page_size(&self, index: usize) -> Result<(f32, f32)> {
        let layout = self
            .layouts
            .get(index)
            .ok_or_else(|| anyhow!("page {} out of range", index))?;
        Ok((layout.width, layout.height))
    }

    fn layout(&self, index: usize) -> Result<PageLayout> {
        self.layouts
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("page {} out of range", index))
    }

    fn rasterize(&self, index: usize, oversample: f32) -> Result<PageRaster> {
        let (width, _) = self.page_size(index)?;
        let dpi = 72.0 * oversample.max(1.0);
        let png = render_page_png(&self.path, index, dpi)?;
        let image = image::load_from_memory(&png)
            .with_context(|| "failed to decode rendered page")?
            .to_rgb8();
        let scale = if width > 0.0 {
            image.width() as f32 / width
        } else {
            oversample
        };
        Ok(PageRaster::new(image, scale))
    }
}

fn run_stext(path: &Path) -> Result<String> {
    if !command_exists("mutool") {
        return Err(anyhow!(
            "text extraction requires mutool (install mupdf-tools)"
        ));
    }
    let dir = tempdir().with_context(|| "failed to create temp dir for extraction")?;
    let out_path = dir.path().join("layout.xml");
    let output = Command::new("mutool")
        .arg("draw")
        .arg("-F")
        .arg("stext")
        .arg("-o")
        .arg(&out_path)
        .arg(path)
        .output()
        .with_context(|| "failed to run mutool")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("mutool stext failed: {}", stderr.trim()));
    }
    fs::read_to_string(&out_path).with_context(|| "failed to read extracted layout")
}

fn render_page_png(path: &Path, index: usize, dpi: f32) -> Result<Vec<u8>> {
    let dir = tempdir().with_context(|| "failed to create temp dir for raster")?;
    let page_number = index + 1;

    if command_exists("mutool") {
        let out_path = dir.path().join("page.png");
        let output = Command::new("mutool")
            .arg("draw")
            .arg("-r")
            .arg(format!("{dpi}"))
            .arg("-o")
            .arg(&out_path)
            .arg(path)
            .arg(page_number.to_string())
            .output()
            .with_context(|| "failed to run mutool")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("mutool draw failed: {}", stderr.trim()));
        }
        return fs::read(&out_path).with_context(|| "failed to read rendered page");
    }

    if command_exists("pdftoppm") {
        let output = Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(format!("{dpi}"))
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg(path)
            .arg(dir.path().join("page"))
            .output()
            .with_context(|| "failed to run pdftoppm")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("pdftoppm failed: {}", stderr.trim()));
        }
        let mut entries: Vec<_> = fs::read_dir(dir.path())
            .with_context(|| "failed to read raster directory")?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("png"))
                    .unwrap_or(false)
            })
            .collect();
        entries.sort();
        let first = entries
            .first()
            .ok_or_else(|| anyhow!("pdftoppm produced no output"))?;
        return fs::read(first).with_context(|| "failed to read rendered page");
    }

    Err(anyhow!(
        "page rendering requires mutool or pdftoppm (install mupdf or poppler)"
    ))
}

fn command_exists(name: &str) -> bool {
    Command::new(name).arg("-v").output().is_ok()
}

#[derive(Default)]
struct StextBuilder {
    pages: Vec<PageLayout>,
    page_size: Option<(f32, f32)>,
    blocks: Vec<Block>,
    block_bbox: Option<Rect>,
    lines: Vec<Line>,
    spans: Vec<Span>,
    span_text: String,
    span_bbox: Option<Rect>,
    span_size: f32,
    in_text_block: bool,
}

/// Parses the XML that `mutool draw -F stext` emits: pages containing
/// text blocks (lines of per-font char runs with quads) and image
/// elements for non-text regions.
pub(crate) fn parse_stext(xml: &str) -> Result<Vec<PageLayout>> {
    let mut reader = Reader::from_str(xml);
    let mut builder = StextBuilder::default();

    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element) => match element.name().as_ref() {
                b"page" => {
                    let width = attr_f32(&element, b"width")?.unwrap_or(0.0);
                    let height = attr_f32(&element, b"height")?.unwrap_or(0.0);
                    builder.page_size = Some((width, height));
                    builder.blocks.clear();
                }
                b"block" => {
                    builder.block_bbox = attr_rect(&element, b"bbox")?;
                    builder.lines.clear();
                    builder.in_text_block = true;
                }
                b"image" => {
                    if builder.page_size.is_some() {
                        let bbox = attr_rect(&element, b"bbox")?
                            .unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));
                        builder.blocks.push(Block {
                            kind: BlockKind::Other,
                            bbox,
                            lines: Vec::new(),
                        });
                    }
                }
                b"line" => {
                    builder.spans.clear();
                }
                b"font" => {
                    builder.finish_span();
                    builder.span_size = attr_f32(&element, b"size")?.unwrap_or(0.0);
                }
                b"char" => {
                    if let Some(value) = attr_string(&element, b"c")? {
                        builder.span_text.push_str(&value);
                    }
                    if let Some(quad) = attr_string(&element, b"quad")? {
                        if let Some(rect) = rect_from_quad(&quad) {
                            builder.span_bbox = Some(match builder.span_bbox {
                                Some(existing) => existing.union(&rect),
                                None => rect,
                            });
                        }
                    }
                }
                _ => {}
            },
            Event::End(element) => match element.name().as_ref() {
                b"font" => builder.finish_span(),
                b"line" => builder.finish_line(),
                b"block" => builder.finish_block(),
                b"page" => builder.finish_page(),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(builder.pages)
}

impl StextBuilder {
    fn finish_span(&mut self) {
        if self.span_text.is_empty() && self.span_bbox.is_none() {
            return;
        }
        let bbox = self.span_bbox.unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));
        self.spans.push(Span {
            text: std::mem::take(&mut self.span_text),
            bbox,
            font_size: self.span_size,
        });
        self.span_bbox = None;
    }

    fn finish_line(&mut self) {
        self.finish_span();
        if !self.spans.is_empty() {
            self.lines.push(Line {
                spans: std::mem::take(&mut self.spans),
            });
        }
    }

    fn finish_block(&mut self) {
        if !self.in_text_block {
            return;
        }
        self.in_text_block = false;
        let lines = std::mem::take(&mut self.lines);
        let bbox = self
            .block_bbox
            .take()
            .or_else(|| union_of(lines.iter().filter_map(|line| line.bbox())))
            .unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));
        self.blocks.push(Block {
            kind: BlockKind::Text,
            bbox,
            lines,
        });
    }

    fn finish_page(&mut self) {
        let Some((width, height)) = self.page_size.take() else {
            return;
        };
        self.pages.push(PageLayout {
            width,
            height,
            blocks: std::mem::take(&mut self.blocks),
        });
    }
}

fn attr_string(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn attr_f32(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<f32>> {
    Ok(attr_string(element, name)?.and_then(|value| value.trim().parse().ok()))
}

fn attr_rect(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<Rect>> {
    let Some(value) = attr_string(element, name)? else {
        return Ok(None);
    };
    let parts = parse_floats(&value);
    if parts.len() != 4 {
        return Ok(None);
    }
    Ok(Some(Rect::new(parts[0], parts[1], parts[2], parts[3])))
}

fn rect_from_quad(quad: &str) -> Option<Rect> {
    let parts = parse_floats(quad);
    if parts.len() != 8 {
        return None;
    }
    let xs = [parts[0], parts[2], parts[4], parts[6]];
    let ys = [parts[1], parts[3], parts[5], parts[7]];
    let x0 = xs.iter().copied().fold(f32::INFINITY, f32::min);
    let x1 = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let y0 = ys.iter().copied().fold(f32::INFINITY, f32::min);
    let y1 = ys.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Some(Rect::new(x0, y0, x1, y1))
}

fn parse_floats(value: &str) -> Vec<f32> {
    value
        .split_whitespace()
        .filter_map(|part| part.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<document name="sample.pdf">
<page id="page1" width="612" height="792">
<block bbox="10 10 100 30">
<line bbox="10 10 100 30" wmode="0" dir="1 0">
<font name="Times" size="12">
<char quad="10 10 20 10 10 30 20 30" x="10" y="27" c="H"/>
<char quad="20 10 30 10 20 30 30 30" x="20" y="27" c="i"/>
</font>
</line>
</block>
<image bbox="200 200 400 400"/>
</page>
</document>
"#;

    #[test]
    fn parses_blocks_lines_and_spans() {
        let pages = parse_stext(SAMPLE).unwrap();
        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.width, 612.0);
        assert_eq!(page.height, 792.0);
        assert_eq!(page.blocks.len(), 2);

        let text_block = &page.blocks[0];
        assert_eq!(text_block.kind, BlockKind::Text);
        assert_eq!(text_block.lines.len(), 1);
        let span = &text_block.lines[0].spans[0];
        assert_eq!(span.text, "Hi");
        assert_eq!(span.font_size, 12.0);
        assert_eq!(span.bbox, Rect::new(10.0, 10.0, 30.0, 30.0));

        assert_eq!(page.blocks[1].kind, BlockKind::Other);
    }

    #[test]
    fn empty_page_parses_to_no_blocks() {
        let xml = r#"<document><page id="page1" width="100" height="200"></page></document>"#;
        let pages = parse_stext(xml).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].blocks.is_empty());
        assert!(!pages[0].has_text());
    }

    #[test]
    fn quad_corners_collapse_to_bbox() {
        let rect = rect_from_quad("1 2 5 2 1 8 5 8").unwrap();
        assert_eq!(rect, Rect::new(1.0, 2.0, 5.0, 8.0));
        assert!(rect_from_quad("1 2 3").is_none());
    }

    #[test]
    fn entity_in_char_attribute_is_unescaped() {
        let xml = r#"<document><page id="p" width="100" height="100">
<block bbox="0 0 10 10"><line bbox="0 0 10 10"><font name="F" size="10">
<char quad="0 0 5 0 0 10 5 10" c="&amp;"/>
</font></line></block></page></document>"#;
        let pages = parse_stext(xml).unwrap();
        assert_eq!(pages[0].blocks[0].lines[0].spans[0].text, "&");
    }
}
