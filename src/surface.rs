use anyhow::Result;
use std::path::Path;

use crate::background::Rgb;
use crate::layout::Rect;

mod svg;

pub use svg::SvgSurface;

/// Handle to one output page owned by a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageId(pub usize);

/// Drawing primitives for building the output document. Pages are
/// append-only: the pipeline creates a page, paints the source copy,
/// then layers erase rectangles and replacement text on top.
pub trait RenderSurface {
    /// Creates a page of the given size in points and returns its handle.
    fn create_page(&mut self, width: f32, height: f32) -> Result<PageId>;

    /// Paints an encoded PNG image into `rect`.
    fn paint_image(&mut self, page: PageId, rect: Rect, png: &[u8]) -> Result<()>;

    /// Fills `rect` with a solid color.
    fn fill_rect(&mut self, page: PageId, rect: Rect, color: Rgb) -> Result<()>;

    /// Draws `text` word-wrapped and left-aligned inside `rect`.
    /// Returns `Ok(true)` when the wrapped block fits at `font_size`;
    /// on overflow nothing is recorded and `Ok(false)` comes back so
    /// the caller can retry at a smaller size.
    fn draw_text_box(
        &mut self,
        page: PageId,
        rect: Rect,
        text: &str,
        font_size: f32,
        line_height: f32,
    ) -> Result<bool>;

    /// Draws a single unwrapped line with its baseline at `origin`.
    /// May overflow; used only as the last-resort fit fallback.
    fn draw_text(&mut self, page: PageId, origin: (f32, f32), text: &str, font_size: f32)
    -> Result<()>;

    /// Serializes all pages to `path` in one shot. Partial documents
    /// are never written.
    fn save(&mut self, path: &Path) -> Result<()>;
}
