use tracing::{debug, warn};

use crate::layout::Rect;
use crate::surface::{PageId, RenderSurface};

pub const MAX_ATTEMPTS: usize = 8;
pub const SHRINK_FACTOR: f32 = 0.9;
pub const LINE_HEIGHT: f32 = 1.05;
const DEFAULT_FONT_SIZE: f32 = 12.0;
const MIN_FALLBACK_SIZE: f32 = 6.0;

/// Outcome of fitting one line of replacement text. `fitted` is false
/// when the bounded shrink loop gave up and the single-line fallback
/// was drawn instead (readable, possibly overflowing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitResult {
    pub font_size: f32,
    pub fitted: bool,
}

/// Draws `text` inside `rect`, shrinking from the original span size
/// by a fixed factor until the wrapped block fits or the attempt
/// budget runs out. Never fails: the worst case is an unwrapped line
/// at a clamped minimum size anchored at the box's bottom-left.
/// Deterministic for identical (text, rect, base size) inputs.
pub fn draw_fitted(
    surface: &mut dyn RenderSurface,
    page: PageId,
    rect: Rect,
    text: &str,
    base_size: Option<f32>,
) -> FitResult {
    let base = base_size.filter(|size| *size > 0.0).unwrap_or(DEFAULT_FONT_SIZE);
    let mut font_size = base;

    for attempt in 0..MAX_ATTEMPTS {
        match surface.draw_text_box(page, rect, text, font_size, LINE_HEIGHT) {
            Ok(true) => {
                return FitResult {
                    font_size,
                    fitted: true,
                };
            }
            Ok(false) => {
                debug!(attempt, font_size, "text overflowed, shrinking");
            }
            Err(err) => {
                debug!(attempt, font_size, "text draw rejected: {err:#}");
            }
        }
        font_size *= SHRINK_FACTOR;
    }

    let fallback = (base * 0.6).max(MIN_FALLBACK_SIZE);
    warn!(
        fallback,
        "text never fit after {MAX_ATTEMPTS} attempts, drawing single line"
    );
    if let Err(err) = surface.draw_text(page, (rect.x0, rect.y1), text, fallback) {
        warn!("fallback draw rejected, line dropped visually: {err:#}");
    }
    FitResult {
        font_size: fallback,
        fitted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::Rgb;
    use anyhow::Result;
    use std::path::Path;

    /// Surface that never fits, recording every attempted size.
    #[derive(Default)]
    struct NeverFits {
        attempted_sizes: Vec<f32>,
        fallback_draws: Vec<(f32, (f32, f32))>,
    }

    impl RenderSurface for NeverFits {
        fn create_page(&mut self, _width: f32, _height: f32) -> Result<PageId> {
            Ok(PageId(0))
        }

        fn paint_image(&mut self, _page: PageId, _rect: Rect, _png: &[u8]) -> Result<()> {
            Ok(())
        }

        fn fill_rect(&mut self, _page: PageId, _rect: Rect, _color: Rgb) -> Result<()> {
            Ok(())
        }

        fn draw_text_box(
            &mut self,
            _page: PageId,
            _rect: Rect,
            _text: &str,
            font_size: f32,
            _line_height: f32,
        ) -> Result<bool> {
            self.attempted_sizes.push(font_size);
            Ok(false)
        }

        fn draw_text(
            &mut self,
            _page: PageId,
            origin: (f32, f32),
            _text: &str,
            font_size: f32,
        ) -> Result<()> {
            self.fallback_draws.push((font_size, origin));
            Ok(())
        }

        fn save(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    /// Surface that accepts any size at or below a threshold.
    struct FitsBelow(f32);

    impl RenderSurface for FitsBelow {
        fn create_page(&mut self, _width: f32, _height: f32) -> Result<PageId> {
            Ok(PageId(0))
        }

        fn paint_image(&mut self, _page: PageId, _rect: Rect, _png: &[u8]) -> Result<()> {
            Ok(())
        }

        fn fill_rect(&mut self, _page: PageId, _rect: Rect, _color: Rgb) -> Result<()> {
            Ok(())
        }

        fn draw_text_box(
            &mut self,
            _page: PageId,
            _rect: Rect,
            _text: &str,
            font_size: f32,
            _line_height: f32,
        ) -> Result<bool> {
            Ok(font_size <= self.0)
        }

        fn draw_text(
            &mut self,
            _page: PageId,
            _origin: (f32, f32),
            _text: &str,
            _font_size: f32,
        ) -> Result<()> {
            Ok(())
        }

        fn save(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn shrinks_monotonically_within_attempt_budget() {
        let mut surface = NeverFits::default();
        let rect = Rect::new(0.0, 0.0, 50.0, 10.0);
        let result = draw_fitted(&mut surface, PageId(0), rect, "text", Some(12.0));

        assert!(!result.fitted);
        assert_eq!(surface.attempted_sizes.len(), MAX_ATTEMPTS);
        for pair in surface.attempted_sizes.windows(2) {
            assert!(pair[1] < pair[0]);
            assert!((pair[1] - pair[0] * SHRINK_FACTOR).abs() < 1e-4);
        }
    }

    #[test]
    fn fallback_is_clamped_and_anchored_bottom_left() {
        let mut surface = NeverFits::default();
        let rect = Rect::new(5.0, 10.0, 60.0, 30.0);
        let result = draw_fitted(&mut surface, PageId(0), rect, "text", Some(12.0));

        assert!((result.font_size - 7.2).abs() < 1e-4);
        assert_eq!(surface.fallback_draws.len(), 1);
        let (size, origin) = surface.fallback_draws[0];
        assert!((size - 7.2).abs() < 1e-4);
        assert_eq!(origin, (5.0, 30.0));
    }

    #[test]
    fn fallback_never_goes_below_minimum() {
        let mut surface = NeverFits::default();
        let rect = Rect::new(0.0, 0.0, 10.0, 5.0);
        let result = draw_fitted(&mut surface, PageId(0), rect, "x", Some(7.0));
        assert_eq!(result.font_size, 6.0);
    }

    #[test]
    fn stops_at_first_fitting_size() {
        let mut surface = FitsBelow(10.0);
        let rect = Rect::new(0.0, 0.0, 100.0, 20.0);
        let result = draw_fitted(&mut surface, PageId(0), rect, "text", Some(12.0));
        assert!(result.fitted);
        // 12.0 -> 10.8 -> 9.72
        assert!((result.font_size - 9.72).abs() < 1e-4);
    }

    #[test]
    fn missing_base_size_defaults() {
        let mut surface = FitsBelow(100.0);
        let rect = Rect::new(0.0, 0.0, 100.0, 20.0);
        let result = draw_fitted(&mut surface, PageId(0), rect, "text", None);
        assert!(result.fitted);
        assert_eq!(result.font_size, DEFAULT_FONT_SIZE);
    }

    #[test]
    fn identical_inputs_choose_identical_sizes() {
        let rect = Rect::new(0.0, 0.0, 100.0, 20.0);
        let first = draw_fitted(&mut FitsBelow(10.0), PageId(0), rect, "text", Some(12.0));
        let second = draw_fitted(&mut FitsBelow(10.0), PageId(0), rect, "text", Some(12.0));
        assert_eq!(first, second);
    }
}
