use serde::Serialize;

/// Axis-aligned box in page points. `new` normalizes so that
/// `x0 <= x1` and `y0 <= y1` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.x0 + self.x1) * 0.5,
            (self.y0 + self.y1) * 0.5,
        )
    }

    pub fn expanded(&self, pad: f32) -> Self {
        Self::new(self.x0 - pad, self.y0 - pad, self.x1 + pad, self.y1 + pad)
    }

    pub fn union(&self, other: &Rect) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// Minimal positioned text run: the unit the erase pass works on.
#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub text: String,
    pub bbox: Rect,
    pub font_size: f32,
}

impl Span {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn is_valid(&self, min_font_size: f32) -> bool {
        !self.is_blank() && self.font_size >= min_font_size
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Line {
    pub spans: Vec<Span>,
}

impl Line {
    /// Concatenated span text. Spans carry their own spacing, so the
    /// pieces are joined as-is and only the ends are trimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for span in &self.spans {
            out.push_str(&span.text);
        }
        out.trim().to_string()
    }

    /// Spans that participate in geometry: non-blank with a usable
    /// font size. When the filter would empty the line the full span
    /// list is returned instead, so degenerate short lines still get
    /// erased and redrawn.
    pub fn valid_spans(&self, min_font_size: f32) -> Vec<Span> {
        let valid: Vec<Span> = self
            .spans
            .iter()
            .filter(|span| span.is_valid(min_font_size))
            .cloned()
            .collect();
        if valid.is_empty() {
            self.spans.clone()
        } else {
            valid
        }
    }

    pub fn bbox(&self) -> Option<Rect> {
        union_of(self.spans.iter().map(|span| span.bbox))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockKind {
    Text,
    Other,
}

/// A region of a page. Only text blocks feed the replacement pass;
/// image and vector regions survive through the whole-page copy.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub kind: BlockKind,
    pub bbox: Rect,
    pub lines: Vec<Line>,
}

/// Read-only text geometry for one source page, in reading order as
/// supplied by the layout source.
#[derive(Debug, Clone, Serialize)]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
    pub blocks: Vec<Block>,
}

impl PageLayout {
    pub fn text_lines(&self) -> impl Iterator<Item = &Line> {
        self.blocks
            .iter()
            .filter(|block| block.kind == BlockKind::Text)
            .flat_map(|block| block.lines.iter())
    }

    pub fn has_text(&self) -> bool {
        self.text_lines().any(|line| !line.text().is_empty())
    }
}

pub fn union_of(rects: impl Iterator<Item = Rect>) -> Option<Rect> {
    rects.reduce(|acc, rect| acc.union(&rect))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, x0: f32, x1: f32, size: f32) -> Span {
        Span {
            text: text.to_string(),
            bbox: Rect::new(x0, 10.0, x1, 20.0),
            font_size: size,
        }
    }

    #[test]
    fn rect_new_normalizes_corners() {
        let rect = Rect::new(10.0, 30.0, 5.0, 20.0);
        assert_eq!(rect, Rect::new(5.0, 20.0, 10.0, 30.0));
        assert!(rect.width() >= 0.0 && rect.height() >= 0.0);
    }

    #[test]
    fn valid_spans_falls_back_to_full_list() {
        let line = Line {
            spans: vec![span(" ", 0.0, 5.0, 12.0), span("x", 5.0, 8.0, 2.0)],
        };
        // Everything is filtered out, so the unfiltered list comes back.
        assert_eq!(line.valid_spans(5.0).len(), 2);
    }

    #[test]
    fn line_text_joins_spans_without_separator() {
        let line = Line {
            spans: vec![span("Hello ", 0.0, 40.0, 12.0), span("world", 42.0, 80.0, 12.0)],
        };
        assert_eq!(line.text(), "Hello world");
    }

    #[test]
    fn line_bbox_is_union_of_span_boxes() {
        let line = Line {
            spans: vec![span("a", 0.0, 10.0, 12.0), span("b", 30.0, 40.0, 12.0)],
        };
        assert_eq!(line.bbox(), Some(Rect::new(0.0, 10.0, 40.0, 20.0)));
    }
}
