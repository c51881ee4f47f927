use std::cmp::Ordering;

use crate::layout::{Rect, Span, union_of};

/// Maximum horizontal gap, in points, between consecutive spans that
/// still count as one visual run.
pub const DEFAULT_GAP_THRESHOLD: f32 = 3.0;

/// Contiguous subset of a line's spans with no large horizontal gap
/// between members. Groups scope where background is repainted, so a
/// single patch never spans visually unrelated columns.
#[derive(Debug, Clone)]
pub struct SpanGroup {
    pub spans: Vec<Span>,
}

impl SpanGroup {
    pub fn bbox(&self) -> Option<Rect> {
        union_of(self.spans.iter().map(|span| span.bbox))
    }
}

/// Partitions `spans` into gap-separated groups ordered left to
/// right. Input is usually already in x order; it is re-sorted
/// defensively. Every span lands in exactly one group.
pub fn group_spans(spans: &[Span], gap_threshold: f32) -> Vec<SpanGroup> {
    let mut sorted: Vec<Span> = spans.to_vec();
    sorted.sort_by(|a, b| {
        a.bbox
            .x0
            .partial_cmp(&b.bbox.x0)
            .unwrap_or(Ordering::Equal)
    });

    let mut groups: Vec<SpanGroup> = Vec::new();
    for span in sorted {
        match groups.last_mut() {
            Some(group) => {
                let last_x1 = group
                    .spans
                    .last()
                    .map(|prev| prev.bbox.x1)
                    .unwrap_or(span.bbox.x0);
                if span.bbox.x0 - last_x1 > gap_threshold {
                    groups.push(SpanGroup { spans: vec![span] });
                } else {
                    group.spans.push(span);
                }
            }
            None => groups.push(SpanGroup { spans: vec![span] }),
        }
    }
    groups
}
