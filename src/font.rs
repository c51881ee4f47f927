use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

/// Parsed face data for the replacement font: enough to measure
/// advance widths and to feed the same bytes into the SVG rasterizer.
#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
    face_index: u32,
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    font_metrics_from_data(&data)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// Resolve the font used for replacement text: an explicit file wins,
/// then a named system family, then the system sans-serif. `None`
/// means no usable face was found and widths fall back to estimates.
pub fn resolve_font(font_path: Option<&Path>, font_family: Option<&str>) -> Option<FontMetrics> {
    if let Some(path) = font_path {
        match load_font_metrics(path) {
            Ok(metrics) => return Some(metrics),
            Err(err) => tracing::warn!("configured font unusable: {err:#}"),
        }
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    let mut families = Vec::new();
    if let Some(family) = font_family {
        families.push(fontdb::Family::Name(family));
    }
    families.push(fontdb::Family::SansSerif);

    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db.query(&query)?;
    let data = db.with_face_data(id, |data, _index| data.to_vec())?;
    font_metrics_from_data(&data).ok()
}

/// Advance width of `text` at `font_size`, in the same unit as the
/// size. Falls back to a per-character estimate when no face is
/// available or a glyph is missing.
pub fn measure_text_width(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font {
        if let Ok(face) = Face::parse(&font.data, font.face_index) {
            let mut advance = 0u32;
            for ch in text.chars() {
                if ch == '\n' {
                    continue;
                }
                let glyph_advance = face
                    .glyph_index(ch)
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .unwrap_or(font.space_advance);
                advance = advance.saturating_add(glyph_advance as u32);
            }
            let units = font.units_per_em.max(1) as f32;
            return advance as f32 * (font_size / units);
        }
    }
    estimate_text_width_units(text) * font_size
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF
    ) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units).sum()
}

fn font_metrics_from_data(data: &[u8]) -> Result<FontMetrics> {
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    for index in 0..count {
        if let Ok(face) = Face::parse(data, index) {
            let units_per_em = face.units_per_em().max(1);
            let space_advance = face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2);
            return Ok(FontMetrics {
                data: Arc::new(data.to_vec()),
                units_per_em,
                space_advance,
                family: extract_family_name(&face),
                face_index: index,
            });
        }
    }
    Err(anyhow!("failed to parse font data"))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_text_and_size() {
        let narrow = measure_text_width("il", 12.0, None);
        let wide = measure_text_width("mmmm", 12.0, None);
        assert!(wide > narrow);
        assert!(measure_text_width("abc", 24.0, None) > measure_text_width("abc", 12.0, None));
    }

    #[test]
    fn cjk_estimates_wider_than_ascii() {
        let ascii = measure_text_width("ab", 10.0, None);
        let cjk = measure_text_width("\u{4F60}\u{597D}", 10.0, None);
        assert!(cjk > ascii);
    }
}
