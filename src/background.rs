use anyhow::{Context, Result, anyhow};
use image::RgbImage;
use std::io::Cursor;

use crate::layout::Rect;

/// Linear RGB in [0, 1], the unit colors are sampled and painted in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

pub const WHITE: Rgb = Rgb {
    r: 1.0,
    g: 1.0,
    b: 1.0,
};

impl Rgb {
    pub fn to_css(&self) -> String {
        format!(
            "#{:02x}{:02x}{:02x}",
            (self.r.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.g.clamp(0.0, 1.0) * 255.0).round() as u8,
            (self.b.clamp(0.0, 1.0) * 255.0).round() as u8,
        )
    }
}

/// How vacated text footprints get their color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundStrategy {
    /// Per-span local color sampled from the page raster. Preferred;
    /// tracks heterogeneous backgrounds.
    Sampled,
    /// Solid white everywhere. Cheap, visibly wrong over images.
    Flat,
}

impl BackgroundStrategy {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sampled" => Ok(Self::Sampled),
            "flat" => Ok(Self::Flat),
            other => Err(anyhow!(
                "unknown background strategy '{}' (expected sampled or flat)",
                other
            )),
        }
    }
}

/// Fixed-resolution rendering of a source page, taken once before any
/// edits. Immutable for the page's lifetime so later paint operations
/// can never feed back into earlier samples.
pub struct PageRaster {
    image: RgbImage,
    scale: f32,
}

impl PageRaster {
    /// `scale` is pixels per page point.
    pub fn new(image: RgbImage, scale: f32) -> Self {
        Self { image, scale }
    }

    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, scale: f32) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(|image| Self { image, scale })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Sample at a pixel coordinate, clamped into the raster bounds.
    fn sample(&self, px: f32, py: f32) -> Rgb {
        let x = (px.max(0.0) as u32).min(self.image.width().saturating_sub(1));
        let y = (py.max(0.0) as u32).min(self.image.height().saturating_sub(1));
        let pixel = self.image.get_pixel(x, y);
        Rgb {
            r: pixel[0] as f32 / 255.0,
            g: pixel[1] as f32 / 255.0,
            b: pixel[2] as f32 / 255.0,
        }
    }

    /// Average of the four corners and the center of `rect` (page
    /// points), approximating the local background under a span.
    /// `None` when the raster is degenerate; callers fall back to
    /// flat white for that span only.
    pub fn average_over(&self, rect: &Rect) -> Option<Rgb> {
        if self.image.width() == 0 || self.image.height() == 0 || self.scale <= 0.0 {
            return None;
        }
        let (cx, cy) = rect.center();
        let points = [
            (rect.x0, rect.y0),
            (rect.x1, rect.y0),
            (rect.x0, rect.y1),
            (rect.x1, rect.y1),
            (cx, cy),
        ];
        let mut sum = Rgb {
            r: 0.0,
            g: 0.0,
            b: 0.0,
        };
        for (x, y) in points {
            let sample = self.sample(x * self.scale, y * self.scale);
            sum.r += sample.r;
            sum.g += sample.g;
            sum.b += sample.b;
        }
        let n = points.len() as f32;
        Some(Rgb {
            r: sum.r / n,
            g: sum.g / n,
            b: sum.b / n,
        })
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        image::DynamicImage::ImageRgb8(self.image.clone())
            .write_to(&mut cursor, image::ImageFormat::Png)
            .with_context(|| "failed to encode page raster")?;
        Ok(bytes)
    }
}
