use std::io::Cursor;

use base64::Engine;
use skia_safe::{paint, AlphaType, Color, ColorType, Font, FontMgr, FontStyle, ImageInfo, Paint};

use crate::error::{Result, SignError};
use crate::geometry::Point;

/// Canonical capture canvas size. Drawn and typed captures both come out at
/// this size so fields render them identically.
pub const CAPTURE_WIDTH: i32 = 550;
pub const CAPTURE_HEIGHT: i32 = 200;

const STROKE_WIDTH: f32 = 2.0;
const TYPED_MAX_FONT_SIZE: f32 = 72.0;
const TYPED_FILL_RATIO: f32 = 0.9;

/// Families tried, in order, for typed signatures.
const SCRIPT_FAMILIES: &[&str] = &[
    "Dancing Script",
    "Segoe Script",
    "Brush Script MT",
    "URW Chancery L",
    "DejaVu Serif",
    "serif",
    "sans-serif",
];

/// Result of showing the capture interface.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Cancelled,
    /// A `data:image/png;base64,...` URL.
    Applied(String),
}

/// A freehand stroke in canonical capture units.
#[derive(Debug, Clone, Default)]
pub struct Stroke {
    pub points: Vec<Point>,
}

/// Pointer-driven drawing pad mirroring the capture dialog: press starts a
/// stroke, moves extend it, release or leaving the pad ends it.
#[derive(Debug, Default)]
pub struct DrawingPad {
    strokes: Vec<Stroke>,
    drawing: bool,
}

impl DrawingPad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pointer_down(&mut self, p: Point) {
        self.drawing = true;
        self.strokes.push(Stroke { points: vec![p] });
    }

    pub fn pointer_move(&mut self, p: Point) {
        if !self.drawing {
            return;
        }
        if let Some(stroke) = self.strokes.last_mut() {
            stroke.points.push(p);
        }
    }

    pub fn pointer_up(&mut self) {
        self.drawing = false;
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.drawing = false;
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn render(&self) -> Result<String> {
        render_strokes(&self.strokes)
    }
}

fn new_canvas_surface() -> Result<skia_safe::Surface> {
    let info = ImageInfo::new(
        (CAPTURE_WIDTH, CAPTURE_HEIGHT),
        ColorType::RGBA8888,
        AlphaType::Premul,
        None,
    );
    let mut surface = skia_safe::surfaces::raster(&info, None, None)
        .ok_or_else(|| SignError::InvalidImage("could not allocate capture surface".into()))?;
    surface.canvas().clear(Color::WHITE);
    Ok(surface)
}

fn ink_paint() -> Paint {
    let mut p = Paint::default();
    p.set_color(Color::BLACK);
    p.set_anti_alias(true);
    p
}

/// Rasterize strokes onto a white canonical canvas.
pub fn render_strokes(strokes: &[Stroke]) -> Result<String> {
    let mut surface = new_canvas_surface()?;
    let canvas = surface.canvas();

    let mut pen = ink_paint();
    pen.set_style(paint::Style::Stroke);
    pen.set_stroke_width(STROKE_WIDTH);
    pen.set_stroke_cap(paint::Cap::Round);
    pen.set_stroke_join(paint::Join::Round);

    let mut dot = ink_paint();
    dot.set_style(paint::Style::Fill);

    for stroke in strokes {
        match stroke.points.as_slice() {
            [] => {}
            [p] => {
                canvas.draw_circle((p.x as f32, p.y as f32), STROKE_WIDTH / 2.0, &dot);
            }
            points => {
                for pair in points.windows(2) {
                    canvas.draw_line(
                        (pair[0].x as f32, pair[0].y as f32),
                        (pair[1].x as f32, pair[1].y as f32),
                        &pen,
                    );
                }
            }
        }
    }

    encode_surface(&mut surface)
}

/// Render a typed name in a script face, centered and shrunk to fit.
pub fn render_typed(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SignError::InvalidImage("typed signature is empty".into()));
    }

    let font_mgr = FontMgr::default();
    let typeface = SCRIPT_FAMILIES
        .iter()
        .find_map(|family| font_mgr.match_family_style(family, FontStyle::italic()))
        .ok_or_else(|| SignError::InvalidImage("no font available for typed signature".into()))?;

    let paint = ink_paint();
    let mut font = Font::from_typeface(typeface, TYPED_MAX_FONT_SIZE);
    let (width, _) = font.measure_str(text, Some(&paint));
    let max_width = CAPTURE_WIDTH as f32 * TYPED_FILL_RATIO;
    if width > max_width {
        font.set_size(TYPED_MAX_FONT_SIZE * max_width / width);
    }
    let (width, bounds) = font.measure_str(text, Some(&paint));

    let mut surface = new_canvas_surface()?;
    let x = (CAPTURE_WIDTH as f32 - width) / 2.0;
    // Vertically center the ink box, not the baseline.
    let y = CAPTURE_HEIGHT as f32 / 2.0 - (bounds.top + bounds.bottom) / 2.0;
    surface.canvas().draw_str(text, (x, y), &font, &paint);

    encode_surface(&mut surface)
}

/// Initials from a first and last name, e.g. "Ada" + "Lovelace" -> "AL".
pub fn initials_of(first: &str, last: &str) -> String {
    [first, last]
        .iter()
        .filter_map(|part| part.trim().chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

fn encode_surface(surface: &mut skia_safe::Surface) -> Result<String> {
    let info = ImageInfo::new(
        (CAPTURE_WIDTH, CAPTURE_HEIGHT),
        ColorType::RGBA8888,
        AlphaType::Unpremul,
        None,
    );
    let row_bytes = CAPTURE_WIDTH as usize * 4;
    let mut pixels = vec![0u8; row_bytes * CAPTURE_HEIGHT as usize];
    if !surface.read_pixels(&info, &mut pixels, row_bytes, (0, 0)) {
        return Err(SignError::InvalidImage("could not read capture pixels".into()));
    }

    let image = image::RgbaImage::from_raw(CAPTURE_WIDTH as u32, CAPTURE_HEIGHT as u32, pixels)
        .ok_or_else(|| SignError::InvalidImage("capture buffer size mismatch".into()))?;
    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| SignError::InvalidImage(e.to_string()))?;
    Ok(encode_png_data_url(png.get_ref()))
}

pub fn encode_png_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Wrap an already-encoded image file (PNG, JPEG) as a data URL.
pub fn image_file_data_url(bytes: &[u8]) -> Result<String> {
    let mime = infer::get(bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| matches!(*mime, "image/png" | "image/jpeg"))
        .ok_or_else(|| SignError::InvalidImage("expected a PNG or JPEG image".into()))?;
    Ok(format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

/// Decode a `data:<mime>;base64,<payload>` URL into raw bytes.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| SignError::InvalidImage("invalid data URL format".into()))?;
    if !header.ends_with(";base64") {
        return Err(SignError::InvalidImage(format!(
            "unsupported data URL encoding: {}",
            header
        )));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| SignError::InvalidImage(format!("base64 decode error: {}", e)))
}
