use serde::{Deserialize, Serialize};

/// Width and height of a page, in whatever unit the owner works in
/// (PDF points for native pages, pixels for rendered surfaces).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDims {
    pub width: f64,
    pub height: f64,
}

impl PageDims {
    /// US Letter in points. Used whenever the native size of a page is unknown.
    pub const US_LETTER: PageDims = PageDims {
        width: 612.0,
        height: 792.0,
    };

    /// A4 in points.
    pub const A4: PageDims = PageDims {
        width: 595.28,
        height: 841.89,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.width.is_finite() && self.height.is_finite()
    }

    /// Fall back to US Letter when the size is missing or degenerate.
    pub fn or_default(dims: Option<PageDims>) -> PageDims {
        match dims {
            Some(d) if d.is_valid() => d,
            _ => PageDims::US_LETTER,
        }
    }

    pub fn scale(&self, factor: f64) -> PageDims {
        PageDims::new(self.width * factor, self.height * factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// Keep the box fully inside `container`: `0 <= x <= cw - w`, same for y.
    /// A box larger than its container pins to the origin on that axis.
    pub fn clamp_to(&self, container: PageDims) -> Rect {
        let max_x = (container.width - self.width).max(0.0);
        let max_y = (container.height - self.height).max(0.0);
        Rect {
            x: clamp_coord(self.x, max_x),
            y: clamp_coord(self.y, max_y),
            ..*self
        }
    }
}

fn clamp_coord(v: f64, max: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, max)
}

/// A page as it is currently displayed: the native page size next to the
/// size of the surface it was rendered onto. Fields live in native points;
/// pointer input arrives in rendered pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageView {
    pub original: PageDims,
    pub rendered: PageDims,
}

impl PageView {
    pub fn new(original: Option<PageDims>, rendered: PageDims) -> Self {
        Self {
            original: PageDims::or_default(original),
            rendered,
        }
    }

    /// A view rendered at a uniform zoom of the native page.
    pub fn at_zoom(original: PageDims, zoom: f64) -> Self {
        Self {
            original,
            rendered: original.scale(zoom),
        }
    }

    pub fn scale_x(&self) -> f64 {
        self.rendered.width / self.original.width
    }

    pub fn scale_y(&self) -> f64 {
        self.rendered.height / self.original.height
    }

    pub fn to_native(&self, p: Point) -> Point {
        Point::new(p.x / self.scale_x(), p.y / self.scale_y())
    }

    pub fn to_screen(&self, p: Point) -> Point {
        Point::new(p.x * self.scale_x(), p.y * self.scale_y())
    }

    pub fn rect_to_screen(&self, r: Rect) -> Rect {
        Rect::new(
            r.x * self.scale_x(),
            r.y * self.scale_y(),
            r.width * self.scale_x(),
            r.height * self.scale_y(),
        )
    }
}

/// Re-derive a position stored against one rendered surface for another one
/// (zoom or viewport change).
pub fn rescale(p: Point, old_rendered: PageDims, new_rendered: PageDims) -> Point {
    Point::new(
        p.x * new_rendered.width / old_rendered.width,
        p.y * new_rendered.height / old_rendered.height,
    )
}

/// Uniform scale plus centering offset that maps a native page onto an
/// output page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitTransform {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub output: PageDims,
}

impl FitTransform {
    /// Output page equals the native page.
    pub fn identity(native: PageDims) -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            output: native,
        }
    }

    /// Scale `native` uniformly to fit inside `output` and center the margin.
    pub fn fit(native: PageDims, output: PageDims) -> Self {
        let scale_x = output.width / native.width;
        let scale_y = output.height / native.height;
        let scale = scale_x.min(scale_y);
        let scaled_w = native.width * scale;
        let scaled_h = native.height * scale;
        Self {
            scale,
            offset_x: (output.width - scaled_w) / 2.0,
            offset_y: (output.height - scaled_h) / 2.0,
            output,
        }
    }

    /// Map a native-space box (top-left origin) into output space (top-left origin).
    pub fn place(&self, r: Rect) -> Rect {
        Rect::new(
            self.offset_x + r.x * self.scale,
            self.offset_y + r.y * self.scale,
            r.width * self.scale,
            r.height * self.scale,
        )
    }

    /// The box the whole native page occupies on the output page.
    pub fn page_box(&self, native: PageDims) -> Rect {
        self.place(Rect::new(0.0, 0.0, native.width, native.height))
    }
}
