use crate::canvas::Surface;
use egui::{Pos2, Vec2};
use image::{GrayImage, Luma, Rgba};

pub const MIN_BRUSH_SIZE: f32 = 1.0;
pub const MAX_BRUSH_SIZE: f32 = 120.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Brush,
    Eraser,
    Fill,
    Select,
    Zoom,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Tool::Brush => "brush",
            Tool::Eraser => "eraser",
            Tool::Fill => "fill",
            Tool::Select => "select",
            Tool::Zoom => "zoom",
        }
    }

    pub fn from_label(label: &str) -> Option<Tool> {
        match label.trim().to_ascii_lowercase().as_str() {
            "brush" => Some(Tool::Brush),
            "eraser" => Some(Tool::Eraser),
            "fill" => Some(Tool::Fill),
            "select" | "lasso" => Some(Tool::Select),
            "zoom" => Some(Tool::Zoom),
            _ => None,
        }
    }

    /// Tools that paint through the stroke engine.
    pub fn stroke_mode(&self) -> Option<StrokeMode> {
        match self {
            Tool::Brush => Some(StrokeMode::Brush),
            Tool::Eraser => Some(StrokeMode::Eraser),
            Tool::Fill => Some(StrokeMode::Fill),
            Tool::Select | Tool::Zoom => None,
        }
    }

    /// Whether the cursor overlay shows the brush-outline ring.
    pub fn shows_brush_outline(&self) -> bool {
        matches!(self, Tool::Brush | Tool::Eraser)
    }
}

// ============================================================================
// TOOL PROPERTIES
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct ToolProperties {
    /// Stroke width in raster pixels.
    pub size: f32,
    /// Paint alpha, 0 = invisible, 1 = fully dense.
    pub alpha: f32,
    /// Raw smoothing slider value (0..1); see [`smoothing_t`].
    pub smoothing: f32,
    /// Eraser strength.  `None` follows `alpha`.
    pub eraser_strength: Option<f32>,
}

impl Default for ToolProperties {
    fn default() -> Self {
        Self {
            size: 8.0,
            alpha: 1.0,
            smoothing: 0.0,
            eraser_strength: None,
        }
    }
}

impl ToolProperties {
    pub fn set_size(&mut self, size: f32) {
        self.size = if size.is_finite() {
            size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE)
        } else {
            MIN_BRUSH_SIZE
        };
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = clamp_unit(alpha);
    }

    pub fn set_smoothing(&mut self, raw: f32) {
        self.smoothing = clamp_unit(raw);
    }

    pub fn set_eraser_strength(&mut self, strength: Option<f32>) {
        self.eraser_strength = strength.map(clamp_unit);
    }

    pub fn nudge_size(&mut self, delta: f32) {
        self.set_size(self.size + delta);
    }

    pub fn nudge_alpha(&mut self, delta: f32) {
        self.set_alpha(self.alpha + delta);
    }

    pub fn erase_strength(&self) -> f32 {
        self.eraser_strength.unwrap_or(self.alpha)
    }

    /// Curve tension handed to the stroke renderer.
    pub fn smoothing_t(&self) -> f32 {
        smoothing_t(self.smoothing)
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

/// Map the raw smoothing slider onto the renderer's tension range `[0, 1.2]`.
/// Any non-zero setting starts at a perceptible floor.
pub fn smoothing_t(raw: f32) -> f32 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0.0;
    }
    (0.15 + 0.85 * raw.min(1.0)) * 1.2
}

// ============================================================================
// PATH FLATTENING
// ============================================================================

/// Turn sampled points into the polyline that is actually rendered.
///
/// With `t == 0` the samples are returned unchanged.  Otherwise each span
/// `p1 -> p2` becomes a cubic Bézier with Catmull-Rom control points
/// `p1 + (p2 - p0)·t/6` and `p2 - (p3 - p1)·t/6`; neighbours past either end
/// clamp to the end point.  Every sample is kept as a vertex.
pub fn flatten_path(points: &[Pos2], t: f32) -> Vec<Pos2> {
    if t <= 0.0 || points.len() < 2 {
        return points.to_vec();
    }
    let n = points.len();
    let p = |i: isize| points[i.clamp(0, n as isize - 1) as usize];
    let k = t / 6.0;

    let mut out = Vec::with_capacity(n * 4);
    out.push(points[0]);
    for i in 0..n - 1 {
        let i = i as isize;
        let (p0, p1, p2, p3) = (p(i - 1), p(i), p(i + 1), p(i + 2));
        let cp1 = p1 + (p2 - p0) * k;
        let cp2 = p2 - (p3 - p1) * k;
        let steps = ((p2 - p1).length() / 2.0).ceil().clamp(4.0, 256.0) as usize;
        for s in 1..steps {
            out.push(cubic_bezier(p1, cp1, cp2, p2, s as f32 / steps as f32));
        }
        out.push(p2);
    }
    out
}

fn cubic_bezier(p0: Pos2, p1: Pos2, p2: Pos2, p3: Pos2, t: f32) -> Pos2 {
    let u = 1.0 - t;
    let w0 = u * u * u;
    let w1 = 3.0 * u * u * t;
    let w2 = 3.0 * u * t * t;
    let w3 = t * t * t;
    Pos2::new(
        w0 * p0.x + w1 * p1.x + w2 * p2.x + w3 * p3.x,
        w0 * p0.y + w1 * p1.y + w2 * p2.y + w3 * p3.y,
    )
}

// ============================================================================
// COVERAGE MASKS
// ============================================================================

/// Anti-aliased coverage of a stroke or polygon, stored only over its
/// bounding box at (`x`, `y`) in raster space.
pub struct StrokeMask {
    pub x: u32,
    pub y: u32,
    pub mask: GrayImage,
}

impl StrokeMask {
    fn empty_over(min: Pos2, max: Pos2, width: u32, height: u32) -> Option<Self> {
        let x0 = min.x.floor().max(0.0) as u32;
        let y0 = min.y.floor().max(0.0) as u32;
        let x1 = (max.x.ceil().max(0.0) as u32).min(width);
        let y1 = (max.y.ceil().max(0.0) as u32).min(height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            mask: GrayImage::new(x1 - x0, y1 - y0),
        })
    }

    /// Coverage at raster pixel (`gx`, `gy`), 0 outside the box.
    pub fn coverage(&self, gx: u32, gy: u32) -> u8 {
        if gx < self.x || gy < self.y {
            return 0;
        }
        let (lx, ly) = (gx - self.x, gy - self.y);
        if lx >= self.mask.width() || ly >= self.mask.height() {
            return 0;
        }
        self.mask.get_pixel(lx, ly).0[0]
    }

    fn covered(&self) -> impl Iterator<Item = (u32, u32, f32)> + '_ {
        self.mask
            .enumerate_pixels()
            .filter(|(_, _, c)| c.0[0] > 0)
            .map(|(lx, ly, c)| (self.x + lx, self.y + ly, c.0[0] as f32 / 255.0))
    }

    /// Source-over `color` at `opacity` scaled by coverage.
    pub fn paint(&self, target: &mut Surface, color: Rgba<u8>, opacity: f32) {
        for (x, y, cov) in self.covered() {
            target.blend_pixel(x, y, color, opacity * cov);
        }
    }

    /// Destination-out at `strength` scaled by coverage.
    pub fn erase(&self, target: &mut Surface, strength: f32) {
        for (x, y, cov) in self.covered() {
            target.erase_pixel(x, y, strength * cov);
        }
    }
}

/// Round-capped, round-joined stroke of `line_width` along `path`.
/// Coverage combines by maximum, so overlapping segments never double up.
pub fn rasterize_stroke(path: &[Pos2], line_width: f32, width: u32, height: u32) -> Option<StrokeMask> {
    if path.len() < 2 || line_width <= 0.0 {
        return None;
    }
    let r = line_width / 2.0;
    let pad = Vec2::splat(r + 1.0);
    let (min, max) = bounds(path)?;
    let mut out = StrokeMask::empty_over(min - pad, max + pad, width, height)?;

    for seg in path.windows(2) {
        let (a, b) = (seg[0], seg[1]);
        let lo = Pos2::new(a.x.min(b.x), a.y.min(b.y)) - pad;
        let hi = Pos2::new(a.x.max(b.x), a.y.max(b.y)) + pad;
        let x0 = (lo.x.floor().max(out.x as f32) as u32).max(out.x);
        let y0 = (lo.y.floor().max(out.y as f32) as u32).max(out.y);
        let x1 = (hi.x.ceil().max(0.0) as u32).min(out.x + out.mask.width());
        let y1 = (hi.y.ceil().max(0.0) as u32).min(out.y + out.mask.height());
        for gy in y0..y1 {
            for gx in x0..x1 {
                let center = Pos2::new(gx as f32 + 0.5, gy as f32 + 0.5);
                let d = distance_to_segment(center, a, b);
                let cov = (r + 0.5 - d).clamp(0.0, 1.0);
                if cov <= 0.0 {
                    continue;
                }
                let v = (cov * 255.0).round() as u8;
                let px = out.mask.get_pixel_mut(gx - out.x, gy - out.y);
                if v > px.0[0] {
                    *px = Luma([v]);
                }
            }
        }
    }
    Some(out)
}

/// Closed polygon through `path` (last point joins the first), filled by
/// even-odd scanlines sampled at pixel centres.
pub fn rasterize_polygon(path: &[Pos2], width: u32, height: u32) -> Option<StrokeMask> {
    if path.len() < 3 {
        return None;
    }
    let (min, max) = bounds(path)?;
    let mut out = StrokeMask::empty_over(min, max, width, height)?;
    let n = path.len();
    let mut nodes: Vec<f32> = Vec::new();

    for ly in 0..out.mask.height() {
        let yf = (out.y + ly) as f32 + 0.5; // centre of pixel row
        nodes.clear();
        // Walk polygon edges (including closing edge n-1 → 0)
        for i in 0..n {
            let j = (i + 1) % n;
            let (yi, yj) = (path[i].y, path[j].y);
            if (yi < yf && yj >= yf) || (yj < yf && yi >= yf) {
                let t = (yf - yi) / (yj - yi);
                nodes.push(path[i].x + t * (path[j].x - path[i].x));
            }
        }
        nodes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for pair in nodes.chunks_exact(2) {
            // pixels whose centre lies inside [pair[0], pair[1]]
            let gx0 = (pair[0] - 0.5).ceil().max(out.x as f32) as u32;
            let gx1 = ((pair[1] - 0.5).floor() + 1.0).max(0.0) as u32;
            let gx1 = gx1.min(out.x + out.mask.width());
            for gx in gx0..gx1 {
                out.mask.put_pixel(gx - out.x, ly, Luma([255]));
            }
        }
    }
    Some(out)
}

fn bounds(path: &[Pos2]) -> Option<(Pos2, Pos2)> {
    let first = *path.first()?;
    Some(path.iter().fold((first, first), |(lo, hi), p| {
        (
            Pos2::new(lo.x.min(p.x), lo.y.min(p.y)),
            Pos2::new(hi.x.max(p.x), hi.y.max(p.y)),
        )
    }))
}

fn distance_to_segment(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_sq();
    if len_sq < 1e-12 {
        return (p - a).length();
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).length()
}

// ============================================================================
// STROKES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeMode {
    Brush,
    Eraser,
    Fill,
}

/// One press → move… → release gesture of a painting tool.  The samples
/// accumulate here and only reach the layer in [`Stroke::apply`].
#[derive(Clone, Debug)]
pub struct Stroke {
    pub mode: StrokeMode,
    pub points: Vec<Pos2>,
    pub color: [u8; 3],
    pub size: f32,
    pub alpha: f32,
    pub erase_strength: f32,
    pub smoothing_t: f32,
}

impl Stroke {
    pub fn begin(mode: StrokeMode, start: Pos2, props: &ToolProperties, color: [u8; 3]) -> Self {
        Self {
            mode,
            points: vec![start],
            color,
            size: props.size,
            alpha: props.alpha,
            erase_strength: props.erase_strength(),
            smoothing_t: props.smoothing_t(),
        }
    }

    pub fn push(&mut self, p: Pos2) {
        self.points.push(p);
    }

    /// The polyline that gets rendered.
    pub fn path(&self) -> Vec<Pos2> {
        flatten_path(&self.points, self.smoothing_t)
    }

    fn mask(&self, width: u32, height: u32) -> Option<StrokeMask> {
        let path = self.path();
        match self.mode {
            StrokeMode::Fill => rasterize_polygon(&path, width, height),
            StrokeMode::Brush | StrokeMode::Eraser => {
                rasterize_stroke(&path, self.size, width, height)
            }
        }
    }

    fn paint_color(&self) -> Rgba<u8> {
        Rgba([self.color[0], self.color[1], self.color[2], 255])
    }

    /// Commit onto a layer surface.  Returns false when the gesture had too
    /// few samples to draw anything.
    pub fn apply(&self, target: &mut Surface, layer_opacity: f32) -> bool {
        let Some(mask) = self.mask(target.width(), target.height()) else {
            return false;
        };
        match self.mode {
            StrokeMode::Brush | StrokeMode::Fill => {
                mask.paint(target, self.paint_color(), clamp_unit(layer_opacity * self.alpha))
            }
            StrokeMode::Eraser => mask.erase(target, self.erase_strength),
        }
        true
    }

    /// Draw the in-progress stroke onto a transient preview surface.  Erasing
    /// previews as a plain black stroke so it stays visible.
    pub fn apply_preview(&self, preview: &mut Surface, layer_opacity: f32) {
        let Some(mask) = self.mask(preview.width(), preview.height()) else {
            return;
        };
        let opacity = clamp_unit(layer_opacity * self.alpha);
        let color = match self.mode {
            StrokeMode::Eraser => Rgba([0, 0, 0, 255]),
            StrokeMode::Brush | StrokeMode::Fill => self.paint_color(),
        };
        mask.paint(preview, color, opacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_polyline(p: Pos2, pts: &[Pos2]) -> bool {
        pts.windows(2).any(|s| distance_to_segment(p, s[0], s[1]) < 1e-3)
    }

    #[test]
    fn smoothing_mapping_has_floor() {
        assert_eq!(smoothing_t(0.0), 0.0);
        assert!((smoothing_t(0.01) - (0.15 + 0.0085) * 1.2).abs() < 1e-5);
        assert!((smoothing_t(1.0) - 1.2).abs() < 1e-6);
        assert!((smoothing_t(5.0) - 1.2).abs() < 1e-6);
    }

    #[test]
    fn zero_smoothing_is_the_plain_polyline() {
        let pts = vec![Pos2::new(0.0, 0.0), Pos2::new(10.0, 0.0), Pos2::new(10.0, 10.0)];
        assert_eq!(flatten_path(&pts, 0.0), pts);
    }

    #[test]
    fn smoothing_passes_through_samples_and_bends_between() {
        let pts = vec![
            Pos2::new(0.0, 0.0),
            Pos2::new(20.0, 0.0),
            Pos2::new(20.0, 20.0),
            Pos2::new(40.0, 20.0),
        ];
        let path = flatten_path(&pts, smoothing_t(1.0));
        for p in &pts {
            assert!(path.contains(p));
        }
        assert!(path.iter().any(|p| !on_polyline(*p, &pts)));
    }

    #[test]
    fn two_point_curve_stays_straight() {
        let pts = vec![Pos2::new(0.0, 0.0), Pos2::new(30.0, 30.0)];
        let path = flatten_path(&pts, 1.2);
        assert!(path.len() > 2);
        assert!(path.iter().all(|p| on_polyline(*p, &pts)));
    }

    #[test]
    fn brush_paints_along_path_only() {
        let mut s = Surface::new(40, 20);
        let props = ToolProperties::default();
        let mut stroke = Stroke::begin(StrokeMode::Brush, Pos2::new(5.0, 10.0), &props, [255, 0, 0]);
        stroke.push(Pos2::new(35.0, 10.0));
        assert!(stroke.apply(&mut s, 1.0));
        assert_eq!(*s.get_pixel(20, 9), Rgba([255, 0, 0, 255]));
        assert_eq!(s.get_pixel(20, 1)[3], 0);
    }

    #[test]
    fn brush_alpha_scales_with_layer_opacity() {
        let mut s = Surface::new(40, 20);
        let mut props = ToolProperties::default();
        props.set_alpha(0.5);
        let mut stroke = Stroke::begin(StrokeMode::Brush, Pos2::new(5.0, 10.0), &props, [0, 0, 255]);
        stroke.push(Pos2::new(35.0, 10.0));
        stroke.apply(&mut s, 0.5);
        assert_eq!(s.get_pixel(20, 9)[3], 64);
    }

    #[test]
    fn single_sample_draws_nothing() {
        let mut s = Surface::new(10, 10);
        let stroke = Stroke::begin(StrokeMode::Brush, Pos2::new(5.0, 5.0), &ToolProperties::default(), [1, 2, 3]);
        assert!(!stroke.apply(&mut s, 1.0));
        assert!(s.is_blank());
    }

    #[test]
    fn eraser_uses_strength_and_previews_black() {
        let mut s = Surface::new(20, 20);
        for y in 0..20 {
            for x in 0..20 {
                s.put_pixel(x, y, Rgba([0, 200, 0, 255]));
            }
        }
        let mut props = ToolProperties::default();
        props.set_alpha(0.9);
        props.set_eraser_strength(Some(0.5));
        let mut stroke = Stroke::begin(StrokeMode::Eraser, Pos2::new(2.0, 10.0), &props, [255, 255, 255]);
        stroke.push(Pos2::new(18.0, 10.0));
        let mut preview = Surface::new(20, 20);
        stroke.apply_preview(&mut preview, 1.0);
        assert_eq!(preview.get_pixel(10, 10)[0], 0);
        assert!(preview.get_pixel(10, 10)[3] > 0);

        stroke.apply(&mut s, 1.0);
        assert_eq!(s.get_pixel(10, 10)[3], 128);
        assert_eq!(s.get_pixel(10, 0)[3], 255);
    }

    #[test]
    fn fill_closes_the_path() {
        let mut s = Surface::new(20, 20);
        let props = ToolProperties::default();
        let mut stroke = Stroke::begin(StrokeMode::Fill, Pos2::new(2.0, 2.0), &props, [9, 9, 9]);
        stroke.push(Pos2::new(12.0, 2.0));
        stroke.push(Pos2::new(12.0, 12.0));
        stroke.push(Pos2::new(2.0, 12.0));
        stroke.apply(&mut s, 1.0);
        assert_eq!(s.get_pixel(2, 2)[3], 255);
        assert_eq!(s.get_pixel(11, 11)[3], 255);
        assert_eq!(s.get_pixel(12, 12)[3], 0);
        assert_eq!(s.get_pixel(1, 5)[3], 0);
    }

    #[test]
    fn polygon_mask_is_clipped_to_surface() {
        let tri = [Pos2::new(-10.0, -10.0), Pos2::new(30.0, 0.0), Pos2::new(0.0, 30.0)];
        let mask = rasterize_polygon(&tri, 16, 16).unwrap();
        assert_eq!((mask.x, mask.y), (0, 0));
        assert_eq!(mask.mask.dimensions(), (16, 16));
        assert_eq!(mask.coverage(1, 1), 255);
        assert_eq!(mask.coverage(15, 15), 0);
    }

    #[test]
    fn size_and_alpha_nudges_clamp() {
        let mut props = ToolProperties::default();
        props.set_size(119.0);
        props.nudge_size(2.0);
        assert_eq!(props.size, MAX_BRUSH_SIZE);
        props.set_size(2.0);
        props.nudge_size(-2.0);
        assert_eq!(props.size, MIN_BRUSH_SIZE);
        props.nudge_alpha(0.05);
        assert_eq!(props.alpha, 1.0);
        assert_eq!(props.erase_strength(), 1.0);
    }

    #[test]
    fn tool_labels_roundtrip() {
        for tool in [Tool::Brush, Tool::Eraser, Tool::Fill, Tool::Select, Tool::Zoom] {
            assert_eq!(Tool::from_label(tool.label()), Some(tool));
        }
        assert_eq!(Tool::from_label("nope"), None);
    }
}
