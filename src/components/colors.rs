use egui::{Color32, Pos2, Vec2};
use std::collections::VecDeque;

use crate::io::EditorError;

const TAU: f32 = std::f32::consts::TAU;

pub const COLOR_HISTORY_LIMIT: usize = 10;

// ============================================================================
// HSV
// ============================================================================

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Hsv {
    pub fn new(h: f32, s: f32, v: f32) -> Self {
        let h = if h.is_finite() { h.rem_euclid(360.0) } else { 0.0 };
        // rem_euclid can land exactly on 360.0 for tiny negative inputs
        let h = if h >= 360.0 { 0.0 } else { h };
        Self {
            h,
            s: if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 },
            v: if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 },
        }
    }
}

pub fn rgb_to_hsv(rgb: [u8; 3]) -> Hsv {
    let r = rgb[0] as f32 / 255.0;
    let g = rgb[1] as f32 / 255.0;
    let b = rgb[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let d = max - min;

    let h = if d == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / d).rem_euclid(6.0))
    } else if max == g {
        60.0 * (((b - r) / d) + 2.0)
    } else {
        60.0 * (((r - g) / d) + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { d / max };
    Hsv::new(h, s, max)
}

pub fn hsv_to_rgb(hsv: Hsv) -> [u8; 3] {
    let h6 = hsv.h / 60.0;
    let c = hsv.v * hsv.s;
    let x = c * (1.0 - ((h6 % 2.0) - 1.0).abs());
    let m = hsv.v - c;
    let (r, g, b) = match h6 as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_u8 = |f: f32| ((f + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}

/// Parse `#RRGGBB`, `RRGGBB` or the short `#RGB` form.
pub fn parse_hex(text: &str) -> Result<[u8; 3], EditorError> {
    let digits = text.trim().trim_start_matches('#');
    let expanded: String = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        6 => digits.to_string(),
        _ => return Err(EditorError::InvalidColor(text.to_string())),
    };
    let val = u32::from_str_radix(&expanded, 16)
        .map_err(|_| EditorError::InvalidColor(text.to_string()))?;
    Ok([
        ((val >> 16) & 0xFF) as u8,
        ((val >> 8) & 0xFF) as u8,
        (val & 0xFF) as u8,
    ])
}

pub fn format_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

// ============================================================================
// WHEEL + TRIANGLE GEOMETRY
// ============================================================================

/// Interaction zone for the combined ring + triangle widget.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum DragZone {
    #[default]
    None,
    HueRing,
    SvTriangle,
}

/// Hue ring around a fixed triangle: pure hue at the top, white bottom-left,
/// black bottom-right.  Screen coordinates, y down.
#[derive(Clone, Copy, Debug)]
pub struct WheelGeometry {
    pub center: Pos2,
    pub outer_r: f32,
    pub inner_r: f32,
    pub tri_r: f32,
}

impl WheelGeometry {
    pub fn new(center: Pos2) -> Self {
        let outer_r: f32 = 78.0;
        let ring_w: f32 = 16.0;
        let inner_r = outer_r - ring_w;
        Self {
            center,
            outer_r,
            inner_r,
            tri_r: inner_r - 3.0, // small gap between ring & triangle
        }
    }

    /// Triangle corners as (pure hue, white, black).
    pub fn vertices(&self) -> (Pos2, Pos2, Pos2) {
        let at = |deg: f32| {
            let a = deg.to_radians();
            Pos2::new(
                self.center.x + a.cos() * self.tri_r,
                self.center.y + a.sin() * self.tri_r,
            )
        };
        (at(-90.0), at(150.0), at(30.0))
    }

    /// Zone under `p` on first contact.
    pub fn hit_zone(&self, p: Pos2) -> DragZone {
        let dist = (p - self.center).length();
        let (a, b, c) = self.vertices();
        if dist >= self.inner_r - 6.0 && dist <= self.outer_r + 6.0 {
            DragZone::HueRing
        } else if point_in_triangle(p, a, b, c) || dist < self.inner_r {
            DragZone::SvTriangle
        } else {
            DragZone::None
        }
    }

    /// Angle of `p` around the center mapped to a hue in degrees.
    pub fn hue_at(&self, p: Pos2) -> f32 {
        let delta = p - self.center;
        let mut turn = delta.y.atan2(delta.x) / TAU;
        if turn < 0.0 {
            turn += 1.0;
        }
        turn * 360.0
    }

    /// Saturation and value under `p`, with the point projected back onto
    /// the triangle when outside it.
    pub fn sv_at(&self, p: Pos2) -> Option<(f32, f32)> {
        let (a, b, c) = self.vertices();
        let (wa, wb, wc) = barycentric(p, a, b, c);
        let wa = wa.max(0.0);
        let wb = wb.max(0.0);
        let wc = wc.max(0.0);
        let sum = wa + wb + wc;
        if sum <= 0.001 {
            return None;
        }
        let wa = wa / sum;
        let wb = wb / sum;
        let v = (wa + wb).clamp(0.0, 1.0);
        let s = if v > 0.001 { (wa / v).clamp(0.0, 1.0) } else { 0.0 };
        Some((s, v))
    }

    /// Position of the current-color dot.  Saturation never exceeds value
    /// in the rendered indicator.
    pub fn sv_indicator(&self, s: f32, v: f32) -> Pos2 {
        let s = s.min(v);
        let (a, b, c) = self.vertices();
        let w_a = s * v;
        let w_b = v * (1.0 - s);
        let w_c = 1.0 - v;
        Pos2::new(
            w_a * a.x + w_b * b.x + w_c * c.x,
            w_a * a.y + w_b * b.y + w_c * c.y,
        )
    }

    /// Midpoint of the ring at hue `h` (degrees).
    pub fn hue_indicator(&self, h: f32) -> Pos2 {
        let a = h.to_radians();
        let r = (self.inner_r + self.outer_r) / 2.0;
        Pos2::new(self.center.x + a.cos() * r, self.center.y + a.sin() * r)
    }
}

/// Barycentric coordinates of `p` w.r.t. triangle (a, b, c).
/// Returns (weight_a, weight_b, weight_c).
fn barycentric(p: Pos2, a: Pos2, b: Pos2, c: Pos2) -> (f32, f32, f32) {
    let v0: Vec2 = c - a;
    let v1: Vec2 = b - a;
    let v2: Vec2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d02 = v0.dot(v2);
    let d11 = v1.dot(v1);
    let d12 = v1.dot(v2);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < 1e-10 {
        return (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
    }
    let inv = 1.0 / denom;
    let u = (d11 * d02 - d01 * d12) * inv; // weight for c
    let v = (d00 * d12 - d01 * d02) * inv; // weight for b
    (1.0 - u - v, v, u)
}

fn point_in_triangle(p: Pos2, a: Pos2, b: Pos2, c: Pos2) -> bool {
    let (wa, wb, wc) = barycentric(p, a, b, c);
    wa >= 0.0 && wb >= 0.0 && wc >= 0.0
}

// ============================================================================
// COLOR MODEL
// ============================================================================

/// Everything a picker UI displays, re-derived from HSV on every change.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorVisuals {
    pub hex: String,
    pub rgb: [u8; 3],
    pub swatch: Color32,
    pub pure_hue: Color32,
    /// Linear slider positions for hue, saturation and value in `[0, 1]`.
    pub sliders: [f32; 3],
    pub sv_indicator: Pos2,
    pub hue_indicator: Pos2,
}

/// Active color with HSV as the single source of truth.
pub struct ColorModel {
    hsv: Hsv,
    visuals: ColorVisuals,
    history: VecDeque<[u8; 3]>,
    wheel: WheelGeometry,
    drag_zone: DragZone,
}

impl Default for ColorModel {
    fn default() -> Self {
        Self::new([0, 0, 0])
    }
}

impl ColorModel {
    pub fn new(rgb: [u8; 3]) -> Self {
        let wheel = WheelGeometry::new(Pos2::new(84.0, 84.0));
        let hsv = rgb_to_hsv(rgb);
        Self {
            hsv,
            visuals: derive_visuals(hsv, &wheel),
            history: VecDeque::new(),
            wheel,
            drag_zone: DragZone::None,
        }
    }

    pub fn hsv(&self) -> Hsv {
        self.hsv
    }

    pub fn rgb(&self) -> [u8; 3] {
        self.visuals.rgb
    }

    pub fn hex(&self) -> &str {
        &self.visuals.hex
    }

    pub fn visuals(&self) -> &ColorVisuals {
        &self.visuals
    }

    pub fn wheel(&self) -> &WheelGeometry {
        &self.wheel
    }

    /// Place the picker widget; the indicators follow.
    pub fn set_wheel_center(&mut self, center: Pos2) {
        self.wheel = WheelGeometry::new(center);
        self.visuals = derive_visuals(self.hsv, &self.wheel);
    }

    /// The one mutation path: store HSV, then re-derive hex and visuals.
    pub fn set_hsv(&mut self, h: f32, s: f32, v: f32) {
        self.hsv = Hsv::new(h, s, v);
        self.visuals = derive_visuals(self.hsv, &self.wheel);
    }

    pub fn set_hue(&mut self, h: f32) {
        self.set_hsv(h, self.hsv.s, self.hsv.v);
    }

    pub fn set_saturation(&mut self, s: f32) {
        self.set_hsv(self.hsv.h, s, self.hsv.v);
    }

    pub fn set_value(&mut self, v: f32) {
        self.set_hsv(self.hsv.h, self.hsv.s, v);
    }

    pub fn set_rgb(&mut self, rgb: [u8; 3]) {
        let hsv = rgb_to_hsv(rgb);
        self.set_hsv(hsv.h, hsv.s, hsv.v);
    }

    /// Numeric hex entry.  Invalid text leaves the color untouched.
    pub fn set_hex(&mut self, text: &str) -> Result<(), EditorError> {
        let rgb = parse_hex(text)?;
        self.set_rgb(rgb);
        Ok(())
    }

    // ---- picker widget ------------------------------------------------------

    /// Pointer pressed on the widget; returns whether the color changed.
    pub fn picker_press(&mut self, p: Pos2) -> bool {
        self.drag_zone = self.wheel.hit_zone(p);
        self.picker_drag(p)
    }

    pub fn picker_drag(&mut self, p: Pos2) -> bool {
        match self.drag_zone {
            DragZone::HueRing => {
                let h = self.wheel.hue_at(p);
                self.set_hue(h);
                true
            }
            DragZone::SvTriangle => match self.wheel.sv_at(p) {
                Some((s, v)) => {
                    self.set_hsv(self.hsv.h, s, v);
                    true
                }
                None => false,
            },
            DragZone::None => false,
        }
    }

    pub fn picker_release(&mut self) {
        self.drag_zone = DragZone::None;
    }

    // ---- history ------------------------------------------------------------

    /// Most recent first.
    pub fn history(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.history.iter().copied()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Remember a used color.  Only an identical head entry is collapsed.
    pub fn push_history(&mut self, rgb: [u8; 3]) {
        if self.history.front() == Some(&rgb) {
            return;
        }
        self.history.push_front(rgb);
        self.history.truncate(COLOR_HISTORY_LIMIT);
    }

    /// Swatch click.
    pub fn select_history(&mut self, index: usize) -> bool {
        match self.history.get(index).copied() {
            Some(rgb) => {
                self.set_rgb(rgb);
                true
            }
            None => false,
        }
    }
}

fn derive_visuals(hsv: Hsv, wheel: &WheelGeometry) -> ColorVisuals {
    let rgb = hsv_to_rgb(hsv);
    let pure = hsv_to_rgb(Hsv::new(hsv.h, 1.0, 1.0));
    ColorVisuals {
        hex: format_hex(rgb),
        rgb,
        swatch: Color32::from_rgb(rgb[0], rgb[1], rgb[2]),
        pure_hue: Color32::from_rgb(pure[0], pure[1], pure[2]),
        sliders: [hsv.h / 360.0, hsv.s, hsv.v],
        sv_indicator: wheel.sv_indicator(hsv.s, hsv.v),
        hue_indicator: wheel.hue_indicator(hsv.h),
    }
}
