use egui::{Pos2, Rect, Vec2};

pub const DEFAULT_MIN_ZOOM: f32 = 0.5;
pub const DEFAULT_MAX_ZOOM: f32 = 4.0;

/// Zoom factor per wheel notch.
const WHEEL_STEP: f32 = 1.1;
/// Zoom levels this close to 1.0 snap to exactly 1.0.
const SNAP_TOLERANCE: f32 = 0.05;

/// Maps device (screen) pixels onto raster pixels.
///
/// The canvas occupies `viewport` at zoom 1.  Zoom scales about the
/// viewport centre, then the pan offset translates the result.
#[derive(Clone, Debug)]
pub struct ViewTransform {
    zoom: f32,
    pan: Vec2,
    viewport: Rect,
    raster_size: Vec2,
    min_zoom: f32,
    max_zoom: f32,
    pan_start: Option<(Pos2, Vec2)>,
}

impl ViewTransform {
    /// Identity mapping: one device pixel per raster pixel.
    pub fn new(raster_width: u32, raster_height: u32) -> Self {
        let raster_size = Vec2::new(raster_width as f32, raster_height as f32);
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
            viewport: Rect::from_min_size(Pos2::ZERO, raster_size),
            raster_size,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            pan_start: None,
        }
    }

    pub fn with_zoom_limits(mut self, min_zoom: f32, max_zoom: f32) -> Self {
        let (lo, hi) = if min_zoom <= max_zoom { (min_zoom, max_zoom) } else { (max_zoom, min_zoom) };
        self.min_zoom = lo.max(f32::EPSILON);
        self.max_zoom = hi.max(self.min_zoom);
        self.zoom = self.zoom.clamp(self.min_zoom, self.max_zoom);
        self
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    pub fn zoom_limits(&self) -> (f32, f32) {
        (self.min_zoom, self.max_zoom)
    }

    /// Where the host lays the canvas out at zoom 1.
    pub fn set_viewport(&mut self, viewport: Rect) {
        if viewport.width() > 0.0 && viewport.height() > 0.0 {
            self.viewport = viewport;
        }
    }

    /// Restore zoom 1 and no pan.
    pub fn reset(&mut self) {
        self.zoom = 1.0f32.clamp(self.min_zoom, self.max_zoom);
        self.pan = Vec2::ZERO;
        self.pan_start = None;
    }

    /// The canvas rectangle on screen after zoom and pan.
    pub fn screen_rect(&self) -> Rect {
        let center = self.viewport.center() + self.pan;
        Rect::from_center_size(center, self.viewport.size() * self.zoom)
    }

    pub fn contains(&self, device: Pos2) -> bool {
        self.screen_rect().contains(device)
    }

    /// Device position to raster position, clamped into `[0, W] × [0, H]`.
    pub fn to_raster(&self, device: Pos2) -> Pos2 {
        let r = self.screen_rect();
        let x = (device.x - r.min.x) * (self.raster_size.x / r.width());
        let y = (device.y - r.min.y) * (self.raster_size.y / r.height());
        Pos2::new(x.clamp(0.0, self.raster_size.x), y.clamp(0.0, self.raster_size.y))
    }

    pub fn to_device(&self, raster: Pos2) -> Pos2 {
        let r = self.screen_rect();
        Pos2::new(
            r.min.x + raster.x * r.width() / self.raster_size.x,
            r.min.y + raster.y * r.height() / self.raster_size.y,
        )
    }

    // ---- zoom ---------------------------------------------------------------

    /// One wheel notch.  Positive deltas zoom in, negative zoom out, zero is
    /// ignored.  Returns whether the zoom level changed.
    pub fn wheel(&mut self, delta: f32) -> bool {
        if delta == 0.0 || !delta.is_finite() {
            return false;
        }
        let factor = if delta > 0.0 { WHEEL_STEP } else { 1.0 / WHEEL_STEP };
        let mut zoom = (self.zoom * factor).clamp(self.min_zoom, self.max_zoom);
        if (zoom - 1.0).abs() < SNAP_TOLERANCE {
            zoom = 1.0;
        }
        let changed = zoom != self.zoom;
        self.zoom = zoom;
        changed
    }

    // ---- pan ----------------------------------------------------------------

    pub fn is_panning(&self) -> bool {
        self.pan_start.is_some()
    }

    pub fn begin_pan(&mut self, device: Pos2) {
        self.pan_start = Some((device, self.pan));
    }

    /// Pan offset becomes the offset at press plus the pointer delta.
    pub fn pan_to(&mut self, device: Pos2) {
        if let Some((start, offset)) = self.pan_start {
            self.pan = offset + (device - start);
        }
    }

    pub fn end_pan(&mut self) {
        self.pan_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_maps_one_to_one_and_clamps() {
        let v = ViewTransform::new(200, 100);
        assert_eq!(v.to_raster(Pos2::new(20.0, 30.0)), Pos2::new(20.0, 30.0));
        assert_eq!(v.to_raster(Pos2::new(-5.0, 500.0)), Pos2::new(0.0, 100.0));
    }

    #[test]
    fn viewport_scaling_is_undone() {
        let mut v = ViewTransform::new(200, 100);
        v.set_viewport(Rect::from_min_size(Pos2::new(10.0, 10.0), Vec2::new(100.0, 50.0)));
        assert_eq!(v.to_raster(Pos2::new(60.0, 35.0)), Pos2::new(100.0, 50.0));
        let back = v.to_device(Pos2::new(100.0, 50.0));
        assert!((back - Pos2::new(60.0, 35.0)).length() < 1e-4);
    }

    #[test]
    fn zoom_scales_about_the_centre() {
        let mut v = ViewTransform::new(200, 100);
        assert!(v.wheel(1.0));
        assert!((v.zoom() - 1.1).abs() < 1e-6);
        // the centre stays put
        let c = v.to_raster(Pos2::new(100.0, 50.0));
        assert!((c - Pos2::new(100.0, 50.0)).length() < 1e-3);
    }

    #[test]
    fn wheel_clamps_and_snaps() {
        let mut v = ViewTransform::new(200, 100);
        assert!(!v.wheel(0.0));
        for _ in 0..40 {
            v.wheel(1.0);
        }
        assert_eq!(v.zoom(), DEFAULT_MAX_ZOOM);
        for _ in 0..40 {
            v.wheel(-1.0);
        }
        assert_eq!(v.zoom(), DEFAULT_MIN_ZOOM);
        assert_eq!(v.zoom_limits(), (DEFAULT_MIN_ZOOM, DEFAULT_MAX_ZOOM));
        v.reset();
        v.wheel(1.0);
        v.wheel(-1.0);
        assert_eq!(v.zoom(), 1.0);
    }

    #[test]
    fn pan_follows_the_pointer_delta() {
        let mut v = ViewTransform::new(200, 100);
        v.begin_pan(Pos2::new(10.0, 10.0));
        v.pan_to(Pos2::new(30.0, 5.0));
        assert_eq!(v.pan(), Vec2::new(20.0, -5.0));
        v.end_pan();
        v.begin_pan(Pos2::new(0.0, 0.0));
        v.pan_to(Pos2::new(1.0, 1.0));
        assert_eq!(v.pan(), Vec2::new(21.0, -4.0));
        v.end_pan();
        assert!(!v.is_panning());
        assert_eq!(v.to_raster(Pos2::new(21.0, -4.0)), Pos2::ZERO);
    }
}
