// ============================================================================
// SELECTION — lasso lift, move/resize handles, commit and cancel
// ============================================================================

use egui::{Pos2, Vec2};
use image::Rgba;

use crate::canvas::{CanvasState, Layer, LayerId, Surface};
use crate::components::history::HistoryManager;
use crate::components::tools::rasterize_polygon;

/// Half-extent of a corner handle's hit box, in raster pixels.
pub const HANDLE_SIZE: f32 = 8.0;

/// A lasso whose bounding box is this thin (or thinner) lifts nothing.
const MIN_LIFT_EXTENT: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragMode {
    Move,
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

/// Floating pixels lifted from a layer (or pasted), placed at a rectangle
/// that may be moved and resized before being drawn back.
#[derive(Clone, Debug)]
pub struct Selection {
    pub pixels: Surface,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    /// Layer the pixels came from (the active layer for pastes).
    pub source: LayerId,
    pub from_reference: bool,
}

impl Selection {
    /// Corner handle centres in hit-test order: tl, tr, br, bl.
    pub fn handles(&self) -> [(DragMode, Pos2); 4] {
        let (x0, y0) = (self.x, self.y);
        let (x1, y1) = (self.x + self.w, self.y + self.h);
        [
            (DragMode::TopLeft, Pos2::new(x0, y0)),
            (DragMode::TopRight, Pos2::new(x1, y0)),
            (DragMode::BottomRight, Pos2::new(x1, y1)),
            (DragMode::BottomLeft, Pos2::new(x0, y1)),
        ]
    }

    /// Corner handles win over the interior; the interior test is strict.
    pub fn hit_test(&self, p: Pos2) -> Option<DragMode> {
        for (mode, c) in self.handles() {
            if (p.x - c.x).abs() <= HANDLE_SIZE && (p.y - c.y).abs() <= HANDLE_SIZE {
                return Some(mode);
            }
        }
        let inside = p.x > self.x && p.x < self.x + self.w && p.y > self.y && p.y < self.y + self.h;
        inside.then_some(DragMode::Move)
    }

    /// Apply one drag step.  The rectangle always stays inside
    /// `[0, width] × [0, height]` and never shrinks below one pixel.
    pub fn drag_to(&mut self, mode: DragMode, p: Pos2, offset: Vec2, width: u32, height: u32) {
        let (bw, bh) = (width as f32, height as f32);
        let (ox, oy, ow, oh) = (self.x, self.y, self.w, self.h);
        match mode {
            DragMode::Move => {
                self.x = clamp_range(p.x - offset.x, 0.0, bw - ow);
                self.y = clamp_range(p.y - offset.y, 0.0, bh - oh);
            }
            DragMode::TopLeft => {
                let nx = clamp_range(p.x, 0.0, ox + ow - 1.0);
                let ny = clamp_range(p.y, 0.0, oy + oh - 1.0);
                self.w = ox + ow - nx;
                self.h = oy + oh - ny;
                self.x = nx;
                self.y = ny;
            }
            DragMode::TopRight => {
                let nx = clamp_range(p.x, ox + 1.0, bw);
                let ny = clamp_range(p.y, 0.0, oy + oh - 1.0);
                self.w = nx - ox;
                self.h = oy + oh - ny;
                self.y = ny;
            }
            DragMode::BottomRight => {
                let nx = clamp_range(p.x, ox + 1.0, bw);
                let ny = clamp_range(p.y, oy + 1.0, bh);
                self.w = nx - ox;
                self.h = ny - oy;
            }
            DragMode::BottomLeft => {
                let nx = clamp_range(p.x, 0.0, ox + ow - 1.0);
                let ny = clamp_range(p.y, oy + 1.0, bh);
                self.w = ox + ow - nx;
                self.h = ny - oy;
                self.x = nx;
            }
        }
    }

    /// Integer placement used when drawing the pixels back.
    pub fn placement(&self) -> (i32, i32, u32, u32) {
        (
            self.x.round() as i32,
            self.y.round() as i32,
            self.w.round().max(1.0) as u32,
            self.h.round().max(1.0) as u32,
        )
    }

    /// Draw the floating pixels onto `target` at the current rectangle.
    pub fn draw_onto(&self, target: &mut Surface) {
        let (x, y, w, h) = self.placement();
        target.draw_surface(&self.pixels, x, y, w, h, 1.0);
    }
}

/// `f32::clamp` without the panic when rounding leaves `lo > hi`.
fn clamp_range(v: f32, lo: f32, hi: f32) -> f32 {
    v.max(lo).min(hi)
}

/// Cut the pixels inside the closed lasso `points` out of `layer`.
///
/// The bounding box is floored and clipped to the canvas; a box two pixels
/// wide or tall (or less) lifts nothing.  Pixels copied into the selection
/// are exactly the ones cleared on the layer.
pub fn lift(layer: &mut Layer, points: &[Pos2]) -> Option<Selection> {
    let (width, height) = (layer.pixels.width(), layer.pixels.height());
    let first = *points.first()?;
    let (min, max) = points.iter().fold((first, first), |(lo, hi), p| {
        (Pos2::new(lo.x.min(p.x), lo.y.min(p.y)), Pos2::new(hi.x.max(p.x), hi.y.max(p.y)))
    });
    let x0 = (min.x.max(0.0) as u32).min(width);
    let y0 = (min.y.max(0.0) as u32).min(height);
    let x1 = (max.x.max(0.0) as u32).min(width);
    let y1 = (max.y.max(0.0) as u32).min(height);
    let (bw, bh) = (x1.saturating_sub(x0), y1.saturating_sub(y0));
    if bw <= MIN_LIFT_EXTENT || bh <= MIN_LIFT_EXTENT {
        return None;
    }

    let mask = rasterize_polygon(points, width, height)?;
    let mut pixels = Surface::new(bw, bh);
    for gy in y0..y1 {
        for gx in x0..x1 {
            if mask.coverage(gx, gy) == 0 {
                continue;
            }
            let px = *layer.pixels.get_pixel(gx, gy);
            if px[3] == 0 {
                continue;
            }
            pixels.put_pixel(gx - x0, gy - y0, px);
            layer.pixels.put_pixel(gx, gy, Rgba([0, 0, 0, 0]));
        }
    }

    Some(Selection {
        pixels,
        x: x0 as f32,
        y: y0 as f32,
        w: bw as f32,
        h: bh as f32,
        source: layer.id,
        from_reference: layer.is_reference,
    })
}

// ============================================================================
// ENGINE
// ============================================================================

/// The selection tool's state: an in-progress lasso, at most one floating
/// selection, its active drag, and the source layer's pixels from before
/// the lift.
#[derive(Default)]
pub struct SelectionEngine {
    selection: Option<Selection>,
    lasso: Vec<Pos2>,
    lassoing: bool,
    drag: Option<(DragMode, Vec2)>,
    before_lift: Option<(LayerId, Surface)>,
}

impl SelectionEngine {
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn has_selection(&self) -> bool {
        self.selection.is_some()
    }

    pub fn is_lassoing(&self) -> bool {
        self.lassoing
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn drag_mode(&self) -> Option<DragMode> {
        self.drag.map(|(m, _)| m)
    }

    pub fn lasso_points(&self) -> &[Pos2] {
        &self.lasso
    }

    // ---- lasso --------------------------------------------------------------

    /// Start tracing a lasso on `layer`, remembering its pixels so a cancel
    /// can put them back.
    pub fn begin_lasso(&mut self, layer: &Layer, p: Pos2) {
        self.before_lift = Some((layer.id, layer.pixels.clone()));
        self.lasso.clear();
        self.lasso.push(p);
        self.lassoing = true;
    }

    pub fn extend_lasso(&mut self, p: Pos2) {
        if self.lassoing {
            self.lasso.push(p);
        }
    }

    /// Close the lasso at `p` and lift from `layer`.  On success the new
    /// selection is immediately dragged (moved) from `p`.
    pub fn finish_lasso(&mut self, layer: &mut Layer, p: Pos2) -> bool {
        if !self.lassoing {
            return false;
        }
        self.lassoing = false;
        let points = std::mem::take(&mut self.lasso);
        match lift(layer, &points) {
            Some(sel) => {
                self.drag = Some((DragMode::Move, p - Pos2::new(sel.x, sel.y)));
                self.selection = Some(sel);
                true
            }
            None => {
                self.before_lift = None;
                false
            }
        }
    }

    // ---- handles ------------------------------------------------------------

    /// Press on the floating selection.  Misses do nothing.
    pub fn press(&mut self, p: Pos2) -> bool {
        let Some(sel) = &self.selection else {
            return false;
        };
        match sel.hit_test(p) {
            Some(mode) => {
                self.drag = Some((mode, p - Pos2::new(sel.x, sel.y)));
                true
            }
            None => false,
        }
    }

    pub fn drag(&mut self, p: Pos2, width: u32, height: u32) {
        if let Some((mode, offset)) = self.drag
            && let Some(sel) = &mut self.selection
        {
            sel.drag_to(mode, p, offset, width, height);
        }
    }

    pub fn release(&mut self) {
        self.drag = None;
    }

    // ---- paste --------------------------------------------------------------

    /// Float `pixels` centred on `at` (clamped inside the canvas) over
    /// `target`, already being moved.
    pub fn paste(&mut self, pixels: Surface, at: Pos2, target: LayerId, width: u32, height: u32) {
        let (w, h) = (pixels.width() as f32, pixels.height() as f32);
        let x = clamp_range(at.x - w / 2.0, 0.0, width as f32 - w);
        let y = clamp_range(at.y - h / 2.0, 0.0, height as f32 - h);
        self.drag = Some((DragMode::Move, at - Pos2::new(x, y)));
        self.selection = Some(Selection {
            pixels,
            x,
            y,
            w,
            h,
            source: target,
            from_reference: false,
        });
    }

    // ---- commit / cancel ----------------------------------------------------

    /// Draw the floating pixels back.  A selection lifted from a reference
    /// layer returns to it, and is dropped if that layer is gone; anything
    /// else lands on the active layer.
    ///
    /// The lifted layer's pre-lift pixels go into history, so a single undo
    /// reverts the whole cut-and-move.  Returns the layer drawn onto.
    pub fn commit(&mut self, canvas: &mut CanvasState, history: &mut HistoryManager) -> Option<LayerId> {
        let sel = self.selection.take()?;
        self.drag = None;
        let before = self.before_lift.take();

        let dest_id = if sel.from_reference {
            canvas.layer(sel.source)?.id
        } else {
            canvas.active_id()?
        };

        let mut recorded = None;
        if let Some((src_id, pixels)) = before
            && canvas.layer(src_id).is_some_and(|l| !l.is_reference)
        {
            history.record(src_id, pixels);
            recorded = Some(src_id);
        }

        let dest = canvas.layer_mut(dest_id)?;
        if !dest.is_reference && recorded != Some(dest_id) {
            history.snapshot(dest);
        }
        sel.draw_onto(&mut dest.pixels);
        Some(dest_id)
    }

    /// Forget everything tied to a deleted layer: a reference selection
    /// lifted from it is dropped, and its pre-lift pixels are released.
    /// Returns whether the floating selection went away.
    pub fn forget_layer(&mut self, id: LayerId) -> bool {
        if self.before_lift.as_ref().is_some_and(|(src, _)| *src == id) {
            self.before_lift = None;
            self.lasso.clear();
            self.lassoing = false;
        }
        if self.selection.as_ref().is_some_and(|s| s.from_reference && s.source == id) {
            self.selection = None;
            self.drag = None;
            return true;
        }
        false
    }

    /// Drop the floating selection and restore the lifted layer's pixels.
    /// Pasted selections are simply discarded.
    pub fn cancel(&mut self, canvas: &mut CanvasState) -> Option<LayerId> {
        let sel = self.selection.take();
        self.drag = None;
        self.lasso.clear();
        self.lassoing = false;
        let (id, pixels) = self.before_lift.take()?;
        let target = sel.map(|s| s.source).unwrap_or(id);
        let layer = canvas.layer_mut(target)?;
        layer.pixels = pixels;
        Some(target)
    }

    /// Forget an unfinished lasso; the layer was never touched.
    pub fn abandon_lasso(&mut self) {
        if self.lassoing {
            self.lassoing = false;
            self.lasso.clear();
            if self.selection.is_none() {
                self.before_lift = None;
            }
        }
    }
}
