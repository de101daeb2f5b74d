use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Fixed working resolution of every editor session.
pub const WORK_WIDTH: u32 = 1920;
pub const WORK_HEIGHT: u32 = 1080;

pub const CHUNK_SIZE: u32 = 64;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

// ============================================================================
// SURFACE
// ============================================================================

/// Sparse tiled RGBA surface backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
/// Chunk coordinates map to a flat index via `cy * chunks_per_row + cx`.
///
/// Chunks are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, and mutations use `Arc::make_mut` to COW-clone
/// only the touched chunk.  History snapshots are plain clones of this type.
#[derive(Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl Surface {
    // ---- construction -------------------------------------------------------

    /// Create an empty (fully transparent) surface.  Zero dimensions are
    /// bumped to 1 so indexing never divides by zero.
    pub fn new(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; (chunks_per_row * chunks_per_col) as usize],
        }
    }

    /// Import from a flat `RgbaImage`.  Only non-transparent chunks are stored.
    /// Chunk conversion is parallelised with rayon.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let width = src.width();
        let height = src.height();
        let mut surface = Self::new(width, height);
        if surface.width != width || surface.height != height {
            return surface;
        }

        let chunks_x = surface.chunks_per_row as usize;
        let total_chunks = surface.chunks.len();
        let src_raw = src.as_raw();

        let chunk_results: Vec<(usize, Option<Arc<RgbaImage>>)> = (0..total_chunks)
            .into_par_iter()
            .map(|flat| {
                let base_x = (flat % chunks_x) as u32 * CHUNK_SIZE;
                let base_y = (flat / chunks_x) as u32 * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(width - base_x);
                let ch = CHUNK_SIZE.min(height - base_y);
                let chunk_stride = CHUNK_SIZE as usize * 4;
                let mut chunk_data = vec![0u8; chunk_stride * CHUNK_SIZE as usize];
                let mut has_content = false;

                for ly in 0..ch {
                    let src_start = ((base_y + ly) * width + base_x) as usize * 4;
                    let dst_start = ly as usize * chunk_stride;
                    let byte_len = cw as usize * 4;
                    let row = &src_raw[src_start..src_start + byte_len];
                    has_content |= row.chunks_exact(4).any(|px| px[3] != 0);
                    chunk_data[dst_start..dst_start + byte_len].copy_from_slice(row);
                }

                let chunk = if has_content {
                    RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, chunk_data).map(Arc::new)
                } else {
                    None
                };
                (flat, chunk)
            })
            .collect();

        for (idx, chunk) in chunk_results {
            surface.chunks[idx] = chunk;
        }
        surface
    }

    /// Flatten into a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let out_stride = self.width as usize * 4;
        let chunk_stride = CHUNK_SIZE as usize * 4;
        let out_raw: &mut [u8] = &mut out;
        for (idx, slot) in self.chunks.iter().enumerate() {
            let Some(chunk) = slot else { continue };
            let base_x = (idx as u32 % self.chunks_per_row) * CHUNK_SIZE;
            let base_y = (idx as u32 / self.chunks_per_row) * CHUNK_SIZE;
            let cw = CHUNK_SIZE.min(self.width - base_x) as usize;
            let ch = CHUNK_SIZE.min(self.height - base_y) as usize;
            let chunk_raw = chunk.as_raw();
            for ly in 0..ch {
                let src_start = ly * chunk_stride;
                let dst_start = (base_y as usize + ly) * out_stride + base_x as usize * 4;
                out_raw[dst_start..dst_start + cw * 4]
                    .copy_from_slice(&chunk_raw[src_start..src_start + cw * 4]);
            }
        }
        out
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, x: u32, y: u32) -> usize {
        ((y / CHUNK_SIZE) * self.chunks_per_row + x / CHUNK_SIZE) as usize
    }

    // ---- pixel access -------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read a pixel (transparent for missing chunks or out-of-bounds).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        self.chunks[self.flat_index(x, y)]
            .as_ref()
            .map(|c| c.get_pixel(x % CHUNK_SIZE, y % CHUNK_SIZE))
            .unwrap_or(&TRANSPARENT_PIXEL)
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    /// Writing transparency into a missing chunk allocates nothing.
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.flat_index(x, y);
        if pixel[3] == 0 && self.chunks[idx].is_none() {
            return;
        }
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(x % CHUNK_SIZE, y % CHUNK_SIZE, pixel);
    }

    /// Source-over `color` onto the pixel at `opacity`.
    #[inline]
    pub fn blend_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>, opacity: f32) {
        if x >= self.width || y >= self.height || opacity <= 0.0 || color[3] == 0 {
            return;
        }
        let base = *self.get_pixel(x, y);
        self.put_pixel(x, y, blend_over(base, color, opacity));
    }

    /// Destination-out: reduce the pixel's alpha by `strength`.
    #[inline]
    pub fn erase_pixel(&mut self, x: u32, y: u32, strength: f32) {
        if x >= self.width || y >= self.height || strength <= 0.0 {
            return;
        }
        let base = *self.get_pixel(x, y);
        if base[3] == 0 {
            return;
        }
        self.put_pixel(x, y, erase_out(base, strength));
    }

    /// Drop all chunks (make the surface fully transparent).
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
    }

    /// True when no pixel carries any alpha.
    pub fn is_blank(&self) -> bool {
        self.chunks.iter().flatten().all(|c| chunk_is_blank(c))
    }

    /// Number of allocated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Source-over `src` into the rectangle `(x, y, w, h)`, resampling when
    /// the rectangle size differs from `src`.
    pub fn draw_surface(&mut self, src: &Surface, x: i32, y: i32, w: u32, h: u32, opacity: f32) {
        if w == 0 || h == 0 {
            return;
        }
        let scaled;
        let src = if w != src.width || h != src.height {
            let flat = src.to_rgba_image();
            scaled = Surface::from_rgba_image(&image::imageops::resize(
                &flat,
                w,
                h,
                image::imageops::FilterType::Triangle,
            ));
            &scaled
        } else {
            src
        };
        for sy in 0..src.height {
            let gy = y + sy as i32;
            if gy < 0 || gy as u32 >= self.height {
                continue;
            }
            for sx in 0..src.width {
                let gx = x + sx as i32;
                if gx < 0 || gx as u32 >= self.width {
                    continue;
                }
                let px = *src.get_pixel(sx, sy);
                self.blend_pixel(gx as u32, gy as u32, px, opacity);
            }
        }
    }
}

impl PartialEq for Surface {
    /// Pixel equality.  A missing chunk equals an allocated fully transparent one.
    fn eq(&self, other: &Self) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        self.chunks
            .iter()
            .zip(other.chunks.iter())
            .all(|(a, b)| match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.as_raw() == b.as_raw(),
                (Some(c), None) | (None, Some(c)) => chunk_is_blank(c),
            })
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

fn chunk_is_blank(chunk: &RgbaImage) -> bool {
    chunk.as_raw().chunks_exact(4).all(|px| px[3] == 0)
}

// ============================================================================
// PIXEL COMPOSITING
// ============================================================================

/// Source-over on straight (unpremultiplied) RGBA.
pub fn blend_over(base: Rgba<u8>, top: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    // Fast path: fully transparent top pixel — nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    if opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let top_a = (top[3] as f32 / 255.0) * opacity.min(1.0);
    let base_a = base[3] as f32 / 255.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |t: u8, b: u8| -> u8 {
        let t = t as f32 / 255.0;
        let b = b as f32 / 255.0;
        let c = (t * top_a + b * base_a * (1.0 - top_a)) / out_a;
        (c * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(top[0], base[0]),
        channel(top[1], base[1]),
        channel(top[2], base[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Destination-out: alpha-only erasure.  Fully erased pixels become
/// transparent black.
pub fn erase_out(base: Rgba<u8>, strength: f32) -> Rgba<u8> {
    let strength = strength.clamp(0.0, 1.0);
    let a = (base[3] as f32 * (1.0 - strength)).round() as u8;
    if a == 0 {
        Rgba([0, 0, 0, 0])
    } else {
        Rgba([base[0], base[1], base[2], a])
    }
}

// ============================================================================
// LAYERS
// ============================================================================

/// Stable identity of a layer for the lifetime of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived display record of a layer, re-applied after every structural change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerPresentation {
    pub z_index: usize,
    pub shown: bool,
    pub opacity: f32,
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    /// Imported guide imagery: paintable, but never recorded in history
    /// and never exported.
    pub is_reference: bool,
    pub pixels: Surface,
    pub presentation: LayerPresentation,
}

impl Layer {
    pub fn new(name: String, width: u32, height: u32, is_reference: bool) -> Self {
        Self {
            id: LayerId::new(),
            name,
            visible: true,
            opacity: 1.0,
            is_reference,
            pixels: Surface::new(width, height),
            presentation: LayerPresentation { z_index: 0, shown: true, opacity: 1.0 },
        }
    }

    /// Whether the layer contributes to the exported image.
    pub fn is_exported(&self) -> bool {
        self.visible && !self.is_reference && self.opacity > 0.0
    }
}

// ============================================================================
// LAYER STACK
// ============================================================================

/// Ordered layer stack, bottom (index 0) to top.
pub struct CanvasState {
    pub layers: Vec<Layer>,
    pub active_layer_index: usize,
    pub width: u32,
    pub height: u32,
}

impl CanvasState {
    /// An empty stack at the given resolution.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            layers: Vec::new(),
            active_layer_index: 0,
            width,
            height,
        }
    }

    /// Append a layer on top and make it active.  A missing name becomes
    /// `Layer N`.
    pub fn add_layer(&mut self, name: Option<&str>) -> LayerId {
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("Layer {}", self.layers.len() + 1),
        };
        self.push_layer(Layer::new(name, self.width, self.height, false))
    }

    /// Append a reference layer on top and make it active.
    pub fn add_reference_layer(&mut self, name: &str) -> LayerId {
        self.push_layer(Layer::new(name.to_string(), self.width, self.height, true))
    }

    fn push_layer(&mut self, layer: Layer) -> LayerId {
        let id = layer.id;
        self.layers.push(layer);
        self.active_layer_index = self.layers.len() - 1;
        self.apply_presentation();
        id
    }

    /// Remove a layer once `confirm` approves it.  The active index is
    /// clamped into the remaining range.
    pub fn remove_layer(&mut self, id: LayerId, confirm: impl FnOnce(&Layer) -> bool) -> Option<Layer> {
        let idx = self.index_of(id)?;
        if !confirm(&self.layers[idx]) {
            return None;
        }
        let removed = self.layers.remove(idx);
        self.active_layer_index = idx.min(self.layers.len().saturating_sub(1));
        self.apply_presentation();
        Some(removed)
    }

    /// Move the layer at `from` to `to`; the moved layer becomes active.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from >= self.layers.len() || to >= self.layers.len() || from == to {
            return false;
        }
        let layer = self.layers.remove(from);
        self.layers.insert(to, layer);
        self.active_layer_index = to;
        self.apply_presentation();
        true
    }

    /// Drag-and-drop: drop row `src` onto row `dst`.
    pub fn drop_onto(&mut self, src: usize, dst: usize) -> bool {
        if src >= self.layers.len() || dst >= self.layers.len() || src == dst {
            return false;
        }
        let to = if src < dst { dst - 1 } else { dst };
        let layer = self.layers.remove(src);
        self.layers.insert(to, layer);
        self.active_layer_index = to;
        self.apply_presentation();
        true
    }

    /// Move one step towards the top.
    pub fn move_up(&mut self, id: LayerId) -> bool {
        match self.index_of(id) {
            Some(idx) if idx + 1 < self.layers.len() => self.reorder(idx, idx + 1),
            _ => false,
        }
    }

    /// Move one step towards the bottom.
    pub fn move_down(&mut self, id: LayerId) -> bool {
        match self.index_of(id) {
            Some(idx) if idx > 0 => self.reorder(idx, idx - 1),
            _ => false,
        }
    }

    pub fn set_opacity(&mut self, id: LayerId, value: f32) -> bool {
        let Some(layer) = self.layer_mut(id) else { return false };
        layer.opacity = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        self.apply_presentation();
        true
    }

    pub fn set_visible(&mut self, id: LayerId, visible: bool) -> bool {
        let Some(layer) = self.layer_mut(id) else { return false };
        layer.visible = visible;
        self.apply_presentation();
        true
    }

    /// Rename; blank names keep the previous one.
    pub fn rename(&mut self, id: LayerId, name: &str) -> bool {
        let trimmed = name.trim();
        match self.layer_mut(id) {
            Some(layer) if !trimmed.is_empty() => {
                layer.name = trimmed.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn set_active(&mut self, index: usize) -> bool {
        if index < self.layers.len() {
            self.active_layer_index = index;
            true
        } else {
            false
        }
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layers.get(self.active_layer_index)
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        self.layers.get_mut(self.active_layer_index)
    }

    pub fn active_id(&self) -> Option<LayerId> {
        self.active_layer().map(|l| l.id)
    }

    /// Re-derive z-order and visibility/opacity presentation for every layer.
    pub fn apply_presentation(&mut self) {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.presentation = LayerPresentation {
                z_index: i + 1,
                shown: layer.visible,
                opacity: layer.opacity,
            };
        }
    }

    /// Z-index of the transient overlay, always above every layer.
    pub fn overlay_z_index(&self) -> usize {
        self.layers.len() + 10
    }

    // ========================================================================
    // COMPOSITING
    // ========================================================================

    /// Flatten every exported layer over opaque white, bottom to top.
    /// Rows are composited in parallel.
    pub fn composite_for_export(&self) -> RgbaImage {
        let w = self.width;
        let h = self.height;
        let mut out = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        let layers: Vec<&Layer> = self.layers.iter().filter(|l| l.is_exported()).collect();
        if layers.is_empty() {
            return out;
        }
        let row_len = w as usize * 4;
        let raw: &mut [u8] = &mut out;
        raw.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            let y = y as u32;
            for layer in &layers {
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let top = *layer.pixels.get_pixel(x as u32, y);
                    if top[3] == 0 {
                        continue;
                    }
                    let base = Rgba([px[0], px[1], px[2], px[3]]);
                    px.copy_from_slice(&blend_over(base, top, layer.opacity).0);
                }
            }
        });
        out
    }

    /// Composite of all visible layers (reference layers included) at a
    /// single pixel, over transparency.
    pub fn sample_visible(&self, x: u32, y: u32) -> Rgba<u8> {
        self.layers
            .iter()
            .filter(|l| l.visible && l.opacity > 0.0)
            .fold(Rgba([0, 0, 0, 0]), |acc, l| {
                blend_over(acc, *l.pixels.get_pixel(x, y), l.opacity)
            })
    }
}
