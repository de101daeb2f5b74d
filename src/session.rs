//! The editor session: one owned object holding the layer stack, history,
//! color model, tools, selection, view and lock state of a single editing
//! surface.  Hosts feed it pointer, wheel and key events and read back
//! layers, overlay and exports; it never reaches into the host.

use std::cell::Cell;

use egui::{PointerButton, Pos2, Rect};
use image::{Rgba, RgbaImage};

use crate::canvas::{CanvasState, Layer, LayerId, Surface, WORK_HEIGHT, WORK_WIDTH};
use crate::components::colors::{ColorModel, parse_hex};
use crate::components::history::HistoryManager;
use crate::components::hotkeys::{self, ALPHA_STEP, Hotkey, KeyInput, SIZE_STEP};
use crate::components::layers::{LayerRow, LayersPanel, layer_rows};
use crate::components::tools::{
    Stroke, StrokeMode, Tool, ToolProperties, flatten_path, rasterize_polygon, rasterize_stroke,
};
use crate::config::EditorConfig;
use crate::io::{DecodeResult, EditorError, ExportHandle, ImageLoader, ImageSource, encode_png, fit_into};
use crate::lock::{LockController, LockSignal, LockTransition};
use crate::ops::clipboard::Clipboard;
use crate::ops::selection::{HANDLE_SIZE, Selection, SelectionEngine};
use crate::view::ViewTransform;

pub const BASE_LAYER_NAME: &str = "Base layer";
pub const REFERENCE_LAYER_NAME: &str = "Reference";

const MARQUEE_COLOR: Rgba<u8> = Rgba([0x3b, 0x82, 0xf6, 255]);
const MARQUEE_DASH: f32 = 6.0;
const MARQUEE_GAP: f32 = 4.0;
const LASSO_FILL_OPACITY: f32 = 0.25;
const RING_COLOR: Rgba<u8> = Rgba([0x11, 0x18, 0x27, 255]);
const RING_OPACITY: f32 = 0.7;
const RING_WIDTH: f32 = 1.5;
const RING_SEGMENTS: usize = 48;

/// What the pointer is currently doing.  Exactly one gesture runs at a time;
/// presses that arrive mid-gesture are ignored rather than queued.
enum Gesture {
    Idle,
    Stroke {
        stroke: Stroke,
        layer: LayerId,
        snapshot_pushed: bool,
    },
    Lasso {
        layer: LayerId,
    },
    /// Moving or resizing the floating selection.  Also entered right after
    /// a lift or a paste, before any button is held.
    DragSelection,
    Pan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureKind {
    Idle,
    Drawing,
    Lassoing,
    DraggingSelection,
    Panning,
}

/// Keeps the transient overlay hidden while alive.
pub struct OverlaySuppression<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for OverlaySuppression<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

pub struct EditorSession {
    canvas: CanvasState,
    history: HistoryManager,
    colors: ColorModel,
    tool: Tool,
    props: ToolProperties,
    gesture: Gesture,
    selection: SelectionEngine,
    clipboard: Clipboard,
    view: ViewTransform,
    lock: LockController,
    layers_panel: LayersPanel,
    loader: ImageLoader,
    /// Last pointer position over the canvas, in raster space.
    last_pos: Pos2,
    overlay_enabled: bool,
    overlay_suppressed: Cell<u32>,
    notices: Vec<String>,
}

impl EditorSession {
    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Build a session with a single base layer.  A configured base image is
    /// decoded in the background; see [`poll_decodes`](Self::poll_decodes).
    pub fn create(config: &EditorConfig) -> Self {
        let mut canvas = CanvasState::new(WORK_WIDTH, WORK_HEIGHT);
        let base = canvas.add_layer(Some(BASE_LAYER_NAME));
        let color = parse_hex(&config.brush.color).unwrap_or_else(|e| {
            log_warn!("Ignoring configured brush color: {}", e);
            [0, 0, 0]
        });

        let mut session = Self {
            canvas,
            history: HistoryManager::new(config.history_limit),
            colors: ColorModel::new(color),
            tool: Tool::default(),
            props: config.brush.tool_properties(),
            gesture: Gesture::Idle,
            selection: SelectionEngine::default(),
            clipboard: Clipboard::default(),
            view: ViewTransform::new(WORK_WIDTH, WORK_HEIGHT)
                .with_zoom_limits(config.min_zoom, config.max_zoom),
            lock: LockController::default(),
            layers_panel: LayersPanel::default(),
            loader: ImageLoader::new(),
            last_pos: Pos2::new(WORK_WIDTH as f32 / 2.0, WORK_HEIGHT as f32 / 2.0),
            overlay_enabled: config.overlay_enabled,
            overlay_suppressed: Cell::new(0),
            notices: Vec::new(),
        };
        if let Some(path) = &config.base_image {
            log_info!("Decoding base image {}", path.display());
            session.loader.queue(base, ImageSource::Path(path.clone()));
        }
        log_info!("Editor session created ({}x{})", WORK_WIDTH, WORK_HEIGHT);
        session
    }

    /// End the session.  Decodes still in flight are dropped on arrival.
    pub fn dispose(self) {
        log_info!(
            "Editor session disposed ({} layers, {} pending decodes)",
            self.canvas.layers.len(),
            self.loader.pending()
        );
    }

    // ========================================================================
    // LOCK
    // ========================================================================

    /// Observe an externally owned lock.  Takes effect immediately.
    pub fn set_lock_signal(&mut self, signal: LockSignal) {
        self.lock.observe(signal);
        self.sync_lock();
    }

    /// Re-read the lock signal and react to a change.  Every mutating entry
    /// point calls this first; hosts also call it when the signal flips.
    /// Returns whether the editor is locked.
    pub fn sync_lock(&mut self) -> bool {
        while let Some(transition) = self.lock.sync() {
            match transition {
                LockTransition::Engaged => self.on_lock_engaged(),
                LockTransition::Released => {
                    log_info!("Editor unlocked");
                }
            }
        }
        self.lock.is_engaged()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_engaged()
    }

    fn on_lock_engaged(&mut self) {
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Idle => {}
            Gesture::Stroke { layer, snapshot_pushed, .. } => {
                if snapshot_pushed {
                    self.history.retract_last(layer);
                }
                log_warn!("Lock engaged: in-progress stroke discarded");
            }
            Gesture::Lasso { .. } => {
                self.selection.abandon_lasso();
                log_warn!("Lock engaged: lasso discarded");
            }
            Gesture::DragSelection => self.selection.release(),
            Gesture::Pan => self.view.end_pan(),
        }
        if self.selection.has_selection() {
            self.selection.cancel(&mut self.canvas);
            log_warn!("Lock engaged: floating selection returned to its layer");
        }
        self.layers_panel.cancel_drag();
    }

    // ========================================================================
    // POINTER
    // ========================================================================

    pub fn gesture(&self) -> GestureKind {
        match self.gesture {
            Gesture::Idle => GestureKind::Idle,
            Gesture::Stroke { .. } => GestureKind::Drawing,
            Gesture::Lasso { .. } => GestureKind::Lassoing,
            Gesture::DragSelection => GestureKind::DraggingSelection,
            Gesture::Pan => GestureKind::Panning,
        }
    }

    /// Where the host draws the canvas at zoom 1, in device pixels.
    pub fn set_viewport(&mut self, viewport: Rect) {
        self.view.set_viewport(viewport);
    }

    /// Pointer pressed at `device`.  Returns whether the press was used.
    pub fn pointer_down(&mut self, device: Pos2, button: PointerButton) -> bool {
        if self.sync_lock() {
            return false;
        }
        if !matches!(self.gesture, Gesture::Idle | Gesture::DragSelection) {
            return false;
        }

        if self.tool == Tool::Zoom {
            if matches!(self.gesture, Gesture::DragSelection) {
                self.selection.release();
            }
            self.view.begin_pan(device);
            self.gesture = Gesture::Pan;
            return true;
        }

        let pos = self.view.to_raster(device);
        self.last_pos = pos;

        if self.tool == Tool::Select {
            if button == PointerButton::Secondary {
                self.gesture = Gesture::Idle;
                self.selection.cancel(&mut self.canvas);
                return true;
            }
            if self.selection.has_selection() {
                if self.selection.press(pos) {
                    self.gesture = Gesture::DragSelection;
                    return true;
                }
                return false;
            }
        }

        if matches!(self.gesture, Gesture::DragSelection) {
            self.selection.release();
            self.gesture = Gesture::Idle;
        }
        self.begin_gesture(pos)
    }

    fn begin_gesture(&mut self, pos: Pos2) -> bool {
        let Some(layer) = self.canvas.active_layer() else {
            return false;
        };
        if !layer.visible {
            return false;
        }
        let id = layer.id;

        if self.tool == Tool::Select {
            if self.selection.has_selection() {
                return false;
            }
            self.selection.begin_lasso(layer, pos);
            self.gesture = Gesture::Lasso { layer: id };
            return true;
        }

        let Some(mode) = self.tool.stroke_mode() else {
            return false;
        };
        let snapshot_pushed = self.history.snapshot(layer);
        let stroke = Stroke::begin(mode, pos, &self.props, self.colors.rgb());
        self.gesture = Gesture::Stroke {
            stroke,
            layer: id,
            snapshot_pushed,
        };
        true
    }

    pub fn pointer_move(&mut self, device: Pos2) {
        if self.sync_lock() {
            return;
        }
        if let Gesture::Pan = self.gesture {
            self.view.pan_to(device);
            return;
        }
        let pos = self.view.to_raster(device);
        self.last_pos = pos;
        match &mut self.gesture {
            Gesture::Stroke { stroke, .. } => stroke.push(pos),
            Gesture::Lasso { .. } => self.selection.extend_lasso(pos),
            Gesture::DragSelection => {
                self.selection.drag(pos, self.canvas.width, self.canvas.height)
            }
            Gesture::Idle | Gesture::Pan => {}
        }
    }

    pub fn pointer_up(&mut self, device: Pos2) {
        if self.sync_lock() {
            return;
        }
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Idle => {}
            Gesture::Pan => self.view.end_pan(),
            Gesture::DragSelection => self.selection.release(),
            Gesture::Lasso { layer } => {
                let pos = self.view.to_raster(device);
                self.last_pos = pos;
                let lifted = match self.canvas.layer_mut(layer) {
                    Some(target) => self.selection.finish_lasso(target, pos),
                    None => {
                        self.selection.abandon_lasso();
                        false
                    }
                };
                if lifted {
                    self.gesture = Gesture::DragSelection;
                }
            }
            Gesture::Stroke {
                stroke,
                layer,
                snapshot_pushed,
            } => self.commit_stroke(&stroke, layer, snapshot_pushed),
        }
    }

    /// Leaving the canvas ends the gesture exactly like a release.
    pub fn pointer_leave(&mut self, device: Pos2) {
        self.pointer_up(device);
    }

    fn commit_stroke(&mut self, stroke: &Stroke, layer: LayerId, snapshot_pushed: bool) {
        let Some(target) = self.canvas.layer_mut(layer) else {
            return;
        };
        let opacity = target.opacity;
        if !stroke.apply(&mut target.pixels, opacity) {
            // a press without movement leaves no trace
            if snapshot_pushed {
                self.history.retract_last(layer);
            }
            return;
        }
        if stroke.mode == StrokeMode::Brush {
            self.colors.push_history(stroke.color);
        }
    }

    /// Pointer motion with no button held.  Only positions over the canvas
    /// are remembered.
    pub fn hover(&mut self, device: Pos2) {
        if self.sync_lock() {
            return;
        }
        if self.view.contains(device) {
            self.last_pos = self.view.to_raster(device);
        }
    }

    pub fn last_pos(&self) -> Pos2 {
        self.last_pos
    }

    /// Mouse wheel; zooms only with the zoom tool.
    pub fn wheel(&mut self, delta: f32) -> bool {
        if self.sync_lock() || self.tool != Tool::Zoom {
            return false;
        }
        self.view.wheel(delta)
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    // ========================================================================
    // KEYBOARD
    // ========================================================================

    /// Handle a key press.  Returns the shortcut that was carried out.
    pub fn hotkey(&mut self, input: &KeyInput) -> Option<Hotkey> {
        if self.sync_lock() {
            return None;
        }
        let key = hotkeys::map_key(input)?;
        let handled = match key {
            Hotkey::Brush => {
                self.set_tool(Tool::Brush);
                true
            }
            Hotkey::Eraser => {
                self.set_tool(Tool::Eraser);
                true
            }
            Hotkey::Eyedropper => self.pick_color().is_some(),
            Hotkey::SizeUp => {
                self.props.nudge_size(SIZE_STEP);
                true
            }
            Hotkey::SizeDown => {
                self.props.nudge_size(-SIZE_STEP);
                true
            }
            Hotkey::AlphaUp => {
                self.props.nudge_alpha(ALPHA_STEP);
                true
            }
            Hotkey::AlphaDown => {
                self.props.nudge_alpha(-ALPHA_STEP);
                true
            }
            Hotkey::Undo => {
                self.undo();
                true
            }
            Hotkey::Redo => {
                self.redo();
                true
            }
            Hotkey::Copy => {
                if self.selection.has_selection() {
                    let _ = self.copy_selection();
                    true
                } else {
                    false
                }
            }
            Hotkey::Paste => self.paste_selection(),
        };
        handled.then_some(key)
    }

    // ========================================================================
    // TOOLS & COLOR
    // ========================================================================

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn tool_properties(&self) -> &ToolProperties {
        &self.props
    }

    pub fn set_brush_size(&mut self, size: f32) {
        self.props.set_size(size);
    }

    pub fn set_brush_alpha(&mut self, alpha: f32) {
        self.props.set_alpha(alpha);
    }

    pub fn set_smoothing(&mut self, raw: f32) {
        self.props.set_smoothing(raw);
    }

    pub fn set_eraser_strength(&mut self, strength: Option<f32>) {
        self.props.set_eraser_strength(strength);
    }

    pub fn colors(&self) -> &ColorModel {
        &self.colors
    }

    pub fn colors_mut(&mut self) -> &mut ColorModel {
        &mut self.colors
    }

    /// Eyedropper: sample every visible layer (reference layers included)
    /// at the last pointer position and make it the active color.
    pub fn pick_color(&mut self) -> Option<[u8; 3]> {
        if self.sync_lock() {
            return None;
        }
        let x = (self.last_pos.x.floor().max(0.0) as u32).min(self.canvas.width.saturating_sub(1));
        let y = (self.last_pos.y.floor().max(0.0) as u32).min(self.canvas.height.saturating_sub(1));
        let px = self.canvas.sample_visible(x, y);
        let rgb = [px[0], px[1], px[2]];
        self.colors.set_rgb(rgb);
        Some(rgb)
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    fn painting_in_progress(&self) -> bool {
        matches!(self.gesture, Gesture::Stroke { .. } | Gesture::Lasso { .. })
    }

    pub fn undo(&mut self) -> Option<LayerId> {
        if self.sync_lock() || self.painting_in_progress() {
            return None;
        }
        self.history.undo(&mut self.canvas)
    }

    pub fn redo(&mut self) -> Option<LayerId> {
        if self.sync_lock() || self.painting_in_progress() {
            return None;
        }
        self.history.redo(&mut self.canvas)
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    // ========================================================================
    // LAYERS
    // ========================================================================

    pub fn canvas(&self) -> &CanvasState {
        &self.canvas
    }

    pub fn layers(&self) -> &[Layer] {
        &self.canvas.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.canvas.layer(id)
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.canvas.active_layer()
    }

    pub fn layer_rows(&self) -> Vec<LayerRow> {
        layer_rows(&self.canvas)
    }

    pub fn add_layer(&mut self, name: Option<&str>) -> Option<LayerId> {
        if self.sync_lock() {
            return None;
        }
        Some(self.canvas.add_layer(name))
    }

    pub fn select_layer(&mut self, index: usize) -> bool {
        if self.sync_lock() {
            return false;
        }
        self.canvas.set_active(index)
    }

    /// Delete the active layer once `confirm` approves.  Its history goes
    /// with it, as does a selection floating over it from a reference lift.
    pub fn delete_active_layer(&mut self, confirm: impl FnOnce(&Layer) -> bool) -> bool {
        if self.sync_lock() {
            return false;
        }
        let Some(id) = self.canvas.active_id() else {
            return false;
        };
        let Some(removed) = self.canvas.remove_layer(id, confirm) else {
            return false;
        };
        self.history.discard_layer(id);
        match self.gesture {
            Gesture::Stroke { layer, .. } if layer == id => self.gesture = Gesture::Idle,
            Gesture::Lasso { layer } if layer == id => {
                self.selection.abandon_lasso();
                self.gesture = Gesture::Idle;
            }
            _ => {}
        }
        if self.selection.forget_layer(id) && matches!(self.gesture, Gesture::DragSelection) {
            self.gesture = Gesture::Idle;
        }
        log_info!("Deleted layer '{}'", removed.name);
        true
    }

    /// Clear the active layer to transparent once `confirm` approves.
    pub fn clear_active_layer(&mut self, confirm: impl FnOnce(&Layer) -> bool) -> bool {
        if self.sync_lock() {
            return false;
        }
        let Some(layer) = self.canvas.active_layer_mut() else {
            return false;
        };
        if !confirm(layer) {
            return false;
        }
        self.history.snapshot(layer);
        layer.pixels.clear();
        true
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> bool {
        !self.sync_lock() && self.canvas.rename(id, name)
    }

    pub fn set_layer_opacity(&mut self, id: LayerId, opacity: f32) -> bool {
        !self.sync_lock() && self.canvas.set_opacity(id, opacity)
    }

    pub fn set_layer_visible(&mut self, id: LayerId, visible: bool) -> bool {
        !self.sync_lock() && self.canvas.set_visible(id, visible)
    }

    pub fn move_layer_up(&mut self, id: LayerId) -> bool {
        !self.sync_lock() && self.canvas.move_up(id)
    }

    pub fn move_layer_down(&mut self, id: LayerId) -> bool {
        !self.sync_lock() && self.canvas.move_down(id)
    }

    /// Start dragging the layers-panel row at `display_idx` (0 = top row).
    pub fn begin_layer_drag(&mut self, display_idx: usize) -> bool {
        if self.sync_lock() {
            return false;
        }
        self.layers_panel.begin_drag(display_idx);
        true
    }

    /// Drop the dragged row onto the row at `display_idx`.
    pub fn drop_layer_on(&mut self, display_idx: usize) -> bool {
        if self.sync_lock() {
            self.layers_panel.cancel_drag();
            return false;
        }
        match self.layers_panel.drop_on(display_idx, self.canvas.layers.len()) {
            Some((src, dst)) => self.canvas.drop_onto(src, dst),
            None => false,
        }
    }

    // ========================================================================
    // SELECTION & CLIPBOARD
    // ========================================================================

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.selection()
    }

    /// Confirm/cancel affordances are shown only with the select tool, a
    /// floating selection and no lock.
    pub fn selection_controls_visible(&self) -> bool {
        self.tool == Tool::Select && self.selection.has_selection() && !self.lock.is_engaged()
    }

    /// Copy the floating selection.  `Ok(false)` when there is nothing to
    /// copy; selections lifted from a reference layer are refused.
    pub fn copy_selection(&mut self) -> Result<bool, EditorError> {
        if self.sync_lock() {
            return Ok(false);
        }
        let Some(sel) = self.selection.selection() else {
            return Ok(false);
        };
        match self.clipboard.copy_selection(sel) {
            Ok(()) => Ok(true),
            Err(e) => {
                log_warn!("Copy rejected: {}", e);
                self.notices.push(e.to_string());
                Err(e)
            }
        }
    }

    pub fn has_clipboard(&self) -> bool {
        self.clipboard.has_image()
    }

    /// Float the clipboard over the active layer, centred on the last pointer
    /// position.  A selection already floating is committed first.
    pub fn paste_selection(&mut self) -> bool {
        if self.sync_lock() || self.painting_in_progress() || matches!(self.gesture, Gesture::Pan) {
            return false;
        }
        let Some(pixels) = self.clipboard.contents() else {
            return false;
        };
        let target = match self.canvas.active_layer() {
            Some(l) if !l.is_reference => l.id,
            _ => return false,
        };
        if self.selection.has_selection() {
            self.selection.commit(&mut self.canvas, &mut self.history);
        }
        let (w, h) = (self.canvas.width, self.canvas.height);
        self.selection.paste(pixels, self.last_pos, target, w, h);
        self.gesture = Gesture::DragSelection;
        true
    }

    /// Draw the floating selection back.  Returns the layer it landed on.
    pub fn commit_selection(&mut self) -> Option<LayerId> {
        if self.sync_lock() || self.painting_in_progress() {
            return None;
        }
        if matches!(self.gesture, Gesture::DragSelection) {
            self.gesture = Gesture::Idle;
        }
        self.selection.commit(&mut self.canvas, &mut self.history)
    }

    /// Discard the floating selection, restoring the layer it was cut from.
    pub fn cancel_selection(&mut self) -> Option<LayerId> {
        if self.sync_lock() || matches!(self.gesture, Gesture::Stroke { .. } | Gesture::Pan) {
            return None;
        }
        self.gesture = Gesture::Idle;
        self.selection.cancel(&mut self.canvas)
    }

    /// User-facing notices (rejected operations) since the last call.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    // ========================================================================
    // IMAGES
    // ========================================================================

    /// Add a blank reference layer on top and decode `source` into it in the
    /// background.
    pub fn add_reference_image(&mut self, source: ImageSource) -> Option<LayerId> {
        if self.sync_lock() {
            return None;
        }
        let id = self.canvas.add_reference_layer(REFERENCE_LAYER_NAME);
        log_info!("Decoding reference image {}", source.label());
        self.loader.queue(id, source);
        Some(id)
    }

    pub fn pending_decodes(&self) -> usize {
        self.loader.pending()
    }

    /// Apply every decode that has finished.  Returns how many arrived.
    pub fn poll_decodes(&mut self) -> usize {
        let mut applied = 0;
        while let Some(result) = self.loader.try_recv() {
            self.apply_decode(result);
            applied += 1;
        }
        applied
    }

    /// Block until every queued decode has arrived and been applied.
    pub fn wait_for_decodes(&mut self) -> usize {
        let mut applied = 0;
        while let Some(result) = self.loader.recv_blocking() {
            self.apply_decode(result);
            applied += 1;
        }
        applied
    }

    fn apply_decode(&mut self, result: DecodeResult) {
        let DecodeResult { layer, label, image } = result;
        let (w, h) = (self.canvas.width, self.canvas.height);
        let Some(target) = self.canvas.layer_mut(layer) else {
            log_warn!("Dropped decoded image {}: its layer no longer exists", label);
            return;
        };
        match image {
            Ok(img) => {
                target.pixels = fit_into(&img, w, h);
                log_info!("Loaded {} ({}x{}) into '{}'", label, img.width(), img.height(), target.name);
            }
            Err(e) => {
                target.pixels.clear();
                log_err!("Failed to load {}: {}", label, e);
            }
        }
    }

    // ========================================================================
    // EXPORT
    // ========================================================================

    /// Hide the transient overlay until the guard drops.
    pub fn suppress_overlay(&self) -> OverlaySuppression<'_> {
        self.overlay_suppressed.set(self.overlay_suppressed.get() + 1);
        OverlaySuppression {
            depth: &self.overlay_suppressed,
        }
    }

    /// Flattened export image: visible, non-reference layers over white.
    pub fn composite(&self) -> RgbaImage {
        let _quiet = self.suppress_overlay();
        self.canvas.composite_for_export()
    }

    pub fn export_png(&self) -> Result<Vec<u8>, EditorError> {
        let image = self.composite();
        let bytes = encode_png(&image)?;
        log_info!("Exported {} bytes of PNG", bytes.len());
        Ok(bytes)
    }

    /// Composite now and encode on a worker thread.
    pub fn export_png_async(&self) -> ExportHandle {
        ExportHandle::spawn(self.composite())
    }

    // ========================================================================
    // OVERLAY
    // ========================================================================

    pub fn overlay_enabled(&self) -> bool {
        self.overlay_enabled
    }

    pub fn set_overlay_enabled(&mut self, enabled: bool) {
        self.overlay_enabled = enabled;
    }

    /// Z-order slot of the overlay, above every layer.
    pub fn overlay_z_index(&self) -> usize {
        self.canvas.overlay_z_index()
    }

    /// Render the transient overlay: floating selection with its marquee and
    /// handles, the in-progress stroke or lasso, and the brush ring.  `None`
    /// while the overlay is disabled, suppressed or locked.
    pub fn render_overlay(&self) -> Option<Surface> {
        if !self.overlay_enabled || self.overlay_suppressed.get() > 0 || self.lock.is_engaged() {
            return None;
        }
        let (w, h) = (self.canvas.width, self.canvas.height);
        let mut out = Surface::new(w, h);

        if let Some(sel) = self.selection.selection() {
            sel.draw_onto(&mut out);
            draw_marquee(&mut out, sel);
        }
        match &self.gesture {
            Gesture::Stroke { stroke, layer, .. } => {
                let opacity = self.canvas.layer(*layer).map_or(1.0, |l| l.opacity);
                stroke.apply_preview(&mut out, opacity);
            }
            Gesture::Lasso { .. } => {
                let path = flatten_path(self.selection.lasso_points(), self.props.smoothing_t());
                if let Some(mask) = rasterize_polygon(&path, w, h) {
                    mask.paint(&mut out, MARQUEE_COLOR, LASSO_FILL_OPACITY);
                }
            }
            Gesture::Idle | Gesture::DragSelection | Gesture::Pan => {}
        }
        if self.tool.shows_brush_outline() {
            draw_ring(&mut out, self.last_pos, (self.props.size / 2.0).max(2.0));
        }
        Some(out)
    }
}

// ============================================================================
// OVERLAY PRIMITIVES
// ============================================================================

fn draw_marquee(out: &mut Surface, sel: &Selection) {
    let corners = sel.handles().map(|(_, c)| c);
    for i in 0..corners.len() {
        dashed_line(out, corners[i], corners[(i + 1) % corners.len()]);
    }
    for c in corners {
        fill_square(out, c, HANDLE_SIZE);
    }
}

fn dashed_line(out: &mut Surface, a: Pos2, b: Pos2) {
    let len = (b - a).length();
    if len <= 0.0 {
        return;
    }
    let dir = (b - a) / len;
    let (w, h) = (out.width(), out.height());
    let mut t = 0.0;
    while t < len {
        let end = (t + MARQUEE_DASH).min(len);
        if let Some(mask) = rasterize_stroke(&[a + dir * t, a + dir * end], 1.0, w, h) {
            mask.paint(out, MARQUEE_COLOR, 1.0);
        }
        t += MARQUEE_DASH + MARQUEE_GAP;
    }
}

fn fill_square(out: &mut Surface, center: Pos2, size: f32) {
    let half = size / 2.0;
    let x0 = (center.x - half).floor().max(0.0) as u32;
    let y0 = (center.y - half).floor().max(0.0) as u32;
    let x1 = ((center.x + half).ceil().max(0.0) as u32).min(out.width());
    let y1 = ((center.y + half).ceil().max(0.0) as u32).min(out.height());
    for y in y0..y1 {
        for x in x0..x1 {
            out.put_pixel(x, y, MARQUEE_COLOR);
        }
    }
}

fn draw_ring(out: &mut Surface, center: Pos2, radius: f32) {
    let points: Vec<Pos2> = (0..=RING_SEGMENTS)
        .map(|i| {
            let a = i as f32 / RING_SEGMENTS as f32 * std::f32::consts::TAU;
            Pos2::new(center.x + radius * a.cos(), center.y + radius * a.sin())
        })
        .collect();
    if let Some(mask) = rasterize_stroke(&points, RING_WIDTH, out.width(), out.height()) {
        mask.paint(out, RING_COLOR, RING_OPACITY);
    }
}
