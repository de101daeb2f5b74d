use std::collections::{HashMap, VecDeque};

use crate::canvas::{CanvasState, Layer, LayerId, Surface};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ============================================================================
// PER-LAYER STACKS
// ============================================================================

/// Full-surface snapshots for one layer.  Surfaces are copy-on-write, so a
/// snapshot only holds references to the chunks that existed at the time.
#[derive(Default)]
struct LayerHistory {
    undo: VecDeque<Surface>,
    redo: VecDeque<Surface>,
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

/// Per-layer undo/redo stacks interleaved by a single global order, so undo
/// walks back across layers in the order mutations actually happened.
pub struct HistoryManager {
    records: HashMap<LayerId, LayerHistory>,
    history_order: VecDeque<LayerId>,
    redo_order: VecDeque<LayerId>,
    max_history_size: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            records: HashMap::new(),
            history_order: VecDeque::new(),
            redo_order: VecDeque::new(),
            max_history_size: max_history_size.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.max_history_size
    }

    /// Record the layer's current pixels before a mutation.  Reference layers
    /// are never recorded; returns whether an entry was pushed.
    pub fn snapshot(&mut self, layer: &Layer) -> bool {
        if layer.is_reference {
            return false;
        }
        self.record(layer.id, layer.pixels.clone());
        true
    }

    /// Push `before` as the newest undo state of `id`.  Starts a new branch:
    /// every pending redo is dropped.
    pub fn record(&mut self, id: LayerId, before: Surface) {
        let limit = self.max_history_size;
        self.records.entry(id).or_default().undo.push_back(before);
        self.history_order.push_back(id);
        self.evict_global_overflow();
        if let Some(rec) = self.records.get_mut(&id) {
            while rec.undo.len() > limit {
                rec.undo.pop_front();
            }
        }

        self.redo_order.clear();
        for rec in self.records.values_mut() {
            rec.redo.clear();
        }
    }

    /// Drop the oldest global entry (and the oldest undo state of its layer)
    /// while the global order is over capacity.
    fn evict_global_overflow(&mut self) {
        while self.history_order.len() > self.max_history_size {
            if let Some(removed) = self.history_order.pop_front()
                && let Some(rec) = self.records.get_mut(&removed)
            {
                rec.undo.pop_front();
            }
        }
    }

    /// Undo the most recent mutation across all layers.  Returns the layer
    /// that was restored, or `None` when there was nothing to undo.
    pub fn undo(&mut self, canvas: &mut CanvasState) -> Option<LayerId> {
        let id = self.history_order.pop_back()?;
        let layer = canvas.layer_mut(id)?;
        if layer.is_reference {
            return None;
        }
        let rec = self.records.get_mut(&id)?;
        let previous = rec.undo.pop_back()?;
        let current = std::mem::replace(&mut layer.pixels, previous);
        rec.redo.push_back(current);
        if rec.redo.len() > self.max_history_size {
            rec.redo.pop_front();
        }
        self.redo_order.push_back(id);
        if self.redo_order.len() > self.max_history_size {
            self.redo_order.pop_front();
        }
        Some(id)
    }

    /// Re-apply the most recently undone mutation.
    pub fn redo(&mut self, canvas: &mut CanvasState) -> Option<LayerId> {
        let id = self.redo_order.pop_back()?;
        let layer = canvas.layer_mut(id)?;
        if layer.is_reference {
            return None;
        }
        let rec = self.records.get_mut(&id)?;
        let next = rec.redo.pop_back()?;
        let current = std::mem::replace(&mut layer.pixels, next);
        rec.undo.push_back(current);
        if rec.undo.len() > self.max_history_size {
            rec.undo.pop_front();
        }
        self.history_order.push_back(id);
        self.evict_global_overflow();
        Some(id)
    }

    /// Forget everything recorded for a deleted layer, including its entries
    /// in both global orders.
    pub fn discard_layer(&mut self, id: LayerId) {
        self.records.remove(&id);
        self.history_order.retain(|entry| *entry != id);
        self.redo_order.retain(|entry| *entry != id);
    }

    /// Take back the newest entry if it belongs to `id`, returning the
    /// recorded pixels.  Used when a gesture is abandoned before completion.
    pub fn retract_last(&mut self, id: LayerId) -> Option<Surface> {
        if self.history_order.back() != Some(&id) {
            return None;
        }
        let surface = self.records.get_mut(&id)?.undo.pop_back()?;
        self.history_order.pop_back();
        Some(surface)
    }

    pub fn undo_count(&self, id: LayerId) -> usize {
        self.records.get(&id).map_or(0, |r| r.undo.len())
    }

    pub fn redo_count(&self, id: LayerId) -> usize {
        self.records.get(&id).map_or(0, |r| r.redo.len())
    }

    pub fn can_undo(&self) -> bool {
        !self.history_order.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_order.is_empty()
    }

    /// Global order length (number of undoable steps).
    pub fn len(&self) -> usize {
        self.history_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history_order.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.history_order.clear();
        self.redo_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn mark(canvas: &mut CanvasState, history: &mut HistoryManager, id: LayerId, x: u32) {
        let layer = canvas.layer(id).unwrap();
        history.snapshot(layer);
        canvas
            .layer_mut(id)
            .unwrap()
            .pixels
            .put_pixel(x, 0, Rgba([x as u8, 0, 0, 255]));
    }

    #[test]
    fn undo_hops_across_layers_in_time_order() {
        let mut canvas = CanvasState::new(8, 2);
        let a = canvas.add_layer(None);
        let b = canvas.add_layer(None);
        let mut history = HistoryManager::default();

        mark(&mut canvas, &mut history, a, 1);
        mark(&mut canvas, &mut history, b, 2);
        mark(&mut canvas, &mut history, a, 3);

        assert_eq!(history.undo(&mut canvas), Some(a));
        assert_eq!(canvas.layer(a).unwrap().pixels.get_pixel(3, 0)[3], 0);
        assert_eq!(history.undo(&mut canvas), Some(b));
        assert!(canvas.layer(b).unwrap().pixels.is_blank());
        assert_eq!(history.redo(&mut canvas), Some(b));
        assert_eq!(canvas.layer(b).unwrap().pixels.get_pixel(2, 0)[3], 255);
    }

    #[test]
    fn undo_then_redo_is_byte_exact() {
        let mut canvas = CanvasState::new(8, 2);
        let a = canvas.add_layer(None);
        let mut history = HistoryManager::default();
        for x in 0..5 {
            mark(&mut canvas, &mut history, a, x);
        }
        let finished = canvas.layer(a).unwrap().pixels.clone();
        for _ in 0..5 {
            assert!(history.undo(&mut canvas).is_some());
        }
        assert!(canvas.layer(a).unwrap().pixels.is_blank());
        assert!(history.undo(&mut canvas).is_none());
        for _ in 0..5 {
            assert!(history.redo(&mut canvas).is_some());
        }
        assert_eq!(canvas.layer(a).unwrap().pixels, finished);
    }

    #[test]
    fn new_mutation_clears_redo() {
        let mut canvas = CanvasState::new(8, 2);
        let a = canvas.add_layer(None);
        let mut history = HistoryManager::default();
        mark(&mut canvas, &mut history, a, 1);
        history.undo(&mut canvas);
        assert_eq!(history.redo_count(a), 1);
        mark(&mut canvas, &mut history, a, 2);
        assert_eq!(history.redo_count(a), 0);
        assert!(!history.can_redo());
    }

    #[test]
    fn capacity_evicts_oldest_single_entry() {
        let mut canvas = CanvasState::new(64, 1);
        let a = canvas.add_layer(None);
        let mut history = HistoryManager::new(50);
        for x in 0..51 {
            mark(&mut canvas, &mut history, a, x);
        }
        assert_eq!(history.undo_count(a), 50);
        assert_eq!(history.len(), 50);
        for _ in 0..50 {
            history.undo(&mut canvas);
        }
        // The blank state was evicted; the oldest reachable one has pixel 0 set.
        let px = *canvas.layer(a).unwrap().pixels.get_pixel(0, 0);
        assert_eq!(px[3], 255);
        assert_eq!(canvas.layer(a).unwrap().pixels.get_pixel(1, 0)[3], 0);
    }

    #[test]
    fn reference_layers_are_not_recorded() {
        let mut canvas = CanvasState::new(4, 4);
        let r = canvas.add_reference_layer("Reference");
        let mut history = HistoryManager::default();
        assert!(!history.snapshot(canvas.layer(r).unwrap()));
        assert!(history.is_empty());
    }

    #[test]
    fn discarding_a_layer_prunes_global_order() {
        let mut canvas = CanvasState::new(8, 2);
        let a = canvas.add_layer(None);
        let b = canvas.add_layer(None);
        let mut history = HistoryManager::default();
        mark(&mut canvas, &mut history, a, 1);
        mark(&mut canvas, &mut history, b, 2);
        canvas.remove_layer(b, |_| true);
        history.discard_layer(b);
        assert_eq!(history.len(), 1);
        assert_eq!(history.undo(&mut canvas), Some(a));
    }

    #[test]
    fn retract_last_only_takes_matching_layer() {
        let mut canvas = CanvasState::new(8, 2);
        let a = canvas.add_layer(None);
        let b = canvas.add_layer(None);
        let mut history = HistoryManager::default();
        mark(&mut canvas, &mut history, a, 1);
        assert!(history.retract_last(b).is_none());
        let before = history.retract_last(a).unwrap();
        assert!(before.is_blank());
        assert!(history.is_empty());
    }
}
