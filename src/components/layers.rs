use crate::canvas::{CanvasState, LayerId};

/// One row of the layers panel.  Rows are listed top of the stack first.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerRow {
    /// Stack index (0 = bottom).
    pub index: usize,
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub is_reference: bool,
    pub active: bool,
    /// Highlighted as "not exported" (reference or hidden).
    pub flagged: bool,
}

pub fn layer_rows(canvas: &CanvasState) -> Vec<LayerRow> {
    canvas
        .layers
        .iter()
        .enumerate()
        .rev()
        .map(|(index, l)| LayerRow {
            index,
            id: l.id,
            name: l.name.clone(),
            visible: l.visible,
            opacity: l.opacity,
            is_reference: l.is_reference,
            active: index == canvas.active_layer_index,
            flagged: l.is_reference || !l.visible,
        })
        .collect()
}

/// State for drag-and-drop layer reordering.
#[derive(Default)]
pub struct LayersPanel {
    /// Display index currently being dragged (0 = topmost in UI).
    dragging_display_idx: Option<usize>,
}

impl LayersPanel {
    pub fn is_dragging(&self) -> bool {
        self.dragging_display_idx.is_some()
    }

    pub fn begin_drag(&mut self, display_idx: usize) {
        self.dragging_display_idx = Some(display_idx);
    }

    pub fn cancel_drag(&mut self) {
        self.dragging_display_idx = None;
    }

    /// Finish a drag over the row at `display_idx`, returning the
    /// `(src, dst)` stack indices to hand to [`CanvasState::drop_onto`].
    pub fn drop_on(&mut self, display_idx: usize, layer_count: usize) -> Option<(usize, usize)> {
        let src = self.dragging_display_idx.take()?;
        if src >= layer_count || display_idx >= layer_count || src == display_idx {
            return None;
        }
        Some((
            display_to_stack(src, layer_count),
            display_to_stack(display_idx, layer_count),
        ))
    }
}

fn display_to_stack(display_idx: usize, layer_count: usize) -> usize {
    layer_count - 1 - display_idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_listed_top_first_with_flags() {
        let mut c = CanvasState::new(4, 4);
        let base = c.add_layer(Some("Base layer"));
        let _r = c.add_reference_layer("Reference");
        c.set_visible(base, false);
        let rows = layer_rows(&c);
        assert_eq!(rows[0].name, "Reference");
        assert!(rows[0].active && rows[0].flagged);
        assert_eq!(rows[1].index, 0);
        assert!(rows[1].flagged && !rows[1].active);
    }

    #[test]
    fn drop_translates_display_rows_to_stack_indices() {
        let mut panel = LayersPanel::default();
        panel.begin_drag(0);
        assert_eq!(panel.drop_on(2, 3), Some((2, 0)));
        assert!(!panel.is_dragging());
        panel.begin_drag(1);
        assert_eq!(panel.drop_on(1, 3), None);
    }
}
