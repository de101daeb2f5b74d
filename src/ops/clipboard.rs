// ============================================================================
// CLIPBOARD — in-app copy/paste of floating selection pixels
// ============================================================================

use crate::canvas::Surface;
use crate::io::EditorError;
use crate::ops::selection::Selection;

/// Single-slot clipboard holding transparent pixels.  Pastes clone the slot,
/// so one copy can be pasted any number of times.
#[derive(Default)]
pub struct Clipboard {
    slot: Option<Surface>,
}

impl Clipboard {
    pub fn has_image(&self) -> bool {
        self.slot.is_some()
    }

    /// Dimensions of the stored pixels without cloning them.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.slot.as_ref().map(|s| (s.width(), s.height()))
    }

    /// Store the selection's pixels.  Selections lifted from a reference
    /// layer are never copied.
    pub fn copy_selection(&mut self, sel: &Selection) -> Result<(), EditorError> {
        if sel.from_reference {
            return Err(EditorError::ReferenceCopy);
        }
        self.slot = Some(sel.pixels.clone());
        Ok(())
    }

    pub fn contents(&self) -> Option<Surface> {
        self.slot.clone()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}
