// ============================================================================
// COMPONENTS — editor state that sits between pointer input and the canvas
// ============================================================================
//
//   colors.rs   — HSV color model, hex entry, wheel/triangle picker, history
//   history.rs  — per-layer undo/redo with a global cross-layer order
//   hotkeys.rs  — keyboard shortcuts in Latin and Cyrillic layouts
//   layers.rs   — layers panel rows and drag-reorder state
//   tools.rs    — tool set, brush properties, stroke rendering
// ============================================================================

pub mod colors;
pub mod history;
pub mod hotkeys;
pub mod layers;
pub mod tools;
