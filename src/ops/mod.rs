// ============================================================================
// OPS — operations that act on the layer stack as a whole
// ============================================================================
//
//   clipboard.rs  — single-slot in-app clipboard for selection pixels
//   scripting.rs  — Rhai automation over an editor session
//   selection.rs  — lasso lift, move/resize handles, commit and cancel
// ============================================================================

pub mod clipboard;
pub mod scripting;
pub mod selection;
