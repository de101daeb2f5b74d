//! SketchFE — a layered raster sketch editor engine.
//!
//! [`session::EditorSession`] is the entry point: it owns the layer stack,
//! history, color model, stroke and selection engines, view transform and
//! lock state, and exposes the pointer, keyboard, and command surface a host
//! UI (or the headless CLI) drives.

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod config;
pub mod io;
pub mod lock;
pub mod ops;
pub mod session;
pub mod view;
