//! Editor configuration.
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! defaults below, so `{}` is a complete configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::components::history::DEFAULT_HISTORY_LIMIT;
use crate::components::tools::ToolProperties;
use crate::io::EditorError;
use crate::view::{DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Image decoded into the base layer at startup.  Absent means a single
    /// blank layer.
    pub base_image: Option<PathBuf>,
    pub brush: BrushConfig,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Undo entries kept per layer and in the global order.
    pub history_limit: usize,
    /// Whether the brush-outline overlay starts enabled.
    pub overlay_enabled: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            base_image: None,
            brush: BrushConfig::default(),
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            history_limit: DEFAULT_HISTORY_LIMIT,
            overlay_enabled: true,
        }
    }
}

/// Brush settings applied when a session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushConfig {
    /// `#RRGGBB` or `#RGB`.
    pub color: String,
    pub size: f32,
    pub alpha: f32,
    /// Raw slider value; 0 disables smoothing.
    pub smoothing: f32,
    /// Independent eraser strength.  `None` erases at the brush alpha.
    pub eraser_strength: Option<f32>,
}

impl Default for BrushConfig {
    fn default() -> Self {
        let props = ToolProperties::default();
        Self {
            color: "#000000".to_string(),
            size: props.size,
            alpha: props.alpha,
            smoothing: props.smoothing,
            eraser_strength: None,
        }
    }
}

impl BrushConfig {
    pub fn tool_properties(&self) -> ToolProperties {
        let mut props = ToolProperties::default();
        props.set_size(self.size);
        props.set_alpha(self.alpha);
        props.set_smoothing(self.smoothing);
        props.set_eraser_strength(self.eraser_strength);
        props
    }
}

impl EditorConfig {
    pub fn from_json_str(text: &str) -> Result<Self, EditorError> {
        serde_json::from_str(text).map_err(|e| EditorError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, EditorError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EditorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, EditorError> {
        serde_json::to_string_pretty(self).map_err(|e| EditorError::Config(e.to_string()))
    }
}
