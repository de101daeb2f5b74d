//! Keyboard shortcuts.  Every binding answers to the physical key code as
//! well as the produced character in both the Latin and the Cyrillic (ЙЦУКЕН)
//! layout, so switching the system layout never disables a shortcut.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hotkey {
    Brush,
    Eraser,
    Eyedropper,
    SizeUp,
    SizeDown,
    AlphaUp,
    AlphaDown,
    Undo,
    Redo,
    Copy,
    Paste,
}

/// Brush-size step for `]` / `[`.
pub const SIZE_STEP: f32 = 2.0;
/// Brush-alpha step for `=` / `-`.
pub const ALPHA_STEP: f32 = 0.05;

/// A key press as delivered by the host UI.
#[derive(Clone, Debug, Default)]
pub struct KeyInput {
    /// Physical key code, e.g. `KeyB`, `BracketRight`.
    pub code: String,
    /// Produced character, e.g. `b`, `и`.
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
    pub alt: bool,
    /// Focus is inside an editable text field.
    pub in_text_field: bool,
}

impl KeyInput {
    /// Plain key press without modifiers.
    pub fn key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn code(code: &str) -> Self {
        Self {
            code: code.to_string(),
            ..Default::default()
        }
    }
}

struct Binding {
    hotkey: Hotkey,
    code: &'static str,
    keys: &'static [&'static str],
    /// Rejected while Ctrl, Meta or Alt is held.
    no_command_mods: bool,
    /// Rejected while Alt is held.
    no_alt: bool,
}

const BINDINGS: &[Binding] = &[
    Binding { hotkey: Hotkey::Brush, code: "KeyB", keys: &["b", "и"], no_command_mods: false, no_alt: false },
    Binding { hotkey: Hotkey::Eraser, code: "KeyE", keys: &["e", "у"], no_command_mods: false, no_alt: false },
    Binding { hotkey: Hotkey::Eyedropper, code: "KeyP", keys: &["p", "з"], no_command_mods: true, no_alt: true },
    Binding { hotkey: Hotkey::SizeUp, code: "BracketRight", keys: &["]", "ъ"], no_command_mods: false, no_alt: false },
    Binding { hotkey: Hotkey::SizeDown, code: "BracketLeft", keys: &["[", "х"], no_command_mods: false, no_alt: false },
    Binding { hotkey: Hotkey::AlphaUp, code: "Equal", keys: &["="], no_command_mods: false, no_alt: false },
    Binding { hotkey: Hotkey::AlphaDown, code: "Minus", keys: &["-"], no_command_mods: false, no_alt: false },
    Binding { hotkey: Hotkey::Undo, code: "KeyZ", keys: &["z", "я"], no_command_mods: false, no_alt: true },
    Binding { hotkey: Hotkey::Redo, code: "KeyA", keys: &["a", "ф"], no_command_mods: false, no_alt: true },
    Binding { hotkey: Hotkey::Copy, code: "KeyC", keys: &["c", "с"], no_command_mods: false, no_alt: true },
    Binding { hotkey: Hotkey::Paste, code: "KeyV", keys: &["v", "м"], no_command_mods: false, no_alt: true },
];

/// Resolve a key press to a shortcut.  Typing into text fields never
/// triggers anything.
pub fn map_key(input: &KeyInput) -> Option<Hotkey> {
    if input.in_text_field {
        return None;
    }
    let key = input.key.to_lowercase();
    BINDINGS
        .iter()
        .find(|b| {
            (!input.code.is_empty() && input.code == b.code) || b.keys.contains(&key.as_str())
        })
        .filter(|b| !(b.no_command_mods && (input.ctrl || input.meta || input.alt)))
        .filter(|b| !(b.no_alt && input.alt))
        .map(|b| b.hotkey)
}
