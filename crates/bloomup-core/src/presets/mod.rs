//! Style preset library.
//!
//! The built-in styles are defined in `styles.toml` and embedded in the
//! binary at compile time. Presets are immutable: the UI selects one and
//! hands it to the orchestrator.

use serde::{Deserialize, Serialize};

/// A redesign style the user can choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StylePreset {
    /// Stable identifier (e.g. `outdoor-glow`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short description of the look, also fed to the synthesis prompts.
    pub description: String,
    /// Reference image for the style picker.
    pub image_ref: String,
}

/// Container for deserializing the embedded TOML file.
#[derive(Debug, Deserialize)]
struct StyleLibrary {
    styles: Vec<StylePreset>,
}

/// The embedded style presets TOML.
static STYLES_TOML: &str = include_str!("styles.toml");

/// Load all style presets from the embedded library, in file order.
///
/// # Panics
///
/// Panics if the embedded TOML is malformed. This is a compile-time invariant
/// -- if the binary was built, the TOML is valid.
pub fn load_presets() -> Vec<StylePreset> {
    let lib: StyleLibrary = toml::from_str(STYLES_TOML).expect("embedded styles.toml is invalid");
    lib.styles
}

/// Look up a preset by id.
pub fn find_preset(id: &str) -> Option<StylePreset> {
    load_presets().into_iter().find(|p| p.id == id)
}

/// The preset selected when the user has not picked one.
pub fn default_preset() -> StylePreset {
    load_presets()
        .into_iter()
        .next()
        .expect("embedded styles.toml defines no styles")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
