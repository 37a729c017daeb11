//! Shader sources
//!
//! Shaders are embedded at build time. The beauty shader can be replaced by
//! a file on disk for tuning without rebuilding.

use std::path::{Path, PathBuf};

/// Presents the canvas texture to the window
pub const PASSTHROUGH_SHADER: &str = include_str!("passthrough.wgsl");

/// Embedded beauty filter shader (fallback if no override is configured)
pub const BEAUTY_SHADER: &str = include_str!("beauty.wgsl");

/// Get the path to the shaders directory in the source tree
pub fn shaders_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src").join("shaders")
}

/// Load the beauty shader source.
///
/// Reads `override_path` when given, falling back to the embedded shader if
/// the file cannot be read.
pub fn load_beauty_shader(override_path: Option<&Path>) -> String {
    let Some(path) = override_path else {
        return BEAUTY_SHADER.to_string();
    };

    match std::fs::read_to_string(path) {
        Ok(source) => {
            tracing::info!("Loaded beauty shader from {}", path.display());
            source
        }
        Err(e) => {
            tracing::warn!(
                "Failed to read beauty shader {}: {}. Using embedded shader.",
                path.display(),
                e
            );
            BEAUTY_SHADER.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_shaders_declare_entry_points() {
        for source in [PASSTHROUGH_SHADER, BEAUTY_SHADER] {
            assert!(source.contains("fn vs_main"));
            assert!(source.contains("fn fs_main"));
        }
        assert!(BEAUTY_SHADER.contains("texture_size"));
    }

    #[test]
    fn test_missing_override_falls_back_to_embedded() {
        let source = load_beauty_shader(Some(Path::new("/nonexistent/beauty.wgsl")));
        assert_eq!(source, BEAUTY_SHADER);
        assert!(shaders_dir().join("beauty.wgsl").exists());
    }
}
