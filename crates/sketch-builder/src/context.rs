//! The long-lived build configuration shared by every request

use serde::{Deserialize, Serialize};

/// Build configuration handed to the builder engine.
///
/// One instance lives for the whole server process. Requests overwrite the
/// request-derived fields (see [`BuildParams::apply`](crate::BuildParams::apply)),
/// while the engine fills the accumulator lists as it discovers includes,
/// object files and libraries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Folders searched for hardware platform definitions
    pub hardware_folders: Vec<String>,
    /// Folders searched for toolchains
    pub tools_folders: Vec<String>,
    /// Libraries bundled with the IDE
    pub built_in_libraries_folders: Vec<String>,
    /// User library folders
    pub other_libraries_folders: Vec<String>,
    /// Path of the sketch to build
    pub sketch_location: String,
    /// Extra `key=value` build properties
    pub custom_build_properties: Vec<String>,
    /// Core API version advertised to the platform
    pub arduino_api_version: String,
    /// Fully-qualified board name
    pub fqbn: String,
    /// Print every command the builder runs
    pub verbose: bool,
    /// Where cores are cached between builds
    pub build_cache_path: String,
    /// Build output directory
    pub build_path: String,
    /// Compiler warnings level (`none`, `default`, `more`, `all`)
    pub warnings_level: String,
    /// Prototype section produced by the previous preprocess, if any
    pub prototypes_section: String,
    /// Cursor position for code completion, `file:line:column`
    pub code_complete_at: String,
    /// Whether previously discovered tools may be reused
    pub can_use_cached_tools: bool,

    /// Include folders discovered while resolving libraries
    pub include_folders: Vec<String>,
    /// Object files compiled from libraries
    pub libraries_object_files: Vec<String>,
    /// Object files compiled from the core
    pub core_object_files: Vec<String>,
    /// Object files compiled from the sketch
    pub sketch_object_files: Vec<String>,
    /// Libraries the sketch ended up importing
    pub imported_libraries: Vec<String>,
}

impl BuildContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncate every accumulator, keeping the allocations.
    pub fn reset_accumulators(&mut self) {
        self.include_folders.clear();
        self.libraries_object_files.clear();
        self.core_object_files.clear();
        self.sketch_object_files.clear();
        self.imported_libraries.clear();
    }

    /// True when no accumulator holds anything.
    pub fn accumulators_empty(&self) -> bool {
        self.include_folders.is_empty()
            && self.libraries_object_files.is_empty()
            && self.core_object_files.is_empty()
            && self.sketch_object_files.is_empty()
            && self.imported_libraries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn populated() -> BuildContext {
        BuildContext {
            include_folders: vec!["/libs/Servo/src".to_string()],
            libraries_object_files: vec!["Servo.cpp.o".to_string()],
            core_object_files: vec!["wiring.c.o".to_string(), "main.cpp.o".to_string()],
            sketch_object_files: vec!["Blink.ino.cpp.o".to_string()],
            imported_libraries: vec!["Servo".to_string()],
            ..BuildContext::default()
        }
    }

    #[test]
    fn test_reset_accumulators_keeps_capacity() {
        let mut ctx = populated();
        let capacity = ctx.core_object_files.capacity();

        ctx.reset_accumulators();

        assert!(ctx.accumulators_empty());
        assert_eq!(ctx.core_object_files.capacity(), capacity);
    }

    #[test]
    fn test_reset_leaves_request_fields_alone() {
        let mut ctx = populated();
        ctx.fqbn = "arduino:avr:uno".to_string();
        ctx.hardware_folders = vec!["/opt/arduino/hardware".to_string()];

        ctx.reset_accumulators();

        assert_eq!(ctx.fqbn, "arduino:avr:uno");
        assert_eq!(ctx.hardware_folders, vec!["/opt/arduino/hardware"]);
    }

    #[test]
    fn test_context_serialization() {
        let ctx = populated();
        let json = serde_json::to_string(&ctx).unwrap();
        let back: BuildContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }
}
