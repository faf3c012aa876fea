//! Build requests and how they are copied onto the build context

use serde::{Deserialize, Serialize};

use crate::context::BuildContext;

/// Which operation a request is mapped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Preprocess only, to feed editor code completion
    Autocomplete,
    /// Full preprocess, compile and link
    Build,
}

/// Caller-supplied parameters for one build or autocomplete call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildParams {
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
    /// Core API version
    pub arduino_api_version: String,
    /// Fully-qualified board name
    pub fqbn: String,
    /// Verbose output (ignored for autocomplete)
    pub verbose: bool,
    /// Core cache directory
    pub build_cache_path: String,
    /// Build output directory
    pub build_path: String,
    /// Compiler warnings level
    pub warnings_level: String,
    /// Code completion cursor, `file:line:column`
    pub code_complete_at: Option<String>,
}

/// Server-side folder lists used when a request leaves one empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderDefaults {
    /// Default hardware folders
    pub hardware_folders: Vec<String>,
    /// Default tools folders
    pub tools_folders: Vec<String>,
    /// Default built-in library folders
    pub built_in_libraries_folders: Vec<String>,
    /// Default user library folders
    pub other_libraries_folders: Vec<String>,
}

impl BuildParams {
    /// Fill empty folder lists from the server defaults.
    pub fn with_defaults(mut self, defaults: &FolderDefaults) -> Self {
        fill(&mut self.hardware_folders, &defaults.hardware_folders);
        fill(&mut self.tools_folders, &defaults.tools_folders);
        fill(
            &mut self.built_in_libraries_folders,
            &defaults.built_in_libraries_folders,
        );
        fill(
            &mut self.other_libraries_folders,
            &defaults.other_libraries_folders,
        );
        self
    }

    /// Overwrite the request-derived fields of `ctx` and clear its
    /// accumulators.
    ///
    /// Autocomplete always runs quiet and keeps the completion cursor; a build
    /// honours the verbosity flag and never carries a cursor.
    pub fn apply(&self, ctx: &mut BuildContext, kind: RequestKind) {
        ctx.hardware_folders.clone_from(&self.hardware_folders);
        ctx.tools_folders.clone_from(&self.tools_folders);
        ctx.built_in_libraries_folders
            .clone_from(&self.built_in_libraries_folders);
        ctx.other_libraries_folders
            .clone_from(&self.other_libraries_folders);
        ctx.sketch_location.clone_from(&self.sketch_location);
        ctx.custom_build_properties
            .clone_from(&self.custom_build_properties);
        ctx.arduino_api_version.clone_from(&self.arduino_api_version);
        ctx.fqbn.clone_from(&self.fqbn);
        ctx.build_cache_path.clone_from(&self.build_cache_path);
        ctx.build_path.clone_from(&self.build_path);
        ctx.warnings_level.clone_from(&self.warnings_level);
        ctx.prototypes_section.clear();

        match kind {
            RequestKind::Autocomplete => {
                ctx.verbose = false;
                ctx.code_complete_at = self.code_complete_at.clone().unwrap_or_default();
            }
            RequestKind::Build => {
                ctx.verbose = self.verbose;
                ctx.code_complete_at.clear();
            }
        }

        ctx.reset_accumulators();
    }
}

fn fill(target: &mut Vec<String>, defaults: &[String]) {
    if target.is_empty() {
        target.extend_from_slice(defaults);
    }
}

/// Split a comma-separated list.
///
/// An empty string is an empty list. Anything else is split on every comma,
/// empty entries included, so [`join_list`] gives back the input.
pub fn split_list(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    s.split(',').map(str::to_string).collect()
}

/// Join a list with commas. Inverse of [`split_list`].
pub fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request() -> BuildParams {
        BuildParams {
            hardware_folders: vec!["/opt/arduino/hardware".into(), "/home/me/hardware".into()],
            tools_folders: vec!["/opt/arduino/tools-builder".into()],
            built_in_libraries_folders: vec!["/opt/arduino/libraries".into()],
            other_libraries_folders: vec!["/home/me/Arduino/libraries".into()],
            sketch_location: "/home/me/Arduino/Blink/Blink.ino".into(),
            custom_build_properties: vec!["build.warn_data_percentage=75".into()],
            arduino_api_version: "10810".into(),
            fqbn: "arduino:avr:uno".into(),
            verbose: true,
            build_cache_path: "/tmp/cache".into(),
            build_path: "/tmp/build".into(),
            warnings_level: "all".into(),
            code_complete_at: Some("/tmp/build/sketch/Blink.ino.cpp:12:4".into()),
        }
    }

    #[test]
    fn test_apply_build_copies_fields() {
        let mut ctx = BuildContext::new();
        request().apply(&mut ctx, RequestKind::Build);

        assert_eq!(ctx.hardware_folders, vec!["/opt/arduino/hardware", "/home/me/hardware"]);
        assert_eq!(ctx.sketch_location, "/home/me/Arduino/Blink/Blink.ino");
        assert_eq!(ctx.fqbn, "arduino:avr:uno");
        assert_eq!(ctx.arduino_api_version, "10810");
        assert_eq!(ctx.warnings_level, "all");
        assert!(ctx.verbose);
        assert_eq!(ctx.code_complete_at, "", "build never carries a cursor");
    }

    #[test]
    fn test_apply_autocomplete_is_quiet_and_keeps_cursor() {
        let mut ctx = BuildContext::new();
        request().apply(&mut ctx, RequestKind::Autocomplete);

        assert!(!ctx.verbose);
        assert_eq!(ctx.code_complete_at, "/tmp/build/sketch/Blink.ino.cpp:12:4");
    }

    #[test]
    fn test_apply_clears_prototypes_section() {
        let mut ctx = BuildContext {
            prototypes_section: "void setup();\nvoid loop();\n".into(),
            ..BuildContext::default()
        };
        request().apply(&mut ctx, RequestKind::Autocomplete);
        assert!(ctx.prototypes_section.is_empty());
    }

    #[test]
    fn test_apply_empties_accumulators_whatever_their_state() {
        let mut ctx = BuildContext {
            include_folders: vec!["/a".into(), "/b".into()],
            libraries_object_files: vec!["x.o".into()],
            core_object_files: vec!["y.o".into()],
            sketch_object_files: vec!["z.o".into()],
            imported_libraries: vec!["Wire".into()],
            ..BuildContext::default()
        };

        for kind in [RequestKind::Build, RequestKind::Autocomplete] {
            request().apply(&mut ctx, kind);
            assert!(ctx.accumulators_empty(), "{kind:?}");
            ctx.include_folders.push("/again".into());
        }
    }

    #[test]
    fn test_apply_overwrites_previous_request() {
        let mut ctx = BuildContext::new();
        request().apply(&mut ctx, RequestKind::Build);

        let second = BuildParams {
            fqbn: "esp32:esp32:esp32".into(),
            ..BuildParams::default()
        };
        second.apply(&mut ctx, RequestKind::Build);

        assert_eq!(ctx.fqbn, "esp32:esp32:esp32");
        assert!(ctx.hardware_folders.is_empty());
        assert!(!ctx.verbose);
    }

    #[test]
    fn test_with_defaults_only_fills_empty_lists() {
        let defaults = FolderDefaults {
            hardware_folders: vec!["/default/hardware".into()],
            tools_folders: vec!["/default/tools".into()],
            built_in_libraries_folders: vec!["/default/libraries".into()],
            other_libraries_folders: vec![],
        };
        let params = BuildParams {
            hardware_folders: vec!["/mine".into()],
            ..BuildParams::default()
        }
        .with_defaults(&defaults);

        assert_eq!(params.hardware_folders, vec!["/mine"]);
        assert_eq!(params.tools_folders, vec!["/default/tools"]);
        assert_eq!(params.built_in_libraries_folders, vec!["/default/libraries"]);
        assert!(params.other_libraries_folders.is_empty());
    }

    #[test]
    fn test_split_empty_is_empty_list() {
        assert!(split_list("").is_empty());
        assert_eq!(join_list::<String>(&[]), "");
    }

    #[test]
    fn test_split_keeps_empty_entries() {
        assert_eq!(split_list("a,,b"), vec!["a", "", "b"]);
        assert_eq!(split_list(","), vec!["", ""]);
        assert_eq!(split_list("/opt/hw"), vec!["/opt/hw"]);
    }

    #[test]
    fn test_split_join_roundtrip() {
        for s in ["", "a", "a,b", "/opt/hw,/home/me/hw", ",", "a,", ",a", "a,,b"] {
            assert_eq!(join_list(&split_list(s)), s, "input {s:?}");
        }
    }

    #[test]
    fn test_params_json_defaults_missing_fields() {
        let params: BuildParams =
            serde_json::from_str(r#"{"fqbn":"arduino:avr:uno","verbose":true}"#).unwrap();
        assert_eq!(params.fqbn, "arduino:avr:uno");
        assert!(params.verbose);
        assert!(params.hardware_folders.is_empty());
        assert_eq!(params.code_complete_at, None);
    }
}
