//! Conversions between proto messages and builder types.

use prost::Message;
use prost::bytes::Bytes;
use sketch_builder::EngineError;
use tonic::{Code, Status};

use crate::proto;

impl From<proto::BuildParams> for sketch_builder::BuildParams {
    fn from(p: proto::BuildParams) -> Self {
        Self {
            hardware_folders: p.hardware_folders,
            tools_folders: p.tools_folders,
            built_in_libraries_folders: p.built_in_libraries_folders,
            other_libraries_folders: p.other_libraries_folders,
            sketch_location: p.sketch_location,
            custom_build_properties: p.custom_build_properties,
            arduino_api_version: p.arduino_api_version,
            fqbn: p.fqbn,
            verbose: p.verbose,
            build_cache_path: p.build_cache_path,
            build_path: p.build_path,
            warnings_level: p.warnings_level,
            code_complete_at: (!p.code_complete_at.is_empty()).then_some(p.code_complete_at),
        }
    }
}

impl From<sketch_builder::BuildParams> for proto::BuildParams {
    fn from(p: sketch_builder::BuildParams) -> Self {
        Self {
            hardware_folders: p.hardware_folders,
            tools_folders: p.tools_folders,
            built_in_libraries_folders: p.built_in_libraries_folders,
            other_libraries_folders: p.other_libraries_folders,
            sketch_location: p.sketch_location,
            custom_build_properties: p.custom_build_properties,
            arduino_api_version: p.arduino_api_version,
            fqbn: p.fqbn,
            verbose: p.verbose,
            build_cache_path: p.build_cache_path,
            build_path: p.build_path,
            warnings_level: p.warnings_level,
            code_complete_at: p.code_complete_at.unwrap_or_default(),
        }
    }
}

fn engine_code(err: &EngineError) -> Code {
    match err {
        EngineError::Cancelled => Code::Cancelled,
        EngineError::InvalidRequest(_) => Code::InvalidArgument,
        EngineError::Failed { .. }
        | EngineError::Spawn { .. }
        | EngineError::Io(_)
        | EngineError::Internal(_) => Code::Internal,
    }
}

/// gRPC status for a failed engine run.
pub fn engine_status(err: &EngineError) -> Status {
    Status::new(engine_code(err), err.to_string())
}

/// Status for a failed autocomplete, with the builder log in the details.
pub(crate) fn autocomplete_status(line: String, err: &EngineError) -> Status {
    let details = Bytes::from(proto::Response { line }.encode_to_vec());
    Status::with_details(engine_code(err), err.to_string(), details)
}

/// Builder log attached to a failed autocomplete status, if any.
pub fn autocomplete_log(status: &Status) -> Option<String> {
    if status.details().is_empty() {
        return None;
    }
    proto::Response::decode(status.details())
        .ok()
        .map(|response| response.line)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cursor_is_none() {
        let params: sketch_builder::BuildParams = proto::BuildParams {
            fqbn: "arduino:avr:uno".to_string(),
            ..Default::default()
        }
        .into();
        assert_eq!(params.code_complete_at, None);
        assert_eq!(params.fqbn, "arduino:avr:uno");
    }

    #[test]
    fn test_cursor_is_kept() {
        let params: sketch_builder::BuildParams = proto::BuildParams {
            code_complete_at: "Blink.ino.cpp:3:1".to_string(),
            ..Default::default()
        }
        .into();
        assert_eq!(params.code_complete_at.as_deref(), Some("Blink.ino.cpp:3:1"));
    }

    #[test]
    fn test_engine_status_codes() {
        assert_eq!(engine_status(&EngineError::Cancelled).code(), Code::Cancelled);
        assert_eq!(
            engine_status(&EngineError::InvalidRequest("no sketch".into())).code(),
            Code::InvalidArgument
        );
        let status = engine_status(&EngineError::Failed { code: Some(1) });
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "builder exited with status 1");
    }

    #[test]
    fn test_autocomplete_status_carries_log() {
        let status = autocomplete_status(
            "Blink.ino:3:1: error: expected ';'\n".to_string(),
            &EngineError::Failed { code: Some(1) },
        );
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(
            autocomplete_log(&status).unwrap(),
            "Blink.ino:3:1: error: expected ';'\n"
        );
    }

    #[test]
    fn test_plain_status_has_no_log() {
        assert_eq!(autocomplete_log(&Status::internal("boom")), None);
    }
}
