//! The builder engine contract

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::BuildContext;
use crate::logger::Logger;

/// Errors returned by a builder engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The builder ran and reported failure
    #[error("{}", failed_message(.code))]
    Failed {
        /// Exit code, if the builder exited normally
        code: Option<i32>,
    },
    /// The builder could not be started
    #[error("failed to start builder `{program}`: {source}")]
    Spawn {
        /// Program that was launched
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The call was cancelled before the builder finished
    #[error("build cancelled")]
    Cancelled,
    /// The request cannot be built as given
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Anything else, described by its message
    #[error("{0}")]
    Internal(String),
}

fn failed_message(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("builder exited with status {code}"),
        None => "builder terminated by signal".to_string(),
    }
}

/// Which part of the build pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Stop once compiler-ready sources exist
    Preprocess,
    /// Preprocess, compile and link
    Build,
}

/// A firmware builder.
///
/// Both entry points block until the builder is done and may emit any number
/// of lines on `logger` before returning. They read the request fields from
/// `ctx` and may fill its accumulators. Implementations should check `cancel`
/// between steps and stop with [`EngineError::Cancelled`] once it fires.
pub trait BuilderEngine: Send + Sync + 'static {
    /// Run the preprocess phase only.
    fn run_preprocess(
        &self,
        ctx: &mut BuildContext,
        logger: &dyn Logger,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;

    /// Run the full build.
    fn run_builder(
        &self,
        ctx: &mut BuildContext,
        logger: &dyn Logger,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;

    /// Dispatch on `phase`.
    fn run(
        &self,
        phase: Phase,
        ctx: &mut BuildContext,
        logger: &dyn Logger,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        match phase {
            Phase::Preprocess => self.run_preprocess(ctx, logger, cancel),
            Phase::Build => self.run_builder(ctx, logger, cancel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_message() {
        assert_eq!(
            EngineError::Failed { code: Some(1) }.to_string(),
            "builder exited with status 1"
        );
        assert_eq!(
            EngineError::Failed { code: None }.to_string(),
            "builder terminated by signal"
        );
    }

    #[test]
    fn test_spawn_message_names_program() {
        let err = EngineError::Spawn {
            program: "arduino-builder".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(
            err.to_string(),
            "failed to start builder `arduino-builder`: not found"
        );
    }
}
