//! Sketch Builder: plumbing between build requests and a firmware builder
//!
//! A request ([`BuildParams`]) is copied onto the long-lived
//! [`BuildContext`], and a [`BuilderEngine`] then runs either the preprocess
//! phase (for editor autocomplete) or the full build against that context.
//! Everything the engine prints goes through a [`Logger`] injected for the
//! duration of the call, so callers decide where progress lines end up.
//!
//! [`CommandEngine`] drives an external `arduino-builder` compatible
//! executable; tests and embedders can provide their own engine.

mod cache;
mod command;
mod context;
mod engine;
mod logger;
mod params;

pub use cache::CacheValidity;
pub use command::CommandEngine;
pub use context::BuildContext;
pub use engine::{BuilderEngine, EngineError, Phase};
pub use logger::{BufferLogger, ConsoleLogger, Level, Logger, TeeLogger};
pub use params::{BuildParams, FolderDefaults, RequestKind, join_list, split_list};

// Engines check this between steps, so it is part of the public contract.
pub use tokio_util::sync::CancellationToken;
