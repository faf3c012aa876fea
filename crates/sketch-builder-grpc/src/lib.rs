//! Sketch Builder gRPC Server
//!
//! Exposes a firmware builder over gRPC so an IDE or command-line front-end
//! can drive it.
//!
//! # Architecture
//!
//! One [`BuilderService`] owns the process-wide [`BuildContext`] and a
//! [`FileWatcher`]. Calls are serialized on the context: each one copies its
//! request onto it, runs the engine on a blocking worker and releases it
//! again. The engine's output goes to a logger chosen per call, a
//! [`BufferLogger`] for autocomplete and a [`StreamLogger`] for builds.
//!
//! ```text
//! Client                                    Server
//! │                                           │
//! │  Build(BuildParams)                       │
//! │ ─────────────────────────────────────────>│  map request, run builder
//! │                                           │
//! │       Response{line: "Compiling ..."}     │
//! │<───────────────────────────────────────── │
//! │       Response{line: "Linking ..."}       │
//! │<───────────────────────────────────────── │
//! │                                           │
//! │       status OK / error                   │
//! │<───────────────────────────────────────── │
//! ```
//!
//! The watcher only flips the shared [`CacheValidity`]; the next request
//! reads it when its context is mapped.
//!
//! [`BuildContext`]: sketch_builder::BuildContext
//! [`BufferLogger`]: sketch_builder::BufferLogger
//! [`CacheValidity`]: sketch_builder::CacheValidity

pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::doc_markdown)]
    tonic::include_proto!("sketchbuilder.v1");
}

mod convert;
mod server;
mod stream_logger;
mod watcher;

pub use convert::{autocomplete_log, engine_status};
pub use server::{
    AutocompleteOutcome, BuilderServer, BuilderService, ServerError, ServiceSettings,
};
pub use stream_logger::StreamLogger;
pub use watcher::FileWatcher;

// Re-export proto types for convenience
pub use proto::{
    BuildParams, Response, builder_client::BuilderClient,
    builder_server::BuilderServer as BuilderGrpcServer,
};
