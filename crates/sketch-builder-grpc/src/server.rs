//! gRPC server implementation for the Builder service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use sketch_builder::{
    BufferLogger, BuildContext, BuildParams, BuilderEngine, CacheValidity, CancellationToken,
    ConsoleLogger, EngineError, FolderDefaults, Logger, Phase, RequestKind, TeeLogger,
};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status};

use crate::convert::{autocomplete_status, engine_status};
use crate::proto::{self, WatchParams, WatchResponse};
use crate::stream_logger::StreamLogger;
use crate::watcher::FileWatcher;

/// Errors starting or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// The file watcher could not be created or could not watch a path
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    /// Binding or serving failed
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Settings applied for the lifetime of a service.
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    /// Folder lists used when a request leaves them empty
    pub defaults: FolderDefaults,
    /// Paths watched from start-up
    pub watch_paths: Vec<PathBuf>,
    /// Also write builder output to the server log
    pub echo_output: bool,
}

/// Result of an autocomplete call.
///
/// The collected builder output is kept even when the engine failed.
#[derive(Debug)]
pub struct AutocompleteOutcome {
    /// Everything the builder logged
    pub line: String,
    /// Why the preprocess failed, if it did
    pub error: Option<EngineError>,
}

/// The Builder gRPC service implementation.
///
/// Clones share the same context, engine and watcher.
#[derive(Clone)]
pub struct BuilderService {
    engine: Arc<dyn BuilderEngine>,
    context: Arc<Mutex<BuildContext>>,
    validity: Arc<CacheValidity>,
    watcher: Arc<FileWatcher>,
    defaults: Arc<FolderDefaults>,
    echo_output: bool,
}

impl std::fmt::Debug for BuilderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderService")
            .field("validity", &self.validity)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

impl BuilderService {
    /// Create a service around `engine`.
    ///
    /// Starts the file watcher, so this must be called from within a tokio
    /// runtime.
    pub fn new(
        engine: Arc<dyn BuilderEngine>,
        settings: ServiceSettings,
    ) -> Result<Self, ServerError> {
        let validity = Arc::new(CacheValidity::new());
        let watcher = FileWatcher::start(Arc::clone(&validity))?;
        for path in &settings.watch_paths {
            watcher.watch(path)?;
        }

        Ok(Self {
            engine,
            context: Arc::new(Mutex::new(BuildContext::new())),
            validity,
            watcher: Arc::new(watcher),
            defaults: Arc::new(settings.defaults),
            echo_output: settings.echo_output,
        })
    }

    /// The tools cache flag shared with the watcher.
    pub fn validity(&self) -> &Arc<CacheValidity> {
        &self.validity
    }

    /// The file watcher.
    pub fn watcher(&self) -> &FileWatcher {
        &self.watcher
    }

    /// A copy of the build context, taken once no call is using it.
    pub async fn context_snapshot(&self) -> BuildContext {
        self.context.lock().await.clone()
    }

    /// Map `params` onto the shared context and run `phase` with `logger`.
    ///
    /// Holds the context for the whole run, so calls never overlap.
    async fn run(
        &self,
        params: BuildParams,
        kind: RequestKind,
        phase: Phase,
        logger: Arc<dyn Logger>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut ctx = Arc::clone(&self.context).lock_owned().await;

        let (valid, epoch) = self.validity.snapshot();
        params.with_defaults(&self.defaults).apply(&mut ctx, kind);
        ctx.can_use_cached_tools = valid;

        tracing::debug!(
            ?phase,
            fqbn = %ctx.fqbn,
            sketch = %ctx.sketch_location,
            cached_tools = valid,
            "running builder"
        );

        let logger: Arc<dyn Logger> = if self.echo_output {
            Arc::new(TeeLogger::new(logger, ConsoleLogger))
        } else {
            logger
        };

        let engine = Arc::clone(&self.engine);
        let (result, tools_loaded) = tokio::task::spawn_blocking(move || {
            let result = engine.run(phase, &mut ctx, &*logger, &cancel);
            (result, ctx.can_use_cached_tools)
        })
        .await
        .map_err(|e| EngineError::Internal(format!("builder worker failed: {e}")))?;

        if result.is_ok() && tools_loaded {
            self.validity.revalidate(epoch);
        }
        result
    }

    /// Preprocess a sketch for code completion.
    pub async fn autocomplete(&self, params: BuildParams) -> AutocompleteOutcome {
        let logger = Arc::new(BufferLogger::new());
        let result = self
            .run(
                params,
                RequestKind::Autocomplete,
                Phase::Preprocess,
                Arc::clone(&logger) as Arc<dyn Logger>,
                CancellationToken::new(),
            )
            .await;

        AutocompleteOutcome {
            line: logger.flush(),
            error: result.err(),
        }
    }

    /// Build a sketch, sending output to `logger` as it is produced.
    pub async fn build(
        &self,
        params: BuildParams,
        logger: Arc<dyn Logger>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        self.run(params, RequestKind::Build, Phase::Build, logger, cancel)
            .await
    }
}

type BuildStream = Pin<Box<dyn Stream<Item = Result<proto::Response, Status>> + Send>>;

#[tonic::async_trait]
impl proto::builder_server::Builder for BuilderService {
    type BuildStream = BuildStream;

    async fn autocomplete(
        &self,
        request: Request<proto::BuildParams>,
    ) -> Result<Response<proto::Response>, Status> {
        let params = BuildParams::from(request.into_inner());
        tracing::info!(sketch = %params.sketch_location, "autocomplete");

        let outcome = BuilderService::autocomplete(self, params).await;
        match outcome.error {
            None => Ok(Response::new(proto::Response { line: outcome.line })),
            Some(e) => {
                tracing::info!("autocomplete failed: {}", e);
                Err(autocomplete_status(outcome.line, &e))
            }
        }
    }

    async fn build(
        &self,
        request: Request<proto::BuildParams>,
    ) -> Result<Response<Self::BuildStream>, Status> {
        let params = BuildParams::from(request.into_inner());
        tracing::info!(sketch = %params.sketch_location, fqbn = %params.fqbn, "build");

        let (tx, rx) = mpsc::channel::<Result<proto::Response, Status>>(32);
        let cancel = CancellationToken::new();
        let logger = Arc::new(StreamLogger::new(tx.clone(), cancel.clone()));

        // Cancel the build if the caller goes away while the builder is quiet
        let disconnect = tokio::spawn({
            let tx = tx.clone();
            let cancel = cancel.clone();
            async move {
                tx.closed().await;
                cancel.cancel();
            }
        });

        let service = self.clone();
        tokio::spawn(async move {
            let result = service.build(params, logger, cancel).await;
            disconnect.abort();

            match result {
                Ok(()) => tracing::info!("build finished"),
                Err(e) => {
                    tracing::info!("build failed: {}", e);
                    if tx.send(Err(engine_status(&e))).await.is_err() {
                        tracing::warn!("caller disconnected before build status was sent");
                    }
                }
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as BuildStream))
    }

    async fn watch(
        &self,
        request: Request<WatchParams>,
    ) -> Result<Response<WatchResponse>, Status> {
        let path = request.into_inner().path;
        if path.is_empty() {
            return Err(Status::invalid_argument("path is empty"));
        }

        self.watcher
            .watch(std::path::Path::new(&path))
            .map_err(|e| Status::invalid_argument(format!("cannot watch {path}: {e}")))?;

        Ok(Response::new(WatchResponse {
            message: format!("OK {path}"),
        }))
    }
}

/// Server configuration and runner.
#[derive(Debug)]
pub struct BuilderServer {
    addr: SocketAddr,
    service: BuilderService,
}

impl BuilderServer {
    /// Create a server for `engine` that will listen on `addr`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        addr: SocketAddr,
        engine: Arc<dyn BuilderEngine>,
        settings: ServiceSettings,
    ) -> Result<Self, ServerError> {
        Ok(Self {
            addr,
            service: BuilderService::new(engine, settings)?,
        })
    }

    /// Run the server until shutdown signal.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Starting gRPC server on {}", self.addr);

        tonic::transport::Server::builder()
            .add_service(proto::builder_server::BuilderServer::new(self.service))
            .serve_with_shutdown(self.addr, shutdown_signal())
            .await?;

        tracing::info!("gRPC server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                // Fall through to let ctrl_c handle shutdown
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
