//! Sketch Builder gRPC Server
//!
//! Runs the builder as a gRPC server that streams build output back to a
//! local IDE or command-line client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sketch_builder::{CommandEngine, FolderDefaults, split_list};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use sketch_builder_grpc::{BuilderServer, ServiceSettings};

/// Sketch Builder gRPC Server - firmware builds with streamed output
#[derive(Parser, Debug)]
#[command(name = "sketch-builder-grpc")]
#[command(about = "gRPC server that builds firmware sketches and streams the output")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SKETCH_BUILDER_ADDR", default_value = "127.0.0.1:12345")]
    addr: SocketAddr,

    /// Builder executable
    #[arg(long, env = "SKETCH_BUILDER_BIN", default_value = "arduino-builder")]
    builder: PathBuf,

    /// Argument passed to the builder before the generated flags (repeatable)
    #[arg(long = "builder-arg", value_name = "ARG", allow_hyphen_values = true)]
    builder_args: Vec<String>,

    /// Path to watch for changes that invalidate cached tools (repeatable)
    #[arg(long = "watch", value_name = "PATH")]
    watch: Vec<PathBuf>,

    /// Default hardware folders, comma-separated
    #[arg(long, env = "SKETCH_BUILDER_HARDWARE", default_value = "")]
    hardware_folders: String,

    /// Default tools folders, comma-separated
    #[arg(long, env = "SKETCH_BUILDER_TOOLS", default_value = "")]
    tools_folders: String,

    /// Default built-in library folders, comma-separated
    #[arg(long, env = "SKETCH_BUILDER_BUILT_IN_LIBRARIES", default_value = "")]
    built_in_libraries_folders: String,

    /// Default user library folders, comma-separated
    #[arg(long, env = "SKETCH_BUILDER_LIBRARIES", default_value = "")]
    other_libraries_folders: String,

    /// Also write builder output to the server log (target `builder`)
    #[arg(long, env = "SKETCH_BUILDER_ECHO_OUTPUT")]
    echo_output: bool,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            defaults: FolderDefaults {
                hardware_folders: split_list(&self.hardware_folders),
                tools_folders: split_list(&self.tools_folders),
                built_in_libraries_folders: split_list(&self.built_in_libraries_folders),
                other_libraries_folders: split_list(&self.other_libraries_folders),
            },
            watch_paths: self.watch.clone(),
            echo_output: self.echo_output,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::info!(
        "Starting sketch-builder-grpc v{} with builder {}",
        env!("CARGO_PKG_VERSION"),
        args.builder.display()
    );

    let engine = CommandEngine::new(&args.builder).with_leading_args(&args.builder_args);
    let server = BuilderServer::new(args.addr, Arc::new(engine), args.settings())?;
    server.run().await?;

    Ok(())
}
