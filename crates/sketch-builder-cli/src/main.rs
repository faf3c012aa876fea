//! Sketch Builder CLI - client for the sketch-builder-grpc server
//!
//! Usage:
//!   sketch-builder build --fqbn arduino:avr:uno --hardware /opt/arduino/hardware Blink
//!   sketch-builder autocomplete --code-complete-at Blink.ino.cpp:3:1 Blink
//!   sketch-builder watch /opt/arduino/hardware

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use sketch_builder::BuildParams;
use tokio_stream::StreamExt;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use sketch_builder_grpc::proto::{self, WatchParams};
use sketch_builder_grpc::{BuilderClient, autocomplete_log};

/// Build firmware sketches through a sketch-builder-grpc server
#[derive(Parser, Debug)]
#[command(name = "sketch-builder")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(long, env = "SKETCH_BUILDER_URL", default_value = "http://127.0.0.1:12345")]
    addr: String,

    /// Log level for client diagnostics
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a sketch, printing the builder output as it arrives
    Build {
        #[command(flatten)]
        request: RequestArgs,

        /// Ask the builder for verbose output
        #[arg(short, long)]
        verbose: bool,
    },
    /// Preprocess a sketch for code completion
    Autocomplete {
        #[command(flatten)]
        request: RequestArgs,

        /// Cursor position
        #[arg(long, value_name = "FILE:LINE:COLUMN")]
        code_complete_at: String,
    },
    /// Ask the server to watch a path for changes
    Watch {
        /// File or directory to watch
        path: String,
    },
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// JSON file with build parameters; flags override it
    #[arg(long, value_name = "FILE")]
    params: Option<PathBuf>,

    /// Hardware folder (repeatable)
    #[arg(long = "hardware", value_name = "DIR")]
    hardware: Vec<String>,

    /// Tools folder (repeatable)
    #[arg(long = "tools", value_name = "DIR")]
    tools: Vec<String>,

    /// Built-in libraries folder (repeatable)
    #[arg(long = "built-in-libraries", value_name = "DIR")]
    built_in_libraries: Vec<String>,

    /// User libraries folder (repeatable)
    #[arg(long = "libraries", value_name = "DIR")]
    libraries: Vec<String>,

    /// Custom build property (repeatable)
    #[arg(long = "pref", value_name = "KEY=VALUE")]
    prefs: Vec<String>,

    /// Fully-qualified board name
    #[arg(long)]
    fqbn: Option<String>,

    /// Core API version
    #[arg(long)]
    core_api_version: Option<String>,

    /// Build output directory
    #[arg(long)]
    build_path: Option<String>,

    /// Core cache directory
    #[arg(long)]
    build_cache: Option<String>,

    /// Warnings level (none, default, more, all)
    #[arg(long)]
    warnings: Option<String>,

    /// Sketch folder or main sketch file
    sketch: Option<String>,
}

impl RequestArgs {
    fn into_params(self) -> anyhow::Result<BuildParams> {
        let mut params = match &self.params {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&json)
                    .with_context(|| format!("invalid build parameters in {}", path.display()))?
            }
            None => BuildParams::default(),
        };

        override_list(&mut params.hardware_folders, self.hardware);
        override_list(&mut params.tools_folders, self.tools);
        override_list(&mut params.built_in_libraries_folders, self.built_in_libraries);
        override_list(&mut params.other_libraries_folders, self.libraries);
        override_list(&mut params.custom_build_properties, self.prefs);
        override_value(&mut params.fqbn, self.fqbn);
        override_value(&mut params.arduino_api_version, self.core_api_version);
        override_value(&mut params.build_path, self.build_path);
        override_value(&mut params.build_cache_path, self.build_cache);
        override_value(&mut params.warnings_level, self.warnings);
        override_value(&mut params.sketch_location, self.sketch);

        if params.sketch_location.is_empty() {
            bail!("no sketch given");
        }
        Ok(params)
    }
}

/// Parameters for a build. `--verbose` turns verbosity on; without it the
/// params file decides.
fn build_params(request: RequestArgs, verbose: bool) -> anyhow::Result<BuildParams> {
    let mut params = request.into_params()?;
    if verbose {
        params.verbose = true;
    }
    Ok(params)
}

fn override_list(target: &mut Vec<String>, values: Vec<String>) {
    if !values.is_empty() {
        *target = values;
    }
}

fn override_value(target: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *target = value;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("connecting to {}", cli.addr);
    let mut client = BuilderClient::connect(cli.addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", cli.addr))?;

    match cli.command {
        Command::Build { request, verbose } => {
            let params = build_params(request, verbose)?;
            build(&mut client, params).await
        }
        Command::Autocomplete {
            request,
            code_complete_at,
        } => {
            let params = BuildParams {
                code_complete_at: Some(code_complete_at),
                ..request.into_params()?
            };
            autocomplete(&mut client, params).await
        }
        Command::Watch { path } => {
            let response = client.watch(WatchParams { path }).await?.into_inner();
            println!("{}", response.message);
            Ok(())
        }
    }
}

async fn build(client: &mut BuilderClient<Channel>, params: BuildParams) -> anyhow::Result<()> {
    let mut stream = client
        .build(proto::BuildParams::from(params))
        .await?
        .into_inner();

    let mut stdout = std::io::stdout().lock();
    while let Some(item) = stream.next().await {
        match item {
            Ok(response) => {
                writeln!(stdout, "{}", response.line)?;
                stdout.flush()?;
            }
            Err(status) => bail!("build failed: {}", status.message()),
        }
    }
    Ok(())
}

async fn autocomplete(
    client: &mut BuilderClient<Channel>,
    params: BuildParams,
) -> anyhow::Result<()> {
    match client.autocomplete(proto::BuildParams::from(params)).await {
        Ok(response) => {
            print!("{}", response.into_inner().line);
            Ok(())
        }
        Err(status) => {
            if let Some(log) = autocomplete_log(&status) {
                print!("{log}");
            }
            bail!("autocomplete failed: {}", status.message())
        }
    }
}
