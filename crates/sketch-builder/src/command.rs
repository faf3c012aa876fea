//! Engine that drives an external `arduino-builder` compatible executable

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::BuildContext;
use crate::engine::{BuilderEngine, EngineError, Phase};
use crate::logger::{Level, Logger};

/// How long a cancelled builder gets to exit after SIGTERM before it is killed
const TERM_GRACE: Duration = Duration::from_secs(2);

/// How long output still buffered in the pipes is read once the builder has
/// exited. A helper the builder left running may hold the pipes open forever.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Prefix of the line the builder prints for every library it links
const USING_LIBRARY: &str = "Using library ";

/// Runs builds by spawning a builder executable.
///
/// Every line the builder writes is forwarded to the call's logger, stdout as
/// [`Level::Info`] and stderr as [`Level::Warn`]. The child gets its own
/// process group so that cancelling a call takes the compiler processes down
/// with it.
///
/// The child is supervised on the tokio runtime the engine is called from,
/// so calls must come from a blocking worker of that runtime
/// (`tokio::task::spawn_blocking`).
#[derive(Debug)]
pub struct CommandEngine {
    program: PathBuf,
    leading_args: Vec<OsString>,
    /// Version reported by the builder, reused while tools stay valid
    tools: Mutex<Option<String>>,
}

impl CommandEngine {
    /// Use `program` as the builder executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            tools: Mutex::new(None),
        }
    }

    /// Arguments placed before the generated flags, e.g. a script path when
    /// `program` is an interpreter.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The builder executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).stdin(Stdio::null());
        cmd
    }

    /// Builder version, probed once and kept until the tools cache is
    /// invalidated.
    fn tools_version(&self, runtime: &Handle, can_use_cached: bool) -> Result<String, EngineError> {
        let mut tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        if can_use_cached && let Some(version) = tools.as_ref() {
            return Ok(version.clone());
        }

        debug!(program = %self.program.display(), "probing builder version");
        let mut cmd = self.command();
        cmd.arg("-version").kill_on_drop(true);
        let output = runtime
            .block_on(cmd.output())
            .map_err(|source| self.spawn_error(source))?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                code: output.status.code(),
            });
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        *tools = Some(version.clone());
        Ok(version)
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }

    fn execute(
        &self,
        phase: Phase,
        ctx: &mut BuildContext,
        logger: &dyn Logger,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if ctx.sketch_location.is_empty() {
            return Err(EngineError::InvalidRequest(
                "sketch location is empty".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let runtime = Handle::try_current().map_err(|e| {
            EngineError::Internal(format!("command engine needs a tokio runtime: {e}"))
        })?;

        let version = self.tools_version(&runtime, ctx.can_use_cached_tools)?;
        if ctx.verbose {
            logger.fprintln(Level::Info, format_args!("Using {version}"));
        }

        let mut cmd = self.command();
        cmd.args(builder_args(ctx, phase))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        debug!(?phase, sketch = %ctx.sketch_location, "starting builder");
        let child = {
            let _runtime = runtime.enter();
            cmd.spawn().map_err(|source| self.spawn_error(source))?
        };

        // The supervisor owns the child; this thread only talks to the logger
        let (tx, mut rx) = mpsc::channel(64);
        let supervisor = runtime.spawn(supervise(child, tx, cancel.clone()));
        while let Some((level, line)) = rx.blocking_recv() {
            if let Some(library) = imported_library(&line) {
                ctx.imported_libraries.push(library);
            }
            logger.fprintln(level, format_args!("{line}"));
        }

        let status = runtime
            .block_on(supervisor)
            .map_err(|e| EngineError::Internal(format!("builder supervisor failed: {e}")))??;
        if !status.success() {
            return Err(EngineError::Failed {
                code: status.code(),
            });
        }

        ctx.can_use_cached_tools = true;
        Ok(())
    }
}

impl BuilderEngine for CommandEngine {
    fn run_preprocess(
        &self,
        ctx: &mut BuildContext,
        logger: &dyn Logger,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.execute(Phase::Preprocess, ctx, logger, cancel)
    }

    fn run_builder(
        &self,
        ctx: &mut BuildContext,
        logger: &dyn Logger,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.execute(Phase::Build, ctx, logger, cancel)
    }
}

type OutputLines<R> = Option<Lines<BufReader<R>>>;
type OutputSender = mpsc::Sender<(Level, String)>;

/// Forward the child's output until it exits or `cancel` fires.
///
/// The call ends when the builder exits, not when its pipes close.
async fn supervise(
    mut child: Child,
    tx: OutputSender,
    cancel: CancellationToken,
) -> Result<ExitStatus, EngineError> {
    let mut stdout = child.stdout.take().map(|pipe| BufReader::new(pipe).lines());
    let mut stderr = child.stderr.take().map(|pipe| BufReader::new(pipe).lines());

    let status = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                return Err(EngineError::Cancelled);
            }
            Some(line) = next_line(&mut stdout) => forward(&tx, Level::Info, line).await,
            Some(line) = next_line(&mut stderr) => forward(&tx, Level::Warn, line).await,
            status = child.wait() => break status?,
        }
    };

    let drain_stdout = async {
        while stdout.is_some() {
            if let Some(line) = next_line(&mut stdout).await {
                forward(&tx, Level::Info, line).await;
            }
        }
    };
    let drain_stderr = async {
        while stderr.is_some() {
            if let Some(line) = next_line(&mut stderr).await {
                forward(&tx, Level::Warn, line).await;
            }
        }
    };
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        tokio::join!(drain_stdout, drain_stderr);
    })
    .await;
    if drained.is_err() {
        debug!("builder exited with its output still open, leaving it behind");
    }

    Ok(status)
}

/// Next line from `pipe`, or `None` once it is closed. A closed pipe stays
/// pending so that `select!` stops polling it.
async fn next_line<R>(pipe: &mut OutputLines<R>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let Some(lines) = pipe.as_mut() else {
        return std::future::pending().await;
    };
    match lines.next_line().await {
        Ok(Some(line)) => Some(line),
        Ok(None) => {
            *pipe = None;
            None
        }
        Err(e) => {
            debug!("builder pipe closed: {}", e);
            *pipe = None;
            None
        }
    }
}

async fn forward(tx: &OutputSender, level: Level, line: String) {
    if tx.send((level, line)).await.is_err() {
        debug!("builder output dropped, nobody is listening");
    }
}

/// Stop the builder and everything it started: SIGTERM to the process group,
/// then SIGKILL if it is still around after [`TERM_GRACE`].
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id().and_then(|id| libc::pid_t::try_from(id).ok()) {
            signal_group(pid, libc::SIGTERM);
            if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
                // The leader is gone; take down anything that ignored SIGTERM
                signal_group(pid, libc::SIGKILL);
                return;
            }
            warn!("builder ignored SIGTERM, killing process group {}", pid);
            signal_group(pid, libc::SIGKILL);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("builder already exited: {}", e);
    }
}

#[cfg(unix)]
fn signal_group(pid: libc::pid_t, signal: libc::c_int) {
    // SAFETY: `pid` is our own child, started as the leader of its own
    // process group. killpg only sends a signal.
    let rc = unsafe { libc::killpg(pid, signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("failed to signal builder process group {}: {}", pid, err);
        }
    }
}

/// Command-line flags for one builder run.
fn builder_args(ctx: &BuildContext, phase: Phase) -> Vec<String> {
    let mut args = vec![
        match phase {
            Phase::Preprocess => "-preprocess",
            Phase::Build => "-compile",
        }
        .to_string(),
        "-logger".to_string(),
        "human".to_string(),
    ];

    let repeated = [
        ("-hardware", &ctx.hardware_folders),
        ("-tools", &ctx.tools_folders),
        ("-built-in-libraries", &ctx.built_in_libraries_folders),
        ("-libraries", &ctx.other_libraries_folders),
        ("-prefs", &ctx.custom_build_properties),
    ];
    for (flag, values) in repeated {
        for value in values.iter().filter(|v| !v.is_empty()) {
            args.push(flag.to_string());
            args.push(value.clone());
        }
    }

    let single = [
        ("-fqbn", &ctx.fqbn),
        ("-core-api-version", &ctx.arduino_api_version),
        ("-build-path", &ctx.build_path),
        ("-build-cache", &ctx.build_cache_path),
        ("-warnings", &ctx.warnings_level),
    ];
    for (flag, value) in single {
        if !value.is_empty() {
            args.push(flag.to_string());
            args.push(value.clone());
        }
    }

    if ctx.verbose {
        args.push("-verbose".to_string());
    }
    if phase == Phase::Preprocess && !ctx.code_complete_at.is_empty() {
        args.push("-code-complete-at".to_string());
        args.push(ctx.code_complete_at.clone());
    }

    args.push(ctx.sketch_location.clone());
    args
}

/// Library name from a `Using library <name> at version ...` line.
fn imported_library(line: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix(USING_LIBRARY)?;
    let name = rest.split(" at version ").next()?;
    let name = name.split(" in folder:").next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}
