//! The external analysis engine, seen as a process capability.
//!
//! The scheduler only ever calls [`AnalysisEngine::launch`] and then polls the
//! returned [`EngineProcess`]. Tests plug in fake engines through the same seam.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use ccsbatch_core::JobDescriptor;
use tracing::debug;

/// Name of the engine's combined stdout/stderr log inside the job output directory.
pub const ENGINE_LOG: &str = "engine.log";

/// How an engine process ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited with this status code.
    Code(i32),
    /// Terminated by a signal (no exit code).
    Signal,
}

impl ProcessExit {
    pub fn success(self) -> bool {
        matches!(self, ProcessExit::Code(0))
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ProcessExit::Code(code) => Some(code),
            ProcessExit::Signal => None,
        }
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        status.code().map_or(ProcessExit::Signal, ProcessExit::Code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open engine log {path}: {source}")]
    Log {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to poll engine process: {0}")]
    Wait(#[source] io::Error),
    #[error("failed to terminate engine process: {0}")]
    Kill(#[source] io::Error),
}

/// A launched engine invocation.
pub trait EngineProcess: Send {
    /// OS process id, when there is one.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Non-blocking completion check.
    fn try_wait(&mut self) -> Result<Option<ProcessExit>, EngineError>;

    /// Force termination and reap the process.
    fn kill(&mut self) -> Result<(), EngineError>;
}

/// Launches one engine process per job.
pub trait AnalysisEngine: Send {
    fn launch(&mut self, job: &JobDescriptor) -> Result<Box<dyn EngineProcess>, EngineError>;
}

/// Runs the analysis engine executable.
///
/// Argument layout:
///
/// ```text
/// <program> [prefix args] --input <file> --output <dir> --targets a,b [--ionization x,y] <global args>
/// ```
///
/// The global argument string is split on whitespace. stdout and stderr are
/// written to `engine.log` in the job's output directory, which must exist.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    prefix_args: Vec<OsString>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Arguments placed before the generated ones (e.g. a script path).
    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Full argument vector for `job`, excluding the program itself.
    pub fn arguments(&self, job: &JobDescriptor) -> Vec<OsString> {
        let cmd = job.command_arguments();
        let mut args = self.prefix_args.clone();

        args.push("--input".into());
        args.push(job.resolved_input_path().as_os_str().to_owned());
        args.push("--output".into());
        args.push(job.output_directory().as_os_str().to_owned());
        args.push("--targets".into());
        args.push(cmd.targets.join(",").into());
        if !cmd.ionizations.is_empty() {
            args.push("--ionization".into());
            args.push(cmd.ionizations.join(",").into());
        }
        args.extend(cmd.global.split_whitespace().map(OsString::from));
        args
    }

    /// Printable command line, for logs.
    pub fn command_line(&self, job: &JobDescriptor) -> String {
        std::iter::once(self.program.as_os_str().to_owned())
            .chain(self.arguments(job))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl AnalysisEngine for ProcessEngine {
    fn launch(&mut self, job: &JobDescriptor) -> Result<Box<dyn EngineProcess>, EngineError> {
        let log_path = job.output_directory().join(ENGINE_LOG);
        let log = File::create(&log_path).map_err(|source| EngineError::Log {
            path: log_path.display().to_string(),
            source,
        })?;
        let log_err = log.try_clone().map_err(|source| EngineError::Log {
            path: log_path.display().to_string(),
            source,
        })?;

        debug!(job_id = %job.id(), command = %self.command_line(job), "spawning engine");

        let child = Command::new(&self.program)
            .args(self.arguments(job))
            .current_dir(job.output_directory())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        Ok(Box::new(ChildProcess { child }))
    }
}

/// An engine invocation backed by a real OS process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl EngineProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> Result<Option<ProcessExit>, EngineError> {
        self.child
            .try_wait()
            .map(|status| status.map(ProcessExit::from))
            .map_err(EngineError::Wait)
    }

    fn kill(&mut self) -> Result<(), EngineError> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited; still needs reaping.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(EngineError::Kill(e)),
        }
        self.child.wait().map(|_| ()).map_err(EngineError::Kill)
    }
}
