// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The subprocess seam rerun invocations run through.
//!
//! The orchestrator only ever talks to a [`TestExecutor`], injected at
//! construction, so tests substitute a scripted double where production code
//! uses [`LocalExecutor`].

use crate::errors::ProcessSpawnError;
use camino::Utf8Path;
use std::{fmt, io, process::Stdio};
use tokio::{
    io::AsyncRead,
    process::{Child, ChildStderr, ChildStdout, Command},
};

/// Exit information for a finished test process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProcessExit {
    code: Option<i32>,
}

impl ProcessExit {
    /// The normalized code reported when a process was terminated without an
    /// exit code (e.g. by a signal). Chosen to be greater than any exit code
    /// a test outcome produces, so such deaths never read as expected.
    pub const NO_CODE: i32 = 127;

    /// An exit with the given code.
    pub fn with_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    /// An exit without a code: the process was terminated by a signal.
    pub fn signalled() -> Self {
        Self { code: None }
    }

    /// The raw exit code, or `None` for signal termination.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// True if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The exit code, normalizing signal termination to [`Self::NO_CODE`].
    pub fn code_or_default(&self) -> i32 {
        self.code.unwrap_or(Self::NO_CODE)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "code {code}"),
            None => f.write_str("signal termination"),
        }
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A started test process: its two captured output streams plus a
/// wait-for-exit operation.
#[allow(async_fn_in_trait)]
pub trait TestChild {
    /// The standard output stream type.
    type Stdout: AsyncRead + Unpin;
    /// The standard error stream type.
    type Stderr: AsyncRead + Unpin;

    /// The process's output streams, borrowed together so both can be
    /// consumed concurrently.
    fn streams(&mut self) -> (&mut Self::Stdout, &mut Self::Stderr);

    /// Waits for the process to exit.
    async fn wait(&mut self) -> io::Result<ProcessExit>;
}

/// Starts test subprocesses for the orchestrator.
pub trait TestExecutor {
    /// The process handle type.
    type Child: TestChild;

    /// Starts `argv` (program plus arguments) in `cwd`, capturing both output
    /// streams.
    fn start(
        &self,
        cwd: Option<&Utf8Path>,
        argv: &[String],
    ) -> Result<Self::Child, ProcessSpawnError>;
}

impl<T: TestExecutor> TestExecutor for &T {
    type Child = T::Child;

    fn start(
        &self,
        cwd: Option<&Utf8Path>,
        argv: &[String],
    ) -> Result<Self::Child, ProcessSpawnError> {
        (*self).start(cwd, argv)
    }
}

/// Runs test processes on the local machine via [`tokio::process`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalExecutor;

impl TestExecutor for LocalExecutor {
    type Child = LocalChild;

    fn start(
        &self,
        cwd: Option<&Utf8Path>,
        argv: &[String],
    ) -> Result<LocalChild, ProcessSpawnError> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            ProcessSpawnError::new(
                "",
                io::Error::new(io::ErrorKind::InvalidInput, "empty argv"),
            )
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|error| ProcessSpawnError::new(program.clone(), error))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ProcessSpawnError::new(program.clone(), io::Error::other("stdout not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ProcessSpawnError::new(program.clone(), io::Error::other("stderr not captured"))
        })?;
        Ok(LocalChild {
            child,
            stdout,
            stderr,
        })
    }
}

/// A local test process started by [`LocalExecutor`].
#[derive(Debug)]
pub struct LocalChild {
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl TestChild for LocalChild {
    type Stdout = ChildStdout;
    type Stderr = ChildStderr;

    fn streams(&mut self) -> (&mut ChildStdout, &mut ChildStderr) {
        (&mut self.stdout, &mut self.stderr)
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        let status = self.child.wait().await?;
        Ok(status.into())
    }
}
