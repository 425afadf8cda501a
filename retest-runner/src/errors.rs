// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by retest-runner.

use crate::{executor::ProcessExit, outcome::AbortReason};
use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// An error that occurred while starting a test subprocess.
///
/// Always fatal: the session cannot make progress without the process.
#[derive(Debug, Error)]
#[error("failed to start test process `{program}`")]
pub struct ProcessSpawnError {
    program: String,
    #[source]
    error: io::Error,
}

impl ProcessSpawnError {
    pub(crate) fn new(program: impl Into<String>, error: io::Error) -> Self {
        Self {
            program: program.into(),
            error,
        }
    }

    /// The program that failed to start.
    pub fn program(&self) -> &str {
        &self.program
    }
}

/// An error that occurred while scanning a test process's output streams.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScanError {
    /// Reading one of the output streams failed.
    #[error("failed to read test output")]
    Read(#[source] io::Error),

    /// A stdout line could not be decoded as a test event.
    #[error("failed to parse test event from line: {line}")]
    Parse {
        /// The line that failed to decode.
        line: String,
        /// The underlying decode error.
        #[source]
        error: serde_json::Error,
    },

    /// The session was cancelled while the scan was in flight.
    #[error("test output scan cancelled")]
    Cancelled,
}

/// A test subprocess exited unsuccessfully.
///
/// Recoverable on its own: the round records it and continues unless the
/// outcome classifier decides otherwise. It is surfaced as the session error
/// only when the session otherwise ends cleanly.
#[derive(Clone, Debug, Error)]
#[error("test process exited with {exit}")]
pub struct ProcessExitError {
    /// The process's exit status.
    pub exit: ProcessExit,
}

/// An error that occurred while reading, merging, or writing coverage
/// profiles. Always fatal to the remaining coverage work.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoverageError {
    /// A profile file could not be read.
    #[error("failed to read coverage profile `{path}`")]
    Read {
        /// The profile path.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: io::Error,
    },

    /// The merged profile could not be written back.
    #[error("failed to write coverage profile `{path}`")]
    Write {
        /// The profile path.
        path: Utf8PathBuf,
        /// The underlying IO error.
        #[source]
        error: io::Error,
    },

    /// A profile file does not begin with a `mode:` header.
    #[error("coverage profile `{path}` is missing a mode header")]
    MissingModeHeader {
        /// The profile path.
        path: Utf8PathBuf,
    },

    /// A block line in a profile file could not be parsed.
    #[error("malformed block on line {line} of coverage profile `{path}`: {reason}")]
    MalformedBlock {
        /// The profile path.
        path: Utf8PathBuf,
        /// The 1-based line number.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },
}

/// An error that occurred while writing the rerun report.
#[derive(Debug, Error)]
#[error("failed to write rerun report to `{path}`")]
pub struct ReportError {
    pub(crate) path: Utf8PathBuf,
    #[source]
    pub(crate) error: io::Error,
}

impl ReportError {
    /// The report path that failed to be written.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// An error produced while driving a rerun session.
///
/// All variants other than [`TestsFailed`](Self::TestsFailed) unwind the
/// session as soon as they occur; work already completed (failures recorded,
/// coverage merged) is kept.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RerunError {
    /// The executor failed to start a subprocess.
    #[error(transparent)]
    Spawn(#[from] ProcessSpawnError),

    /// The event stream was malformed or unreadable.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Waiting for a test process failed at the OS level.
    #[error("failed to wait for test process")]
    Wait(#[source] io::Error),

    /// Coverage bookkeeping failed.
    #[error(transparent)]
    Coverage(#[from] CoverageError),

    /// An abort rule fired after a completed invocation.
    #[error(transparent)]
    Aborted(#[from] AbortReason),

    /// The session ended cleanly but the last rerun invocation still exited
    /// unsuccessfully.
    #[error(transparent)]
    TestsFailed(#[from] ProcessExitError),
}
