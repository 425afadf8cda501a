// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The rerun session: re-executing failing tests round after round until
//! none remain, the attempt ceiling is reached, or an abort condition fires.

use crate::{
    cancel::CancelSource,
    coverage::{self, CoverageAccumulator},
    errors::{ProcessExitError, RerunError},
    events::{EventHandler, Execution, TestCase},
    executor::{TestChild, TestExecutor},
    outcome::{RoundOutcome, classify},
    recorder::FailureRecorder,
    scanner::{ScanConfig, scan_test_output},
    selection::{RerunPolicy, run_flag},
};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

/// The argument set for one rerun invocation. Immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RerunOptions {
    run_flag: String,
    package: String,
    coverprofile_flag: Option<String>,
}

impl RerunOptions {
    /// Builds the options selecting exactly `test_case`.
    pub fn for_test_case(test_case: &TestCase) -> Self {
        Self {
            run_flag: run_flag(&test_case.test),
            package: test_case.package.clone(),
            coverprofile_flag: None,
        }
    }

    /// Returns a copy that writes coverage to `path`.
    pub fn with_coverprofile(mut self, path: &Utf8Path) -> Self {
        self.coverprofile_flag = Some(format!("-coverprofile={path}"));
        self
    }

    /// The flags to append to the base invocation: selection pattern, package
    /// path, coverage output. Appended flags override duplicates earlier in
    /// the argv.
    pub fn args(&self) -> Vec<String> {
        let mut result = Vec::with_capacity(3);
        if !self.run_flag.is_empty() {
            result.push(self.run_flag.clone());
        }
        if !self.package.is_empty() {
            result.push(self.package.clone());
        }
        if let Some(flag) = &self.coverprofile_flag {
            result.push(flag.clone());
        }
        result
    }
}

/// Builder for [`RerunSetup`].
#[derive(Debug, Default)]
pub struct RerunSetupBuilder {
    policy: RerunPolicy,
    max_attempts: usize,
    cwd: Option<Utf8PathBuf>,
    report_path: Option<Utf8PathBuf>,
}

impl RerunSetupBuilder {
    /// Creates a builder with the default policy and no attempts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of attempt rounds.
    pub fn set_max_attempts(&mut self, max_attempts: usize) -> &mut Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets which failures each round re-executes.
    pub fn set_policy(&mut self, policy: RerunPolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    /// Sets the working directory test processes start in.
    pub fn set_cwd(&mut self, cwd: impl Into<Utf8PathBuf>) -> &mut Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the path the post-session rerun report is written to.
    pub fn set_report_path(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.report_path = Some(path.into());
        self
    }

    /// Builds a session over `base_argv` (the original invocation: program
    /// plus arguments) with the injected `executor`.
    pub fn build<E: TestExecutor>(&self, executor: E, base_argv: Vec<String>) -> RerunSetup<E> {
        RerunSetup {
            executor,
            base_argv,
            cwd: self.cwd.clone(),
            policy: self.policy,
            max_attempts: self.max_attempts,
            report_path: self.report_path.clone(),
        }
    }
}

/// A configured rerun session.
///
/// Holds everything that stays fixed across rounds: the executor, the base
/// argv reruns are derived from, the rerun policy, and the attempt ceiling.
#[derive(Debug)]
pub struct RerunSetup<E> {
    executor: E,
    base_argv: Vec<String>,
    cwd: Option<Utf8PathBuf>,
    policy: RerunPolicy,
    max_attempts: usize,
    report_path: Option<Utf8PathBuf>,
}

impl<E: TestExecutor> RerunSetup<E> {
    /// The configured attempt ceiling.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Writes the post-session rerun report for `execution`.
    ///
    /// A no-op unless reruns were requested and a report path was configured.
    pub fn write_report(&self, execution: &Execution) -> Result<(), crate::errors::ReportError> {
        crate::report::write_rerun_report(
            self.report_path.as_deref(),
            self.max_attempts,
            execution,
        )
    }

    /// Re-runs the failing tests recorded in `execution` until none remain,
    /// the attempt ceiling is reached, or an abort condition fires.
    ///
    /// `downstream` observes every event produced by rerun invocations, after
    /// the round's failure recorder. On a clean end, the accumulated rerun
    /// coverage is merged into the invocation's main profile and the last
    /// recorded subprocess error (if any) becomes the session error. An abort
    /// returns immediately; work already completed is kept.
    pub async fn rerun_failed(
        &self,
        execution: &mut Execution,
        downstream: &mut dyn EventHandler,
    ) -> Result<(), RerunError> {
        let cancel = CancelSource::new();

        // A rerun passing the original `-coverprofile` through would clobber
        // the initial run's profile, so each invocation gets its own file and
        // everything is merged at the end.
        let coverprofile = coverage::coverprofile_path(&self.base_argv);
        let mut accumulator = CoverageAccumulator::new();

        let mut recorder = FailureRecorder::from_execution(execution);
        let mut attempt = 0;
        while recorder.count() > 0 && attempt < self.max_attempts {
            let selected = self.policy.filter(recorder.failures());
            debug!(
                attempt,
                failing = recorder.count(),
                selected = selected.len(),
                "starting rerun round"
            );

            let mut next = FailureRecorder::new();
            for (index, test_case) in selected.iter().enumerate() {
                let mut opts = RerunOptions::for_test_case(test_case);
                let mut rerun_profile = None;
                if let Some(main_profile) = &coverprofile {
                    let path = coverage::rerun_profile_path(main_profile, attempt, index);
                    opts = opts.with_coverprofile(&path);
                    rerun_profile = Some(path);
                }
                let mut argv = self.base_argv.clone();
                argv.extend(opts.args());

                debug!(test = %test_case.test, package = %test_case.package, "rerunning");
                let mut child = self.executor.start(self.cwd.as_deref(), &argv)?;
                let (stdout, stderr) = child.streams();
                scan_test_output(ScanConfig {
                    run_id: attempt + 1,
                    stdout,
                    stderr,
                    handlers: vec![&mut next, &mut *downstream],
                    execution: &mut *execution,
                    cancel: cancel.handle(),
                })
                .await?;

                let exit = child.wait().await.map_err(RerunError::Wait)?;
                if !exit.success() {
                    next.set_last_error(ProcessExitError { exit });
                }

                // Folded in ahead of the outcome check: an abort below must
                // not lose this invocation's coverage, and the temporary file
                // must be gone either way.
                if let Some(path) = &rerun_profile {
                    accumulator.consume_file(path)?;
                }

                match classify(exit, execution) {
                    RoundOutcome::Aborted(reason) => {
                        cancel.cancel();
                        return Err(RerunError::Aborted(reason));
                    }
                    RoundOutcome::Passed | RoundOutcome::ExpectedFailure => {}
                }
            }
            recorder = next;
            attempt += 1;
        }

        if let Some(main_profile) = &coverprofile {
            accumulator.combine_into(main_profile)?;
        }

        match recorder.take_last_error() {
            Some(error) => Err(RerunError::TestsFailed(error)),
            None => Ok(()),
        }
    }
}
