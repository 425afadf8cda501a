// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failure accumulation for a single attempt round.

use crate::{
    errors::ProcessExitError,
    events::{EventHandler, Execution, TestAction, TestCase, TestEvent},
};

/// Collects the failing test cases observed while a run's events stream by.
///
/// One recorder exists per attempt round; the failures it accumulates become
/// the set of tests re-run in the next round, and the round's recorder is
/// replaced wholesale rather than reset. It participates in event dispatch as
/// an ordinary [`EventHandler`], ahead of whatever downstream consumers the
/// caller registered.
#[derive(Debug, Default)]
pub struct FailureRecorder {
    failures: Vec<TestCase>,
    last_error: Option<ProcessExitError>,
}

impl FailureRecorder {
    /// Creates an empty recorder for a new round.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a recorder with the failures of an already-completed run.
    pub fn from_execution(execution: &Execution) -> Self {
        Self {
            failures: execution.failed(),
            last_error: None,
        }
    }

    /// Number of failures recorded so far.
    pub fn count(&self) -> usize {
        self.failures.len()
    }

    /// The recorded failures, in observation order.
    pub fn failures(&self) -> &[TestCase] {
        &self.failures
    }

    /// The most recent subprocess exit error recorded for the round.
    pub fn last_error(&self) -> Option<&ProcessExitError> {
        self.last_error.as_ref()
    }

    pub(crate) fn set_last_error(&mut self, error: ProcessExitError) {
        self.last_error = Some(error);
    }

    pub(crate) fn take_last_error(&mut self) -> Option<ProcessExitError> {
        self.last_error.take()
    }
}

impl EventHandler for FailureRecorder {
    fn event(&mut self, event: &TestEvent, execution: &Execution) {
        if event.is_package_event() || event.action != TestAction::Fail {
            return;
        }
        // The execution already holds the failure this event reported; grab
        // its case rather than synthesizing one.
        if let Some(tc) = execution
            .package(&event.package)
            .and_then(|pkg| pkg.last_failed_by_name(&event.test))
        {
            self.failures.push(tc.clone());
        }
    }
}
