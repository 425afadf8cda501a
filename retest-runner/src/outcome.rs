// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deciding, after each completed invocation, whether the session continues.

use crate::{events::Execution, executor::ProcessExit};
use thiserror::Error;

/// How a completed rerun invocation affects the session.
///
/// Exit codes 0 and 1 are both acceptable per-invocation outcomes -- code 1
/// just means some of the selected tests failed again. Everything else ends
/// the whole session, not just the round.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RoundOutcome {
    /// The process exited with code 0.
    Passed,
    /// The process exited with code 1: expected test failures.
    ExpectedFailure,
    /// The session must stop; later results would be unreliable.
    Aborted(AbortReason),
}

impl RoundOutcome {
    /// The abort reason, if this outcome ends the session.
    pub fn abort_reason(self) -> Option<AbortReason> {
        match self {
            RoundOutcome::Aborted(reason) => Some(reason),
            RoundOutcome::Passed | RoundOutcome::ExpectedFailure => None,
        }
    }
}

/// Why a rerun session was aborted.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum AbortReason {
    /// The execution already carries protocol-level errors.
    #[error("rerun aborted because previous run had errors")]
    PreviousRunErrors,

    /// The process exited with a code no test outcome produces.
    #[error("unexpected test process exit: {exit}")]
    UnexpectedExitCode {
        /// The offending exit status.
        exit: ProcessExit,
    },

    /// An unrecovered panic was suspected. A panic can take the process down
    /// mid-test, so the remainder of its output is unreliable.
    #[error(
        "rerun aborted because previous run had a suspected panic and some tests may not have run"
    )]
    SuspectedPanic,
}

/// Classifies a completed invocation against the shared execution record.
///
/// The rules apply in order: recorded protocol errors, then the normalized
/// exit code, then panic suspicion.
pub fn classify(exit: ProcessExit, execution: &Execution) -> RoundOutcome {
    if !execution.errors().is_empty() {
        return RoundOutcome::Aborted(AbortReason::PreviousRunErrors);
    }
    if exit.code_or_default() > 1 {
        return RoundOutcome::Aborted(AbortReason::UnexpectedExitCode { exit });
    }
    if execution.has_panic() {
        return RoundOutcome::Aborted(AbortReason::SuspectedPanic);
    }
    if exit.success() {
        RoundOutcome::Passed
    } else {
        RoundOutcome::ExpectedFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TestAction, TestEvent, TestName};
    use test_case::test_case;

    fn panicked_execution() -> Execution {
        let mut execution = Execution::new();
        execution.record_event(&TestEvent {
            action: TestAction::Output,
            package: "pkg".to_owned(),
            test: TestName::new("TestOne"),
            output: Some("panic: boom\n".to_owned()),
            elapsed: None,
            run_id: 0,
        });
        execution
    }

    #[test_case(0, RoundOutcome::Passed; "code zero continues")]
    #[test_case(1, RoundOutcome::ExpectedFailure; "code one continues")]
    fn clean_exit_codes_continue(code: i32, expected: RoundOutcome) {
        let execution = Execution::new();
        assert_eq!(classify(ProcessExit::with_code(code), &execution), expected);
    }

    #[test_case(2; "code two")]
    #[test_case(101; "panicking harness code")]
    fn unexpected_exit_codes_abort(code: i32) {
        let execution = Execution::new();
        let outcome = classify(ProcessExit::with_code(code), &execution);
        assert!(matches!(
            outcome,
            RoundOutcome::Aborted(AbortReason::UnexpectedExitCode { .. })
        ));
    }

    #[test]
    fn signal_termination_aborts() {
        let execution = Execution::new();
        assert!(matches!(
            classify(ProcessExit::signalled(), &execution),
            RoundOutcome::Aborted(AbortReason::UnexpectedExitCode { .. })
        ));
    }

    #[test]
    fn protocol_errors_abort_even_on_clean_exit() {
        let mut execution = Execution::new();
        execution.add_error("build failed: syntax error");
        assert_eq!(
            classify(ProcessExit::with_code(0), &execution),
            RoundOutcome::Aborted(AbortReason::PreviousRunErrors)
        );
    }

    #[test]
    fn protocol_errors_take_precedence_over_exit_code() {
        let mut execution = Execution::new();
        execution.add_error("build failed: syntax error");
        assert_eq!(
            classify(ProcessExit::with_code(2), &execution),
            RoundOutcome::Aborted(AbortReason::PreviousRunErrors)
        );
    }

    #[test]
    fn suspected_panic_aborts() {
        let execution = panicked_execution();
        assert_eq!(
            classify(ProcessExit::with_code(1), &execution),
            RoundOutcome::Aborted(AbortReason::SuspectedPanic)
        );
    }

    #[test]
    fn abort_reason_accessor() {
        assert_eq!(RoundOutcome::Passed.abort_reason(), None);
        assert_eq!(
            RoundOutcome::Aborted(AbortReason::SuspectedPanic).abort_reason(),
            Some(AbortReason::SuspectedPanic)
        );
    }
}
