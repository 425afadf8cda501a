// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The post-session rerun report: one line per distinct failing test, with
//! its total and failed execution counts across the whole session.

use crate::{errors::ReportError, events::Execution};
use camino::Utf8Path;
use std::collections::HashMap;
use std::fs;
use swrite::{SWrite, swriteln};

#[derive(Clone, Copy, Default)]
struct CaseCounts {
    total: usize,
    failed: usize,
}

/// Writes the per-test tally of total and failed executions to `path`.
///
/// Every distinct failing `(package, test)` key observed in `execution`
/// appears exactly once (first occurrence wins), keyed and sorted
/// lexicographically as `package.testname`. Totals count passed and failed
/// executions of that exact test; skipped executions contribute nothing.
/// No-op when reruns were not requested (`max_attempts == 0`) or `path` is
/// `None`.
pub fn write_rerun_report(
    path: Option<&Utf8Path>,
    max_attempts: usize,
    execution: &Execution,
) -> Result<(), ReportError> {
    if max_attempts == 0 {
        return Ok(());
    }
    let Some(path) = path else {
        return Ok(());
    };

    let mut names: Vec<String> = Vec::new();
    let mut results: HashMap<String, CaseCounts> = HashMap::new();

    for failure in execution.failed() {
        let name = format!("{}.{}", failure.package, failure.test);
        if results.contains_key(&name) {
            continue;
        }
        names.push(name.clone());

        let mut counts = CaseCounts::default();
        if let Some(pkg) = execution.package(&failure.package) {
            for tc in pkg.failed() {
                if tc.test == failure.test {
                    counts.total += 1;
                    counts.failed += 1;
                }
            }
            for tc in pkg.passed() {
                if tc.test == failure.test {
                    counts.total += 1;
                }
            }
        }
        results.insert(name, counts);
    }

    names.sort_unstable();
    let mut contents = String::new();
    for name in &names {
        let counts = results[name];
        swriteln!(contents, "{name}: {} runs, {} failures", counts.total, counts.failed);
    }

    fs::write(path, contents).map_err(|error| ReportError {
        path: path.to_owned(),
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TestAction, TestEvent, TestName};
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;

    fn event(action: TestAction, package: &str, test: &str) -> TestEvent {
        TestEvent {
            action,
            package: package.to_owned(),
            test: TestName::new(test),
            output: None,
            elapsed: None,
            run_id: 0,
        }
    }

    fn session_execution() -> Execution {
        let mut execution = Execution::new();
        // Initial run: both fail.
        execution.record_event(&event(TestAction::Fail, "example.com/b", "TestBeta"));
        execution.record_event(&event(TestAction::Fail, "example.com/a", "TestAlpha"));
        // Round 1: alpha passes, beta fails again.
        execution.record_event(&event(TestAction::Pass, "example.com/a", "TestAlpha"));
        execution.record_event(&event(TestAction::Fail, "example.com/b", "TestBeta"));
        // Round 2: beta passes. A skip shows up and must not be counted.
        execution.record_event(&event(TestAction::Pass, "example.com/b", "TestBeta"));
        execution.record_event(&event(TestAction::Skip, "example.com/b", "TestBeta"));
        execution
    }

    #[test]
    fn tallies_are_deduplicated_and_sorted() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("rerun-report.txt");

        write_rerun_report(Some(&path), 3, &session_execution()).unwrap();

        // Beta failed twice across rounds but appears once; keys are sorted
        // even though beta was observed first.
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "example.com/a.TestAlpha: 2 runs, 1 failures\n\
             example.com/b.TestBeta: 3 runs, 2 failures\n"
        );
    }

    #[test]
    fn totals_never_fall_below_failures() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("rerun-report.txt");
        write_rerun_report(Some(&path), 1, &session_execution()).unwrap();
        for line in fs::read_to_string(&path).unwrap().lines() {
            let (_, tail) = line.split_once(": ").unwrap();
            let (runs, failures) = tail.split_once(" runs, ").unwrap();
            let runs: usize = runs.parse().unwrap();
            let failures: usize = failures.strip_suffix(" failures").unwrap().parse().unwrap();
            assert!(runs >= failures, "{line}");
        }
    }

    #[test]
    fn noop_without_reruns_or_path() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("rerun-report.txt");

        write_rerun_report(Some(&path), 0, &session_execution()).unwrap();
        assert!(!path.exists());

        write_rerun_report(None, 3, &session_execution()).unwrap();
        assert!(!path.exists());
    }
}
