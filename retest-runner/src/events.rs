// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The structured test-event vocabulary and the execution aggregate built
//! from it.
//!
//! Events follow the line-oriented JSON protocol emitted by `go test -json`
//! style harnesses: one object per line with an `Action`, a `Package`, and --
//! for per-test events -- a `Test` name. The [`Execution`] aggregate is the
//! session-long record those events are folded into; it is owned by the
//! caller and mutated only through [`Execution::record_event`] and
//! [`Execution::add_error`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// The name of a test, possibly hierarchical.
///
/// Subtests are nested under their root test with `/` separators, e.g.
/// `TestParse/empty_input`. A name with no separator is a root test.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestName(SmolStr);

impl TestName {
    /// The separator between subtest path segments.
    pub const SEPARATOR: char = '/';

    /// Creates a test name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name))
    }

    /// The full name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the name is empty (the event it came from is package-level).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if this name has at least one subtest path segment.
    pub fn is_subtest(&self) -> bool {
        self.0.contains(Self::SEPARATOR)
    }

    /// The `/`-separated path segments of the name.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR)
    }

    /// The root test this name is nested under (the name itself for a root
    /// test).
    pub fn root(&self) -> &str {
        self.segments().next().unwrap_or("")
    }

    /// True if `other` is nested underneath this name.
    pub fn is_parent_of(&self, other: &TestName) -> bool {
        let name = self.as_str();
        let other = other.as_str();
        other.len() > name.len()
            && other.starts_with(name)
            && other[name.len()..].starts_with(Self::SEPARATOR)
    }
}

impl fmt::Display for TestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TestName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A single test within a package.
///
/// Identity is the `(package, test)` pair.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TestCase {
    /// The package the test belongs to.
    pub package: String,
    /// The test's name.
    pub test: TestName,
}

impl TestCase {
    /// Creates a test case.
    pub fn new(package: impl Into<String>, test: impl Into<TestName>) -> Self {
        Self {
            package: package.into(),
            test: test.into(),
        }
    }
}

/// The action recorded on a test event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestAction {
    /// A test binary is about to run.
    Start,
    /// A test has started running.
    Run,
    /// A test has been paused.
    Pause,
    /// A paused test has continued.
    Cont,
    /// A test passed.
    Pass,
    /// A benchmark printed results.
    Bench,
    /// A test failed.
    Fail,
    /// A line of output was produced.
    Output,
    /// A test was skipped.
    Skip,
    /// An action this crate has no specific handling for. Unknown actions are
    /// carried, not rejected, so newer harnesses keep working.
    Other,
}

impl<'de> Deserialize<'de> for TestAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let action = SmolStr::deserialize(deserializer)?;
        Ok(match action.as_str() {
            "start" => Self::Start,
            "run" => Self::Run,
            "pause" => Self::Pause,
            "cont" => Self::Cont,
            "pass" => Self::Pass,
            "bench" => Self::Bench,
            "fail" => Self::Fail,
            "output" => Self::Output,
            "skip" => Self::Skip,
            _ => Self::Other,
        })
    }
}

/// A single event decoded from a test process's structured output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestEvent {
    /// The action this event records.
    pub action: TestAction,

    /// The package the event applies to.
    #[serde(default)]
    pub package: String,

    /// The test the event applies to; empty for package-level events.
    #[serde(default)]
    pub test: TestName,

    /// The output payload, present on `output` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Seconds elapsed, present on terminal events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,

    /// Which attempt round produced this event; 0 is the initial run. Set by
    /// the scanner, not part of the wire format.
    #[serde(skip)]
    pub run_id: usize,
}

impl TestEvent {
    /// True if this event applies to the package as a whole rather than a
    /// single test.
    pub fn is_package_event(&self) -> bool {
        self.test.is_empty()
    }
}

/// A consumer of test events.
///
/// Handlers are registered as an ordered list on a
/// [`ScanConfig`](crate::scanner::ScanConfig); every decoded event is
/// dispatched to each of them in turn, after it has been applied to the
/// shared [`Execution`].
pub trait EventHandler {
    /// Handles a single event. `execution` already reflects the event.
    fn event(&mut self, event: &TestEvent, execution: &Execution);
}

/// Accumulated results for a single package.
#[derive(Clone, Debug, Default)]
pub struct PackageExecution {
    passed: Vec<TestCase>,
    failed: Vec<TestCase>,
    skipped: Vec<TestCase>,
}

impl PackageExecution {
    /// The passing executions recorded for this package, in order.
    pub fn passed(&self) -> &[TestCase] {
        &self.passed
    }

    /// The failing executions recorded for this package, in order.
    pub fn failed(&self) -> &[TestCase] {
        &self.failed
    }

    /// The skipped executions recorded for this package, in order.
    pub fn skipped(&self) -> &[TestCase] {
        &self.skipped
    }

    /// The most recently recorded failure with the given test name.
    pub fn last_failed_by_name(&self, name: &TestName) -> Option<&TestCase> {
        self.failed.iter().rev().find(|tc| tc.test == *name)
    }
}

/// The aggregate, queryable result state of a full test run.
///
/// One `Execution` lives for the whole session: the initial run and every
/// rerun round all record into it.
#[derive(Clone, Debug, Default)]
pub struct Execution {
    packages: IndexMap<String, PackageExecution>,
    errors: Vec<String>,
    suspected_panic: bool,
}

impl Execution {
    /// Creates an empty execution.
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-package view for `package`, if any events mentioned it.
    pub fn package(&self, package: &str) -> Option<&PackageExecution> {
        self.packages.get(package)
    }

    /// All failing cases across packages, in observation order per package.
    pub fn failed(&self) -> Vec<TestCase> {
        self.packages
            .values()
            .flat_map(|pkg| pkg.failed.iter().cloned())
            .collect()
    }

    /// All passing cases across packages, in observation order per package.
    pub fn passed(&self) -> Vec<TestCase> {
        self.packages
            .values()
            .flat_map(|pkg| pkg.passed.iter().cloned())
            .collect()
    }

    /// Protocol-level error lines recorded for the session.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// True if any output line suggested an unrecovered panic. Once set, the
    /// flag stays set for the session.
    pub fn has_panic(&self) -> bool {
        self.suspected_panic
    }

    /// Records a protocol-level error line (typically a stderr line from the
    /// test process).
    pub fn add_error(&mut self, line: impl Into<String>) {
        self.errors.push(line.into());
    }

    /// Applies a single event to the aggregate.
    pub fn record_event(&mut self, event: &TestEvent) {
        if let Some(output) = &event.output {
            if output.trim_start().starts_with("panic: ") {
                self.suspected_panic = true;
            }
        }
        if event.is_package_event() {
            return;
        }
        let pkg = self.packages.entry(event.package.clone()).or_default();
        let tc = TestCase::new(event.package.clone(), event.test.clone());
        match event.action {
            TestAction::Pass => pkg.passed.push(tc),
            TestAction::Fail => pkg.failed.push(tc),
            TestAction::Skip => pkg.skipped.push(tc),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn fail_event(package: &str, test: &str) -> TestEvent {
        TestEvent {
            action: TestAction::Fail,
            package: package.to_owned(),
            test: TestName::new(test),
            output: None,
            elapsed: None,
            run_id: 0,
        }
    }

    #[test]
    fn test_name_hierarchy() {
        let root = TestName::new("TestParse");
        assert!(!root.is_subtest());
        assert_eq!(root.root(), "TestParse");

        let sub = TestName::new("TestParse/empty_input/utf8");
        assert!(sub.is_subtest());
        assert_eq!(sub.root(), "TestParse");
        assert_eq!(
            sub.segments().collect::<Vec<_>>(),
            vec!["TestParse", "empty_input", "utf8"]
        );

        assert!(root.is_parent_of(&sub));
        assert!(!sub.is_parent_of(&root));
        // A sibling sharing a prefix is not a parent.
        assert!(!TestName::new("Test").is_parent_of(&TestName::new("TestParse")));
    }

    #[test]
    fn decode_event_lines() {
        let line = indoc! {r#"
            {"Time":"2024-05-01T10:00:00Z","Action":"fail","Package":"example.com/pkg","Test":"TestParse/empty_input","Elapsed":0.12}
        "#};
        let event: TestEvent = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(event.action, TestAction::Fail);
        assert_eq!(event.package, "example.com/pkg");
        assert_eq!(event.test, TestName::new("TestParse/empty_input"));
        assert_eq!(event.elapsed, Some(0.12));
        assert!(!event.is_package_event());

        let line = r#"{"Action":"output","Package":"example.com/pkg","Output":"ok\n"}"#;
        let event: TestEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.action, TestAction::Output);
        assert!(event.is_package_event());

        // Unknown actions are tolerated.
        let line = r#"{"Action":"build-output","Package":"example.com/pkg"}"#;
        let event: TestEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.action, TestAction::Other);
    }

    #[test]
    fn record_and_query() {
        let mut execution = Execution::new();
        execution.record_event(&fail_event("pkg/a", "TestOne"));
        execution.record_event(&fail_event("pkg/b", "TestTwo"));
        execution.record_event(&fail_event("pkg/a", "TestOne"));

        assert_eq!(
            execution.failed(),
            vec![
                TestCase::new("pkg/a", "TestOne"),
                TestCase::new("pkg/a", "TestOne"),
                TestCase::new("pkg/b", "TestTwo"),
            ]
        );
        let pkg = execution.package("pkg/a").unwrap();
        assert_eq!(
            pkg.last_failed_by_name(&TestName::new("TestOne")),
            Some(&TestCase::new("pkg/a", "TestOne"))
        );
        assert!(pkg.last_failed_by_name(&TestName::new("TestMissing")).is_none());
        assert!(execution.package("pkg/missing").is_none());
    }

    #[test]
    fn panic_suspicion_is_sticky() {
        let mut execution = Execution::new();
        assert!(!execution.has_panic());

        let mut event = fail_event("pkg/a", "TestOne");
        event.action = TestAction::Output;
        event.output = Some("panic: runtime error: index out of range\n".to_owned());
        execution.record_event(&event);
        assert!(execution.has_panic());

        // A later clean event doesn't clear the flag.
        execution.record_event(&fail_event("pkg/a", "TestOne"));
        assert!(execution.has_panic());
    }
}
