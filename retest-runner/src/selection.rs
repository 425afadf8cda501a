// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting which failing tests a rerun invocation targets.

use crate::events::{TestCase, TestName};
use std::collections::HashSet;

/// Builds the anchored selection pattern for a test name.
///
/// Every path segment is regex-escaped and anchored on its own, then the
/// segments are rejoined with `/`. Anchoring per segment keeps a name from
/// matching a sibling it is a prefix of (`TestFoo` vs `TestFooBar`) and
/// preserves the nesting semantics of subtest selection.
pub fn run_pattern(test: &TestName) -> String {
    let mut pattern = String::new();
    for (i, segment) in test.segments().enumerate() {
        if i > 0 {
            pattern.push(TestName::SEPARATOR);
        }
        pattern.push('^');
        // Spaces are escaped along with the regex metacharacters; the flag
        // value must survive argv splitting downstream.
        pattern.push_str(&regex::escape(segment).replace(' ', "\\ "));
        pattern.push('$');
    }
    pattern
}

/// The `-test.run=` flag selecting exactly `test`.
pub fn run_flag(test: &TestName) -> String {
    format!("-test.run={}", run_pattern(test))
}

/// Which of the observed failures a rerun round actually re-executes.
///
/// Chosen once per session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RerunPolicy {
    /// Re-run each failing leaf exactly once: deduplicate by
    /// `(package, test)` identity and drop cases that only failed because a
    /// subtest under them did.
    #[default]
    UniqueLeaves,

    /// Re-run only root-level failures. A root invocation re-executes all of
    /// its subtests, so this trades fewer subprocess starts for re-running
    /// some tests that did not themselves fail.
    RootsOnly,
}

impl RerunPolicy {
    /// Narrows `cases` according to the policy, preserving first-occurrence
    /// order.
    pub fn filter(self, cases: &[TestCase]) -> Vec<TestCase> {
        match self {
            RerunPolicy::UniqueLeaves => filter_unique_leaves(cases),
            RerunPolicy::RootsOnly => cases
                .iter()
                .filter(|tc| !tc.test.is_subtest())
                .cloned()
                .collect(),
        }
    }
}

fn filter_unique_leaves(cases: &[TestCase]) -> Vec<TestCase> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for tc in cases {
        if !seen.insert((tc.package.as_str(), tc.test.as_str())) {
            continue;
        }
        // A failing subtest fails its parents too; re-running the leaf
        // re-reports them, so only the leaf is kept.
        let is_parent = cases
            .iter()
            .any(|other| tc.package == other.package && tc.test.is_parent_of(&other.test));
        if !is_parent {
            result.push(tc.clone());
        }
    }
    result
}
