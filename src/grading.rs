//! Test-runner output parsing and the FAIL_TO_PASS / PASS_TO_PASS rule.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
    Xfail,
}

impl TestStatus {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "PASSED" => Some(TestStatus::Passed),
            "FAILED" => Some(TestStatus::Failed),
            "ERROR" => Some(TestStatus::Error),
            "SKIPPED" => Some(TestStatus::Skipped),
            "XFAIL" => Some(TestStatus::Xfail),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Error => "ERROR",
            TestStatus::Skipped => "SKIPPED",
            TestStatus::Xfail => "XFAIL",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Error)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type TestStatusMap = BTreeMap<String, TestStatus>;

/// Builds a status map from `-rA` style summary lines. The last status
/// reported for an id wins.
pub fn parse_test_output(output: &str) -> TestStatusMap {
    let mut statuses = TestStatusMap::new();

    for line in output.lines() {
        let Some(status) = line.split_whitespace().next().and_then(TestStatus::from_token) else {
            continue;
        };

        let line = match status {
            TestStatus::Failed => line.split(" - ").next().unwrap_or(line),
            _ => line,
        };

        if let Some(id) = line.split_whitespace().nth(1) {
            statuses.insert(id.to_string(), status);
        }
    }

    statuses
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub resolved: bool,
    /// PASS_TO_PASS ids that FAILED or ERRORed, in task order.
    pub regressed: Vec<String>,
    /// `None` means the id did not appear in the output.
    pub fail_to_pass: BTreeMap<String, Option<TestStatus>>,
    pub pass_to_pass: BTreeMap<String, Option<TestStatus>>,
}

impl Verdict {
    /// FAIL_TO_PASS ids that are missing or not PASSED.
    pub fn unfixed(&self) -> Vec<&str> {
        self.fail_to_pass
            .iter()
            .filter(|(_, s)| **s != Some(TestStatus::Passed))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn summary(&self) -> String {
        if self.resolved {
            return "resolved: all FAIL_TO_PASS tests pass, no regressions".to_string();
        }

        let mut parts = Vec::new();
        if self.fail_to_pass.is_empty() {
            parts.push("no FAIL_TO_PASS tests defined".to_string());
        }
        let unfixed = self.unfixed();
        if !unfixed.is_empty() {
            parts.push(format!("FAIL_TO_PASS not passing: {}", unfixed.join(", ")));
        }
        if !self.regressed.is_empty() {
            parts.push(format!("PASS_TO_PASS regressed: {}", self.regressed.join(", ")));
        }
        format!("unresolved: {}", parts.join("; "))
    }
}

pub fn classify(statuses: &TestStatusMap, fail_to_pass: &[String], pass_to_pass: &[String]) -> Verdict {
    let lookup = |ids: &[String]| -> BTreeMap<String, Option<TestStatus>> {
        ids.iter()
            .map(|id| (id.clone(), statuses.get(id).copied()))
            .collect()
    };

    let f2p = lookup(fail_to_pass);
    let p2p = lookup(pass_to_pass);

    let mut regressed: Vec<String> = Vec::new();
    for id in pass_to_pass {
        let failed = statuses.get(id).is_some_and(|s| s.is_failure());
        if failed && !regressed.contains(id) {
            regressed.push(id.clone());
        }
    }

    let all_fixed = !f2p.is_empty() && f2p.values().all(|s| *s == Some(TestStatus::Passed));

    Verdict {
        resolved: all_fixed && regressed.is_empty(),
        regressed,
        fail_to_pass: f2p,
        pass_to_pass: p2p,
    }
}

pub fn grade(output: &str, task: &Task) -> Verdict {
    classify(&parse_test_output(output), &task.fail_to_pass, &task.pass_to_pass)
}
