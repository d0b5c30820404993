#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use patchbench::sidecar::{ApplyStrategy, CommandOutput, EnvError, EvaluatorSettings, ExecutionEnvironment};
use patchbench::Task;
use serde_json::json;

pub const ORIGINAL: &str = "def answer():\n    a = 1\n    b = 2\n    return b\n";

pub fn task() -> Task {
    serde_json::from_value(json!({
        "instance_id": "demo__demo-7",
        "repo": "demo/demo",
        "problem_statement": "answer() should return 42",
        "test_cmds": ["pytest -rA tests/test_answer.py"],
        "FAIL_TO_PASS": "[\"tests/test_answer.py::test_foo\"]",
        "PASS_TO_PASS": ["tests/test_answer.py::test_bar"],
    }))
    .unwrap()
}

pub fn checkout(dir: &Path) {
    fs::create_dir_all(dir.join("pkg")).unwrap();
    fs::write(dir.join("pkg/answer.py"), ORIGINAL).unwrap();
}

pub fn fast_settings() -> EvaluatorSettings {
    EvaluatorSettings {
        poll_interval: Duration::from_millis(5),
        ..EvaluatorSettings::default()
    }
}

/// Pretends to be a checkout: the fix counts only when `git apply` sees a
/// diff that sets `b = 42`.
#[derive(Default)]
pub struct FakeCheckout {
    pub applied: Option<String>,
    pub resets: usize,
    pub delay: Duration,
}

impl ExecutionEnvironment for FakeCheckout {
    fn reset(&mut self) -> Result<(), EnvError> {
        self.resets += 1;
        self.applied = None;
        Ok(())
    }

    fn apply(&mut self, diff: &str, strategy: ApplyStrategy) -> Result<CommandOutput, EnvError> {
        let ok = strategy == ApplyStrategy::GitApply && diff.contains("+++ b/pkg/answer.py");
        if ok {
            self.applied = Some(diff.to_string());
        }
        Ok(CommandOutput {
            exit_code: Some(if ok { 0 } else { 1 }),
            output: if ok { String::new() } else { "error: corrupt patch".into() },
            timed_out: false,
        })
    }

    fn run(&mut self, _command: &str, _timeout: Duration) -> Result<CommandOutput, EnvError> {
        std::thread::sleep(self.delay);
        let fixed = self.applied.as_deref().is_some_and(|d| d.contains("+    b = 42"));
        let output = if fixed {
            "PASSED tests/test_answer.py::test_foo\nPASSED tests/test_answer.py::test_bar\n"
        } else {
            "FAILED tests/test_answer.py::test_foo - assert 2 == 42\nPASSED tests/test_answer.py::test_bar\n"
        };
        Ok(CommandOutput {
            exit_code: Some(if fixed { 0 } else { 1 }),
            output: output.into(),
            timed_out: false,
        })
    }
}
