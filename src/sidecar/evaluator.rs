//! Evaluator side of the protocol: poll for requests, reset, apply, test,
//! answer.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::environment::{ApplyStrategy, ExecutionEnvironment};
use super::signal::{SignalDir, AGENT_DONE, REQUEST_FILE, RESULT_FILE, RUN_COMPLETE, RUN_REQUESTED};
use super::{EvaluationRequest, EvaluationResult, ProtocolError};
use crate::patch::digest;
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub poll_interval: Duration,
    /// Exit after this long without a request. `None` waits for `agent-done`.
    pub idle_limit: Option<Duration>,
    pub command_timeout: Duration,
    pub output_limit: usize,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            idle_limit: None,
            command_timeout: Duration::from_secs(1800),
            output_limit: 200_000,
        }
    }
}

pub struct Evaluator<E: ExecutionEnvironment> {
    env: E,
    task: Task,
    settings: EvaluatorSettings,
}

impl<E: ExecutionEnvironment> Evaluator<E> {
    pub fn new(env: E, task: Task, settings: EvaluatorSettings) -> Self {
        Self {
            env,
            task,
            settings,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    /// One full attempt from a pristine checkout. Never fails: environment
    /// problems end up in the result output.
    pub fn handle(&mut self, request: &EvaluationRequest) -> EvaluationResult {
        let started = Instant::now();
        let mut log = String::new();

        let mut result = EvaluationResult {
            request_id: request.request_id.clone(),
            applied: false,
            strategy: None,
            test_patch_applied: false,
            output: String::new(),
            patch_sha256: digest(&request.patch),
            runtime_ms: 0,
            timed_out: false,
        };

        if let Err(e) = self.env.reset() {
            warn!(request_id = %request.request_id, error = %e, "reset failed");
            result.output = format!("ERROR: {e}");
            result.runtime_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        let test_patch = self.task.test_patch.clone();
        result.test_patch_applied = match test_patch.as_deref() {
            Some(tp) if !tp.trim().is_empty() => {
                let ok = self.apply_layered(tp, &ApplyStrategy::TEST_PATCH, &mut log).is_some();
                if !ok {
                    warn!(request_id = %request.request_id, "test patch did not apply");
                    log.push_str("Test patch could not be applied.\n");
                }
                ok
            }
            _ => true,
        };

        if request.patch.trim().is_empty() {
            log.push_str("Empty candidate patch; nothing applied.\n");
        } else {
            result.strategy = self.apply_layered(&request.patch, &ApplyStrategy::ALL, &mut log);
            result.applied = result.strategy.is_some();
            if !result.applied {
                log.push_str("Candidate patch could not be applied with any strategy.\n");
            }
        }

        log.push_str(&self.run_tests());

        result.output = truncate_tail(&log, self.settings.output_limit);
        result.runtime_ms = started.elapsed().as_millis() as u64;

        info!(
            request_id = %result.request_id,
            applied = result.applied,
            strategy = result.strategy.map(ApplyStrategy::as_str).unwrap_or("none"),
            runtime_ms = result.runtime_ms,
            "evaluation finished"
        );
        result
    }

    fn apply_layered(
        &mut self,
        diff: &str,
        strategies: &[ApplyStrategy],
        log: &mut String,
    ) -> Option<ApplyStrategy> {
        for &strategy in strategies {
            match self.env.apply(diff, strategy) {
                Ok(out) if out.success() => return Some(strategy),
                Ok(out) => {
                    log.push_str(&format!("[{}] {}\n", strategy.as_str(), out.output.trim_end()));
                }
                Err(e) => log.push_str(&format!("[{}] {e}\n", strategy.as_str())),
            }
        }
        None
    }

    fn run_tests(&mut self) -> String {
        let timeout = self.settings.command_timeout;
        let mut outputs = Vec::new();

        for cmd in self.task.test_cmds.iter().filter(|c| !c.trim().is_empty()) {
            match self.env.run(cmd, timeout) {
                Ok(out) if out.timed_out => outputs.push(format!(
                    "{}\nCommand timed out after {}s: {}",
                    out.output.trim_end(),
                    timeout.as_secs(),
                    cmd
                )),
                Ok(out) => outputs.push(out.output),
                Err(e) => outputs.push(format!("ERROR running `{cmd}`: {e}")),
            }
        }

        outputs.join("\n")
    }

    /// Serves requests from `dir` until `agent-done` or the idle limit.
    /// Returns the number of requests answered.
    pub fn serve(&mut self, dir: &SignalDir) -> Result<usize, ProtocolError> {
        let mut handled = 0;
        let mut last_activity = Instant::now();

        info!(dir = %dir.root().display(), task_id = %self.task.instance_id, "evaluator waiting");

        loop {
            if dir.consume(RUN_REQUESTED)? {
                last_activity = Instant::now();

                match dir.read_json::<EvaluationRequest>(REQUEST_FILE) {
                    Ok(Some(request)) => {
                        let result = self.handle(&request);
                        dir.write_json(RESULT_FILE, &result)?;
                        dir.touch(RUN_COMPLETE)?;
                        handled += 1;
                    }
                    Ok(None) => warn!("run-requested without request content"),
                    Err(e) => warn!(error = %e, "unreadable request skipped"),
                }
                continue;
            }

            if dir.consume(AGENT_DONE)? {
                info!(handled, "agent done; evaluator exiting");
                return Ok(handled);
            }

            if let Some(limit) = self.settings.idle_limit {
                if last_activity.elapsed() >= limit {
                    warn!(handled, idle_secs = limit.as_secs(), "evaluator idle limit reached");
                    return Ok(handled);
                }
            }

            thread::sleep(self.settings.poll_interval);
        }
    }
}

/// Keeps the last `limit` characters.
pub fn truncate_tail(s: &str, limit: usize) -> String {
    let count = s.chars().count();
    if count <= limit {
        return s.to_string();
    }

    let tail: String = s.chars().skip(count - limit).collect();
    format!("...truncated...\n{tail}")
}
