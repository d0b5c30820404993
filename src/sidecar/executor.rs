//! Agent side of the file-signal protocol.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::signal::{SignalDir, AGENT_DONE, REQUEST_FILE, RESULT_FILE, RUN_COMPLETE, RUN_REQUESTED};
use super::{EvaluationChannel, EvaluationRequest, EvaluationResult, ProtocolError};
use crate::patch::CandidatePatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    AwaitingResult,
}

struct Outstanding {
    request_id: String,
    patch_sha256: String,
}

pub struct SidecarClient {
    dir: SignalDir,
    poll_interval: Duration,
    deadline: Duration,
    session: String,
    next_seq: u64,
    outstanding: Option<Outstanding>,
}

impl SidecarClient {
    pub fn new(dir: SignalDir, poll_interval: Duration, deadline: Duration) -> Self {
        Self {
            dir,
            poll_interval,
            deadline,
            session: Uuid::new_v4().simple().to_string(),
            next_seq: 1,
            outstanding: None,
        }
    }

    pub fn state(&self) -> ExecutorState {
        match self.outstanding {
            Some(_) => ExecutorState::AwaitingResult,
            None => ExecutorState::Idle,
        }
    }

    pub fn signal_dir(&self) -> &SignalDir {
        &self.dir
    }

    /// IDLE -> AWAITING_RESULT. Writes the request content before the marker
    /// so the evaluator never sees a marker without content.
    pub fn submit(&mut self, patch: &CandidatePatch) -> Result<String, ProtocolError> {
        if self.outstanding.is_some() {
            return Err(ProtocolError::Busy);
        }

        self.drain_stale()?;

        let request_id = format!("{}-{:04}", self.session, self.next_seq);
        self.next_seq += 1;

        let request = EvaluationRequest {
            request_id: request_id.clone(),
            patch: patch.text.clone(),
        };
        self.dir.write_json(REQUEST_FILE, &request)?;
        self.dir.touch(RUN_REQUESTED)?;

        self.outstanding = Some(Outstanding {
            request_id: request_id.clone(),
            patch_sha256: patch.sha256.clone(),
        });

        info!(request_id = %request_id, patch_sha256 = %patch.sha256, "evaluation requested");
        Ok(request_id)
    }

    /// AWAITING_RESULT -> IDLE, on a matching result or on the deadline.
    pub fn await_result(&mut self) -> Result<EvaluationResult, ProtocolError> {
        let Some(pending) = self.outstanding.take() else {
            return Err(ProtocolError::NoOutstandingRequest);
        };
        self.poll(&pending)
    }

    fn poll(&self, pending: &Outstanding) -> Result<EvaluationResult, ProtocolError> {
        let started = Instant::now();

        loop {
            if self.dir.consume(RUN_COMPLETE)? {
                // Only our own result is removed; a stale one may already be
                // overwritten by the answer we are waiting for.
                match self.dir.read_json::<EvaluationResult>(RESULT_FILE)? {
                    Some(r) if r.request_id == pending.request_id => {
                        self.dir.remove_content(RESULT_FILE)?;
                        debug!(request_id = %r.request_id, applied = r.applied, "result received");
                        return Ok(r);
                    }
                    Some(stale) => {
                        warn!(stale = %stale.request_id, expected = %pending.request_id, "discarding stale result");
                    }
                    None => warn!("run-complete without result content"),
                }
            }

            if started.elapsed() >= self.deadline {
                let withdrawn = self.dir.consume(RUN_REQUESTED)?;
                warn!(
                    request_id = %pending.request_id,
                    deadline_secs = self.deadline.as_secs(),
                    withdrawn,
                    "evaluation deadline exceeded"
                );
                return Ok(EvaluationResult::timeout(
                    &pending.request_id,
                    &pending.patch_sha256,
                    self.deadline,
                ));
            }

            thread::sleep(self.poll_interval);
        }
    }

    /// Clears a result left behind by a request that was abandoned on timeout.
    fn drain_stale(&self) -> Result<(), ProtocolError> {
        if self.dir.consume(RUN_COMPLETE)? {
            self.dir.remove_content(RESULT_FILE)?;
            debug!("drained stale run-complete");
        }
        Ok(())
    }
}

impl EvaluationChannel for SidecarClient {
    fn evaluate(&mut self, patch: &CandidatePatch) -> Result<EvaluationResult, ProtocolError> {
        self.submit(patch)?;
        self.await_result()
    }

    fn finish(&mut self) -> Result<(), ProtocolError> {
        self.dir.touch(AGENT_DONE)?;
        info!("agent-done signalled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(dir: &std::path::Path, deadline_ms: u64) -> SidecarClient {
        SidecarClient::new(
            SignalDir::create(dir).unwrap(),
            Duration::from_millis(5),
            Duration::from_millis(deadline_ms),
        )
    }

    #[test]
    fn only_one_request_outstanding() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(dir.path(), 50);
        let patch = CandidatePatch::new("diff".into());

        c.submit(&patch).unwrap();
        assert_eq!(c.state(), ExecutorState::AwaitingResult);
        assert!(matches!(c.submit(&patch), Err(ProtocolError::Busy)));
    }

    #[test]
    fn timeout_withdraws_request_and_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(dir.path(), 30);
        let patch = CandidatePatch::new("diff".into());

        let r = c.evaluate(&patch).unwrap();
        assert!(r.timed_out);
        assert!(!r.applied);
        assert!(r.output.starts_with("TIMEOUT"));
        assert_eq!(r.patch_sha256, patch.sha256);
        assert_eq!(c.state(), ExecutorState::Idle);
        assert!(!c.signal_dir().exists(RUN_REQUESTED));
    }

    #[test]
    fn stale_result_is_drained_before_next_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(dir.path(), 30);
        let sig = c.signal_dir().clone();

        let stale = EvaluationResult::timeout("old-0001", "", Duration::ZERO);
        sig.write_json(RESULT_FILE, &stale).unwrap();
        sig.touch(RUN_COMPLETE).unwrap();

        c.submit(&CandidatePatch::empty()).unwrap();
        assert!(!sig.exists(RUN_COMPLETE));
        assert_eq!(sig.read_content(RESULT_FILE).unwrap(), None);
    }

    #[test]
    fn mismatched_result_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(dir.path(), 60);
        let sig = c.signal_dir().clone();

        c.submit(&CandidatePatch::empty()).unwrap();
        let stale = EvaluationResult::timeout("someone-else", "", Duration::ZERO);
        sig.write_json(RESULT_FILE, &stale).unwrap();
        sig.touch(RUN_COMPLETE).unwrap();

        let r = c.await_result().unwrap();
        assert!(r.timed_out);
        assert_ne!(r.request_id, "someone-else");
    }

    #[test]
    fn answer_written_right_after_a_stale_result_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(dir.path(), 5_000);
        let sig = c.signal_dir().clone();

        let request_id = c.submit(&CandidatePatch::new("diff".into())).unwrap();
        let stale = EvaluationResult::timeout("someone-else", "", Duration::ZERO);
        sig.write_json(RESULT_FILE, &stale).unwrap();
        sig.touch(RUN_COMPLETE).unwrap();

        let evaluator = sig.clone();
        let worker = std::thread::spawn(move || {
            while evaluator.exists(RUN_COMPLETE) {
                std::thread::sleep(Duration::from_millis(1));
            }
            let mut answer = EvaluationResult::timeout(&request_id, "", Duration::ZERO);
            answer.timed_out = false;
            answer.output = "PASSED test_foo".into();
            evaluator.write_json(RESULT_FILE, &answer).unwrap();
            evaluator.touch(RUN_COMPLETE).unwrap();
        });

        let r = c.await_result().unwrap();
        worker.join().unwrap();

        assert!(!r.timed_out);
        assert_eq!(r.output, "PASSED test_foo");
        assert_eq!(sig.read_content(RESULT_FILE).unwrap(), None);
    }

    #[test]
    fn finish_touches_agent_done() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = client(dir.path(), 10);
        c.finish().unwrap();
        assert!(c.signal_dir().exists(AGENT_DONE));
    }
}
