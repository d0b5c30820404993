//! In-process stand-in for the signal directory: a single-slot mailbox in
//! each direction.

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, warn};

use super::environment::ExecutionEnvironment;
use super::evaluator::Evaluator;
use super::{EvaluationChannel, EvaluationRequest, EvaluationResult, ProtocolError};
use crate::patch::CandidatePatch;

pub struct MailboxChannel {
    requests: Option<Sender<EvaluationRequest>>,
    /// Same queue as the evaluator's receiver; lets us withdraw our own
    /// unclaimed request on timeout.
    withdraw: Receiver<EvaluationRequest>,
    results: Receiver<EvaluationResult>,
    deadline: Duration,
    next_seq: u64,
}

pub struct MailboxEvaluator {
    requests: Receiver<EvaluationRequest>,
    results: Sender<EvaluationResult>,
}

pub fn mailbox(deadline: Duration) -> (MailboxChannel, MailboxEvaluator) {
    let (req_tx, req_rx) = bounded(1);
    let (res_tx, res_rx) = bounded(1);

    (
        MailboxChannel {
            requests: Some(req_tx),
            withdraw: req_rx.clone(),
            results: res_rx,
            deadline,
            next_seq: 1,
        },
        MailboxEvaluator {
            requests: req_rx,
            results: res_tx,
        },
    )
}

impl EvaluationChannel for MailboxChannel {
    fn evaluate(&mut self, patch: &CandidatePatch) -> Result<EvaluationResult, ProtocolError> {
        let sender = self.requests.as_ref().ok_or(ProtocolError::Closed)?;

        while let Ok(stale) = self.results.try_recv() {
            debug!(request_id = %stale.request_id, "drained stale result");
        }

        let request_id = format!("mailbox-{:04}", self.next_seq);
        self.next_seq += 1;

        let due = Instant::now() + self.deadline;
        let timeout = || EvaluationResult::timeout(&request_id, &patch.sha256, self.deadline);

        let request = EvaluationRequest {
            request_id: request_id.clone(),
            patch: patch.text.clone(),
        };
        match sender.send_timeout(request, self.deadline) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Ok(timeout()),
            Err(SendTimeoutError::Disconnected(_)) => return Err(ProtocolError::Closed),
        }

        loop {
            match self.results.recv_deadline(due) {
                Ok(r) if r.request_id == request_id => return Ok(r),
                Ok(stale) => warn!(stale = %stale.request_id, "discarding stale result"),
                Err(RecvTimeoutError::Timeout) => {
                    let withdrawn = self.withdraw.try_recv().is_ok();
                    warn!(request_id = %request_id, withdrawn, "evaluation deadline exceeded");
                    return Ok(timeout());
                }
                Err(RecvTimeoutError::Disconnected) => return Err(ProtocolError::Closed),
            }
        }
    }

    fn finish(&mut self) -> Result<(), ProtocolError> {
        self.requests.take();
        Ok(())
    }
}

impl MailboxEvaluator {
    /// Answers requests until the channel side finishes or goes away.
    pub fn serve<E: ExecutionEnvironment>(self, evaluator: &mut Evaluator<E>) -> usize {
        let mut handled = 0;
        for request in self.requests.iter() {
            let result = evaluator.handle(&request);
            handled += 1;
            if self.results.send(result).is_err() {
                break;
            }
        }
        handled
    }
}
