//! Requesting verdicts from the (external) verdict generator.
//!
//! Callers never wait on the generator. They submit a [`VerdictJob`] to the
//! [`VerdictQueue`]; a [`VerdictWorker`] picks jobs up and calls the
//! generator with a timeout, retrying a bounded number of times. A job that
//! runs out of attempts leaves the debate waiting for its verdict, where the
//! scheduler's follow-up sweep will find it again.

use std::{future::Future, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::mpsc;

mod apply;

pub use apply::{JudgeScore, Verdict, VerdictInput, apply_verdict};

#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("verdict generation failed: {0}")]
    Generator(String),
    #[error("the verdict queue has shut down")]
    QueueClosed,
}

/// Produces a verdict for a debate and records it (through
/// [`apply_verdict`]).
pub trait VerdictGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        debate_id: &str,
    ) -> impl Future<Output = Result<(), VerdictError>> + Send;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobReason {
    /// All rounds were completed.
    Finished,
    Appeal,
    /// The follow-up sweep found a debate which is still waiting.
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerdictJob {
    pub debate_id: String,
    pub reason: JobReason,
}

#[derive(Clone, Debug)]
pub struct VerdictQueue {
    tx: mpsc::UnboundedSender<VerdictJob>,
}

/// The receiving half of a [`VerdictQueue`].
pub struct VerdictJobs(mpsc::UnboundedReceiver<VerdictJob>);

impl VerdictJobs {
    pub async fn recv(&mut self) -> Option<VerdictJob> {
        self.0.recv().await
    }

    /// Takes a job without waiting, if one is queued.
    pub fn try_recv(&mut self) -> Option<VerdictJob> {
        self.0.try_recv().ok()
    }
}

impl VerdictQueue {
    pub fn channel() -> (VerdictQueue, VerdictJobs) {
        let (tx, rx) = mpsc::unbounded_channel();
        (VerdictQueue { tx }, VerdictJobs(rx))
    }

    pub fn submit(
        &self,
        debate_id: &str,
        reason: JobReason,
    ) -> Result<(), VerdictError> {
        self.tx
            .send(VerdictJob {
                debate_id: debate_id.to_string(),
                reason,
            })
            .map_err(|_| VerdictError::QueueClosed)?;
        tracing::debug!(debate = debate_id, ?reason, "verdict requested");
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on a single call to the generator.
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Wait before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

pub struct VerdictWorker<G> {
    generator: Arc<G>,
    policy: RetryPolicy,
}

impl<G: VerdictGenerator> VerdictWorker<G> {
    pub fn new(generator: Arc<G>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    /// Handles jobs until every [`VerdictQueue`] handle has been dropped.
    /// Each job runs on its own task so a slow generator call does not hold
    /// up the others.
    pub async fn run(self, mut jobs: VerdictJobs) {
        let mut tasks = tokio::task::JoinSet::new();
        while let Some(job) = jobs.recv().await {
            let generator = self.generator.clone();
            let policy = self.policy;
            tasks.spawn(async move {
                dispatch(&*generator, policy, job).await
            });

            while tasks.try_join_next().is_some() {}
        }
        while tasks.join_next().await.is_some() {}
    }
}

/// Calls the generator for one job, retrying according to `policy`. Returns
/// whether the generator eventually succeeded.
#[tracing::instrument(skip(generator, policy), fields(debate = %job.debate_id))]
pub async fn dispatch<G: VerdictGenerator>(
    generator: &G,
    policy: RetryPolicy,
    job: VerdictJob,
) -> bool {
    for attempt in 1..=policy.max_attempts {
        match tokio::time::timeout(
            policy.timeout,
            generator.generate(&job.debate_id),
        )
        .await
        {
            Ok(Ok(())) => {
                tracing::info!(
                    attempt,
                    reason = ?job.reason,
                    "verdict generated"
                );
                return true;
            }
            Ok(Err(e)) => {
                tracing::warn!(attempt, "verdict generator failed: {e}");
            }
            Err(_) => {
                tracing::warn!(
                    attempt,
                    timeout = ?policy.timeout,
                    "verdict generator timed out"
                );
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.backoff * attempt).await;
        }
    }

    tracing::error!(
        attempts = policy.max_attempts,
        "giving up on verdict for now, the debate stays pending"
    );
    false
}
