//! The periodic deadline sweep.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::TimeDelta;
use diesel::prelude::*;

use crate::{
    debates::{
        AppealStatus, DebateStatus,
        advance::{AdvanceOutcome, Completion, advance_in_tx},
        verdicts::JobReason,
    },
    error::{ArenaError, ArenaResult},
    schema::debates,
    state::{DbPool, Services},
    tournaments::bracket,
};

#[derive(Debug)]
pub struct DebateSweepResult {
    pub debate_id: String,
    pub outcome: ArenaResult<AdvanceOutcome>,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Set when another sweep was still running, in which case nothing was
    /// done.
    pub skipped: bool,
    pub processed: usize,
    pub results: Vec<DebateSweepResult>,
}

impl SweepReport {
    pub fn count(&self, pred: impl Fn(&AdvanceOutcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.as_ref().is_ok_and(&pred))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_err()).count()
    }
}

/// Resets the single-flight flag when a sweep finishes, however it finishes.
pub(crate) struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    pool: DbPool,
    services: Services,
    retry_after: TimeDelta,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(pool: DbPool, services: Services) -> Self {
        Self {
            pool,
            services,
            retry_after: TimeDelta::minutes(15),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_retry_after(mut self, retry_after: TimeDelta) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub(crate) fn try_begin(&self) -> Option<Running<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Running(&self.running))
    }

    /// Advances every active debate whose round deadline has passed. Each
    /// debate is handled in its own transaction; an error on one is recorded
    /// in the report and the sweep moves on.
    #[tracing::instrument(skip(self))]
    pub fn sweep(&self) -> ArenaResult<SweepReport> {
        let Some(_running) = self.try_begin() else {
            tracing::debug!("previous sweep still running, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..Default::default()
            });
        };

        let now = self.services.now();
        let mut conn = self.pool.get()?;

        let due: Vec<String> = debates::table
            .filter(debates::status.eq(DebateStatus::Active))
            .filter(debates::round_deadline.le(now))
            .order_by(debates::round_deadline.asc())
            .select(debates::id)
            .load(&mut conn)?;

        let mut report = SweepReport::default();
        for debate_id in due {
            let outcome = conn.immediate_transaction(|conn| {
                let (debate, outcome) = advance_in_tx(conn, &debate_id, now)?;

                if outcome == AdvanceOutcome::Completed(Completion::Forfeit)
                    && let Some(match_id) = debate
                        .as_ref()
                        .and_then(|d| d.tournament_match_id.as_deref())
                {
                    bracket::apply_match_outcome(
                        conn,
                        &self.services,
                        match_id,
                        None,
                    )?;
                }

                Ok::<_, ArenaError>(outcome)
            });

            match &outcome {
                Ok(AdvanceOutcome::Completed(Completion::AwaitingVerdict)) => {
                    if let Err(e) = self
                        .services
                        .verdicts
                        .submit(&debate_id, JobReason::Finished)
                    {
                        tracing::warn!(debate = %debate_id, "{e}");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        debate = %debate_id,
                        "failed to advance: {e}"
                    );
                }
            }

            report.processed += 1;
            report.results.push(DebateSweepResult { debate_id, outcome });
        }

        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                failures = report.failures(),
                "sweep finished"
            );
        }

        Ok(report)
    }

    /// Asks again for verdicts which should have arrived by now: debates
    /// which finished (or were appealed) more than `retry_after` ago and are
    /// still waiting. Returns how many were requested.
    #[tracing::instrument(skip(self))]
    pub fn retry_stalled_verdicts(&self) -> ArenaResult<usize> {
        let now = self.services.now();
        let cutoff = now - self.retry_after;
        let mut conn = self.pool.get()?;

        let stalled: Vec<String> = debates::table
            .filter(
                debates::status
                    .eq(DebateStatus::Completed)
                    .and(debates::verdict_reached.eq(false))
                    .or(debates::status
                        .eq(DebateStatus::Appealed)
                        .and(debates::appeal_status.eq(AppealStatus::Pending))),
            )
            .filter(
                debates::verdict_requested_at
                    .le(cutoff)
                    .or(debates::verdict_requested_at.is_null()),
            )
            .select(debates::id)
            .load(&mut conn)?;

        let mut requested = 0;
        for debate_id in stalled {
            diesel::update(debates::table.filter(debates::id.eq(&debate_id)))
                .set(debates::verdict_requested_at.eq(now))
                .execute(&mut conn)?;

            match self.services.verdicts.submit(&debate_id, JobReason::Retry) {
                Ok(()) => requested += 1,
                Err(e) => tracing::warn!(debate = %debate_id, "{e}"),
            }
        }

        if requested > 0 {
            tracing::info!(requested, "re-requested stalled verdicts");
        }
        Ok(requested)
    }

    /// Runs the sweep (followed by the stalled verdict check) every
    /// `interval` until `shutdown` resolves.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        shutdown: impl Future<Output = ()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let scheduler = self.clone();
            let result = tokio::task::spawn_blocking(move || {
                scheduler.sweep()?;
                scheduler.retry_stalled_verdicts()
            })
            .await;

            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("sweep failed: {e}"),
                Err(e) => tracing::error!("sweep panicked: {e}"),
            }
        }

        tracing::info!("scheduler stopped");
    }
}
