//! Moves debates from round to round as their deadlines pass.
//!
//! The decision ([`decide`]) is a pure function of the debate, its statements
//! and the current time. Applying it ([`apply`]) is a single write which only
//! succeeds if the debate is still in the state the decision was made from,
//! so racing sweeps cannot advance the same round twice.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::{
    debates::{Debate, DebateStatus, statements::Statement},
    error::ArenaResult,
    schema::debates,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Nobody took part; finished without a winner and without judging.
    Forfeit,
    /// All rounds are over and the verdict generator should be asked for a
    /// result.
    AwaitingVerdict,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NoOpReason {
    NotActive,
    NotDue,
    /// The debate changed (or disappeared) between being read and written.
    AlreadyHandled,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
    NoOp(NoOpReason),
    Advanced(i64),
    Completed(Completion),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    NotActive,
    NotDue,
    ForceComplete,
    Complete,
    Advance {
        round: i64,
        deadline: NaiveDateTime,
    },
}

pub fn decide(
    debate: &Debate,
    statements: &[Statement],
    now: NaiveDateTime,
) -> Decision {
    if debate.status != DebateStatus::Active {
        return Decision::NotActive;
    }

    // A debate nobody engaged with is closed without being judged, even
    // before its deadline.
    if !statements.iter().any(|s| s.round == 1) {
        return Decision::ForceComplete;
    }
    if debate.current_round > 1 && statements.is_empty() {
        return Decision::ForceComplete;
    }

    if let Some(deadline) = debate.round_deadline
        && deadline > now
    {
        return Decision::NotDue;
    }

    if debate.current_round >= debate.total_rounds {
        return Decision::Complete;
    }

    Decision::Advance {
        round: debate.current_round + 1,
        deadline: now + debate.round_duration(),
    }
}

/// Columns touched by a round transition. `None` leaves a column alone;
/// `Some(None)` clears a nullable one.
#[derive(AsChangeset, Default, Debug)]
#[diesel(table_name = debates)]
pub(crate) struct RoundTransition {
    status: Option<DebateStatus>,
    current_round: Option<i64>,
    round_deadline: Option<Option<NaiveDateTime>>,
    ended_at: Option<Option<NaiveDateTime>>,
    verdict_reached: Option<bool>,
    verdict_date: Option<Option<NaiveDateTime>>,
    verdict_requested_at: Option<Option<NaiveDateTime>>,
}

impl RoundTransition {
    pub(crate) fn force_complete(now: NaiveDateTime) -> Self {
        Self {
            status: Some(DebateStatus::Completed),
            round_deadline: Some(None),
            ended_at: Some(Some(now)),
            verdict_reached: Some(true),
            verdict_date: Some(Some(now)),
            ..Default::default()
        }
    }

    pub(crate) fn complete(now: NaiveDateTime) -> Self {
        Self {
            status: Some(DebateStatus::Completed),
            round_deadline: Some(None),
            ended_at: Some(Some(now)),
            verdict_requested_at: Some(Some(now)),
            ..Default::default()
        }
    }

    pub(crate) fn advance(round: i64, deadline: NaiveDateTime) -> Self {
        Self {
            current_round: Some(round),
            round_deadline: Some(Some(deadline)),
            ..Default::default()
        }
    }
}

/// Writes `transition` only if the debate is still active, in the same round
/// and with the same deadline as `debate`. Returns whether the write
/// happened.
pub(crate) fn write_if_unchanged(
    conn: &mut SqliteConnection,
    debate: &Debate,
    transition: &RoundTransition,
) -> QueryResult<bool> {
    let target = debates::table
        .filter(debates::id.eq(&debate.id))
        .filter(debates::status.eq(DebateStatus::Active))
        .filter(debates::current_round.eq(debate.current_round));

    let n = match debate.round_deadline {
        Some(deadline) => {
            diesel::update(target.filter(debates::round_deadline.eq(deadline)))
                .set(transition)
                .execute(conn)?
        }
        None => diesel::update(target.filter(debates::round_deadline.is_null()))
            .set(transition)
            .execute(conn)?,
    };

    Ok(n == 1)
}

pub fn apply(
    conn: &mut SqliteConnection,
    debate: &Debate,
    decision: Decision,
    now: NaiveDateTime,
) -> ArenaResult<AdvanceOutcome> {
    let (transition, outcome) = match decision {
        Decision::NotActive => {
            return Ok(AdvanceOutcome::NoOp(NoOpReason::NotActive));
        }
        Decision::NotDue => return Ok(AdvanceOutcome::NoOp(NoOpReason::NotDue)),
        Decision::ForceComplete => (
            RoundTransition::force_complete(now),
            AdvanceOutcome::Completed(Completion::Forfeit),
        ),
        Decision::Complete => (
            RoundTransition::complete(now),
            AdvanceOutcome::Completed(Completion::AwaitingVerdict),
        ),
        Decision::Advance { round, deadline } => (
            RoundTransition::advance(round, deadline),
            AdvanceOutcome::Advanced(round),
        ),
    };

    if write_if_unchanged(conn, debate, &transition)? {
        tracing::info!(debate = %debate.id, ?outcome, "debate transitioned");
        Ok(outcome)
    } else {
        tracing::debug!(debate = %debate.id, "debate changed underneath us");
        Ok(AdvanceOutcome::NoOp(NoOpReason::AlreadyHandled))
    }
}

/// Reads the debate and its statements and applies one step of the
/// advancement rules. Does not open a transaction of its own.
pub(crate) fn advance_in_tx(
    conn: &mut SqliteConnection,
    debate_id: &str,
    now: NaiveDateTime,
) -> ArenaResult<(Option<Debate>, AdvanceOutcome)> {
    let Some(debate) = Debate::fetch_optional(debate_id, conn)? else {
        return Ok((None, AdvanceOutcome::NoOp(NoOpReason::AlreadyHandled)));
    };
    let statements = Statement::of_debate(debate_id, conn)?;

    let decision = decide(&debate, &statements, now);
    let outcome = apply(conn, &debate, decision, now)?;
    Ok((Some(debate), outcome))
}

/// Applies one step of the advancement rules to a single debate.
#[tracing::instrument(skip(conn))]
pub fn advance_debate(
    conn: &mut SqliteConnection,
    debate_id: &str,
    now: NaiveDateTime,
) -> ArenaResult<AdvanceOutcome> {
    conn.immediate_transaction(|conn| {
        advance_in_tx(conn, debate_id, now).map(|(_, outcome)| outcome)
    })
}
