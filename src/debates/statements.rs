use chrono::NaiveDateTime;
use diesel::{prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    debates::{
        Debate, DebateStatus,
        advance::{RoundTransition, write_if_unchanged},
        verdicts::JobReason,
    },
    error::{ArenaError, ArenaResult},
    schema::debate_statements,
    state::Services,
    validation::is_valid_statement,
};

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = debate_statements)]
#[diesel(check_for_backend(Sqlite))]
pub struct Statement {
    pub id: String,
    pub debate_id: String,
    pub author_id: String,
    pub round: i64,
    pub content: String,
    pub created_at: NaiveDateTime,
}

impl Statement {
    pub fn of_debate(
        debate_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<Statement>> {
        debate_statements::table
            .filter(debate_statements::debate_id.eq(debate_id))
            .order_by((
                debate_statements::round.asc(),
                debate_statements::created_at.asc(),
            ))
            .select(Statement::as_select())
            .load(conn)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The other side has not submitted for this round yet.
    Waiting,
    /// Both sides submitted, so the next round started early.
    RoundAdvanced(i64),
    /// Both sides submitted the final round.
    DebateCompleted,
}

/// Records a participant's statement for the current round. Once both sides
/// have spoken the debate moves on without waiting for the deadline.
#[tracing::instrument(skip(conn, services, content))]
pub fn submit_statement(
    conn: &mut SqliteConnection,
    services: &Services,
    debate_id: &str,
    author_id: &str,
    content: &str,
) -> ArenaResult<(Statement, SubmitOutcome)> {
    is_valid_statement(content).map_err(ArenaError::Validation)?;
    let now = services.now();

    let (statement, outcome) = conn.immediate_transaction(|conn| {
        let debate = Debate::fetch(debate_id, conn)?;

        if debate.status != DebateStatus::Active {
            return Err(ArenaError::invalid_state(
                "statements can only be submitted to an active debate",
            ));
        }
        if !debate.is_participant(author_id) {
            return Err(ArenaError::forbidden(
                "only the debaters may submit statements",
            ));
        }
        if let Some(deadline) = debate.round_deadline
            && deadline <= now
        {
            return Err(ArenaError::invalid_state(
                "the deadline for this round has passed",
            ));
        }

        let existing = Statement::of_debate(debate_id, conn)?;
        if existing.iter().any(|s| {
            s.author_id == author_id && s.round == debate.current_round
        }) {
            return Err(ArenaError::StatementExists);
        }

        let statement = Statement {
            id: Uuid::now_v7().to_string(),
            debate_id: debate_id.to_string(),
            author_id: author_id.to_string(),
            round: debate.current_round,
            content: content.trim().to_string(),
            created_at: now,
        };
        diesel::insert_into(debate_statements::table)
            .values((
                debate_statements::id.eq(&statement.id),
                debate_statements::debate_id.eq(&statement.debate_id),
                debate_statements::author_id.eq(&statement.author_id),
                debate_statements::round.eq(statement.round),
                debate_statements::content.eq(&statement.content),
                debate_statements::created_at.eq(statement.created_at),
            ))
            .execute(conn)?;

        let both_spoken = debate.participants().all(|p| {
            p == author_id
                || existing
                    .iter()
                    .any(|s| {
                        s.author_id == p && s.round == debate.current_round
                    })
        });
        if !both_spoken {
            return Ok((statement, SubmitOutcome::Waiting));
        }

        let (transition, outcome) =
            if debate.current_round >= debate.total_rounds {
                (RoundTransition::complete(now), SubmitOutcome::DebateCompleted)
            } else {
                let round = debate.current_round + 1;
                (
                    RoundTransition::advance(
                        round,
                        now + debate.round_duration(),
                    ),
                    SubmitOutcome::RoundAdvanced(round),
                )
            };

        if write_if_unchanged(conn, &debate, &transition)? {
            Ok((statement, outcome))
        } else {
            Ok((statement, SubmitOutcome::Waiting))
        }
    })?;

    tracing::info!(
        debate = debate_id,
        round = statement.round,
        ?outcome,
        "statement submitted"
    );

    if outcome == SubmitOutcome::DebateCompleted
        && let Err(e) = services.verdicts.submit(debate_id, JobReason::Finished)
    {
        tracing::warn!(
            debate = debate_id,
            "could not request a verdict, the follow-up sweep will retry: {e}"
        );
    }

    Ok((statement, outcome))
}
