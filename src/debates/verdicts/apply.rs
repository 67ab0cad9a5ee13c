use chrono::NaiveDateTime;
use diesel::{prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    debates::{AppealStatus, Debate, DebateStatus},
    error::{ArenaError, ArenaResult},
    notify::{Notification, NotificationKind},
    schema::{debate_verdicts, debates},
    state::Services,
    tournaments::bracket,
};

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = debate_verdicts)]
#[diesel(check_for_backend(Sqlite))]
pub struct Verdict {
    pub id: String,
    pub debate_id: String,
    pub judge_name: String,
    pub winner_id: Option<String>,
    pub challenger_score: i64,
    pub opponent_score: i64,
    pub reasoning: String,
    pub created_at: NaiveDateTime,
}

impl Verdict {
    pub fn of_debate(
        debate_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<Verdict>> {
        debate_verdicts::table
            .filter(debate_verdicts::debate_id.eq(debate_id))
            .order_by(debate_verdicts::created_at.asc())
            .select(Verdict::as_select())
            .load(conn)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JudgeScore {
    pub judge_name: String,
    pub winner_id: Option<String>,
    pub challenger_score: i64,
    pub opponent_score: i64,
    pub reasoning: String,
}

/// What the verdict generator decided.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerdictInput {
    /// `None` is a draw.
    pub winner_id: Option<String>,
    pub judges: Vec<JudgeScore>,
}

/// Records a verdict for a debate which is waiting for one, and resolves a
/// pending appeal if there is one. If the debate belongs to a tournament
/// match, the result is fed into the bracket.
#[tracing::instrument(skip(conn, services, input))]
pub fn apply_verdict(
    conn: &mut SqliteConnection,
    services: &Services,
    debate_id: &str,
    input: VerdictInput,
) -> ArenaResult<Debate> {
    let now = services.now();

    let debate = conn.immediate_transaction(|conn| {
        let debate = Debate::fetch(debate_id, conn)?;

        if !debate.awaiting_verdict() {
            return Err(ArenaError::invalid_state(
                "this debate is not waiting for a verdict",
            ));
        }
        if let Some(winner) = &input.winner_id
            && !debate.is_participant(winner)
        {
            return Err(ArenaError::validation(
                "the winner must be one of the debaters",
            ));
        }
        if input.judges.is_empty() {
            return Err(ArenaError::validation(
                "a verdict needs at least one judge",
            ));
        }

        let rows = input
            .judges
            .iter()
            .map(|judge| {
                (
                    debate_verdicts::id.eq(Uuid::now_v7().to_string()),
                    debate_verdicts::debate_id.eq(debate_id),
                    debate_verdicts::judge_name.eq(&judge.judge_name),
                    debate_verdicts::winner_id.eq(&judge.winner_id),
                    debate_verdicts::challenger_score
                        .eq(judge.challenger_score),
                    debate_verdicts::opponent_score.eq(judge.opponent_score),
                    debate_verdicts::reasoning.eq(&judge.reasoning),
                    debate_verdicts::created_at.eq(now),
                )
            })
            .collect::<Vec<_>>();
        diesel::insert_into(debate_verdicts::table)
            .values(&rows)
            .execute(conn)?;

        let target = debates::table
            .filter(debates::id.eq(debate_id))
            .filter(debates::status.eq(debate.status));
        let n = if debate.appeal_status == Some(AppealStatus::Pending) {
            diesel::update(target)
                .set((
                    debates::status.eq(DebateStatus::VerdictReady),
                    debates::winner_id.eq(&input.winner_id),
                    debates::verdict_reached.eq(true),
                    debates::verdict_date.eq(now),
                    debates::appeal_status.eq(AppealStatus::Resolved),
                    debates::appeal_resolved_at.eq(now),
                ))
                .execute(conn)?
        } else {
            diesel::update(target)
                .set((
                    debates::status.eq(DebateStatus::VerdictReady),
                    debates::winner_id.eq(&input.winner_id),
                    debates::verdict_reached.eq(true),
                    debates::verdict_date.eq(now),
                ))
                .execute(conn)?
        };
        if n == 0 {
            return Err(ArenaError::invalid_state(
                "this debate is not waiting for a verdict",
            ));
        }

        if let Some(match_id) = &debate.tournament_match_id {
            bracket::apply_match_outcome(
                conn,
                services,
                match_id,
                input.winner_id.as_deref(),
            )?;
        }

        Debate::fetch(debate_id, conn)
    })?;

    tracing::info!(
        debate = debate_id,
        winner = ?debate.winner_id,
        appeal = ?debate.appeal_status,
        "verdict recorded"
    );

    for user in debate.participants() {
        let message = match &debate.winner_id {
            Some(winner) if winner == user => "You won the debate.",
            Some(_) => "You lost the debate.",
            None => "The debate was judged a draw.",
        };
        let notification = Notification::new(
            user,
            NotificationKind::VerdictReady,
            "Verdict ready",
            message,
        )
        .debate(debate_id);
        if let Err(e) = services.notifier.notify(notification) {
            tracing::warn!(debate = debate_id, user, "{e}");
        }
    }

    Ok(debate)
}
