use chrono::{NaiveDateTime, TimeDelta};
use diesel::{prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ArenaError, ArenaResult},
    schema::debates,
    sql_enum::text_enum,
    validation::{is_valid_round_count, is_valid_round_duration},
};

pub mod advance;
pub mod appeals;
pub mod scheduler;
pub mod statements;
pub mod verdicts;

text_enum! {
    pub enum DebateStatus {
        Waiting => "WAITING",
        Active => "ACTIVE",
        Completed => "COMPLETED",
        VerdictReady => "VERDICT_READY",
        Appealed => "APPEALED",
    }
}

text_enum! {
    pub enum AppealStatus {
        Pending => "PENDING",
        Resolved => "RESOLVED",
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = debates)]
#[diesel(check_for_backend(Sqlite))]
pub struct Debate {
    pub id: String,
    pub topic: String,
    pub category: String,
    pub challenger_id: String,
    pub opponent_id: Option<String>,
    pub status: DebateStatus,
    pub current_round: i64,
    pub total_rounds: i64,
    pub round_duration_secs: i64,
    /// Set exactly when the debate is [`DebateStatus::Active`].
    pub round_deadline: Option<NaiveDateTime>,
    pub winner_id: Option<String>,
    pub verdict_reached: bool,
    pub verdict_date: Option<NaiveDateTime>,
    /// When a verdict was last asked for. Used to find debates whose verdict
    /// never arrived.
    pub verdict_requested_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub appeal_count: i64,
    pub appealed_by: Option<String>,
    pub appealed_at: Option<NaiveDateTime>,
    pub appeal_status: Option<AppealStatus>,
    pub appeal_resolved_at: Option<NaiveDateTime>,
    pub original_winner_id: Option<String>,
    pub appeal_reason: Option<String>,
    /// JSON list of the verdict ids the appeal disputes.
    pub appealed_statements: Option<String>,
    pub tournament_match_id: Option<String>,
}

impl Debate {
    #[tracing::instrument(skip(conn))]
    pub fn fetch(
        debate_id: &str,
        conn: &mut SqliteConnection,
    ) -> ArenaResult<Debate> {
        Self::fetch_optional(debate_id, conn)?
            .ok_or(ArenaError::NotFound("debate"))
    }

    pub fn fetch_optional(
        debate_id: &str,
        conn: &mut SqliteConnection,
    ) -> ArenaResult<Option<Debate>> {
        Ok(debates::table
            .filter(debates::id.eq(debate_id))
            .select(Debate::as_select())
            .first(conn)
            .optional()?)
    }

    pub fn round_duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.round_duration_secs)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.challenger_id == user_id
            || self.opponent_id.as_deref() == Some(user_id)
    }

    /// The other side of the debate from `user_id`'s point of view.
    pub fn other_side(&self, user_id: &str) -> Option<&str> {
        if self.challenger_id == user_id {
            self.opponent_id.as_deref()
        } else if self.opponent_id.as_deref() == Some(user_id) {
            Some(&self.challenger_id)
        } else {
            None
        }
    }

    pub fn participants(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.challenger_id.as_str())
            .chain(self.opponent_id.as_deref())
    }

    pub fn appealed_verdict_ids(&self) -> Vec<String> {
        self.appealed_statements
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    /// Whether the debate is waiting for the verdict generator, either after
    /// finishing normally or after an appeal.
    pub fn awaiting_verdict(&self) -> bool {
        match self.status {
            DebateStatus::Completed => !self.verdict_reached,
            DebateStatus::Appealed => {
                self.appeal_status == Some(AppealStatus::Pending)
            }
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewDebate {
    pub challenger_id: String,
    pub opponent_id: Option<String>,
    pub topic: String,
    pub category: String,
    pub total_rounds: i64,
    pub round_duration_secs: i64,
    pub tournament_match_id: Option<String>,
}

impl NewDebate {
    fn validate(&self) -> ArenaResult<()> {
        if self.topic.trim().is_empty() {
            return Err(ArenaError::validation("the topic must not be empty"));
        }
        is_valid_round_count(self.total_rounds)
            .map_err(ArenaError::Validation)?;
        is_valid_round_duration(self.round_duration_secs)
            .map_err(ArenaError::Validation)?;
        Ok(())
    }

    /// Inserts the debate. A debate which already has an opponent starts
    /// straight away; otherwise it waits for one to accept.
    pub(crate) fn insert(
        self,
        now: NaiveDateTime,
        conn: &mut SqliteConnection,
    ) -> ArenaResult<Debate> {
        self.validate()?;

        let id = Uuid::now_v7().to_string();
        let active = self.opponent_id.is_some();
        let (status, deadline, started_at) = if active {
            (
                DebateStatus::Active,
                Some(now + TimeDelta::seconds(self.round_duration_secs)),
                Some(now),
            )
        } else {
            (DebateStatus::Waiting, None, None)
        };

        diesel::insert_into(debates::table)
            .values((
                debates::id.eq(&id),
                debates::topic.eq(&self.topic),
                debates::category.eq(&self.category),
                debates::challenger_id.eq(&self.challenger_id),
                debates::opponent_id.eq(&self.opponent_id),
                debates::status.eq(status),
                debates::current_round.eq(1),
                debates::total_rounds.eq(self.total_rounds),
                debates::round_duration_secs.eq(self.round_duration_secs),
                debates::round_deadline.eq(deadline),
                debates::verdict_reached.eq(false),
                debates::created_at.eq(now),
                debates::started_at.eq(started_at),
                debates::appeal_count.eq(0),
                debates::tournament_match_id.eq(&self.tournament_match_id),
            ))
            .execute(conn)?;

        Debate::fetch(&id, conn)
    }
}

/// Opens a new debate which waits for an opponent.
#[tracing::instrument(skip(conn, new), fields(challenger = %new.challenger_id))]
pub fn create_debate(
    conn: &mut SqliteConnection,
    now: NaiveDateTime,
    new: NewDebate,
) -> ArenaResult<Debate> {
    if new.opponent_id.is_some() {
        return Err(ArenaError::validation(
            "an opponent joins by accepting the debate",
        ));
    }
    let debate = new.insert(now, conn)?;
    tracing::info!(debate = %debate.id, "debate created");
    Ok(debate)
}

/// The opponent accepts a waiting debate, which starts round one.
#[tracing::instrument(skip(conn))]
pub fn accept_debate(
    conn: &mut SqliteConnection,
    now: NaiveDateTime,
    debate_id: &str,
    opponent_id: &str,
) -> ArenaResult<Debate> {
    conn.immediate_transaction(|conn| {
        let debate = Debate::fetch(debate_id, conn)?;

        if debate.status != DebateStatus::Waiting {
            return Err(ArenaError::invalid_state(
                "this debate is not waiting for an opponent",
            ));
        }
        if debate.challenger_id == opponent_id {
            return Err(ArenaError::forbidden(
                "you cannot accept your own challenge",
            ));
        }

        let n = diesel::update(
            debates::table
                .filter(debates::id.eq(debate_id))
                .filter(debates::status.eq(DebateStatus::Waiting)),
        )
        .set((
            debates::opponent_id.eq(opponent_id),
            debates::status.eq(DebateStatus::Active),
            debates::started_at.eq(now),
            debates::round_deadline.eq(now + debate.round_duration()),
        ))
        .execute(conn)?;

        if n == 0 {
            return Err(ArenaError::invalid_state(
                "this debate is not waiting for an opponent",
            ));
        }

        tracing::info!(debate = debate_id, "debate accepted");
        Debate::fetch(debate_id, conn)
    })
}
