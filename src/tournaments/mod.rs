use chrono::{NaiveDateTime, TimeDelta};
use diesel::{prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ArenaError, ArenaResult},
    schema::{tournament_invites, tournament_participants, tournaments},
    sql_enum::text_enum,
};

pub mod bracket;
pub mod create;
pub mod participants;
pub mod prizes;
pub mod standings;

text_enum! {
    pub enum TournamentFormat {
        SingleElimination => "SINGLE_ELIMINATION",
        KingOfTheHill => "KING_OF_THE_HILL",
        /// Every debater argues a fixed side, and seeds move with results.
        Championship => "CHAMPIONSHIP",
    }
}

text_enum! {
    pub enum TournamentStatus {
        /// Created, but nobody other than the creator has joined.
        Upcoming => "UPCOMING",
        RegistrationOpen => "REGISTRATION_OPEN",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
    }
}

text_enum! {
    /// The side a debater argues for the whole of a championship.
    pub enum Position {
        Pro => "PRO",
        Con => "CON",
    }
}

impl Position {
    pub fn other(self) -> Position {
        match self {
            Position::Pro => Position::Con,
            Position::Con => Position::Pro,
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = tournaments)]
#[diesel(check_for_backend(Sqlite))]
pub struct Tournament {
    pub id: String,
    pub name: String,
    pub creator_id: String,
    pub format: TournamentFormat,
    pub status: TournamentStatus,
    pub max_participants: i64,
    pub current_round: i64,
    /// Zero until the tournament starts.
    pub total_rounds: i64,
    pub min_elo: Option<i64>,
    pub prize_pool: i64,
    /// JSON object of place label to percentage.
    pub prize_distribution: Option<String>,
    pub is_private: bool,
    /// Rounds in each match debate.
    pub debate_rounds: i64,
    pub round_duration_secs: i64,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
}

impl Tournament {
    #[tracing::instrument(skip(conn))]
    pub fn fetch(
        tournament_id: &str,
        conn: &mut SqliteConnection,
    ) -> ArenaResult<Tournament> {
        tournaments::table
            .filter(tournaments::id.eq(tournament_id))
            .select(Tournament::as_select())
            .first(conn)
            .optional()?
            .ok_or(ArenaError::NotFound("tournament"))
    }

    pub fn accepts_registrations(&self) -> bool {
        matches!(
            self.status,
            TournamentStatus::Upcoming | TournamentStatus::RegistrationOpen
        )
    }

    pub fn round_duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.round_duration_secs)
    }

    /// Whether `user_id` may see (and join) this tournament.
    pub fn admits(
        &self,
        user_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<bool> {
        if !self.is_private || self.creator_id == user_id {
            return Ok(true);
        }

        diesel::select(diesel::dsl::exists(
            tournament_invites::table
                .filter(tournament_invites::tournament_id.eq(&self.id))
                .filter(tournament_invites::user_id.eq(user_id)),
        ))
        .get_result(conn)
    }

    pub fn participant_count(
        &self,
        conn: &mut SqliteConnection,
    ) -> QueryResult<i64> {
        tournament_participants::table
            .filter(tournament_participants::tournament_id.eq(&self.id))
            .count()
            .get_result(conn)
    }
}

/// Rounds needed for a single-elimination bracket of `n` participants.
pub fn rounds_for(n: usize) -> i64 {
    n.max(1).next_power_of_two().trailing_zeros() as i64
}
