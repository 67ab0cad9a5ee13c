use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{ArenaError, ArenaResult},
    schema::{tournament_invites, tournaments},
    tournaments::{
        Position, Tournament, TournamentFormat, TournamentStatus,
        participants::Participant, prizes::Distribution,
    },
    users::User,
    validation::{
        is_valid_participant_limit, is_valid_round_count,
        is_valid_round_duration, is_valid_tournament_name,
    },
};

#[derive(Deserialize, Clone, Debug)]
pub struct TournamentSettings {
    pub name: String,
    pub format: TournamentFormat,
    pub max_participants: i64,
    #[serde(default)]
    pub min_elo: Option<i64>,
    #[serde(default)]
    pub prize_pool: i64,
    #[serde(default)]
    pub prize_distribution: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub invitees: Vec<String>,
    pub debate_rounds: i64,
    pub round_duration_secs: i64,
    /// The side the creator argues. Championships only.
    #[serde(default)]
    pub creator_position: Option<Position>,
}

impl TournamentSettings {
    fn validate(&self) -> ArenaResult<()> {
        is_valid_tournament_name(&self.name).map_err(ArenaError::Validation)?;
        is_valid_participant_limit(
            self.max_participants,
            self.format == TournamentFormat::Championship,
        )
        .map_err(ArenaError::Validation)?;
        is_valid_round_count(self.debate_rounds)
            .map_err(ArenaError::Validation)?;
        is_valid_round_duration(self.round_duration_secs)
            .map_err(ArenaError::Validation)?;

        if self.prize_pool < 0 {
            return Err(ArenaError::validation(
                "the prize pool must not be negative",
            ));
        }
        if let Some(min_elo) = self.min_elo
            && min_elo < 0
        {
            return Err(ArenaError::validation(
                "the minimum rating must not be negative",
            ));
        }
        if let Some(json) = &self.prize_distribution {
            Distribution::parse(json).map_err(ArenaError::Validation)?;
        }
        if self.format == TournamentFormat::Championship
            && self.creator_position.is_none()
        {
            return Err(ArenaError::PositionRequired);
        }
        Ok(())
    }
}

/// Creates a tournament with its creator registered as the first seed.
#[tracing::instrument(skip(conn, settings), fields(name = %settings.name))]
pub fn create_tournament(
    conn: &mut SqliteConnection,
    now: NaiveDateTime,
    creator_id: &str,
    settings: TournamentSettings,
) -> ArenaResult<Tournament> {
    settings.validate()?;

    let tournament = conn.immediate_transaction(|conn| {
        User::fetch(creator_id, conn)?;

        let tid = Uuid::now_v7().to_string();
        diesel::insert_into(tournaments::table)
            .values((
                tournaments::id.eq(&tid),
                tournaments::name.eq(settings.name.trim()),
                tournaments::creator_id.eq(creator_id),
                tournaments::format.eq(settings.format),
                tournaments::status.eq(TournamentStatus::Upcoming),
                tournaments::max_participants.eq(settings.max_participants),
                tournaments::current_round.eq(0),
                tournaments::total_rounds.eq(0),
                tournaments::min_elo.eq(settings.min_elo),
                tournaments::prize_pool.eq(settings.prize_pool),
                tournaments::prize_distribution
                    .eq(&settings.prize_distribution),
                tournaments::is_private.eq(settings.is_private),
                tournaments::debate_rounds.eq(settings.debate_rounds),
                tournaments::round_duration_secs
                    .eq(settings.round_duration_secs),
                tournaments::created_at.eq(now),
            ))
            .execute(conn)?;

        let invites = settings
            .invitees
            .iter()
            .filter(|user_id| user_id.as_str() != creator_id)
            .map(|user_id| {
                (
                    tournament_invites::id.eq(Uuid::now_v7().to_string()),
                    tournament_invites::tournament_id.eq(&tid),
                    tournament_invites::user_id.eq(user_id),
                )
            })
            .collect::<Vec<_>>();
        if !invites.is_empty() {
            diesel::insert_or_ignore_into(tournament_invites::table)
                .values(&invites)
                .execute(conn)?;
        }

        let position = match settings.format {
            TournamentFormat::Championship => settings.creator_position,
            _ => None,
        };
        Participant::register(conn, &tid, creator_id, 1, position, now)?;

        Tournament::fetch(&tid, conn)
    })?;

    tracing::info!(
        tournament = %tournament.id,
        format = %tournament.format,
        "tournament created"
    );

    Ok(tournament)
}
