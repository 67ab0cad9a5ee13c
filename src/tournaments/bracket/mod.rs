//! Running a started tournament: generating rounds, recording match results,
//! eliminating participants and deciding when it is over.
//!
//! The functions here which take a connection but do not open a transaction
//! are meant to run inside one that the caller already holds (recording a
//! verdict, or the deadline sweep), so that the debate and the bracket move
//! together.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::{prelude::*, sqlite::Sqlite};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    debates::NewDebate,
    error::{ArenaError, ArenaResult},
    notify::{Notification, NotificationKind},
    schema::{
        tournament_matches, tournament_participants, tournament_rounds,
        tournaments,
    },
    sql_enum::text_enum,
    state::Services,
    tournaments::{
        Tournament, TournamentFormat, TournamentStatus,
        participants::{
            EliminationReason, Participant, ParticipantStatus, reseed,
        },
        prizes::{PrizeReport, distribute_prizes},
        rounds_for,
    },
};

pub mod pairing;

use pairing::{Entrant, Pairing, adjacent, championship_opening, fold_by_seed};

text_enum! {
    pub enum RoundStatus {
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = tournament_rounds)]
#[diesel(check_for_backend(Sqlite))]
pub struct Round {
    pub id: String,
    pub tournament_id: String,
    pub round_number: i64,
    pub status: RoundStatus,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

impl Round {
    pub fn fetch(
        round_id: &str,
        conn: &mut SqliteConnection,
    ) -> ArenaResult<Round> {
        tournament_rounds::table
            .filter(tournament_rounds::id.eq(round_id))
            .select(Round::as_select())
            .first(conn)
            .optional()?
            .ok_or(ArenaError::NotFound("round"))
    }

    pub fn of_tournament(
        tournament_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<Round>> {
        tournament_rounds::table
            .filter(tournament_rounds::tournament_id.eq(tournament_id))
            .order_by(tournament_rounds::round_number.asc())
            .select(Round::as_select())
            .load(conn)
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = tournament_matches)]
#[diesel(check_for_backend(Sqlite))]
pub struct BracketMatch {
    pub id: String,
    pub tournament_id: String,
    pub round_id: String,
    pub bracket_position: i64,
    pub participant1_id: String,
    /// `None` for a bye.
    pub participant2_id: Option<String>,
    pub debate_id: Option<String>,
    /// The winning user (not participant).
    pub winner_id: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
}

impl BracketMatch {
    pub fn fetch(
        match_id: &str,
        conn: &mut SqliteConnection,
    ) -> ArenaResult<BracketMatch> {
        tournament_matches::table
            .filter(tournament_matches::id.eq(match_id))
            .select(BracketMatch::as_select())
            .first(conn)
            .optional()?
            .ok_or(ArenaError::NotFound("match"))
    }

    pub fn of_round(
        round_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<BracketMatch>> {
        tournament_matches::table
            .filter(tournament_matches::round_id.eq(round_id))
            .order_by(tournament_matches::bracket_position.asc())
            .select(BracketMatch::as_select())
            .load(conn)
    }

    pub fn is_bye(&self) -> bool {
        self.participant2_id.is_none()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

fn entrant(participant: &Participant) -> Entrant {
    Entrant {
        participant_id: participant.id.clone(),
        seed: participant.seed,
        position: participant.selected_position,
    }
}

/// Inserts a round and its matches, with an active debate for each match
/// that is not a bye. Byes are resolved on the spot.
fn generate_round(
    conn: &mut SqliteConnection,
    tournament: &Tournament,
    round_number: i64,
    pairings: Vec<Pairing>,
    now: NaiveDateTime,
) -> ArenaResult<Round> {
    let round = Round {
        id: Uuid::now_v7().to_string(),
        tournament_id: tournament.id.clone(),
        round_number,
        status: RoundStatus::InProgress,
        started_at: now,
        completed_at: None,
    };
    diesel::insert_into(tournament_rounds::table)
        .values((
            tournament_rounds::id.eq(&round.id),
            tournament_rounds::tournament_id.eq(&round.tournament_id),
            tournament_rounds::round_number.eq(round.round_number),
            tournament_rounds::status.eq(round.status),
            tournament_rounds::started_at.eq(round.started_at),
        ))
        .execute(conn)?;

    let participants: HashMap<String, Participant> =
        Participant::of_tournament(&tournament.id, conn)?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
    let lookup = |id: &str| {
        participants
            .get(id)
            .ok_or(ArenaError::NotFound("participant"))
    };

    for (position, pairing) in (1_i64..).zip(&pairings) {
        let match_id = Uuid::now_v7().to_string();
        let first = lookup(pairing.first.as_str())?;
        let second = pairing.second.as_deref().map(lookup).transpose()?;

        diesel::insert_into(tournament_matches::table)
            .values((
                tournament_matches::id.eq(&match_id),
                tournament_matches::tournament_id.eq(&tournament.id),
                tournament_matches::round_id.eq(&round.id),
                tournament_matches::bracket_position.eq(position),
                tournament_matches::participant1_id.eq(&first.id),
                tournament_matches::participant2_id
                    .eq(second.map(|p| p.id.as_str())),
                // a bye is won as soon as it is drawn
                tournament_matches::winner_id
                    .eq(second.is_none().then_some(first.user_id.as_str())),
                tournament_matches::resolved_at
                    .eq(second.is_none().then_some(now)),
            ))
            .execute(conn)?;

        let Some(second) = second else {
            tracing::debug!(participant = %first.id, round_number, "bye");
            continue;
        };

        let debate = NewDebate {
            challenger_id: first.user_id.clone(),
            opponent_id: Some(second.user_id.clone()),
            topic: format!("{}: round {round_number}", tournament.name),
            category: "tournament".to_string(),
            total_rounds: tournament.debate_rounds,
            round_duration_secs: tournament.round_duration_secs,
            tournament_match_id: Some(match_id.clone()),
        }
        .insert(now, conn)?;

        diesel::update(
            tournament_matches::table
                .filter(tournament_matches::id.eq(&match_id)),
        )
        .set(tournament_matches::debate_id.eq(&debate.id))
        .execute(conn)?;
    }

    tracing::info!(
        tournament = %tournament.id,
        round_number,
        matches = pairings.len(),
        "round generated"
    );

    Ok(round)
}

fn start_in_tx(
    conn: &mut SqliteConnection,
    tournament_id: &str,
    now: NaiveDateTime,
) -> ArenaResult<(Tournament, Vec<Participant>)> {
    let tournament = Tournament::fetch(tournament_id, conn)?;

    if tournament.status != TournamentStatus::RegistrationOpen {
        return Err(ArenaError::invalid_state(
            "only a tournament which is open for registration can be started",
        ));
    }
    if tournament.participant_count(conn)? < 2 {
        return Err(ArenaError::invalid_state(
            "at least two participants are needed to start a tournament",
        ));
    }

    let participants = reseed(conn, tournament_id)?;

    diesel::update(
        tournament_participants::table
            .filter(tournament_participants::tournament_id.eq(tournament_id)),
    )
    .set(tournament_participants::status.eq(ParticipantStatus::Active))
    .execute(conn)?;

    let n = diesel::update(
        tournaments::table
            .filter(tournaments::id.eq(tournament_id))
            .filter(tournaments::status.eq(TournamentStatus::RegistrationOpen)),
    )
    .set((
        tournaments::status.eq(TournamentStatus::InProgress),
        tournaments::started_at.eq(now),
        tournaments::current_round.eq(1),
        tournaments::total_rounds.eq(rounds_for(participants.len())),
    ))
    .execute(conn)?;
    if n == 0 {
        return Err(ArenaError::invalid_state(
            "this tournament has already started",
        ));
    }

    let tournament = Tournament::fetch(tournament_id, conn)?;
    let entrants = participants.iter().map(entrant).collect::<Vec<_>>();
    let pairings = match tournament.format {
        TournamentFormat::Championship => championship_opening(entrants),
        TournamentFormat::SingleElimination
        | TournamentFormat::KingOfTheHill => fold_by_seed(entrants),
    };
    generate_round(conn, &tournament, 1, pairings, now)?;

    Ok((tournament, participants))
}

/// Starts a tournament: reseeds by rating, activates every participant and
/// draws the first round.
#[tracing::instrument(skip(conn, services))]
pub fn start_tournament(
    conn: &mut SqliteConnection,
    services: &Services,
    tournament_id: &str,
) -> ArenaResult<Tournament> {
    let now = services.now();
    let (tournament, participants) = conn.immediate_transaction(|conn| {
        start_in_tx(conn, tournament_id, now)
    })?;

    tracing::info!(
        participants = participants.len(),
        total_rounds = tournament.total_rounds,
        "tournament started"
    );

    for participant in &participants {
        let notification = Notification::new(
            &participant.user_id,
            NotificationKind::TournamentStarted,
            "Tournament started",
            format!(
                "{} has started. You are seeded {}.",
                tournament.name, participant.seed
            ),
        )
        .tournament(&tournament.id);
        if let Err(e) = services.notifier.notify(notification) {
            tracing::warn!(user = %participant.user_id, "{e}");
        }
    }

    Ok(tournament)
}

/// What happened to the round a match belonged to once its result was in.
#[derive(Debug)]
pub enum RoundClose {
    /// Other matches of the round are still being played.
    Open,
    /// The round closed and the next one was drawn.
    NextRound(i64),
    /// The round closed and so did the tournament.
    Completed(PrizeReport),
}

#[derive(Debug)]
pub enum MatchOutcome {
    AlreadyResolved,
    Recorded {
        /// The winning user.
        winner_id: String,
        round: RoundClose,
    },
}

/// Applies the result of a match's debate to the bracket. `None` (a draw, or
/// a debate nobody took part in) goes to the better seed.
///
/// Does not open a transaction; the caller applies the verdict and the
/// outcome together.
#[tracing::instrument(skip(conn, services))]
pub fn apply_match_outcome(
    conn: &mut SqliteConnection,
    services: &Services,
    match_id: &str,
    winner_user_id: Option<&str>,
) -> ArenaResult<MatchOutcome> {
    let now = services.now();
    let bracket_match = BracketMatch::fetch(match_id, conn)?;

    if bracket_match.is_resolved() {
        tracing::debug!("match already resolved");
        return Ok(MatchOutcome::AlreadyResolved);
    }
    let Some(second_id) = &bracket_match.participant2_id else {
        return Ok(MatchOutcome::AlreadyResolved);
    };

    let tournament = Tournament::fetch(&bracket_match.tournament_id, conn)?;
    if tournament.status != TournamentStatus::InProgress {
        return Err(ArenaError::invalid_state(
            "this tournament is not in progress",
        ));
    }

    let first = Participant::fetch(&bracket_match.participant1_id, conn)?;
    let second = Participant::fetch(second_id, conn)?;
    let (winner, loser) = match winner_user_id {
        Some(user) if user == first.user_id => (first, second),
        Some(user) if user == second.user_id => (second, first),
        Some(_) => {
            return Err(ArenaError::validation(
                "the winner must be one of the match's participants",
            ));
        }
        None if second.seed < first.seed => (second, first),
        None => (first, second),
    };

    let n = diesel::update(
        tournament_matches::table
            .filter(tournament_matches::id.eq(match_id))
            .filter(tournament_matches::resolved_at.is_null()),
    )
    .set((
        tournament_matches::winner_id.eq(&winner.user_id),
        tournament_matches::resolved_at.eq(now),
    ))
    .execute(conn)?;
    if n == 0 {
        return Ok(MatchOutcome::AlreadyResolved);
    }

    diesel::update(
        tournament_participants::table
            .filter(tournament_participants::id.eq(&winner.id)),
    )
    .set(tournament_participants::wins.eq(tournament_participants::wins + 1))
    .execute(conn)?;

    let round = Round::fetch(&bracket_match.round_id, conn)?;
    match tournament.format {
        TournamentFormat::SingleElimination => {
            loser.eliminate(
                conn,
                round.round_number,
                EliminationReason::LostMatch,
                now,
            )?;
        }
        TournamentFormat::KingOfTheHill
            if round.round_number >= tournament.total_rounds =>
        {
            loser.eliminate(
                conn,
                tournament.total_rounds,
                EliminationReason::LostFinal,
                now,
            )?;
        }
        TournamentFormat::KingOfTheHill => {}
        TournamentFormat::Championship => {
            if loser.seed < winner.seed {
                swap_seeds(conn, &winner, &loser)?;
            }
        }
    }

    tracing::info!(
        winner = %winner.user_id,
        loser = %loser.user_id,
        decided = winner_user_id.is_some(),
        "match resolved"
    );

    let round = close_round_if_resolved(conn, services, &tournament, &round)?;

    Ok(MatchOutcome::Recorded {
        winner_id: winner.user_id,
        round,
    })
}

fn swap_seeds(
    conn: &mut SqliteConnection,
    winner: &Participant,
    loser: &Participant,
) -> QueryResult<()> {
    for (participant, seed) in [(winner, loser.seed), (loser, winner.seed)] {
        diesel::update(
            tournament_participants::table
                .filter(tournament_participants::id.eq(&participant.id)),
        )
        .set(tournament_participants::seed.eq(seed))
        .execute(conn)?;
    }
    tracing::debug!(
        winner = %winner.id,
        from = winner.seed,
        to = loser.seed,
        "seed taken from the loser"
    );
    Ok(())
}

fn close_round_if_resolved(
    conn: &mut SqliteConnection,
    services: &Services,
    tournament: &Tournament,
    round: &Round,
) -> ArenaResult<RoundClose> {
    let now = services.now();
    let matches = BracketMatch::of_round(&round.id, conn)?;
    if !matches.iter().all(BracketMatch::is_resolved) {
        return Ok(RoundClose::Open);
    }

    let n = diesel::update(
        tournament_rounds::table
            .filter(tournament_rounds::id.eq(&round.id))
            .filter(tournament_rounds::status.eq(RoundStatus::InProgress)),
    )
    .set((
        tournament_rounds::status.eq(RoundStatus::Completed),
        tournament_rounds::completed_at.eq(now),
    ))
    .execute(conn)?;
    if n == 0 {
        return Ok(RoundClose::Open);
    }

    // losers who were kept in until the round was over
    let by_id: HashMap<String, Participant> =
        Participant::of_tournament(&tournament.id, conn)?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
    for m in matches.iter().filter(|m| !m.is_bye()) {
        let loser = [Some(&m.participant1_id), m.participant2_id.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|id| by_id.get(id))
            .find(|p| m.winner_id.as_deref() != Some(p.user_id.as_str()));
        if let Some(loser) = loser
            && loser.is_active()
        {
            loser.eliminate(
                conn,
                round.round_number,
                EliminationReason::LostRound,
                now,
            )?;
        }
    }

    let participants = Participant::of_tournament(&tournament.id, conn)?;
    let active = participants.iter().filter(|p| p.is_active()).count();
    tracing::info!(
        tournament = %tournament.id,
        round = round.round_number,
        remaining = active,
        "round closed"
    );

    if active <= 1 || round.round_number >= tournament.total_rounds {
        let report = complete_tournament(conn, services, tournament)?;
        return Ok(RoundClose::Completed(report));
    }

    let by_user: HashMap<&str, &Participant> = participants
        .iter()
        .filter(|p| p.is_active())
        .map(|p| (p.user_id.as_str(), p))
        .collect();
    let survivors = matches
        .iter()
        .sorted_by_key(|m| m.bracket_position)
        .filter_map(|m| by_user.get(m.winner_id.as_deref()?))
        .map(|p| entrant(p))
        .collect::<Vec<_>>();

    let next = round.round_number + 1;
    generate_round(conn, tournament, next, adjacent(survivors), now)?;

    diesel::update(
        tournaments::table
            .filter(tournaments::id.eq(&tournament.id))
            .filter(tournaments::status.eq(TournamentStatus::InProgress))
            .filter(tournaments::current_round.eq(round.round_number)),
    )
    .set(tournaments::current_round.eq(next))
    .execute(conn)?;

    Ok(RoundClose::NextRound(next))
}

/// Marks the tournament completed and pays out, once: the status change is
/// conditional, so only the first caller gets to distribute the prizes.
fn complete_tournament(
    conn: &mut SqliteConnection,
    services: &Services,
    tournament: &Tournament,
) -> ArenaResult<PrizeReport> {
    let n = diesel::update(
        tournaments::table
            .filter(tournaments::id.eq(&tournament.id))
            .filter(tournaments::status.eq(TournamentStatus::InProgress)),
    )
    .set((
        tournaments::status.eq(TournamentStatus::Completed),
        tournaments::ended_at.eq(services.now()),
    ))
    .execute(conn)?;
    if n == 0 {
        return Ok(PrizeReport::default());
    }

    tracing::info!(tournament = %tournament.id, "tournament completed");

    let tournament = Tournament::fetch(&tournament.id, conn)?;
    distribute_prizes(conn, services, &tournament)
}
