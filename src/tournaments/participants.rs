use chrono::NaiveDateTime;
use diesel::{prelude::*, sqlite::Sqlite};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ArenaError, ArenaResult},
    notify::TOURNAMENT_CREATION_FEATURE,
    schema::{tournament_participants, tournaments, users},
    sql_enum::text_enum,
    state::Services,
    tournaments::{
        Position, Tournament, TournamentFormat, TournamentStatus, bracket,
    },
    users::User,
};

text_enum! {
    pub enum ParticipantStatus {
        Registered => "REGISTERED",
        Active => "ACTIVE",
        Eliminated => "ELIMINATED",
    }
}

text_enum! {
    pub enum EliminationReason {
        /// Lost a single-elimination match.
        LostMatch => "lost_match",
        /// Lost a match, eliminated when the round closed.
        LostRound => "lost_round",
        LostFinal => "lost_final",
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = tournament_participants)]
#[diesel(check_for_backend(Sqlite))]
pub struct Participant {
    pub id: String,
    pub tournament_id: String,
    pub user_id: String,
    /// Lower is better. Provisional until the tournament starts.
    pub seed: i64,
    pub elo_at_start: Option<i64>,
    pub status: ParticipantStatus,
    pub wins: i64,
    pub selected_position: Option<Position>,
    pub registered_at: NaiveDateTime,
    pub eliminated_at: Option<NaiveDateTime>,
    pub elimination_round: Option<i64>,
    pub elimination_reason: Option<EliminationReason>,
}

impl Participant {
    pub fn fetch(
        participant_id: &str,
        conn: &mut SqliteConnection,
    ) -> ArenaResult<Participant> {
        tournament_participants::table
            .filter(tournament_participants::id.eq(participant_id))
            .select(Participant::as_select())
            .first(conn)
            .optional()?
            .ok_or(ArenaError::NotFound("participant"))
    }

    /// All participants of a tournament, best seed first.
    pub fn of_tournament(
        tournament_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<Participant>> {
        tournament_participants::table
            .filter(tournament_participants::tournament_id.eq(tournament_id))
            .order_by((
                tournament_participants::seed.asc(),
                tournament_participants::registered_at.asc(),
            ))
            .select(Participant::as_select())
            .load(conn)
    }

    pub fn is_active(&self) -> bool {
        self.status == ParticipantStatus::Active
    }

    /// Inserts a registration. Callers check eligibility first.
    pub(crate) fn register(
        conn: &mut SqliteConnection,
        tournament_id: &str,
        user_id: &str,
        seed: i64,
        position: Option<Position>,
        now: NaiveDateTime,
    ) -> QueryResult<Participant> {
        let participant = Participant {
            id: Uuid::now_v7().to_string(),
            tournament_id: tournament_id.to_string(),
            user_id: user_id.to_string(),
            seed,
            elo_at_start: None,
            status: ParticipantStatus::Registered,
            wins: 0,
            selected_position: position,
            registered_at: now,
            eliminated_at: None,
            elimination_round: None,
            elimination_reason: None,
        };

        diesel::insert_into(tournament_participants::table)
            .values((
                tournament_participants::id.eq(&participant.id),
                tournament_participants::tournament_id
                    .eq(&participant.tournament_id),
                tournament_participants::user_id.eq(&participant.user_id),
                tournament_participants::seed.eq(participant.seed),
                tournament_participants::status.eq(participant.status),
                tournament_participants::wins.eq(0),
                tournament_participants::selected_position.eq(position),
                tournament_participants::registered_at.eq(now),
            ))
            .execute(conn)?;

        Ok(participant)
    }

    pub(crate) fn eliminate(
        &self,
        conn: &mut SqliteConnection,
        round: i64,
        reason: EliminationReason,
        now: NaiveDateTime,
    ) -> QueryResult<bool> {
        let n = diesel::update(
            tournament_participants::table
                .filter(tournament_participants::id.eq(&self.id))
                .filter(
                    tournament_participants::status
                        .eq(ParticipantStatus::Active),
                ),
        )
        .set((
            tournament_participants::status.eq(ParticipantStatus::Eliminated),
            tournament_participants::eliminated_at.eq(now),
            tournament_participants::elimination_round.eq(round),
            tournament_participants::elimination_reason.eq(reason),
        ))
        .execute(conn)?;

        if n > 0 {
            tracing::info!(
                participant = %self.id,
                user = %self.user_id,
                round,
                %reason,
                "participant eliminated"
            );
        }
        Ok(n > 0)
    }
}

#[derive(Clone, Debug)]
pub struct JoinOutcome {
    pub participant: Participant,
    /// Whether this join filled the tournament and it was started.
    pub started: bool,
}

struct Registration {
    participant: Participant,
    opened: bool,
    full: bool,
    creator_id: String,
}

fn register_in_tx(
    conn: &mut SqliteConnection,
    tournament_id: &str,
    user_id: &str,
    position: Option<Position>,
    now: NaiveDateTime,
) -> ArenaResult<Registration> {
    let tournament = Tournament::fetch(tournament_id, conn)?;

    if !tournament.admits(user_id, conn)? {
        return Err(ArenaError::forbidden(
            "this tournament is private and you have not been invited",
        ));
    }
    if !tournament.accepts_registrations() {
        return Err(ArenaError::invalid_state(
            "this tournament is not accepting registrations",
        ));
    }

    let participants = Participant::of_tournament(tournament_id, conn)?;
    if participants.iter().any(|p| p.user_id == user_id) {
        return Err(ArenaError::AlreadyRegistered);
    }
    let count = participants.len() as i64;
    if count >= tournament.max_participants {
        return Err(ArenaError::TournamentFull);
    }

    let user = User::fetch(user_id, conn)?;
    if let Some(required) = tournament.min_elo
        && user.elo < required
    {
        return Err(ArenaError::EloTooLow {
            required,
            actual: user.elo,
        });
    }

    let position = if tournament.format == TournamentFormat::Championship {
        let side = position.ok_or(ArenaError::PositionRequired)?;
        let cap = tournament.max_participants / 2;
        let taken = participants
            .iter()
            .filter(|p| p.selected_position == Some(side))
            .count() as i64;
        if taken >= cap {
            return Err(ArenaError::PositionFull {
                side,
                suggested: side.other(),
            });
        }
        Some(side)
    } else {
        None
    };

    let participant = Participant::register(
        conn,
        tournament_id,
        user_id,
        count + 1,
        position,
        now,
    )?;

    let mut opened = false;
    if tournament.status == TournamentStatus::Upcoming {
        let n = diesel::update(
            tournaments::table
                .filter(tournaments::id.eq(tournament_id))
                .filter(tournaments::status.eq(TournamentStatus::Upcoming)),
        )
        .set(tournaments::status.eq(TournamentStatus::RegistrationOpen))
        .execute(conn)?;
        opened = n > 0;
    }

    Ok(Registration {
        participant,
        opened,
        full: count + 1 == tournament.max_participants,
        creator_id: tournament.creator_id,
    })
}

/// Registers a user for a tournament. The first registration after the
/// creator's opens the tournament; the registration which fills it starts it.
///
/// Starting is best-effort: if it fails the registration still stands and
/// the tournament can be started by hand.
#[tracing::instrument(skip(conn, services))]
pub fn join_tournament(
    conn: &mut SqliteConnection,
    services: &Services,
    tournament_id: &str,
    user_id: &str,
    position: Option<Position>,
) -> ArenaResult<JoinOutcome> {
    let now = services.now();

    let registration = conn.immediate_transaction(|conn| {
        register_in_tx(conn, tournament_id, user_id, position, now)
    })?;

    tracing::info!(
        seed = registration.participant.seed,
        "registered for tournament"
    );

    if registration.opened
        && let Err(e) = services
            .meter
            .record_usage(&registration.creator_id, TOURNAMENT_CREATION_FEATURE)
    {
        tracing::warn!(tournament = tournament_id, "{e}");
    }

    let mut started = false;
    if registration.full {
        match bracket::start_tournament(conn, services, tournament_id) {
            Ok(_) => started = true,
            Err(e) => tracing::warn!(
                tournament = tournament_id,
                "tournament is full but could not be started: {e}"
            ),
        }
    }

    Ok(JoinOutcome {
        participant: registration.participant,
        started,
    })
}

/// Captures every participant's current rating and reassigns seeds by it,
/// highest rating first (earlier registration breaks ties). Runs once, as
/// the tournament starts.
pub fn reseed(
    conn: &mut SqliteConnection,
    tournament_id: &str,
) -> ArenaResult<Vec<Participant>> {
    let rated: Vec<(Participant, i64)> = tournament_participants::table
        .inner_join(users::table)
        .filter(tournament_participants::tournament_id.eq(tournament_id))
        .select((Participant::as_select(), users::elo))
        .load(conn)?;

    let ordered = rated
        .into_iter()
        .sorted_by(|(a, a_elo), (b, b_elo)| {
            b_elo.cmp(a_elo).then(a.seed.cmp(&b.seed))
        })
        .enumerate()
        .map(|(i, (mut participant, elo))| {
            participant.seed = i as i64 + 1;
            participant.elo_at_start = Some(elo);
            participant
        })
        .collect::<Vec<_>>();

    for participant in &ordered {
        diesel::update(
            tournament_participants::table
                .filter(tournament_participants::id.eq(&participant.id)),
        )
        .set((
            tournament_participants::seed.eq(participant.seed),
            tournament_participants::elo_at_start.eq(participant.elo_at_start),
        ))
        .execute(conn)?;
    }

    tracing::debug!(
        tournament = tournament_id,
        n = ordered.len(),
        "participants reseeded"
    );

    Ok(ordered)
}
