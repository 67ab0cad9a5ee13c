use chrono::TimeDelta;
use diesel::prelude::*;
use proptest::prelude::*;

use crate::{
    debates::{DebateStatus, scheduler::Scheduler, verdicts::apply_verdict},
    error::{ArenaError, ArenaResult, ErrorKind},
    notify::{NotificationKind, TOURNAMENT_CREATION_FEATURE},
    schema::tournament_matches,
    test::{Harness, verdict},
    tournaments::{
        Position, Tournament, TournamentFormat, TournamentStatus,
        bracket::{BracketMatch, Round, start_tournament},
        create::{TournamentSettings, create_tournament},
        participants::{
            EliminationReason, JoinOutcome, Participant, ParticipantStatus,
            join_tournament,
        },
    },
    users::User,
};

pub(super) fn settings(
    format: TournamentFormat,
    max: i64,
) -> TournamentSettings {
    TournamentSettings {
        name: "Spring Open".to_string(),
        format,
        max_participants: max,
        min_elo: None,
        prize_pool: 0,
        prize_distribution: None,
        is_private: false,
        invitees: vec![],
        debate_rounds: 1,
        round_duration_secs: 3600,
        creator_position: (format == TournamentFormat::Championship)
            .then_some(Position::Pro),
    }
}

pub(super) fn create(
    h: &Harness,
    creator: &User,
    settings: TournamentSettings,
) -> Tournament {
    h.with_conn(|conn| create_tournament(conn, h.now(), &creator.id, settings))
        .unwrap()
}

pub(super) fn join(
    h: &Harness,
    tournament_id: &str,
    user: &User,
    position: Option<Position>,
) -> ArenaResult<JoinOutcome> {
    h.with_conn(|conn| {
        join_tournament(conn, &h.services, tournament_id, &user.id, position)
    })
}

pub(super) fn fetch(h: &Harness, tournament_id: &str) -> Tournament {
    h.with_conn(|conn| Tournament::fetch(tournament_id, conn)).unwrap()
}

pub(super) fn participants(
    h: &Harness,
    tournament_id: &str,
) -> Vec<Participant> {
    h.with_conn(|conn| Participant::of_tournament(tournament_id, conn))
        .unwrap()
}

pub(super) fn participant_of(
    h: &Harness,
    tournament_id: &str,
    user: &User,
) -> Participant {
    participants(h, tournament_id)
        .into_iter()
        .find(|p| p.user_id == user.id)
        .unwrap()
}

/// Fills a tournament. Returns the players best rated first, which is their
/// seed order once the tournament has started. The creator is rated lowest.
pub(super) fn full_tournament(
    h: &Harness,
    settings: TournamentSettings,
) -> (Tournament, Vec<User>) {
    let n = settings.max_participants;
    let users = (0..n)
        .map(|i| h.user(&format!("player{i}"), 2000 - 50 * i))
        .collect::<Vec<_>>();
    let (creator, others) = users.split_last().unwrap();

    let tournament = create(h, creator, settings);
    for (i, user) in others.iter().enumerate() {
        let position = match tournament.format {
            TournamentFormat::Championship if i % 2 == 0 => Some(Position::Con),
            TournamentFormat::Championship => Some(Position::Pro),
            _ => None,
        };
        join(h, &tournament.id, user, position).unwrap();
    }

    (fetch(h, &tournament.id), users)
}

pub(super) fn open_matches(
    h: &Harness,
    tournament_id: &str,
) -> Vec<BracketMatch> {
    h.with_conn(|conn| {
        tournament_matches::table
            .filter(tournament_matches::tournament_id.eq(tournament_id))
            .filter(tournament_matches::resolved_at.is_null())
            .order_by(tournament_matches::bracket_position.asc())
            .select(BracketMatch::as_select())
            .load(conn)
    })
    .unwrap()
}

/// Both sides speak, then the verdict goes to participant 1 if `first_wins`.
/// Returns the winning user.
pub(super) fn play(h: &Harness, m: &BracketMatch, first_wins: bool) -> String {
    let debate = h.debate(m.debate_id.as_deref().unwrap());
    let opponent = debate.opponent_id.clone().unwrap();
    h.say(&debate.id, &debate.challenger_id);
    h.say(&debate.id, &opponent);

    let winner = if first_wins {
        debate.challenger_id.clone()
    } else {
        opponent
    };
    h.with_conn(|conn| {
        apply_verdict(conn, &h.services, &debate.id, verdict(Some(&winner)))
    })
    .unwrap();
    winner
}

pub(super) fn play_out(
    h: &Harness,
    tournament_id: &str,
    mut first_wins: impl FnMut() -> bool,
) {
    for _ in 0..16 {
        let open = open_matches(h, tournament_id);
        if open.is_empty() {
            return;
        }
        for m in &open {
            play(h, m, first_wins());
        }
    }
    panic!("tournament did not finish");
}

#[test]
fn creator_is_the_first_seed() {
    let h = Harness::new();
    let creator = h.user("creator", 1500);
    let t =
        create(&h, &creator, settings(TournamentFormat::SingleElimination, 4));

    assert_eq!(t.status, TournamentStatus::Upcoming);
    let all = participants(&h, &t.id);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].user_id, creator.id);
    assert_eq!(all[0].seed, 1);
    assert_eq!(all[0].status, ParticipantStatus::Registered);
    assert!(h.meter.recorded.lock().unwrap().is_empty());
}

#[test]
fn settings_are_validated() {
    let h = Harness::new();
    let creator = h.user("creator", 1500);
    let attempt = |settings: TournamentSettings| {
        h.with_conn(|conn| {
            create_tournament(conn, h.now(), &creator.id, settings)
        })
    };

    let mut odd = settings(TournamentFormat::Championship, 5);
    assert_eq!(attempt(odd.clone()).unwrap_err().kind(), ErrorKind::Validation);
    odd.max_participants = 6;
    odd.creator_position = None;
    assert!(matches!(attempt(odd), Err(ArenaError::PositionRequired)));

    let mut bad_prizes = settings(TournamentFormat::SingleElimination, 4);
    bad_prizes.prize_distribution =
        Some(r#"{"1st": 90, "2nd": 20}"#.to_string());
    assert_eq!(
        attempt(bad_prizes).unwrap_err().kind(),
        ErrorKind::Validation
    );

    let mut too_big = settings(TournamentFormat::KingOfTheHill, 65);
    assert_eq!(
        attempt(too_big.clone()).unwrap_err().kind(),
        ErrorKind::Validation
    );
    too_big.max_participants = 64;
    too_big.name = "abc".to_string();
    assert_eq!(attempt(too_big).unwrap_err().kind(), ErrorKind::Validation);
}

#[test]
fn first_join_opens_registration() {
    let h = Harness::new();
    let creator = h.user("creator", 1500);
    let t =
        create(&h, &creator, settings(TournamentFormat::SingleElimination, 4));

    let first = join(&h, &t.id, &h.user("first", 1400), None).unwrap();
    assert_eq!(first.participant.seed, 2);
    assert!(!first.started);
    assert_eq!(fetch(&h, &t.id).status, TournamentStatus::RegistrationOpen);

    join(&h, &t.id, &h.user("second", 1400), None).unwrap();
    assert_eq!(
        *h.meter.recorded.lock().unwrap(),
        vec![(creator.id.clone(), TOURNAMENT_CREATION_FEATURE.to_string())]
    );
}

#[test]
fn join_rules() {
    let h = Harness::new();
    let creator = h.user("creator", 1500);
    let invited = h.user("invited", 1500);
    let stranger = h.user("stranger", 1500);
    let novice = h.user("novice", 900);

    let mut private = settings(TournamentFormat::SingleElimination, 8);
    private.is_private = true;
    private.min_elo = Some(1000);
    private.invitees = vec![invited.id.clone(), novice.id.clone()];
    let t = create(&h, &creator, private);

    assert_eq!(
        join(&h, "missing", &invited, None).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        join(&h, &t.id, &stranger, None).unwrap_err().kind(),
        ErrorKind::Forbidden
    );
    assert!(matches!(
        join(&h, &t.id, &creator, None),
        Err(ArenaError::AlreadyRegistered)
    ));
    assert!(matches!(
        join(&h, &t.id, &novice, None),
        Err(ArenaError::EloTooLow {
            required: 1000,
            actual: 900
        })
    ));
    assert!(join(&h, &t.id, &invited, None).is_ok());
}

#[test]
fn championship_sides_are_capped() {
    let h = Harness::new();
    let creator = h.user("creator", 1500);
    let t = create(&h, &creator, settings(TournamentFormat::Championship, 4));

    let user = h.user("undecided", 1500);
    assert!(matches!(
        join(&h, &t.id, &user, None),
        Err(ArenaError::PositionRequired)
    ));

    join(&h, &t.id, &h.user("pro", 1500), Some(Position::Pro)).unwrap();
    match join(&h, &t.id, &user, Some(Position::Pro)) {
        Err(ArenaError::PositionFull { side, suggested }) => {
            assert_eq!(side, Position::Pro);
            assert_eq!(suggested, Position::Con);
        }
        other => panic!("expected PositionFull, got {other:?}"),
    }

    let joined = join(&h, &t.id, &user, Some(Position::Con)).unwrap();
    assert_eq!(joined.participant.selected_position, Some(Position::Con));
}

#[test]
fn filling_the_tournament_starts_it() {
    let h = Harness::new();
    let (t, users) =
        full_tournament(&h, settings(TournamentFormat::SingleElimination, 4));

    assert_eq!(t.status, TournamentStatus::InProgress);
    assert_eq!(t.current_round, 1);
    assert_eq!(t.total_rounds, 2);
    assert_eq!(t.started_at, Some(h.now()));

    // reseeded by rating: the creator registered first but is rated lowest
    for (i, user) in users.iter().enumerate() {
        let p = participant_of(&h, &t.id, user);
        assert_eq!(p.seed, i as i64 + 1);
        assert_eq!(p.elo_at_start, Some(user.elo));
        assert_eq!(p.status, ParticipantStatus::Active);
    }

    let matches = open_matches(&h, &t.id);
    assert_eq!(matches.len(), 2);
    for m in &matches {
        let debate = h.debate(m.debate_id.as_deref().unwrap());
        assert_eq!(debate.status, DebateStatus::Active);
        assert_eq!(debate.tournament_match_id.as_deref(), Some(m.id.as_str()));
    }
    let first = h.debate(matches[0].debate_id.as_deref().unwrap());
    assert_eq!(first.challenger_id, users[0].id);
    assert_eq!(first.opponent_id.as_deref(), Some(users[3].id.as_str()));

    assert_eq!(
        h.notifier.of_kind(NotificationKind::TournamentStarted).len(),
        4
    );

    let late = h.user("late", 1500);
    assert_eq!(
        join(&h, &t.id, &late, None).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(participants(&h, &t.id).len(), 4);
}

#[test]
fn starting_needs_two_participants() {
    let h = Harness::new();
    let creator = h.user("creator", 1500);
    let t =
        create(&h, &creator, settings(TournamentFormat::SingleElimination, 4));

    let err = h
        .with_conn(|conn| start_tournament(conn, &h.services, &t.id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    join(&h, &t.id, &h.user("second", 1500), None).unwrap();
    let started = h
        .with_conn(|conn| start_tournament(conn, &h.services, &t.id))
        .unwrap();
    assert_eq!(started.status, TournamentStatus::InProgress);
    assert_eq!(started.total_rounds, 1);
}

#[test]
fn full_tournament_turns_away_late_joiners() {
    let h = Harness::new();
    let creator = h.user("creator", 1500);
    let t =
        create(&h, &creator, settings(TournamentFormat::SingleElimination, 3));
    join(&h, &t.id, &h.user("second", 1500), None).unwrap();

    // keep the tournament in registration by stopping it from starting
    h.with_conn(|conn| {
        diesel::sql_query(
            "CREATE TRIGGER no_rounds BEFORE INSERT ON tournament_rounds \
             BEGIN SELECT RAISE(ABORT, 'rounds are frozen'); END;",
        )
        .execute(conn)
    })
    .unwrap();

    let third = h.user("third", 1500);
    let joined = join(&h, &t.id, &third, None).unwrap();
    assert!(!joined.started);
    assert_eq!(joined.participant.seed, 3);
    assert_eq!(fetch(&h, &t.id).status, TournamentStatus::RegistrationOpen);
    assert_eq!(
        participant_of(&h, &t.id, &third).status,
        ParticipantStatus::Registered
    );
    assert!(h.notifier.of_kind(NotificationKind::TournamentStarted).is_empty());

    let late = h.user("late", 1500);
    assert!(matches!(
        join(&h, &t.id, &late, None),
        Err(ArenaError::TournamentFull)
    ));
    assert_eq!(participants(&h, &t.id).len(), 3);

    // once the fault is gone the tournament can be started by hand
    h.with_conn(|conn| {
        diesel::sql_query("DROP TRIGGER no_rounds").execute(conn)
    })
    .unwrap();
    let started = h
        .with_conn(|conn| start_tournament(conn, &h.services, &t.id))
        .unwrap();
    assert_eq!(started.status, TournamentStatus::InProgress);
    assert_eq!(open_matches(&h, &t.id).len(), 1);
}

#[test]
fn single_elimination_runs_to_the_end() {
    let h = Harness::new();
    let (t, users) =
        full_tournament(&h, settings(TournamentFormat::SingleElimination, 4));

    let round_one = open_matches(&h, &t.id);
    let loser = &users[3];
    play(&h, &round_one[0], true);

    // eliminated as soon as the match is decided
    let p = participant_of(&h, &t.id, loser);
    assert_eq!(p.status, ParticipantStatus::Eliminated);
    assert_eq!(p.elimination_round, Some(1));
    assert_eq!(p.elimination_reason, Some(EliminationReason::LostMatch));

    play(&h, &round_one[1], true);
    let t = fetch(&h, &t.id);
    assert_eq!(t.current_round, 2);

    play_out(&h, &t.id, || true);
    let t = fetch(&h, &t.id);
    assert_eq!(t.status, TournamentStatus::Completed);
    assert_eq!(t.ended_at, Some(h.now()));

    let champion = participant_of(&h, &t.id, &users[0]);
    assert_eq!(champion.status, ParticipantStatus::Active);
    assert_eq!(champion.wins, 2);
    let runner_up = participant_of(&h, &t.id, &users[1]);
    assert_eq!(runner_up.status, ParticipantStatus::Eliminated);
    assert_eq!(runner_up.elimination_round, Some(2));
}

#[test]
fn odd_field_gives_the_top_seed_a_bye() {
    let h = Harness::new();
    let (t, users) =
        full_tournament(&h, settings(TournamentFormat::SingleElimination, 3));
    assert_eq!(t.total_rounds, 2);

    let rounds = h.with_conn(|conn| Round::of_tournament(&t.id, conn)).unwrap();
    let round_one = h
        .with_conn(|conn| BracketMatch::of_round(&rounds[0].id, conn))
        .unwrap();
    assert_eq!(round_one.len(), 2);
    let bye = &round_one[0];
    assert!(bye.is_bye() && bye.is_resolved());
    assert_eq!(bye.winner_id.as_deref(), Some(users[0].id.as_str()));
    assert_eq!(participant_of(&h, &t.id, &users[0]).wins, 0);

    play(&h, &round_one[1], false);
    let final_match = open_matches(&h, &t.id);
    assert_eq!(final_match.len(), 1);
    let debate = h.debate(final_match[0].debate_id.as_deref().unwrap());
    assert!(debate.is_participant(&users[0].id));
    assert!(debate.is_participant(&users[2].id));
}

#[test]
fn king_of_the_hill_losers_wait_for_the_round() {
    let h = Harness::new();
    let (t, users) =
        full_tournament(&h, settings(TournamentFormat::KingOfTheHill, 4));

    let round_one = open_matches(&h, &t.id);
    play(&h, &round_one[0], true);
    let first_loser = participant_of(&h, &t.id, &users[3]);
    assert_eq!(first_loser.status, ParticipantStatus::Active);

    play(&h, &round_one[1], true);
    for loser in &users[2..] {
        let p = participant_of(&h, &t.id, loser);
        assert_eq!(p.status, ParticipantStatus::Eliminated);
        assert_eq!(p.elimination_round, Some(1));
        assert_eq!(p.elimination_reason, Some(EliminationReason::LostRound));
    }
}

#[test]
fn championship_upset_takes_the_better_seed() {
    let h = Harness::new();
    let (t, users) =
        full_tournament(&h, settings(TournamentFormat::Championship, 4));

    // users[0] (seed 1) argues CON and meets the best PRO seed
    let round_one = open_matches(&h, &t.id);
    let opening = h.debate(round_one[0].debate_id.as_deref().unwrap());
    assert!(opening.is_participant(&users[0].id));
    let pro = participant_of(&h, &t.id, &users[1]);
    assert_eq!(pro.selected_position, Some(Position::Pro));
    assert_eq!(opening.challenger_id, users[1].id);

    // the PRO challenger, seed 2, beats seed 1
    play(&h, &round_one[0], true);
    assert_eq!(participant_of(&h, &t.id, &users[1]).seed, 1);
    let beaten = participant_of(&h, &t.id, &users[0]);
    assert_eq!(beaten.seed, 2);
    assert_eq!(beaten.status, ParticipantStatus::Active);

    play(&h, &round_one[1], true);
    let beaten = participant_of(&h, &t.id, &users[0]);
    assert_eq!(beaten.status, ParticipantStatus::Eliminated);
    assert_eq!(beaten.elimination_reason, Some(EliminationReason::LostRound));
}

#[test]
fn forfeited_match_goes_to_the_better_seed() {
    let h = Harness::new();
    let (t, users) =
        full_tournament(&h, settings(TournamentFormat::SingleElimination, 2));

    h.advance_clock(TimeDelta::hours(2));
    Scheduler::new(h.pool.clone(), h.services.clone())
        .sweep()
        .unwrap();

    let t = fetch(&h, &t.id);
    assert_eq!(t.status, TournamentStatus::Completed);
    let winner = participant_of(&h, &t.id, &users[0]);
    assert_eq!(winner.wins, 1);
    let loser = participant_of(&h, &t.id, &users[1]);
    assert_eq!(loser.status, ParticipantStatus::Eliminated);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn king_of_the_hill_finalist_is_eliminated(
        n in 2i64..=9,
        picks in prop::collection::vec(any::<bool>(), 1..16),
    ) {
        let h = Harness::new();
        let (t, _) =
            full_tournament(&h, settings(TournamentFormat::KingOfTheHill, n));
        let mut picks = picks.into_iter().cycle();
        play_out(&h, &t.id, || picks.next().unwrap_or(true));

        let t = fetch(&h, &t.id);
        prop_assert_eq!(t.status, TournamentStatus::Completed);

        let rounds = h
            .with_conn(|conn| Round::of_tournament(&t.id, conn))
            .unwrap();
        let last = rounds.last().unwrap();
        prop_assert_eq!(last.round_number, t.total_rounds);

        let finals = h
            .with_conn(|conn| BracketMatch::of_round(&last.id, conn))
            .unwrap()
            .into_iter()
            .filter(|m| !m.is_bye())
            .collect::<Vec<_>>();
        prop_assert_eq!(finals.len(), 1);

        let winner = finals[0].winner_id.clone().unwrap();
        let all = participants(&h, &t.id);
        let loser = all
            .iter()
            .filter(|p| {
                p.id == finals[0].participant1_id
                    || Some(&p.id) == finals[0].participant2_id.as_ref()
            })
            .find(|p| p.user_id != winner)
            .unwrap();
        prop_assert_eq!(loser.status, ParticipantStatus::Eliminated);
        prop_assert_eq!(loser.elimination_round, Some(t.total_rounds));
        prop_assert_eq!(
            loser.elimination_reason,
            Some(EliminationReason::LostFinal)
        );

        let active = all.iter().filter(|p| p.is_active()).count();
        prop_assert_eq!(active, 1);
    }
}
