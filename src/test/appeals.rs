use chrono::TimeDelta;

use crate::{
    debates::{
        AppealStatus, Debate, DebateStatus,
        appeals::{AppealRequest, submit_appeal},
        verdicts::{JobReason, Verdict, apply_verdict},
    },
    error::{ArenaError, ArenaResult, ErrorKind},
    notify::NotificationKind,
    test::{
        Harness,
        tournaments::{
            fetch, full_tournament, open_matches, participant_of, play,
            settings,
        },
        verdict,
    },
    tournaments::{
        TournamentFormat, TournamentStatus, bracket::BracketMatch,
        participants::ParticipantStatus,
    },
    users::User,
};

const REASON: &str = "The judges ignored my rebuttal in the second round \
                      and scored a point my opponent never made.";

/// A one round debate which `winner` won, judged at the harness's current
/// time.
fn judged_debate(h: &Harness) -> (Debate, User, User) {
    let (debate, winner, loser) = h.active_debate(1);
    h.say(&debate.id, &winner.id);
    h.say(&debate.id, &loser.id);
    let debate = h
        .with_conn(|conn| {
            let input = verdict(Some(&winner.id));
            apply_verdict(conn, &h.services, &debate.id, input)
        })
        .unwrap();
    (debate, winner, loser)
}

fn appeal(
    h: &Harness,
    debate_id: &str,
    requester_id: &str,
) -> ArenaResult<Debate> {
    let verdict_ids = h
        .with_conn(|conn| Verdict::of_debate(debate_id, conn))
        .unwrap()
        .into_iter()
        .map(|v| v.id)
        .collect();

    h.with_conn(|conn| {
        submit_appeal(
            conn,
            &h.services,
            AppealRequest {
                debate_id: debate_id.to_string(),
                requester_id: requester_id.to_string(),
                reason: REASON.to_string(),
                verdict_ids,
            },
        )
    })
}

#[test]
fn loser_can_appeal() {
    let mut h = Harness::new();
    let (debate, winner, loser) = judged_debate(&h);
    h.queued_jobs();

    let appealed = appeal(&h, &debate.id, &loser.id).unwrap();
    assert_eq!(appealed.status, DebateStatus::Appealed);
    assert_eq!(appealed.appeal_status, Some(AppealStatus::Pending));
    assert_eq!(appealed.appeal_count, 1);
    assert_eq!(appealed.winner_id, None);
    assert_eq!(
        appealed.original_winner_id.as_deref(),
        Some(winner.id.as_str())
    );
    assert_eq!(appealed.appealed_by.as_deref(), Some(loser.id.as_str()));
    assert_eq!(appealed.appealed_verdict_ids().len(), 1);

    let jobs = h.queued_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].reason, JobReason::Appeal);

    let submitted = h.notifier.of_kind(NotificationKind::AppealSubmitted);
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].user_id, loser.id);
    let received = h.notifier.of_kind(NotificationKind::AppealReceived);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].user_id, winner.id);
}

#[test]
fn winner_cannot_appeal() {
    let h = Harness::new();
    let (debate, winner, _) = judged_debate(&h);

    let err = appeal(&h, &debate.id, &winner.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(h.debate(&debate.id).appeal_count, 0);
}

#[test]
fn settled_tournament_match_cannot_be_appealed() {
    let h = Harness::new();
    let (t, users) =
        full_tournament(&h, settings(TournamentFormat::SingleElimination, 2));
    let decider = open_matches(&h, &t.id).remove(0);
    let winner = play(&h, &decider, true);
    assert_eq!(winner, users[0].id);

    let debate_id = decider.debate_id.as_deref().unwrap();
    let err = appeal(&h, debate_id, &users[1].id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let debate = h.debate(debate_id);
    assert_eq!(debate.status, DebateStatus::VerdictReady);
    assert_eq!(debate.winner_id.as_deref(), Some(users[0].id.as_str()));
    assert_eq!(debate.appeal_count, 0);

    let settled = h
        .with_conn(|conn| BracketMatch::fetch(&decider.id, conn))
        .unwrap();
    assert_eq!(settled.winner_id.as_deref(), Some(users[0].id.as_str()));
    assert_eq!(
        participant_of(&h, &t.id, &users[1]).status,
        ParticipantStatus::Eliminated
    );
    assert_eq!(fetch(&h, &t.id).status, TournamentStatus::Completed);
}

#[test]
fn appeal_window_is_forty_eight_hours() {
    let h = Harness::new();
    let (on_time, _, loser) = judged_debate(&h);
    let (late, _, late_loser) = judged_debate(&h);

    h.advance_clock(TimeDelta::hours(47));
    assert!(appeal(&h, &on_time.id, &loser.id).is_ok());

    h.advance_clock(TimeDelta::hours(2));
    assert!(matches!(
        appeal(&h, &late.id, &late_loser.id),
        Err(ArenaError::WindowExpired { hours: 48 })
    ));
}

#[test]
fn only_one_appeal_ever() {
    let h = Harness::new();
    let (debate, winner, loser) = judged_debate(&h);

    appeal(&h, &debate.id, &loser.id).unwrap();
    assert!(matches!(
        appeal(&h, &debate.id, &loser.id),
        Err(ArenaError::InvalidState(_))
    ));

    // the new verdict resolves the appeal, but does not allow another
    let resolved = h
        .with_conn(|conn| {
            let input = verdict(Some(&winner.id));
            apply_verdict(conn, &h.services, &debate.id, input)
        })
        .unwrap();
    assert_eq!(resolved.status, DebateStatus::VerdictReady);
    assert_eq!(resolved.appeal_status, Some(AppealStatus::Resolved));
    assert_eq!(resolved.appeal_resolved_at, Some(h.now()));
    assert_eq!(resolved.appeal_count, 1);

    assert!(matches!(
        appeal(&h, &debate.id, &loser.id),
        Err(ArenaError::AlreadyAppealed)
    ));
}

#[test]
fn short_reason_names_the_minimum_length() {
    let h = Harness::new();
    let (debate, _, loser) = judged_debate(&h);

    let err = h
        .with_conn(|conn| {
            submit_appeal(
                conn,
                &h.services,
                AppealRequest {
                    debate_id: debate.id.clone(),
                    requester_id: loser.id.clone(),
                    reason: "unfair".to_string(),
                    verdict_ids: vec!["v".to_string()],
                },
            )
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("50 characters"), "{err}");
}

#[test]
fn disputed_verdicts_must_belong_to_the_debate() {
    let h = Harness::new();
    let (debate, _, loser) = judged_debate(&h);

    let err = h
        .with_conn(|conn| {
            submit_appeal(
                conn,
                &h.services,
                AppealRequest {
                    debate_id: debate.id.clone(),
                    requester_id: loser.id.clone(),
                    reason: REASON.to_string(),
                    verdict_ids: vec!["someone-elses-verdict".to_string()],
                },
            )
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn unknown_debate_is_not_found() {
    let h = Harness::new();
    let user = h.user("someone", 1200);

    let err = h
        .with_conn(|conn| {
            submit_appeal(
                conn,
                &h.services,
                AppealRequest {
                    debate_id: "missing".to_string(),
                    requester_id: user.id.clone(),
                    reason: REASON.to_string(),
                    verdict_ids: vec!["v".to_string()],
                },
            )
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
