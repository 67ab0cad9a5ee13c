//! Appeals: a debater who lost can ask, once, for their debate to be judged
//! again.

use std::collections::HashSet;

use chrono::TimeDelta;
use diesel::prelude::*;

use crate::{
    debates::{
        AppealStatus, Debate, DebateStatus,
        verdicts::{JobReason, Verdict},
    },
    error::{ArenaError, ArenaResult},
    notify::{Notification, NotificationKind},
    schema::debates,
    state::Services,
    tournaments::bracket::BracketMatch,
    validation::is_valid_appeal_reason,
};

pub const APPEAL_WINDOW_HOURS: i64 = 48;

#[derive(Clone, Debug)]
pub struct AppealRequest {
    pub debate_id: String,
    pub requester_id: String,
    pub reason: String,
    /// The verdicts the requester disputes.
    pub verdict_ids: Vec<String>,
}

/// Checks the shape of the request, before anything is read from the store.
fn validate_request(request: &AppealRequest) -> ArenaResult<()> {
    is_valid_appeal_reason(&request.reason).map_err(ArenaError::Validation)?;

    if request.verdict_ids.is_empty() {
        return Err(ArenaError::validation(
            "at least one verdict must be selected",
        ));
    }
    Ok(())
}

/// Checks an appeal against the debate in the order the rules are applied.
fn check_eligibility(
    debate: &Debate,
    request: &AppealRequest,
    verdicts: &[Verdict],
    bracket_decided: bool,
    now: chrono::NaiveDateTime,
) -> ArenaResult<()> {
    let known: HashSet<&str> = verdicts.iter().map(|v| v.id.as_str()).collect();
    if let Some(unknown) = request
        .verdict_ids
        .iter()
        .find(|id| !known.contains(id.as_str()))
    {
        return Err(ArenaError::validation(format!(
            "verdict {unknown} does not belong to this debate"
        )));
    }

    if debate.status != DebateStatus::VerdictReady {
        return Err(ArenaError::invalid_state(
            "only debates with a verdict can be appealed",
        ));
    }
    let Some(winner) = &debate.winner_id else {
        return Err(ArenaError::invalid_state("this debate has no winner yet"));
    };
    if !debate.is_participant(&request.requester_id) {
        return Err(ArenaError::forbidden(
            "only the debaters may appeal a verdict",
        ));
    }
    if winner == &request.requester_id {
        return Err(ArenaError::forbidden(
            "the winner of a debate cannot appeal it",
        ));
    }
    if debate.appeal_count > 0 {
        return Err(ArenaError::AlreadyAppealed);
    }
    if let Some(verdict_date) = debate.verdict_date
        && now - verdict_date > TimeDelta::hours(APPEAL_WINDOW_HOURS)
    {
        return Err(ArenaError::WindowExpired {
            hours: APPEAL_WINDOW_HOURS,
        });
    }
    // the bracket has moved on from this result
    if bracket_decided {
        return Err(ArenaError::invalid_state(
            "the tournament match decided by this debate is already settled",
        ));
    }

    Ok(())
}

/// Files an appeal. On success the debate is `APPEALED` with its winner
/// cleared, both debaters are told, and a new verdict is requested in the
/// background.
#[tracing::instrument(
    skip(conn, services, request),
    fields(debate = %request.debate_id, requester = %request.requester_id)
)]
pub fn submit_appeal(
    conn: &mut SqliteConnection,
    services: &Services,
    request: AppealRequest,
) -> ArenaResult<Debate> {
    validate_request(&request)?;
    let now = services.now();

    let debate = conn.immediate_transaction(|conn| {
        let debate = Debate::fetch(&request.debate_id, conn)?;
        let verdicts = Verdict::of_debate(&request.debate_id, conn)?;
        let bracket_decided = match &debate.tournament_match_id {
            Some(match_id) => {
                BracketMatch::fetch(match_id, conn)?.is_resolved()
            }
            None => false,
        };

        check_eligibility(&debate, &request, &verdicts, bracket_decided, now)?;

        let appealed = serde_json::to_string(&request.verdict_ids)
            .map_err(|e| ArenaError::validation(e.to_string()))?;

        let n = diesel::update(
            debates::table
                .filter(debates::id.eq(&request.debate_id))
                .filter(debates::status.eq(DebateStatus::VerdictReady))
                .filter(debates::appeal_count.eq(0)),
        )
        .set((
            debates::appealed_at.eq(now),
            debates::appeal_status.eq(AppealStatus::Pending),
            debates::appeal_count.eq(1),
            debates::appealed_by.eq(&request.requester_id),
            debates::original_winner_id.eq(&debate.winner_id),
            debates::appeal_reason.eq(request.reason.trim()),
            debates::appealed_statements.eq(&appealed),
            debates::status.eq(DebateStatus::Appealed),
            debates::winner_id.eq(None::<String>),
            debates::verdict_requested_at.eq(now),
        ))
        .execute(conn)?;

        if n == 0 {
            return Err(ArenaError::AlreadyAppealed);
        }

        Debate::fetch(&request.debate_id, conn)
    })?;

    tracing::info!("appeal accepted");

    let mut notifications = vec![
        Notification::new(
            &request.requester_id,
            NotificationKind::AppealSubmitted,
            "Appeal submitted",
            "Your appeal has been submitted and the debate will be judged \
             again.",
        )
        .debate(&request.debate_id),
    ];
    if let Some(other) = debate.other_side(&request.requester_id) {
        notifications.push(
            Notification::new(
                other,
                NotificationKind::AppealReceived,
                "Verdict appealed",
                "Your opponent has appealed the verdict of your debate.",
            )
            .debate(&request.debate_id),
        );
    }
    for notification in notifications {
        if let Err(e) = services.notifier.notify(notification) {
            tracing::warn!("{e}");
        }
    }

    if let Err(e) = services
        .verdicts
        .submit(&request.debate_id, JobReason::Appeal)
    {
        tracing::warn!(
            "could not request a new verdict, the appeal stays pending: {e}"
        );
    }

    Ok(debate)
}
