use std::cmp::Ordering;

use diesel::SqliteConnection;

use crate::{
    error::ArenaResult,
    tournaments::participants::{Participant, ParticipantStatus},
};

/// How far a participant got: still standing beats any elimination, and a
/// later elimination beats an earlier one. Byes carry a participant forward
/// without a win, so this ranks ahead of the win count.
fn progress(p: &Participant) -> i64 {
    match (p.status, p.elimination_round) {
        (ParticipantStatus::Eliminated, Some(round)) => round,
        (ParticipantStatus::Eliminated, None) => 0,
        _ => i64::MAX,
    }
}

/// Furthest progress first, then most wins; the better (lower) seed breaks
/// ties, then registration order.
pub fn standings_order(a: &Participant, b: &Participant) -> Ordering {
    progress(b)
        .cmp(&progress(a))
        .then(b.wins.cmp(&a.wins))
        .then(a.seed.cmp(&b.seed))
        .then(a.registered_at.cmp(&b.registered_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn final_standings(
    conn: &mut SqliteConnection,
    tournament_id: &str,
) -> ArenaResult<Vec<Participant>> {
    let mut participants = Participant::of_tournament(tournament_id, conn)?;
    participants.sort_by(standings_order);
    Ok(participants)
}
