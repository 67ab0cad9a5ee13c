//! Pure pairing rules. The bracket module turns these into matches.

use itertools::Itertools;

use crate::tournaments::Position;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entrant {
    pub participant_id: String,
    pub seed: i64,
    pub position: Option<Position>,
}

/// One match of a round, in bracket order. `second` is `None` for a bye.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pairing {
    pub first: String,
    pub second: Option<String>,
}

impl Pairing {
    fn between(first: &Entrant, second: &Entrant) -> Self {
        Self {
            first: first.participant_id.clone(),
            second: Some(second.participant_id.clone()),
        }
    }

    fn bye(entrant: &Entrant) -> Self {
        Self {
            first: entrant.participant_id.clone(),
            second: None,
        }
    }

    pub fn is_bye(&self) -> bool {
        self.second.is_none()
    }
}

/// With an odd number of entrants the best seed sits the round out. Returns
/// the bye (if any) and everybody else.
fn take_bye(mut entrants: Vec<Entrant>) -> (Option<Pairing>, Vec<Entrant>) {
    if entrants.len() % 2 == 0 {
        return (None, entrants);
    }
    let Some((best, _)) =
        entrants.iter().enumerate().min_by_key(|(_, e)| e.seed)
    else {
        return (None, entrants);
    };
    let best = entrants.remove(best);
    (Some(Pairing::bye(&best)), entrants)
}

/// The opening round: best seed against worst, second against second worst,
/// and so on.
pub fn fold_by_seed(entrants: Vec<Entrant>) -> Vec<Pairing> {
    let (bye, mut rest) = take_bye(entrants);
    rest.sort_by_key(|e| e.seed);

    let n = rest.len();
    bye.into_iter()
        .chain(
            rest[..n / 2]
                .iter()
                .zip(rest[n / 2..].iter().rev())
                .map(|(high, low)| Pairing::between(high, low)),
        )
        .collect()
}

/// A championship's opening round: the i-th best PRO seed against the i-th
/// best CON seed, PRO first. Whoever is left over, when the sides are
/// uneven, is folded by seed.
pub fn championship_opening(entrants: Vec<Entrant>) -> Vec<Pairing> {
    let (pro, con): (Vec<_>, Vec<_>) = entrants
        .into_iter()
        .sorted_by_key(|e| e.seed)
        .partition(|e| e.position == Some(Position::Pro));

    let matched = pro.len().min(con.len());
    let pairings = pro
        .iter()
        .zip(&con)
        .map(|(pro, con)| Pairing::between(pro, con))
        .collect::<Vec<_>>();

    let leftover = pro
        .into_iter()
        .skip(matched)
        .chain(con.into_iter().skip(matched))
        .collect::<Vec<_>>();

    pairings.into_iter().chain(fold_by_seed(leftover)).collect()
}

/// Later rounds: survivors, listed in the bracket order of the matches they
/// came through, meet their neighbour.
pub fn adjacent(survivors: Vec<Entrant>) -> Vec<Pairing> {
    let (bye, rest) = take_bye(survivors);

    bye.into_iter()
        .chain(
            rest.iter()
                .tuples()
                .map(|(a, b)| Pairing::between(a, b)),
        )
        .collect()
}
