//! Paying out the prize pool when a tournament completes.

use std::collections::HashSet;

use diesel::prelude::*;
use indexmap::IndexMap;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::Serialize;

use crate::{
    error::{ArenaError, ArenaResult},
    ledger::{LedgerKind, credit},
    notify::{Notification, NotificationKind},
    schema::ledger_entries,
    state::Services,
    tournaments::{Tournament, TournamentStatus, standings::final_standings},
};

/// How the pool is split: place (1-based) to percentage, in the order the
/// places were listed.
#[derive(Clone, Debug, PartialEq)]
pub struct Distribution {
    places: IndexMap<usize, Decimal>,
}

impl Default for Distribution {
    fn default() -> Self {
        Self {
            places: IndexMap::from([
                (1, Decimal::from(60)),
                (2, Decimal::from(30)),
                (3, Decimal::from(10)),
            ]),
        }
    }
}

/// "1st", "2ND", "3rd", "4th", or a bare number.
fn parse_place(label: &str) -> Option<usize> {
    let label = label.trim().to_ascii_lowercase();
    let digits = ["st", "nd", "rd", "th"]
        .iter()
        .find_map(|suffix| label.strip_suffix(suffix))
        .unwrap_or(label.as_str());
    digits.parse::<usize>().ok().filter(|place| *place >= 1)
}

/// A number, or a string such as "60%" or "60".
fn parse_percentage(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.strip_suffix('%').unwrap_or(s).trim().parse().ok()
        }
        _ => None,
    }
}

impl Distribution {
    /// Parses a stored distribution, such as `{"1st": 50, "2nd": "30%"}`.
    pub fn parse(json: &str) -> Result<Distribution, String> {
        let raw: IndexMap<String, serde_json::Value> =
            serde_json::from_str(json)
                .map_err(|e| format!("invalid prize distribution: {e}"))?;

        let mut places = IndexMap::new();
        for (label, value) in &raw {
            let place = parse_place(label).ok_or_else(|| {
                format!("invalid prize place {label:?}")
            })?;
            let pct = parse_percentage(value)
                .filter(|pct| !pct.is_sign_negative())
                .ok_or_else(|| {
                    format!("invalid percentage for place {label:?}")
                })?;
            if places.insert(place, pct).is_some() {
                return Err(format!("place {place} is listed twice"));
            }
        }

        let total: Decimal = places.values().sum();
        if total > Decimal::ONE_HUNDRED {
            return Err(format!(
                "prize percentages add up to {total}%, more than 100%"
            ));
        }
        Ok(Distribution { places })
    }

    /// The distribution to pay out, falling back to the default split when
    /// none is set or the stored one cannot be read.
    pub fn for_tournament(tournament: &Tournament) -> Distribution {
        match tournament.prize_distribution.as_deref() {
            None => Distribution::default(),
            Some(json) => Distribution::parse(json).unwrap_or_else(|e| {
                tracing::warn!(
                    tournament = %tournament.id,
                    "{e}, using the default distribution"
                );
                Distribution::default()
            }),
        }
    }

    pub fn percentage(&self, place: usize) -> Option<Decimal> {
        self.places.get(&place).copied()
    }

    pub fn places(&self) -> impl Iterator<Item = (usize, Decimal)> + '_ {
        self.places.iter().map(|(place, pct)| (*place, *pct))
    }
}

/// `floor(pool * percentage / 100)`.
pub fn prize_amount(pool: i64, percentage: Decimal) -> i64 {
    (Decimal::from(pool) * percentage / Decimal::ONE_HUNDRED)
        .floor()
        .to_i64()
        .unwrap_or(0)
}

fn ordinal(place: usize) -> String {
    let suffix = match (place % 10, place % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{place}{suffix}")
}

#[derive(Clone, Debug, Serialize)]
pub struct Award {
    pub user_id: String,
    pub place: usize,
    pub percentage: Decimal,
    pub amount: i64,
}

#[derive(Debug, Default)]
pub struct PrizeReport {
    pub awarded: Vec<Award>,
    /// Places whose payout was rolled back. Other places are unaffected.
    pub failed: Vec<(usize, ArenaError)>,
}

fn award_place(
    conn: &mut SqliteConnection,
    services: &Services,
    tournament: &Tournament,
    award: &Award,
) -> ArenaResult<()> {
    let label = ordinal(award.place);
    let metadata = serde_json::json!({
        "tournamentId": tournament.id,
        "place": award.place,
        "percentage": award.percentage,
    });

    credit(
        conn,
        &award.user_id,
        award.amount,
        LedgerKind::TournamentPrize,
        &format!("{label} place in {}", tournament.name),
        &metadata,
        services.now(),
    )?;

    services.notifier.notify(
        Notification::new(
            &award.user_id,
            NotificationKind::TournamentPrize,
            "Tournament prize",
            format!(
                "You finished {label} in {} and won {}.",
                tournament.name, award.amount
            ),
        )
        .tournament(&tournament.id),
    )?;

    Ok(())
}

/// Places of this tournament which already have a prize entry in the
/// ledger.
fn paid_places(
    conn: &mut SqliteConnection,
    tournament_id: &str,
) -> ArenaResult<HashSet<usize>> {
    let entries = ledger_entries::table
        .filter(ledger_entries::kind.eq(LedgerKind::TournamentPrize))
        .select(ledger_entries::metadata)
        .load::<String>(conn)?;

    Ok(entries
        .iter()
        .filter_map(|metadata| {
            serde_json::from_str::<serde_json::Value>(metadata).ok()
        })
        .filter(|metadata| metadata["tournamentId"] == tournament_id)
        .filter_map(|metadata| metadata["place"].as_u64())
        .map(|place| place as usize)
        .collect())
}

/// Pays every place in both the standings and the distribution, except
/// those in `skip`. Each place gets a savepoint of its own, so a failure
/// (of the notifier, say) undoes that place alone.
fn pay_places(
    conn: &mut SqliteConnection,
    services: &Services,
    tournament: &Tournament,
    skip: &HashSet<usize>,
) -> ArenaResult<PrizeReport> {
    let mut report = PrizeReport::default();
    if tournament.prize_pool <= 0 {
        return Ok(report);
    }

    let distribution = Distribution::for_tournament(tournament);
    let standings = final_standings(conn, &tournament.id)?;

    for (place, participant) in (1..).zip(&standings) {
        if skip.contains(&place) {
            continue;
        }
        let Some(percentage) = distribution.percentage(place) else {
            continue;
        };
        let award = Award {
            user_id: participant.user_id.clone(),
            place,
            percentage,
            amount: prize_amount(tournament.prize_pool, percentage),
        };

        match conn.transaction(|conn| {
            award_place(conn, services, tournament, &award)
        }) {
            Ok(()) => {
                tracing::info!(
                    user = %award.user_id,
                    place,
                    amount = award.amount,
                    "prize credited"
                );
                report.awarded.push(award);
            }
            Err(e) => {
                tracing::error!(
                    place,
                    user = %award.user_id,
                    "prize not paid: {e}"
                );
                report.failed.push((place, e));
            }
        }
    }

    Ok(report)
}

/// Pays each place which is both in the standings and in the distribution.
/// Must be called exactly once, as the tournament completes; places which
/// fail are left for [`retry_prizes`].
#[tracing::instrument(skip_all, fields(tournament = %tournament.id))]
pub fn distribute_prizes(
    conn: &mut SqliteConnection,
    services: &Services,
    tournament: &Tournament,
) -> ArenaResult<PrizeReport> {
    pay_places(conn, services, tournament, &HashSet::new())
}

/// Pays the places of a completed tournament which have no prize entry in
/// the ledger yet. Places already paid are never paid twice.
#[tracing::instrument(skip(conn, services))]
pub fn retry_prizes(
    conn: &mut SqliteConnection,
    services: &Services,
    tournament_id: &str,
) -> ArenaResult<PrizeReport> {
    conn.immediate_transaction(|conn| {
        let tournament = Tournament::fetch(tournament_id, conn)?;
        if tournament.status != TournamentStatus::Completed {
            return Err(ArenaError::invalid_state(
                "prizes are only paid once a tournament has completed",
            ));
        }
        let paid = paid_places(conn, tournament_id)?;
        pay_places(conn, services, &tournament, &paid)
    })
}
