//! Balance changes, each recorded as an auditable ledger entry.

use chrono::NaiveDateTime;
use diesel::{prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ArenaError, ArenaResult},
    schema::{ledger_entries, users},
    sql_enum::text_enum,
};

text_enum! {
    pub enum LedgerKind {
        TournamentPrize => "TOURNAMENT_PRIZE",
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = ledger_entries)]
#[diesel(check_for_backend(Sqlite))]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub kind: LedgerKind,
    pub amount: i64,
    pub balance_after: i64,
    pub description: String,
    /// JSON.
    pub metadata: String,
    pub created_at: NaiveDateTime,
}

impl LedgerEntry {
    pub fn of_user(
        user_id: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Vec<LedgerEntry>> {
        ledger_entries::table
            .filter(ledger_entries::user_id.eq(user_id))
            .order_by(ledger_entries::created_at.asc())
            .select(LedgerEntry::as_select())
            .load(conn)
    }
}

/// Adds `amount` to the user's balance and records it. Does not open a
/// transaction; callers make this atomic with whatever else they do.
pub fn credit(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: i64,
    kind: LedgerKind,
    description: &str,
    metadata: &serde_json::Value,
    now: NaiveDateTime,
) -> ArenaResult<LedgerEntry> {
    let n = diesel::update(users::table.filter(users::id.eq(user_id)))
        .set(users::balance.eq(users::balance + amount))
        .execute(conn)?;
    if n == 0 {
        return Err(ArenaError::NotFound("user"));
    }
    let balance_after = users::table
        .filter(users::id.eq(user_id))
        .select(users::balance)
        .get_result::<i64>(conn)?;

    let entry = LedgerEntry {
        id: Uuid::now_v7().to_string(),
        user_id: user_id.to_string(),
        kind,
        amount,
        balance_after,
        description: description.to_string(),
        metadata: metadata.to_string(),
        created_at: now,
    };

    diesel::insert_into(ledger_entries::table)
        .values((
            ledger_entries::id.eq(&entry.id),
            ledger_entries::user_id.eq(&entry.user_id),
            ledger_entries::kind.eq(entry.kind),
            ledger_entries::amount.eq(entry.amount),
            ledger_entries::balance_after.eq(entry.balance_after),
            ledger_entries::description.eq(&entry.description),
            ledger_entries::metadata.eq(&entry.metadata),
            ledger_entries::created_at.eq(entry.created_at),
        ))
        .execute(conn)?;

    Ok(entry)
}
