use chrono::NaiveDateTime;
use diesel::{prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ArenaError, schema::users};

/// The store-side view of a user: their rating (maintained by the rating
/// service, read-only here) and their balance.
#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(Sqlite))]
pub struct User {
    pub id: String,
    pub username: String,
    pub elo: i64,
    pub balance: i64,
    pub created_at: NaiveDateTime,
}

impl User {
    #[tracing::instrument(skip(conn))]
    pub fn fetch(
        user_id: &str,
        conn: &mut SqliteConnection,
    ) -> Result<User, ArenaError> {
        users::table
            .filter(users::id.eq(user_id))
            .select(User::as_select())
            .first(conn)
            .optional()?
            .ok_or(ArenaError::NotFound("user"))
    }

    pub fn create(
        username: &str,
        elo: i64,
        now: NaiveDateTime,
        conn: &mut SqliteConnection,
    ) -> Result<User, ArenaError> {
        let user = User {
            id: Uuid::now_v7().to_string(),
            username: username.to_string(),
            elo,
            balance: 0,
            created_at: now,
        };

        diesel::insert_into(users::table)
            .values((
                users::id.eq(&user.id),
                users::username.eq(&user.username),
                users::elo.eq(user.elo),
                users::balance.eq(user.balance),
                users::created_at.eq(user.created_at),
            ))
            .execute(conn)?;

        Ok(user)
    }
}
