use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub mod clock;
pub mod config;
pub mod debates;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod schema;
mod sql_enum;
pub mod state;
pub mod tournaments;
pub mod users;
pub mod validation;

#[cfg(test)]
mod test;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
