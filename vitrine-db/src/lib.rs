pub mod client;

mod batch;
mod record;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
