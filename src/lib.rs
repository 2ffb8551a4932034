//! Book difficulty leveling and reading goal progress for a children's
//! reading platform.
//!
//! The pure engine lives in [`leveling`], [`progress`], [`completion`] and
//! [`aggregate`]; [`db`] runs it transactionally against Postgres.

pub mod aggregate;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod leveling;
pub mod models;
pub mod packed;
pub mod progress;
pub mod report;
pub mod telemetry;

pub use config::LevelingPolicy;
pub use error::{EngineError, Result};
