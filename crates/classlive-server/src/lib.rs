//! Classlive Server - live classroom session management
//!
//! Teachers author templates and launch time-bounded runs; students join a
//! LIVE run with a short numeric code, identified only by (name, rejoin PIN);
//! their activity logs feed the live monitoring snapshot.
//!
//! Key invariants:
//! - A run only moves READY → LIVE → ENDED; ENDED is terminal
//! - Among active join codes, a code value is globally unique
//! - One enrollment per (run, normalized name); one log per
//!   (run, student, activity, turn)
//! - Races on those constraints are resolved by the database and translated
//!   into domain errors, never surfaced as internal faults

pub mod api;
pub mod codes;
pub mod config;
pub mod db;
pub mod error;
pub mod guards;
pub mod models;
pub mod observability;
pub mod pins;
pub mod rate_limit;
pub mod snapshot;
pub mod state;
pub mod tokens;

pub use db::DbPool;
pub use error::ApiError;
pub use observability::init_sentry;
pub use state::AppState;
