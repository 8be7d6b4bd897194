//! Application state

use crate::config::Settings;
use crate::db::DbPool;
use crate::rate_limit::RateLimits;
use crate::tokens::TokenSigner;

pub struct AppState {
    pub db: DbPool,
    pub settings: Settings,
    pub tokens: TokenSigner,
    pub limits: RateLimits,
}

impl AppState {
    pub fn new(db: DbPool, settings: Settings) -> Self {
        let tokens = TokenSigner::new(&settings);
        let limits = RateLimits::new(&settings);
        Self {
            db,
            settings,
            tokens,
            limits,
        }
    }
}
